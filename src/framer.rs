/// Byte stream framing for the GPS bus.
///
/// The XA1110 pads its I2C output with line feeds and never guarantees a
/// line ending, so sentences are delimited by the `$` that starts the
/// *next* sentence. Bytes flow bus chunk → [`RawByteBuffer`] →
/// [`SentenceFramer`] → NMEA parser.
use heapless::{Deque, String};

/// Maximum bytes of one framed sentence (without the leading `$`).
pub const MAX_SENTENCE_LEN: usize = 127;

/// Capacity of the bus-side ring buffer.
pub const GPS_MAX_PACKET_SIZE: usize = 255;

/// One framed protocol message, `$` stripped, line feeds removed.
pub type Sentence = String<MAX_SENTENCE_LEN>;

const SENTENCE_START: u8 = b'$';
const LINE_FEED: u8 = b'\n';

/// Fixed-capacity ring of raw bus bytes.
///
/// Line feeds are dropped on the way in. When the ring is full the oldest
/// byte is discarded to make room, so a slow consumer loses stale data
/// rather than corrupting the stream.
pub struct RawByteBuffer {
    bytes: Deque<u8, GPS_MAX_PACKET_SIZE>,
    overruns: u32,
}

impl RawByteBuffer {
    pub const fn new() -> Self {
        Self {
            bytes: Deque::new(),
            overruns: 0,
        }
    }

    /// Queue one byte from the bus.
    pub fn push(&mut self, byte: u8) {
        if byte == LINE_FEED {
            return;
        }
        if self.bytes.is_full() {
            self.bytes.pop_front();
            self.overruns = self.overruns.wrapping_add(1);
            log::debug!("GPS buffer overrun");
        }
        let _ = self.bytes.push_back(byte);
    }

    /// Queue a whole bus chunk.
    pub fn extend(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            self.push(byte);
        }
    }

    /// Take the oldest queued byte.
    pub fn pop(&mut self) -> Option<u8> {
        self.bytes.pop_front()
    }

    /// Number of bytes waiting to be framed.
    pub fn available(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes discarded by the overrun policy since creation.
    pub fn overruns(&self) -> u32 {
        self.overruns
    }
}

impl Default for RawByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// `$`-delimited sentence accumulator.
///
/// A sentence is dispatched when the next `$` arrives. A sentence that
/// outgrows [`MAX_SENTENCE_LEN`] or carries non-ASCII noise is dropped as a
/// whole at its closing delimiter; the framer then carries on with the
/// next one.
pub struct SentenceFramer {
    buf: Sentence,
    discard: bool,
    dropped: u32,
}

impl SentenceFramer {
    pub const fn new() -> Self {
        Self {
            buf: String::new(),
            discard: false,
            dropped: 0,
        }
    }

    /// Feed one byte. Returns the completed sentence when `byte` closes it.
    pub fn push_byte(&mut self, byte: u8) -> Option<Sentence> {
        match byte {
            LINE_FEED | 0 => None,
            SENTENCE_START => self.take(),
            _ => {
                if !self.discard && (!byte.is_ascii() || self.buf.push(byte as char).is_err()) {
                    self.discard = true;
                }
                None
            }
        }
    }

    /// Feed a run of bytes, handing every completed sentence to `on_sentence`.
    pub fn feed<F: FnMut(&Sentence)>(&mut self, bytes: &[u8], mut on_sentence: F) {
        for &byte in bytes {
            if let Some(sentence) = self.push_byte(byte) {
                on_sentence(&sentence);
            }
        }
    }

    /// Drain everything queued in `raw` through the framer.
    pub fn drain<F: FnMut(&Sentence)>(&mut self, raw: &mut RawByteBuffer, mut on_sentence: F) {
        while let Some(byte) = raw.pop() {
            if let Some(sentence) = self.push_byte(byte) {
                on_sentence(&sentence);
            }
        }
    }

    /// Sentences thrown away for being oversize or malformed.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    fn take(&mut self) -> Option<Sentence> {
        let sentence = core::mem::take(&mut self.buf);
        if core::mem::replace(&mut self.discard, false) {
            self.dropped = self.dropped.wrapping_add(1);
            log::debug!("Dropped malformed sentence ({} bytes kept)", sentence.len());
            return None;
        }
        if sentence.is_empty() {
            None
        } else {
            Some(sentence)
        }
    }
}

impl Default for SentenceFramer {
    fn default() -> Self {
        Self::new()
    }
}
