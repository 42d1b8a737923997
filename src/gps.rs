/// XA1110 GPS receiver over I2C.
///
/// The module streams NMEA text through a 255-byte I2C FIFO that must be
/// drained in fixed-size transactions. Idle bytes come back as line
/// feeds, which the [`RawByteBuffer`] discards. Configuration commands go
/// out the same way, chunked with a short settle delay between chunks.
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use thiserror::Error;

use crate::board::GPS_I2C_ADDR;
use crate::config::GpsConfig;
use crate::framer::{RawByteBuffer, Sentence, SentenceFramer, GPS_MAX_PACKET_SIZE};
use crate::nmea::{self, NmeaError};

/// Upper bound on a single bus transaction.
pub const MAX_CHUNK_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum GpsError<E> {
    #[error("GPS bus not ready: {0:?}")]
    BusInit(E),
    #[error("GPS did not answer the probe: {0:?}")]
    NoResponse(E),
    #[error("GPS read failed after {attempts} attempts: {last:?}")]
    Read { attempts: u8, last: E },
    #[error("GPS write failed: {0:?}")]
    Write(E),
    #[error("command length {0} outside 1..=255")]
    InvalidCommand(usize),
    #[error(transparent)]
    Command(#[from] NmeaError),
}

pub struct GpsReceiver<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
    config: GpsConfig,
    raw: RawByteBuffer,
    framer: SentenceFramer,
}

impl<I2C, D> GpsReceiver<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    pub fn new(i2c: I2C, delay: D, config: GpsConfig) -> Self {
        Self::with_address(i2c, delay, GPS_I2C_ADDR, config)
    }

    pub fn with_address(i2c: I2C, delay: D, address: u8, config: GpsConfig) -> Self {
        Self {
            i2c,
            delay,
            address,
            config,
            raw: RawByteBuffer::new(),
            framer: SentenceFramer::new(),
        }
    }

    /// Check the module is on the bus: write one byte, read one back.
    pub fn probe(&mut self) -> Result<u8, GpsError<I2C::Error>> {
        self.i2c
            .write(self.address, &[0])
            .map_err(GpsError::BusInit)?;

        let mut response = [0u8; 1];
        self.i2c
            .read(self.address, &mut response)
            .map_err(GpsError::NoResponse)?;

        log::info!("GPS answered probe at 0x{:02x}: 0x{:02x}", self.address, response[0]);
        Ok(response[0])
    }

    /// Drain one FIFO's worth of bytes into the raw buffer.
    ///
    /// Each chunk read is retried up to `read_retries` times; the last
    /// transport error is surfaced after that. Returns the number of bytes
    /// transferred from the bus.
    pub fn poll(&mut self) -> Result<usize, GpsError<I2C::Error>> {
        let chunk_len = self.chunk_len();
        let chunks = GPS_MAX_PACKET_SIZE / chunk_len;
        let attempts = self.config.read_retries.max(1);
        let mut chunk = [0u8; MAX_CHUNK_SIZE];

        for _ in 0..chunks {
            let buf = &mut chunk[..chunk_len];
            let mut tries = 0u8;
            loop {
                tries += 1;
                match self.i2c.read(self.address, buf) {
                    Ok(()) => break,
                    Err(e) if tries >= attempts => {
                        log::warn!("GPS read failed after {} attempts", tries);
                        return Err(GpsError::Read {
                            attempts: tries,
                            last: e,
                        });
                    }
                    Err(_) => self.delay.delay_ms(self.config.settle_delay_ms),
                }
            }
            self.raw.extend(buf);
        }

        Ok(chunks * chunk_len)
    }

    /// Bytes waiting in the raw buffer. Polls the bus first when empty.
    pub fn available(&mut self) -> usize {
        if self.raw.is_empty() {
            if let Err(e) = self.poll() {
                log::debug!("GPS poll failed: {:?}", e);
            }
        }
        self.raw.available()
    }

    pub fn read(&mut self) -> Option<u8> {
        self.raw.pop()
    }

    /// Frame everything buffered, handing each sentence to `on_sentence`.
    pub fn process<F: FnMut(&Sentence)>(&mut self, on_sentence: F) {
        self.framer.drain(&mut self.raw, on_sentence);
    }

    /// Write a raw command in bus-sized chunks.
    pub fn send_command(&mut self, command: &[u8]) -> Result<(), GpsError<I2C::Error>> {
        if command.is_empty() || command.len() > GPS_MAX_PACKET_SIZE {
            return Err(GpsError::InvalidCommand(command.len()));
        }

        for part in command.chunks(self.chunk_len()) {
            self.i2c
                .write(self.address, part)
                .map_err(GpsError::Write)?;
            self.delay.delay_ms(self.config.settle_delay_ms);
        }
        Ok(())
    }

    /// Build and send a `$PMTK` command.
    pub fn send_pmtk(&mut self, packet_type: u16, data: &str) -> Result<(), GpsError<I2C::Error>> {
        let mut buf = [0u8; GPS_MAX_PACKET_SIZE];
        let len = nmea::build_command(packet_type, data, &mut buf)?;
        self.send_command(&buf[..len])
    }

    /// Restrict the module's output to RMC and GGA.
    pub fn configure_output(&mut self) -> Result<(), GpsError<I2C::Error>> {
        self.send_pmtk(nmea::PMTK_SET_NMEA_OUTPUT, nmea::NMEA_OUTPUT_RMC_GGA)?;
        log::info!("GPS output set to RMC + GGA");
        Ok(())
    }

    /// Framing and buffer health: (sentences dropped, raw bytes overrun).
    pub fn stats(&self) -> (u32, u32) {
        (self.framer.dropped(), self.raw.overruns())
    }

    pub fn config(&self) -> &GpsConfig {
        &self.config
    }

    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    fn chunk_len(&self) -> usize {
        self.config.chunk_size.clamp(1, MAX_CHUNK_SIZE)
    }
}

/// Bus and delay doubles shared by the GPS and pipeline tests.
#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation, SevenBitAddress};
    use std::collections::VecDeque;
    use std::vec::Vec;

    /// In-memory stand-in for the XA1110 FIFO.
    #[derive(Default)]
    pub(crate) struct FakeBus {
        pub fifo: VecDeque<u8>,
        pub writes: Vec<Vec<u8>>,
        pub reads: usize,
        pub failing_reads: usize,
        pub fail_writes: bool,
        pub absent: bool,
    }

    impl FakeBus {
        pub fn with_stream(bytes: &[u8]) -> Self {
            Self {
                fifo: bytes.iter().copied().collect(),
                ..Default::default()
            }
        }
    }

    impl ErrorType for FakeBus {
        type Error = ErrorKind;
    }

    impl I2c<SevenBitAddress> for FakeBus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            assert_eq!(address, GPS_I2C_ADDR);
            for op in operations {
                match op {
                    Operation::Read(buf) => {
                        if self.absent || self.failing_reads > 0 {
                            self.failing_reads = self.failing_reads.saturating_sub(1);
                            return Err(ErrorKind::Other);
                        }
                        self.reads += 1;
                        for b in buf.iter_mut() {
                            *b = self.fifo.pop_front().unwrap_or(b'\n');
                        }
                    }
                    Operation::Write(bytes) => {
                        if self.fail_writes {
                            return Err(ErrorKind::Other);
                        }
                        self.writes.push(bytes.to_vec());
                    }
                }
            }
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeDelay {
        pub total_ns: u64,
    }

    impl DelayNs for FakeDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.total_ns += u64::from(ns);
        }
    }
}
