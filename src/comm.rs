/// Host link: serial NDJSON telemetry out, host commands in.
///
/// The beacon itself advertises connection-less, so the serial console is
/// the only place a host can read estimates or retune the fusion loop.
use crate::config::FusionConfig;
use crate::protocol::{DeviceMessage, HostCommand, RawCommand, MAX_MSG_LEN};

/// BLE advertising name
pub const BLE_ADV_NAME: &str = "DisasterBeacon";

/// Serial baud rate
pub const SERIAL_BAUD: u32 = 115200;

/// What the caller owes the host after [`handle_command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    None,
    Status,
    Position,
}

// ── Serialization helpers ──────────────────────────────────────────────

/// Render one telemetry line for the serial console.
///
/// The newline is added when it fits; a message that fills `buf` exactly
/// goes out unterminated. `None` if the JSON does not fit at all.
pub fn serialize_message(msg: &DeviceMessage, buf: &mut [u8]) -> Option<usize> {
    let len = serde_json_core::to_slice(msg, buf).ok()?;
    match buf.get_mut(len) {
        Some(slot) => {
            *slot = b'\n';
            Some(len + 1)
        }
        None => Some(len),
    }
}

/// Decode one console line into a [`HostCommand`]. Trailing CR/LF and
/// blanks are ignored.
pub fn parse_command(data: &[u8]) -> Option<HostCommand> {
    let trimmed = data.trim_ascii_end();
    if trimmed.is_empty() {
        return None;
    }
    let (raw, _) = serde_json_core::from_slice::<RawCommand>(trimmed).ok()?;
    match raw.cmd.as_str() {
        "status" => Some(HostCommand::GetStatus),
        "position" => Some(HostCommand::GetPosition),
        "drift" => raw
            .budget
            .map(|budget| HostCommand::SetDriftBudget { budget }),
        other => {
            log::debug!("Unknown host command '{}'", other);
            None
        }
    }
}

/// Apply a host command to the fusion settings.
pub fn handle_command(cmd: &HostCommand, config: &mut FusionConfig) -> Reply {
    match *cmd {
        HostCommand::GetStatus => Reply::Status,
        HostCommand::GetPosition => Reply::Position,
        HostCommand::SetDriftBudget { budget } => {
            if budget.is_finite() && budget > 0.0 {
                config.drift_budget = budget;
                log::info!("Drift budget set to {} m", budget);
            } else {
                log::warn!("Ignoring drift budget {}", budget);
            }
            Reply::None
        }
    }
}

// ── Console input ──────────────────────────────────────────────────────

/// Splits console bytes into command lines.
///
/// CR and LF both end a line, so CRLF terminals yield one line. Bytes past
/// [`MAX_MSG_LEN`] restart the line; the leftover fragment fails to parse.
pub struct LineReader {
    buf: [u8; MAX_MSG_LEN],
    len: usize,
}

impl LineReader {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_MSG_LEN],
            len: 0,
        }
    }

    /// Push one console byte; returns the finished line on CR or LF.
    pub fn feed(&mut self, byte: u8) -> Option<&[u8]> {
        match byte {
            b'\n' | b'\r' => {
                let len = core::mem::take(&mut self.len);
                (len > 0).then(|| &self.buf[..len])
            }
            _ if self.len < self.buf.len() => {
                self.buf[self.len] = byte;
                self.len += 1;
                None
            }
            _ => {
                log::debug!("Console line over {} bytes dropped", MAX_MSG_LEN);
                self.len = 0;
                None
            }
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}
