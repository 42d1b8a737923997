/// JSON telemetry protocol between the beacon and a host on the serial port.
///
/// All messages are newline-delimited JSON (NDJSON).
/// Uses `heapless` types for no_std/no-alloc operation.
use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Messages sent from the device to the host
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum DeviceMessage {
    /// Merged GPS position
    #[serde(rename = "position")]
    Position {
        /// Number of locked sentence types contributing (0-2)
        sources: u8,
        lat: f64,
        lon: f64,
        /// Uptime in milliseconds
        ts: u32,
    },
    /// Fused ranging estimate
    #[serde(rename = "estimate")]
    Estimate {
        x: f64,
        y: f64,
        vx: f64,
        vy: f64,
        /// Successful filter cycles since the last reset
        updates: u32,
        ts: u32,
    },
    /// Device status report
    #[serde(rename = "status")]
    Status {
        /// Uptime in seconds
        uptime: u32,
        /// Free heap in bytes
        heap_free: u32,
        /// Locked GPS sources
        gps_sources: u8,
        /// Beacon payload refreshes since boot
        broadcasts: u32,
        /// Current drift budget in metres
        drift_budget: f64,
        /// Board identifier
        board: &'static str,
        /// Firmware version
        version: &'static str,
    },
}

/// Commands sent from the host to the device.
///
/// Deserialized manually via [`RawCommand`] in `comm::parse_command()` because
/// `serde_json_core` does not support internally tagged enums (`deserialize_any`).
#[derive(Debug, PartialEq)]
pub enum HostCommand {
    /// Request current status
    GetStatus,
    /// Request the merged GPS position
    GetPosition,
    /// Change the movement threshold that wakes the beacon
    SetDriftBudget {
        /// Metres of cumulative drift
        budget: f64,
    },
}

/// Wire format for host commands: a flat struct that `serde_json_core` can
/// deserialize without `deserialize_any`. Converted to [`HostCommand`] in
/// `comm::parse_command()`.
#[derive(Deserialize)]
pub(crate) struct RawCommand {
    pub cmd: heapless::String<16>,
    #[serde(default)]
    pub budget: Option<f64>,
}

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 256;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;
