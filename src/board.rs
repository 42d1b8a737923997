/// Hardware abstraction for supported boards.
///
/// Each board module defines the GPS bus wiring, ranging sensor pins and
/// capabilities selected at compile time via feature flags.

/// 7-bit I2C address of the MT3333-based GPS module (XA1110 I2C firmware).
pub const GPS_I2C_ADDR: u8 = 0x10;

/// I2C bus clock for the GPS module. The XA1110 tolerates fast mode.
pub const GPS_I2C_FREQ_HZ: u32 = 400_000;

#[cfg(feature = "board-xiao")]
mod hw {
    pub const I2C_SDA_PIN: u8 = 5;
    pub const I2C_SCL_PIN: u8 = 6;
    /// HC-SR04 pairs, one per ranged axis: (trigger, echo)
    pub const RANGER_X_PINS: (u8, u8) = (1, 2);
    pub const RANGER_Y_PINS: (u8, u8) = (3, 4);
    pub const BOARD_NAME: &str = "xiao_esp32s3";
}

#[cfg(feature = "board-m5stickc")]
mod hw {
    pub const I2C_SDA_PIN: u8 = 32;
    pub const I2C_SCL_PIN: u8 = 33;
    pub const RANGER_X_PINS: (u8, u8) = (25, 26);
    pub const RANGER_Y_PINS: (u8, u8) = (0, 36);
    pub const BOARD_NAME: &str = "m5stickc_plus2";
}

#[cfg(not(any(feature = "board-xiao", feature = "board-m5stickc")))]
mod hw {
    pub const BOARD_NAME: &str = "unknown";
}

pub use hw::*;
