//! Disaster beacon library: localization core for a battery-powered
//! disaster-response BLE beacon.
//!
//! The device reads NMEA text from an I2C GPS module and ranging samples
//! from two ultrasonic sensors, fuses the ranging data in a Kalman filter,
//! and rebroadcasts the merged GPS position as packed-decimal manufacturer
//! data whenever the filter reports significant movement. Everything that
//! does not touch a radio or a bus driver lives here and is testable on
//! any host with `cargo test`. The ESP-IDF firmware in `firmware-std/` is a
//! thin consumer that provides the I2C bus, the sensors and NimBLE.
//!
//! The library is organized in two code layers:
//! - **Layer 1**: `framer`, `nmea`, `gps`, `matrix`, `kalman`, `beacon`,
//!   `config`, `protocol`, `comm`, `board` (`no_std`, no allocator).
//! - **Layer 2** (feature `std`): `fix_store`, `pipeline` (mutex-guarded
//!   fix records and the threaded producer/consumer pipeline).

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod beacon;
pub mod board;
pub mod comm;
pub mod config;
pub mod framer;
pub mod gps;
pub mod kalman;
pub mod matrix;
pub mod nmea;
pub mod protocol;

#[cfg(feature = "std")]
pub mod fix_store;
#[cfg(feature = "std")]
pub mod pipeline;
