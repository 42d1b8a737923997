/// Latest GPS fixes, one record per tracked sentence type.
///
/// Each record sits behind its own mutex so the GPS thread writing one
/// type never blocks a reader of the other. Readers always get copies.
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::nmea::{self, Decoded, FixKind, GgaFix, ParseError, RmcFix};

/// A copy of one tracked record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixRecord {
    Gga(GgaFix),
    Rmc(RmcFix),
}

impl FixRecord {
    pub fn lock(&self) -> bool {
        match self {
            FixRecord::Gga(fix) => fix.lock,
            FixRecord::Rmc(fix) => fix.lock,
        }
    }

    pub fn decimal_position(&self) -> (f64, f64) {
        match self {
            FixRecord::Gga(fix) => fix.decimal_position(),
            FixRecord::Rmc(fix) => fix.decimal_position(),
        }
    }
}

pub struct FixStore {
    gga: Mutex<GgaFix>,
    rmc: Mutex<RmcFix>,
}

impl FixStore {
    pub const fn new() -> Self {
        Self {
            gga: Mutex::new(GgaFix::new()),
            rmc: Mutex::new(RmcFix::new()),
        }
    }

    /// Decode `sentence` and update the matching record.
    ///
    /// Returns `true` when a tracked record was replaced. A rejected GGA or
    /// RMC sentence clears that record's lock flag and keeps the rest of
    /// the previous fix. Other sentence types leave the store untouched.
    pub fn ingest(&self, sentence: &str) -> bool {
        match nmea::decode(sentence) {
            Decoded::Gga(Ok(fix)) => {
                *guard(&self.gga) = fix;
                true
            }
            Decoded::Rmc(Ok(fix)) => {
                *guard(&self.rmc) = fix;
                true
            }
            Decoded::Gga(Err(e)) => {
                reject(FixKind::Gga, e);
                guard(&self.gga).lock = false;
                false
            }
            Decoded::Rmc(Err(e)) => {
                reject(FixKind::Rmc, e);
                guard(&self.rmc).lock = false;
                false
            }
            Decoded::Ignored(_) | Decoded::Unknown => false,
        }
    }

    pub fn gga(&self) -> GgaFix {
        *guard(&self.gga)
    }

    pub fn rmc(&self) -> RmcFix {
        *guard(&self.rmc)
    }

    pub fn get_fix(&self, kind: FixKind) -> FixRecord {
        match kind {
            FixKind::Gga => FixRecord::Gga(self.gga()),
            FixKind::Rmc => FixRecord::Rmc(self.rmc()),
        }
    }

    /// Merged position as `(sources, latitude, longitude)` in decimal degrees.
    ///
    /// `sources` counts the locked records. With two, the result is the
    /// plain mean of both; with none, the coordinates are zero.
    pub fn get_position(&self) -> (u8, f64, f64) {
        let gga = self.gga();
        let rmc = self.rmc();

        match (gga.lock, rmc.lock) {
            (true, true) => {
                let (lat_a, lon_a) = gga.decimal_position();
                let (lat_b, lon_b) = rmc.decimal_position();
                (2, (lat_a + lat_b) / 2.0, (lon_a + lon_b) / 2.0)
            }
            (true, false) => {
                let (lat, lon) = gga.decimal_position();
                (1, lat, lon)
            }
            (false, true) => {
                let (lat, lon) = rmc.decimal_position();
                (1, lat, lon)
            }
            (false, false) => (0, 0.0, 0.0),
        }
    }
}

impl Default for FixStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A writer that panicked mid-update still left a plain `Copy` record.
fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn reject(kind: FixKind, err: ParseError) {
    log::debug!("{:?} sentence rejected: {}", kind, err);
}
