/// Beacon payload: packed-decimal coordinates in manufacturer data.
///
/// Each coordinate is written as its absolute value in decimal digits,
/// integer part first, then up to nine fractional digits, two digits per
/// byte (high nibble first). The digit budget is [`MAX_PACKED_DIGITS`];
/// fractional digits past the budget are truncated. Sign is not carried,
/// so receivers supply the hemisphere and integer width for the
/// deployment area.
///
/// ```text
///  0    2    4   5          10         15                     25
///  ┌────┬────┬───┬──────────┬──────────┬──────────────────────┐
///  │ id │ id │seq│ latitude │longitude │   reserved / radio   │
///  └────┴────┴───┴──────────┴──────────┴──────────────────────┘
/// ```
use thiserror::Error;

/// Total manufacturer-data length.
pub const PAYLOAD_LEN: usize = 25;

/// Decimal digits per coordinate, integer and fractional together.
pub const MAX_PACKED_DIGITS: usize = 10;

/// Bytes per packed coordinate.
pub const COORD_SPAN: usize = (MAX_PACKED_DIGITS + 1) / 2;

/// Fractional digits produced before the budget is applied.
pub const FRACTION_DIGITS: usize = 9;

pub const SEQUENCE_OFFSET: usize = 4;
pub const LATITUDE_OFFSET: usize = 5;
pub const LONGITUDE_OFFSET: usize = LATITUDE_OFFSET + COORD_SPAN;

/// Initial advertisement contents. Bytes outside the two coordinate spans
/// and the sequence byte belong to the radio side.
pub const PAYLOAD_TEMPLATE: [u8; PAYLOAD_LEN] = [
    0x95, 0x12, // company identifier
    0x02, 0x15, // custom id
    0x01, // sequence counter
    0xF4, 0x01, 0x04, 0x05, 0x06, // latitude
    0x08, 0x07, 0x06, 0x00, 0x00, // longitude
    0x00, 0x00, 0x00, //
    0xFF, // extra id
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BeaconError {
    #[error("integer part needs {digits} digits, budget is 10")]
    DigitOverflow { digits: usize },
    #[error("coordinate is not finite")]
    NotFinite,
    #[error("packed coordinate of {len} bytes exceeds its span")]
    SpanOverflow { len: usize },
    #[error("radio refused the advertisement")]
    Radio,
}

/// One coordinate as packed decimal digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedDigits {
    bytes: [u8; COORD_SPAN],
    digits: usize,
    int_digits: usize,
}

impl PackedDigits {
    /// Packed bytes actually used.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len()]
    }

    pub fn len(&self) -> usize {
        (self.digits + 1) / 2
    }

    pub fn is_empty(&self) -> bool {
        self.digits == 0
    }

    pub fn digit_count(&self) -> usize {
        self.digits
    }

    pub fn int_digits(&self) -> usize {
        self.int_digits
    }
}

/// Pack `|value|` into decimal digits.
pub fn encode_packed(value: f64) -> Result<PackedDigits, BeaconError> {
    if !value.is_finite() {
        return Err(BeaconError::NotFinite);
    }
    let value = libm::fabs(value);
    let int_part = libm::trunc(value);

    let mut digits = [0u8; MAX_PACKED_DIGITS + FRACTION_DIGITS];
    let mut n = 0;

    // integer part, most significant first
    let int_digits = count_int_digits(int_part);
    if int_digits > MAX_PACKED_DIGITS {
        return Err(BeaconError::DigitOverflow { digits: int_digits });
    }
    let mut rest = int_part as u64;
    for slot in digits[..int_digits].iter_mut().rev() {
        *slot = (rest % 10) as u8;
        rest /= 10;
    }
    n += int_digits;

    let mut frac = value - int_part;
    for _ in 0..FRACTION_DIGITS {
        frac *= 10.0;
        let digit = libm::trunc(frac);
        digits[n] = digit as u8;
        frac -= digit;
        n += 1;
    }

    let used = n.min(MAX_PACKED_DIGITS);
    let mut bytes = [0u8; COORD_SPAN];
    for (i, &d) in digits[..used].iter().enumerate() {
        if i % 2 == 0 {
            bytes[i / 2] = d << 4;
        } else {
            bytes[i / 2] |= d;
        }
    }

    Ok(PackedDigits {
        bytes,
        digits: used,
        int_digits,
    })
}

fn count_int_digits(int_part: f64) -> usize {
    let mut count = 1;
    let mut bound = 10.0;
    while int_part >= bound && count <= MAX_PACKED_DIGITS {
        count += 1;
        bound *= 10.0;
    }
    count
}

/// Reassemble a packed coordinate whose first `int_digits` digits are the
/// integer part. Every nibble in `bytes` is read as a digit.
pub fn decode_packed(bytes: &[u8], int_digits: usize) -> f64 {
    let mut int_part = 0.0;
    let mut frac_part = 0.0;
    let mut scale = 0.1;
    let nibbles = bytes.iter().flat_map(|b| [b >> 4, b & 0x0F]);
    for (i, d) in nibbles.enumerate() {
        let d = f64::from(d.min(9));
        if i < int_digits {
            int_part = int_part * 10.0 + d;
        } else {
            frac_part += d * scale;
            scale /= 10.0;
        }
    }
    int_part + frac_part
}

/// Connection-less advertiser that carries the payload.
pub trait BeaconRadio {
    type Error: core::fmt::Debug;

    /// Replace the advertised manufacturer data and restart broadcasting.
    fn restart_advertising(&mut self, payload: &[u8; PAYLOAD_LEN]) -> Result<(), Self::Error>;
}

/// Owns the advertisement buffer and writes coordinates into it.
pub struct BeaconEncoder {
    payload: [u8; PAYLOAD_LEN],
    broadcasts: u32,
}

impl BeaconEncoder {
    pub const fn new() -> Self {
        Self {
            payload: PAYLOAD_TEMPLATE,
            broadcasts: 0,
        }
    }

    /// Write both coordinates and bump the sequence byte.
    ///
    /// Either both spans are updated or the payload is left unchanged.
    pub fn encode(&mut self, latitude: f64, longitude: f64) -> Result<&[u8; PAYLOAD_LEN], BeaconError> {
        let lat = encode_packed(latitude)?;
        let lon = encode_packed(longitude)?;

        let mut next = self.payload;
        write_span(&mut next, LATITUDE_OFFSET, &lat)?;
        write_span(&mut next, LONGITUDE_OFFSET, &lon)?;
        next[SEQUENCE_OFFSET] = next[SEQUENCE_OFFSET].wrapping_add(1);

        self.payload = next;
        Ok(&self.payload)
    }

    /// Encode and hand the payload to `radio`.
    pub fn broadcast<R: BeaconRadio>(
        &mut self,
        radio: &mut R,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), BeaconError> {
        self.encode(latitude, longitude)?;
        radio.restart_advertising(&self.payload).map_err(|e| {
            log::warn!("Advertising restart failed: {:?}", e);
            BeaconError::Radio
        })?;
        self.broadcasts = self.broadcasts.wrapping_add(1);
        log::debug!("Beacon updated: {:.6}, {:.6}", latitude, longitude);
        Ok(())
    }

    pub fn payload(&self) -> &[u8; PAYLOAD_LEN] {
        &self.payload
    }

    pub fn sequence(&self) -> u8 {
        self.payload[SEQUENCE_OFFSET]
    }

    /// Successful radio restarts.
    pub fn broadcasts(&self) -> u32 {
        self.broadcasts
    }
}

impl Default for BeaconEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_span(
    payload: &mut [u8; PAYLOAD_LEN],
    offset: usize,
    packed: &PackedDigits,
) -> Result<(), BeaconError> {
    let bytes = packed.as_bytes();
    if bytes.len() > COORD_SPAN || offset + bytes.len() > PAYLOAD_LEN {
        return Err(BeaconError::SpanOverflow { len: bytes.len() });
    }
    payload[offset..offset + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::vec::Vec;

    #[derive(Default)]
    struct FakeRadio {
        sent: Vec<[u8; PAYLOAD_LEN]>,
        fail: bool,
    }

    impl BeaconRadio for FakeRadio {
        type Error = ();

        fn restart_advertising(&mut self, payload: &[u8; PAYLOAD_LEN]) -> Result<(), ()> {
            if self.fail {
                return Err(());
            }
            self.sent.push(*payload);
            Ok(())
        }
    }

    #[test]
    fn spans_do_not_overlap_and_fit() {
        assert_eq!(COORD_SPAN, 5);
        assert!(LATITUDE_OFFSET + COORD_SPAN <= LONGITUDE_OFFSET);
        assert!(LONGITUDE_OFFSET + COORD_SPAN <= PAYLOAD_LEN);
        assert!(SEQUENCE_OFFSET < LATITUDE_OFFSET);
    }

    #[test]
    fn packs_two_digits_per_byte() {
        let p = encode_packed(27.5).unwrap();
        assert_eq!(p.as_bytes(), &[0x27, 0x50, 0x00, 0x00, 0x00]);
        assert_eq!(p.int_digits(), 2);
        assert_eq!(p.digit_count(), 10);
    }

    #[test]
    fn sign_is_dropped() {
        assert_eq!(encode_packed(-33.25).unwrap(), encode_packed(33.25).unwrap());
    }

    #[test]
    fn zero_has_single_integer_digit() {
        let p = encode_packed(0.0).unwrap();
        assert_eq!(p.int_digits(), 1);
        assert_eq!(p.as_bytes(), &[0u8; 5]);
    }

    #[test]
    fn reference_pair_round_trips_to_six_decimals() {
        let lat = encode_packed(27.500685).unwrap();
        let lon = encode_packed(153.015555).unwrap();
        assert!(lat.len() <= COORD_SPAN && lon.len() <= COORD_SPAN);

        let lat_back = decode_packed(lat.as_bytes(), lat.int_digits());
        let lon_back = decode_packed(lon.as_bytes(), lon.int_digits());
        assert_abs_diff_eq!(lat_back, 27.500685, epsilon = 1e-6);
        assert_abs_diff_eq!(lon_back, 153.015555, epsilon = 1e-6);
    }

    #[test]
    fn integer_part_beyond_budget_rejected() {
        assert_eq!(
            encode_packed(12_345_678_901.0),
            Err(BeaconError::DigitOverflow { digits: 11 })
        );
        // exactly at the budget: no fractional digits survive
        let p = encode_packed(1_234_567_890.75).unwrap();
        assert_eq!(p.as_bytes(), &[0x12, 0x34, 0x56, 0x78, 0x90]);
    }

    #[test]
    fn non_finite_rejected() {
        assert_eq!(encode_packed(f64::NAN), Err(BeaconError::NotFinite));
        assert_eq!(encode_packed(f64::INFINITY), Err(BeaconError::NotFinite));
    }

    #[test]
    fn encode_writes_only_coordinate_spans_and_sequence() {
        let mut enc = BeaconEncoder::new();
        let payload = *enc.encode(27.500685, 153.015555).unwrap();

        assert_eq!(&payload[..SEQUENCE_OFFSET], &PAYLOAD_TEMPLATE[..SEQUENCE_OFFSET]);
        assert_eq!(payload[SEQUENCE_OFFSET], 0x02);
        assert_eq!(&payload[LONGITUDE_OFFSET + COORD_SPAN..], &PAYLOAD_TEMPLATE[LONGITUDE_OFFSET + COORD_SPAN..]);

        let lat = decode_packed(&payload[LATITUDE_OFFSET..LONGITUDE_OFFSET], 2);
        let lon = decode_packed(&payload[LONGITUDE_OFFSET..LONGITUDE_OFFSET + COORD_SPAN], 3);
        assert_abs_diff_eq!(lat, 27.500685, epsilon = 1e-6);
        assert_abs_diff_eq!(lon, 153.015555, epsilon = 1e-6);
    }

    #[test]
    fn failed_encode_leaves_payload_untouched() {
        let mut enc = BeaconEncoder::new();
        assert!(enc.encode(27.5, f64::NAN).is_err());
        assert_eq!(enc.payload(), &PAYLOAD_TEMPLATE);
    }

    #[test]
    fn broadcast_restarts_radio_with_new_payload() {
        let mut enc = BeaconEncoder::new();
        let mut radio = FakeRadio::default();
        enc.broadcast(&mut radio, -27.5, 153.0).unwrap();
        enc.broadcast(&mut radio, -27.6, 153.1).unwrap();

        assert_eq!(radio.sent.len(), 2);
        assert_eq!(radio.sent[1], *enc.payload());
        assert_eq!(enc.sequence(), 0x03);
        assert_eq!(enc.broadcasts(), 2);
    }

    #[test]
    fn radio_failure_is_reported() {
        let mut enc = BeaconEncoder::new();
        let mut radio = FakeRadio {
            fail: true,
            ..Default::default()
        };
        assert_eq!(enc.broadcast(&mut radio, 1.0, 2.0), Err(BeaconError::Radio));
        assert_eq!(enc.broadcasts(), 0);
    }

    #[test]
    fn sequence_wraps() {
        let mut enc = BeaconEncoder::new();
        for _ in 0..255 {
            enc.encode(1.0, 2.0).unwrap();
        }
        assert_eq!(enc.sequence(), 0x00);
    }
}
