/// NMEA 0183 sentence decoding and MTK command construction.
///
/// Sentences arrive from the framer without their leading `$` and
/// usually with a trailing `*hh` checksum and carriage return. Only the
/// combined-constellation GGA and RMC sentences are tracked; the other
/// sentence types the XA1110 emits are recognised and ignored.
///
/// Fields are split on `,` with empty fields preserved, so a receiver
/// without a fix (`GNRMC,001533.799,V,,,,,...`) is rejected rather than
/// silently shifting later fields into the position slots.
use thiserror::Error;

/// Prefix of every MediaTek configuration command.
pub const PMTK_PREFIX: &str = "$PMTK";

/// `PMTK_API_SET_NMEA_OUTPUT`
pub const PMTK_SET_NMEA_OUTPUT: u16 = 314;

/// `PMTK_SET_NMEA_UPDATERATE`
pub const PMTK_SET_NMEA_UPDATERATE: u16 = 220;

/// Output mask for [`PMTK_SET_NMEA_OUTPUT`]: RMC and GGA once per fix,
/// everything else off.
pub const NMEA_OUTPUT_RMC_GGA: &str = ",0,1,0,1,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0";

/// Longest command [`build_command`] is expected to produce.
pub const MAX_COMMAND_LEN: usize = 64;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Errors from outbound command construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NmeaError {
    #[error("command needs {needed} bytes, buffer holds {available}")]
    Capacity { needed: usize, available: usize },
    #[error("packet type {0} does not fit three digits")]
    InvalidPacketType(u16),
    #[error("byte {0:#04x} not allowed in command data")]
    InvalidData(u8),
}

/// Why a tracked sentence was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected 7 fields, extracted {found}")]
    MissingFields { found: u8 },
    #[error("checksum mismatch: sentence says {expected:02X}, computed {computed:02X}")]
    ChecksumMismatch { expected: u8, computed: u8 },
}

/// Sentence types this receiver emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// GNGGA: position fix data
    Gga,
    /// GNRMC: recommended minimum navigation information
    Rmc,
    /// GNVTG: course over ground and ground speed
    Vtg,
    /// GPGSV: GPS satellites in view
    GpsSatellitesInView,
    /// GLGSV: GLONASS satellites in view
    GlonassSatellitesInView,
    /// GPGSA: GPS DOP and active satellites
    GpsActiveSatellites,
    /// GLGSA: GLONASS DOP and active satellites
    GlonassActiveSatellites,
}

impl MessageType {
    /// Classify a sentence by its 5-character type prefix.
    pub fn from_sentence(sentence: &str) -> Option<Self> {
        let body = sentence.strip_prefix('$').unwrap_or(sentence);
        match body.get(..5)? {
            "GNGGA" => Some(MessageType::Gga),
            "GNRMC" => Some(MessageType::Rmc),
            "GNVTG" => Some(MessageType::Vtg),
            "GPGSV" => Some(MessageType::GpsSatellitesInView),
            "GLGSV" => Some(MessageType::GlonassSatellitesInView),
            "GPGSA" => Some(MessageType::GpsActiveSatellites),
            "GLGSA" => Some(MessageType::GlonassActiveSatellites),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Gga => "GNGGA",
            MessageType::Rmc => "GNRMC",
            MessageType::Vtg => "GNVTG",
            MessageType::GpsSatellitesInView => "GPGSV",
            MessageType::GlonassSatellitesInView => "GLGSV",
            MessageType::GpsActiveSatellites => "GPGSA",
            MessageType::GlonassActiveSatellites => "GLGSA",
        }
    }
}

/// The two sentence types that carry a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixKind {
    Gga,
    Rmc,
}

/// Latest GNGGA fix. Coordinates are in NMEA `ddmm.mmmm` encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GgaFix {
    pub lock: bool,
    /// UTC `hhmmss.sss`
    pub timestamp: f64,
    pub latitude: f64,
    /// 'N' or 'S'
    pub lat_direction: char,
    pub longitude: f64,
    /// 'E' or 'W'
    pub lon_direction: char,
    /// 0 = invalid, 1 = GPS fix, 2 = DGPS fix
    pub fix_quality: u8,
    pub satellites_used: u8,
}

impl GgaFix {
    pub const fn new() -> Self {
        Self {
            lock: false,
            timestamp: 0.0,
            latitude: 0.0,
            lat_direction: 'N',
            longitude: 0.0,
            lon_direction: 'E',
            fix_quality: 0,
            satellites_used: 0,
        }
    }

    /// Position in signed decimal degrees.
    pub fn decimal_position(&self) -> (f64, f64) {
        (
            to_decimal_degrees(self.latitude, self.lat_direction),
            to_decimal_degrees(self.longitude, self.lon_direction),
        )
    }
}

impl Default for GgaFix {
    fn default() -> Self {
        Self::new()
    }
}

/// Latest GNRMC fix. Coordinates are in NMEA `ddmm.mmmm` encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmcFix {
    pub lock: bool,
    pub timestamp: f64,
    pub latitude: f64,
    pub lat_direction: char,
    pub longitude: f64,
    pub lon_direction: char,
    /// Speed over ground, knots
    pub speed: f64,
    /// Course over ground, degrees true
    pub course: f64,
}

impl RmcFix {
    pub const fn new() -> Self {
        Self {
            lock: false,
            timestamp: 0.0,
            latitude: 0.0,
            lat_direction: 'N',
            longitude: 0.0,
            lon_direction: 'E',
            speed: 0.0,
            course: 0.0,
        }
    }

    pub fn decimal_position(&self) -> (f64, f64) {
        (
            to_decimal_degrees(self.latitude, self.lat_direction),
            to_decimal_degrees(self.longitude, self.lon_direction),
        )
    }
}

impl Default for RmcFix {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of decoding one framed sentence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoded {
    Gga(Result<GgaFix, ParseError>),
    Rmc(Result<RmcFix, ParseError>),
    /// Recognised but not tracked.
    Ignored(MessageType),
    /// Not a sentence type this receiver emits.
    Unknown,
}

/// Decode a framed sentence.
pub fn decode(sentence: &str) -> Decoded {
    match MessageType::from_sentence(sentence) {
        Some(MessageType::Gga) => Decoded::Gga(verify(sentence).and_then(parse_gga)),
        Some(MessageType::Rmc) => Decoded::Rmc(verify(sentence).and_then(parse_rmc)),
        Some(other) => Decoded::Ignored(other),
        None => Decoded::Unknown,
    }
}

/// Check the `*hh` suffix when present and return the field section.
fn verify(sentence: &str) -> Result<&str, ParseError> {
    let trimmed = sentence.trim_end_matches(['\r', '\n']);
    let trimmed = trimmed.strip_prefix('$').unwrap_or(trimmed);
    match trimmed.split_once('*') {
        None => Ok(trimmed),
        Some((body, tail)) => {
            let computed = checksum(body);
            let expected = tail
                .get(..2)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            match expected {
                Some(expected) if expected == computed => Ok(body),
                Some(expected) => Err(ParseError::ChecksumMismatch { expected, computed }),
                None => Err(ParseError::ChecksumMismatch {
                    expected: 0,
                    computed,
                }),
            }
        }
    }
}

/// Field positions: 1 time, 2 lat, 3 N/S, 4 lon, 5 E/W, 6 quality, 7 sats
fn parse_gga(body: &str) -> Result<GgaFix, ParseError> {
    let mut fix = GgaFix::new();
    let mut found = 0u8;
    for (idx, field) in body.split(',').enumerate() {
        if field.is_empty() {
            continue;
        }
        match idx {
            1 => fix.timestamp = parse_lenient_f64(field),
            2 => fix.latitude = parse_lenient_f64(field),
            3 => fix.lat_direction = first_char(field),
            4 => fix.longitude = parse_lenient_f64(field),
            5 => fix.lon_direction = first_char(field),
            6 => fix.fix_quality = parse_lenient_u8(field),
            7 => fix.satellites_used = parse_lenient_u8(field),
            _ => continue,
        }
        found += 1;
    }
    if found == 7 {
        fix.lock = true;
        Ok(fix)
    } else {
        Err(ParseError::MissingFields { found })
    }
}

/// Field positions: 1 time, 3 lat, 4 N/S, 5 lon, 6 E/W, 7 speed, 8 course
fn parse_rmc(body: &str) -> Result<RmcFix, ParseError> {
    let mut fix = RmcFix::new();
    let mut found = 0u8;
    for (idx, field) in body.split(',').enumerate() {
        if field.is_empty() {
            continue;
        }
        match idx {
            1 => fix.timestamp = parse_lenient_f64(field),
            3 => fix.latitude = parse_lenient_f64(field),
            4 => fix.lat_direction = first_char(field),
            5 => fix.longitude = parse_lenient_f64(field),
            6 => fix.lon_direction = first_char(field),
            7 => fix.speed = parse_lenient_f64(field),
            8 => fix.course = parse_lenient_f64(field),
            _ => continue,
        }
        found += 1;
    }
    if found == 7 {
        fix.lock = true;
        Ok(fix)
    } else {
        Err(ParseError::MissingFields { found })
    }
}

fn first_char(field: &str) -> char {
    field.chars().next().unwrap_or('\0')
}

/// Parse the longest numeric prefix of `field`; anything unparseable is 0.0.
pub fn parse_lenient_f64(field: &str) -> f64 {
    let field = field.trim();
    let prefix_len = field
        .bytes()
        .take_while(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+'))
        .count();
    (1..=prefix_len)
        .rev()
        .find_map(|end| field[..end].parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn parse_lenient_u8(field: &str) -> u8 {
    let digits = field
        .trim()
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .count();
    field.trim()[..digits].parse::<u8>().unwrap_or(0)
}

/// Convert NMEA `dddmm.mmmm` to signed decimal degrees.
///
/// South and west hemispheres are negative.
pub fn to_decimal_degrees(value: f64, hemisphere: char) -> f64 {
    let degrees = libm::floor(value / 100.0);
    let minutes = value - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;
    match hemisphere {
        'S' | 'W' => -decimal,
        _ => decimal,
    }
}

/// XOR of every byte after an optional leading `$`, up to `*` or the end.
pub fn checksum(sentence: &str) -> u8 {
    let body = sentence.strip_prefix('$').unwrap_or(sentence);
    body.bytes()
        .take_while(|&b| b != b'*')
        .fold(0u8, |acc, b| acc ^ b)
}

/// Render a checksum as two uppercase hex digits.
pub fn checksum_hex(crc: u8) -> [u8; 2] {
    [
        HEX_DIGITS[(crc >> 4) as usize],
        HEX_DIGITS[(crc & 0x0F) as usize],
    ]
}

/// Build `$PMTK<type><data>*<hh>\r\n` into `out`.
///
/// `data` is appended verbatim and normally starts with a comma. It must be
/// printable ASCII without `$` or `*`, which would move the checksummed
/// span. Returns the number of bytes written. Nothing is written on error.
pub fn build_command(packet_type: u16, data: &str, out: &mut [u8]) -> Result<usize, NmeaError> {
    if packet_type > 999 {
        return Err(NmeaError::InvalidPacketType(packet_type));
    }
    if let Some(&b) = data
        .as_bytes()
        .iter()
        .find(|&&b| (!b.is_ascii_graphic() && b != b' ') || b == b'$' || b == b'*')
    {
        return Err(NmeaError::InvalidData(b));
    }

    // prefix + 3 digits + data + '*' + 2 hex + CR LF
    let needed = PMTK_PREFIX.len() + 3 + data.len() + 1 + 2 + 2;
    if needed > out.len() {
        return Err(NmeaError::Capacity {
            needed,
            available: out.len(),
        });
    }

    let mut pos = 0;
    let mut put = |bytes: &[u8]| {
        out[pos..pos + bytes.len()].copy_from_slice(bytes);
        pos += bytes.len();
    };
    put(PMTK_PREFIX.as_bytes());
    put(&[
        b'0' + (packet_type / 100) as u8,
        b'0' + (packet_type / 10 % 10) as u8,
        b'0' + (packet_type % 10) as u8,
    ]);
    put(data.as_bytes());
    put(b"*");

    let body_end = needed - 4;
    let crc = out[1..body_end - 1].iter().fold(0u8, |acc, b| acc ^ b);
    out[body_end..body_end + 2].copy_from_slice(&checksum_hex(crc));
    out[body_end + 2..needed].copy_from_slice(b"\r\n");
    Ok(needed)
}
