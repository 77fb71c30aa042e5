//! Conversions between raw register words and physical quantities.
//!
//! Everything in this module is pure: no I/O, no device state. The device
//! facades ([`crate::qtm`], [`crate::gauge`], [`crate::vfd`]) combine these
//! functions with their register maps.

use std::fmt;

/// Errors raised when a value cannot be represented in a device encoding.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    /// A composite value was decoded from the wrong number of registers.
    #[error("Expected {expected} registers, got {actual}")]
    RegisterCount { expected: usize, actual: usize },

    /// The pressure cannot be expressed as a 4-digit mantissa and 2-digit exponent field.
    #[error("Pressure {0} mbar is outside the encodable range")]
    PressureOutOfRange(f64),

    /// The calibration factor does not fit into six decimal digits.
    #[error("Calibration factor {0} is outside the encodable range")]
    CalibrationOutOfRange(f64),

    /// A textual field received from a device could not be parsed.
    #[error("Invalid numeric field '{0}'")]
    InvalidField(String),

    /// A nibble field value does not fit into four bits.
    #[error("Nibble value {0} does not fit into 4 bits")]
    NibbleOutOfRange(u8),

    /// The baud rate is not one of the supported values.
    #[error("Unsupported baud rate {0}")]
    BaudRateUnsupported(u32),

    /// A gauge data field must be at most six ASCII characters.
    #[error("Gauge data '{0}' must be at most 6 ASCII characters")]
    GaugeData(String),
}

/// Scales `value` by `factor` and rounds to the nearest register word.
///
/// Values outside the `u16` range saturate.
pub fn scaled_to_raw(value: f64, factor: f64) -> u16 {
    (value * factor).round().clamp(0.0, f64::from(u16::MAX)) as u16
}

/// Divides a raw register word by `factor`.
pub fn raw_to_scaled(raw: u16, factor: f64) -> f64 {
    f64::from(raw) / factor
}

/// Combines a high and a low register word into one 32-bit value.
pub fn combine_words(hi: u16, lo: u16) -> u32 {
    (u32::from(hi) << 16) | u32::from(lo)
}

/// Splits a 32-bit value into its high and low register words.
pub fn split_words(value: u32) -> (u16, u16) {
    ((value >> 16) as u16, (value & 0xFFFF) as u16)
}

/// Decodes a two-register composite and divides it by `factor`.
///
/// Exactly two words are required; a partial read never yields a value.
pub fn composite_to_scaled(words: &[u16], factor: f64) -> Result<f64, ValueError> {
    match words {
        [hi, lo] => Ok(f64::from(combine_words(*hi, *lo)) / factor),
        _ => Err(ValueError::RegisterCount {
            expected: 2,
            actual: words.len(),
        }),
    }
}

/// Returns the nibble at `position` of a register printed as four hex digits.
///
/// Position 0 is the most significant digit, position 3 the least significant.
pub fn nibble(word: u16, position: u8) -> u8 {
    let shift = 12 - 4 * u16::from(position.min(3));
    ((word >> shift) & 0x0F) as u8
}

/// Packs four nibbles, most significant first, into one register word.
pub fn pack_nibbles(nibbles: [u8; 4]) -> Result<u16, ValueError> {
    nibbles.iter().try_fold(0u16, |acc, &n| {
        if n > 0x0F {
            Err(ValueError::NibbleOutOfRange(n))
        } else {
            Ok((acc << 4) | u16::from(n))
        }
    })
}

/// Offset added to the true decimal exponent when encoding a pressure.
pub const PRESSURE_ENCODE_EXPONENT_OFFSET: i32 = 20;
/// Offset subtracted from the exponent field when decoding a pressure.
///
/// Three more than the encode offset: the mantissa carries three implied decimals.
pub const PRESSURE_DECODE_EXPONENT_OFFSET: i32 = 23;

/// Encodes a pressure in mbar as `MMMMEE`: a 4-digit mantissa and the
/// exponent offset by [`PRESSURE_ENCODE_EXPONENT_OFFSET`].
///
/// # Examples
///
/// ```
/// use rs485_lab_lib::codec::encode_pressure;
///
/// assert_eq!(encode_pressure(1.23e-5).unwrap(), "123015");
/// assert_eq!(encode_pressure(1000.0).unwrap(), "100023");
/// ```
pub fn encode_pressure(pressure: f64) -> Result<String, ValueError> {
    if !pressure.is_finite() || pressure <= 0.0 {
        return Err(ValueError::PressureOutOfRange(pressure));
    }
    let mut exponent = pressure.log10().floor() as i32;
    let mut mantissa = (pressure / 10f64.powi(exponent) * 1000.0).round() as u32;
    // log10 rounding can leave the mantissa one decade off
    if mantissa >= 10_000 {
        mantissa /= 10;
        exponent += 1;
    } else if mantissa < 1000 {
        mantissa *= 10;
        exponent -= 1;
    }
    let field = exponent + PRESSURE_ENCODE_EXPONENT_OFFSET;
    if !(0..=99).contains(&field) {
        return Err(ValueError::PressureOutOfRange(pressure));
    }
    Ok(format!("{mantissa:04}{field:02}"))
}

/// Decodes a `MMMMEE` pressure field into mbar.
///
/// # Examples
///
/// ```
/// use rs485_lab_lib::codec::decode_pressure;
///
/// assert_eq!(decode_pressure("100023").unwrap(), 1000.0);
/// ```
pub fn decode_pressure(data: &str) -> Result<f64, ValueError> {
    let invalid = || ValueError::InvalidField(data.to_string());
    if data.len() < 6 || !data.is_ascii() {
        return Err(invalid());
    }
    let mantissa: u32 = data[..4].parse().map_err(|_| invalid())?;
    let field: i32 = data[data.len() - 2..].parse().map_err(|_| invalid())?;
    Ok(f64::from(mantissa) * 10f64.powi(field - PRESSURE_DECODE_EXPONENT_OFFSET))
}

/// Encodes a calibration factor as six decimal digits with two implied decimals.
pub fn encode_calibration(factor: f64) -> Result<String, ValueError> {
    let raw = (factor * 100.0).round();
    if !raw.is_finite() || !(0.0..=999_999.0).contains(&raw) {
        return Err(ValueError::CalibrationOutOfRange(factor));
    }
    Ok(format!("{:06}", raw as u32))
}

/// Decodes a calibration factor with two implied decimals.
pub fn decode_calibration(data: &str) -> Result<f64, ValueError> {
    data.trim()
        .parse::<u32>()
        .map(|raw| f64::from(raw) / 100.0)
        .map_err(|_| ValueError::InvalidField(data.to_string()))
}

/// Baud rates selectable through a device's baud-rate register code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum BaudRate {
    B1200 = 0,
    B2400 = 1,
    B4800 = 2,
    #[default]
    B9600 = 3,
    B19200 = 4,
    B38400 = 5,
}

impl BaudRate {
    /// All supported baud rates, slowest first.
    pub const ALL: [BaudRate; 6] = [
        BaudRate::B1200,
        BaudRate::B2400,
        BaudRate::B4800,
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
    ];

    /// Returns the baud rate for a register code, if the code is mapped.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|b| *b as u8 == code)
    }

    /// The register code of this baud rate.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// The baud rate in bits per second.
    pub fn bits_per_second(&self) -> u32 {
        match self {
            BaudRate::B1200 => 1200,
            BaudRate::B2400 => 2400,
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = ValueError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|b| b.bits_per_second() == value)
            .ok_or(ValueError::BaudRateUnsupported(value))
    }
}

impl From<BaudRate> for u32 {
    fn from(baud_rate: BaudRate) -> u32 {
        baud_rate.bits_per_second()
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits_per_second())
    }
}

/// Decodes a baud-rate register code; unmapped codes decode to 0 (unknown).
pub fn baud_rate_from_code(code: u8) -> u32 {
    BaudRate::from_code(code).map_or(0, |b| b.bits_per_second())
}

/// Encodes a baud rate as a register code; unmapped rates fall back to 9600 (code 3).
pub fn code_from_baud_rate(baud_rate: u32) -> u8 {
    BaudRate::try_from(baud_rate).unwrap_or_default().code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn scaled_float() {
        assert_eq!(scaled_to_raw(99.9, 100.0), 9990);
        assert_eq!(scaled_to_raw(0.38, 1000.0), 380);
        assert_eq!(scaled_to_raw(-1.0, 100.0), 0);
        assert_eq!(scaled_to_raw(1000.0, 100.0), u16::MAX);
        assert_eq!(raw_to_scaled(9990, 100.0), 99.9);
        assert_eq!(raw_to_scaled(65535, 1000.0), 65.535);
    }

    #[test]
    fn composite() {
        assert_eq!(combine_words(0, 12345), 12345);
        assert_eq!(combine_words(0x005B, 0x8D80), 6_000_000);
        assert_eq!(split_words(6_000_000), (0x005B, 0x8D80));
        assert_eq!(composite_to_scaled(&[0, 12345], 100.0), Ok(123.45));
        assert_matches!(
            composite_to_scaled(&[12345], 100.0),
            Err(ValueError::RegisterCount {
                expected: 2,
                actual: 1
            })
        );
        assert_matches!(
            composite_to_scaled(&[], 100.0),
            Err(ValueError::RegisterCount { .. })
        );
    }

    #[test]
    fn nibbles() {
        let word = pack_nibbles([5, 1, 2, 0]).unwrap();
        assert_eq!(word, 0x5120);
        assert_eq!(
            (nibble(word, 0), nibble(word, 1), nibble(word, 2)),
            (5, 1, 2)
        );
        assert_eq!(nibble(0x0001, 3), 1);
        assert_eq!(nibble(0x3000, 0), 3);
        assert_matches!(
            pack_nibbles([16, 0, 0, 0]),
            Err(ValueError::NibbleOutOfRange(16))
        );
    }

    #[test]
    fn pressure_round_trip() {
        let encoded = encode_pressure(1.23e-5).unwrap();
        assert_eq!(encoded, "123015");
        let decoded = decode_pressure(&encoded).unwrap();
        assert!((decoded - 1.23e-5).abs() / 1.23e-5 < 0.01);

        assert_eq!(encode_pressure(1000.0).unwrap(), "100023");
        assert_eq!(encode_pressure(5.0).unwrap(), "500020");
        let decoded = decode_pressure("500020").unwrap();
        assert!((decoded - 5.0).abs() < 1e-9);
    }

    #[test]
    fn pressure_out_of_range() {
        assert_matches!(encode_pressure(0.0), Err(ValueError::PressureOutOfRange(_)));
        assert_matches!(encode_pressure(-1.0), Err(ValueError::PressureOutOfRange(_)));
        assert_matches!(
            encode_pressure(f64::NAN),
            Err(ValueError::PressureOutOfRange(_))
        );
        assert_matches!(
            encode_pressure(1e-25),
            Err(ValueError::PressureOutOfRange(_))
        );
        assert_matches!(decode_pressure("12"), Err(ValueError::InvalidField(_)));
        assert_matches!(decode_pressure("12AB15"), Err(ValueError::InvalidField(_)));
    }

    #[test]
    fn calibration() {
        assert_eq!(encode_calibration(1.6).unwrap(), "000160");
        assert_eq!(decode_calibration("000160").unwrap(), 1.6);
        assert_matches!(
            encode_calibration(10_000.0),
            Err(ValueError::CalibrationOutOfRange(_))
        );
        assert_matches!(decode_calibration("x"), Err(ValueError::InvalidField(_)));
    }

    #[test]
    fn baud_rate_codes() {
        for baud in [1200, 2400, 4800, 9600, 19200, 38400] {
            assert_eq!(baud_rate_from_code(code_from_baud_rate(baud)), baud);
        }
        assert_eq!(code_from_baud_rate(57600), 3);
        assert_eq!(baud_rate_from_code(6), 0);
        assert_eq!(baud_rate_from_code(0x0F), 0);
        assert_eq!(BaudRate::try_from(19200), Ok(BaudRate::B19200));
        assert_matches!(
            BaudRate::try_from(115200),
            Err(ValueError::BaudRateUnsupported(115200))
        );
        assert_eq!(BaudRate::default().to_string(), "9600");
    }
}
