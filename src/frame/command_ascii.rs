//! Command-letter framing of the vacuum gauges.
//!
//! ```text
//! ADDR(3 decimal digits) LETTER DATA(0..=6 ASCII) CHECKSUM '\r'
//! ```
//!
//! The checksum is a single printable byte, see [`crate::checksum::mod64`].
//! Commands are letters rather than register numbers, so the codec maps the
//! numeric registers of the client onto letters with [`GaugeRegister`].

use super::{FrameCodec, FrameEnd, FrameError, ParsedResponse, Payload, Request};
use crate::checksum::mod64;
use crate::codec::ValueError;
use crate::Error;
use std::fmt;
use std::ops::RangeInclusive;

const TERMINATOR: u8 = b'\r';
const MAX_DATA_LENGTH: usize = 6;
/// Address digits plus command letter.
const HEADER_LENGTH: usize = 4;

/// Register index to command-letter table.
///
/// Even indices are the read ("lock") side of a value, the following odd
/// index its unlock-then-write side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum GaugeRegister {
    GaugeType = 0,
    Measurement = 1,
    Setpoint = 2,
    SetpointWrite = 3,
    Calibration = 4,
    CalibrationWrite = 5,
    PenningEnable = 6,
    PenningEnableWrite = 7,
    PenningSync = 8,
    PenningSyncWrite = 9,
    /// Zero and atmosphere adjustment.
    Adjust = 10,
}

impl GaugeRegister {
    pub const ALL: [GaugeRegister; 11] = [
        GaugeRegister::GaugeType,
        GaugeRegister::Measurement,
        GaugeRegister::Setpoint,
        GaugeRegister::SetpointWrite,
        GaugeRegister::Calibration,
        GaugeRegister::CalibrationWrite,
        GaugeRegister::PenningEnable,
        GaugeRegister::PenningEnableWrite,
        GaugeRegister::PenningSync,
        GaugeRegister::PenningSyncWrite,
        GaugeRegister::Adjust,
    ];

    pub fn register(&self) -> u16 {
        *self as u16
    }

    pub fn letter(&self) -> u8 {
        match self {
            GaugeRegister::GaugeType => b'T',
            GaugeRegister::Measurement => b'M',
            GaugeRegister::Setpoint => b'S',
            GaugeRegister::SetpointWrite => b's',
            GaugeRegister::Calibration => b'C',
            GaugeRegister::CalibrationWrite => b'c',
            GaugeRegister::PenningEnable => b'I',
            GaugeRegister::PenningEnableWrite => b'i',
            GaugeRegister::PenningSync => b'W',
            GaugeRegister::PenningSyncWrite => b'w',
            GaugeRegister::Adjust => b'j',
        }
    }

    pub fn from_register(register: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.register() == register)
    }

    pub fn from_letter(letter: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.letter() == letter)
    }
}

impl fmt::Display for GaugeRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", char::from(self.letter()))
    }
}

/// Codec of the vacuum-gauge family.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandAsciiCodec;

impl CommandAsciiCodec {
    pub const ADDRESS_MIN: u16 = 1;
    pub const ADDRESS_MAX: u16 = 999;

    fn request(&self, address: u16, register: u16, data: &str) -> crate::Result<Request> {
        let range = self.address_range();
        if !range.contains(&address) {
            return Err(Error::AddressOutOfRange {
                address,
                min: *range.start(),
                max: *range.end(),
            });
        }
        if data.len() > MAX_DATA_LENGTH || !data.is_ascii() {
            return Err(ValueError::GaugeData(data.to_string()).into());
        }
        let command = GaugeRegister::from_register(register)
            .ok_or(Error::UnknownRegister(register))?
            .letter();
        let mut frame = format!("{address:03}").into_bytes();
        frame.push(command);
        frame.extend_from_slice(data.as_bytes());
        frame.push(mod64(&frame));
        frame.push(TERMINATOR);
        Ok(Request {
            frame,
            command,
            response_end: FrameEnd::Terminator(TERMINATOR),
            expected_words: None,
        })
    }
}

impl FrameCodec for CommandAsciiCodec {
    type Value = String;

    fn address_range(&self) -> RangeInclusive<u16> {
        Self::ADDRESS_MIN..=Self::ADDRESS_MAX
    }

    /// Builds a query. `count` selects the channel of indexed values
    /// (setpoint or calibration number); 0 sends no data.
    fn encode_read(&self, address: u16, register: u16, count: u16) -> crate::Result<Request> {
        let data = if count > 0 {
            count.to_string()
        } else {
            String::new()
        };
        self.request(address, register, &data)
    }

    fn encode_write(&self, address: u16, register: u16, value: &String) -> crate::Result<Request> {
        self.request(address, register, value)
    }

    fn decode(&self, frame: &[u8]) -> Result<ParsedResponse, FrameError> {
        let length = frame.len();
        let end = frame
            .iter()
            .rposition(|b| !b"\r\n".contains(b))
            .map_or(0, |p| p + 1);
        let frame = &frame[..end];
        let Some((&received, body)) = frame.split_last() else {
            return Err(FrameError::Empty);
        };
        if body.len() < HEADER_LENGTH {
            return Err(FrameError::malformed(format!(
                "{} bytes is too short for a gauge frame",
                frame.len()
            )));
        }
        let calculated = mod64(body);
        if received != calculated {
            return Err(FrameError::ChecksumMismatch {
                received: received.into(),
                calculated: calculated.into(),
            });
        }
        let (digits, rest) = body.split_at(3);
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(FrameError::malformed("address is not decimal"));
        }
        let address = digits
            .iter()
            .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
        let command = rest[0];
        let register = GaugeRegister::from_letter(command)
            .ok_or(FrameError::UnknownCommand(command))?;
        let data = std::str::from_utf8(&rest[1..])
            .ok()
            .filter(|data| data.is_ascii())
            .ok_or_else(|| FrameError::malformed("data is not ASCII"))?;
        Ok(ParsedResponse {
            address,
            command,
            register: Some(register.register()),
            payload: Payload::Text(data.to_string()),
            checksum: received.into(),
            length,
        })
    }

    fn checksum(&self, bytes: &[u8]) -> u16 {
        mod64(bytes).into()
    }
}
