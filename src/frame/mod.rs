//! Wire formats of the supported device families.
//!
//! Each protocol is a [`FrameCodec`]: it turns a logical read or write into
//! the exact request bytes and parses a raw response into a [`ParsedResponse`].
//! The codecs are interchangeable strategies plugged into
//! [`DeviceClient`](crate::client::DeviceClient); none of them performs I/O.
//!
//! | Codec | Devices | Framing |
//! |-------|---------|---------|
//! | [`ModbusCodec`] | drives, generic holding-register devices | RTU (CRC-16) or ASCII (LRC) |
//! | [`LrcAsciiCodec`] | quartz thickness monitors | `:` hex, LRC, CR LF |
//! | [`CommandAsciiCodec`] | vacuum gauges | decimal address, command letter, mod-64 checksum, CR |

use std::ops::RangeInclusive;

mod command_ascii;
mod lrc_ascii;
mod modbus;

pub use command_ascii::{CommandAsciiCodec, GaugeRegister};
pub use lrc_ascii::LrcAsciiCodec;
pub use modbus::ModbusCodec;

#[cfg(test)]
pub(crate) use lrc_ascii::encode_frame as lrc_ascii_frame;

/// Function code of a holding-register read.
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
/// Function code of a single-register write.
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
/// Bit set in the function code of an exception reply.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Reasons a received frame is discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Empty frame")]
    Empty,

    #[error("Checksum mismatch: received {received:#06X}, calculated {calculated:#06X}")]
    ChecksumMismatch { received: u16, calculated: u16 },

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Unsupported command {0:#04X}")]
    UnknownCommand(u8),
}

impl FrameError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        FrameError::Malformed(reason.into())
    }
}

/// How the end of a response frame is recognized on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEnd {
    /// The response ends with this byte.
    Terminator(u8),
    /// The response has exactly this many bytes.
    Length(usize),
}

/// A request frame ready to be written to the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub frame: Vec<u8>,
    /// Command or function code a matching reply must carry.
    pub command: u8,
    pub response_end: FrameEnd,
    /// Number of register words a valid reply carries, `None` for text replies.
    pub expected_words: Option<usize>,
}

/// Data carried by a decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Register words, big-endian on the wire.
    ///
    /// Kept unsigned so that two words combine into one 32-bit value; see
    /// [`ParsedResponse::signed_words`] for registers holding signed data.
    Words(Vec<u16>),
    /// ASCII data field of the command-letter protocol.
    Text(String),
    /// Exception code of a rejected request.
    Exception(u8),
}

/// A validated response frame.
///
/// Only frames whose checksum matched are ever turned into a `ParsedResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Bus address of the sender.
    pub address: u16,
    /// Command or function code, including the exception flag if set.
    pub command: u8,
    /// Register echoed by a write acknowledgement or implied by a command letter.
    pub register: Option<u16>,
    pub payload: Payload,
    /// The checksum carried by the frame.
    pub checksum: u16,
    /// Length of the raw frame in bytes.
    pub length: usize,
}

impl ParsedResponse {
    /// The register words, if this is a register reply.
    pub fn words(&self) -> Option<&[u16]> {
        match &self.payload {
            Payload::Words(words) if !words.is_empty() => Some(words),
            _ => None,
        }
    }

    /// The register words reinterpreted as two's complement `i16`.
    pub fn signed_words(&self) -> Option<Vec<i16>> {
        self.words()
            .map(|words| words.iter().map(|&word| word as i16).collect())
    }

    /// The text data field, if this is a command-letter reply.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self.payload, Payload::Exception(_))
    }

    /// Returns `true` if this frame answers a request with `command`.
    pub fn is_reply_to(&self, command: u8) -> bool {
        self.command == command || self.command == command | EXCEPTION_FLAG
    }
}

/// Builds and parses the frames of one wire protocol.
pub trait FrameCodec: Send + Sync {
    /// Value carried by a write request.
    type Value: Send + Sync;

    /// Bus addresses this protocol can express.
    fn address_range(&self) -> RangeInclusive<u16>;

    /// Builds a request reading `count` registers starting at `register`.
    fn encode_read(&self, address: u16, register: u16, count: u16) -> crate::Result<Request>;

    /// Builds a request writing `value` to `register`.
    fn encode_write(
        &self,
        address: u16,
        register: u16,
        value: &Self::Value,
    ) -> crate::Result<Request>;

    /// Parses one received frame, terminator included or not.
    fn decode(&self, frame: &[u8]) -> Result<ParsedResponse, FrameError>;

    /// The integrity check of this protocol over `bytes`.
    fn checksum(&self, bytes: &[u8]) -> u16;
}

/// Decodes the address/function/body part shared by Modbus RTU, Modbus ASCII
/// and the thickness-monitor framing.
///
/// `pdu` starts with the address byte and excludes the checksum.
pub(crate) fn parse_register_pdu(
    pdu: &[u8],
    checksum: u16,
    length: usize,
) -> Result<ParsedResponse, FrameError> {
    let (&address, rest) = pdu
        .split_first()
        .ok_or_else(|| FrameError::malformed("missing address"))?;
    let (&command, body) = rest
        .split_first()
        .ok_or_else(|| FrameError::malformed("missing command"))?;
    let (register, payload) = match command {
        READ_HOLDING_REGISTERS => {
            let (&byte_count, data) = body
                .split_first()
                .ok_or_else(|| FrameError::malformed("missing byte count"))?;
            let byte_count = usize::from(byte_count);
            if byte_count % 2 != 0 || data.len() != byte_count {
                return Err(FrameError::malformed(format!(
                    "byte count {byte_count} does not match {} data bytes",
                    data.len()
                )));
            }
            (None, Payload::Words(be_words(data)))
        }
        WRITE_SINGLE_REGISTER => {
            if body.len() != 4 {
                return Err(FrameError::malformed(format!(
                    "write acknowledgement carries {} bytes",
                    body.len()
                )));
            }
            let words = be_words(body);
            (Some(words[0]), Payload::Words(vec![words[1]]))
        }
        c if c & EXCEPTION_FLAG != 0 => match body {
            [code] => (None, Payload::Exception(*code)),
            _ => return Err(FrameError::malformed("exception reply without code")),
        },
        c => return Err(FrameError::UnknownCommand(c)),
    };
    Ok(ParsedResponse {
        address: u16::from(address),
        command,
        register,
        payload,
        checksum,
        length,
    })
}

fn be_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn register_pdu_read_reply() {
        let parsed = parse_register_pdu(&[0x01, 0x03, 0x04, 0x00, 0x64, 0xFF, 0xFF], 0, 9).unwrap();
        assert_eq!(parsed.address, 1);
        assert_eq!(parsed.command, READ_HOLDING_REGISTERS);
        assert_eq!(parsed.register, None);
        assert_eq!(parsed.words(), Some(&[100, 0xFFFF][..]));
        assert_eq!(parsed.length, 9);
    }

    #[test]
    fn register_pdu_write_ack() {
        let parsed = parse_register_pdu(&[0x02, 0x06, 0x00, 0x07, 0x27, 0x06], 0, 8).unwrap();
        assert_eq!(parsed.address, 2);
        assert_eq!(parsed.register, Some(7));
        assert_eq!(parsed.words(), Some(&[9990][..]));
    }

    #[test]
    fn register_pdu_exception() {
        let parsed = parse_register_pdu(&[0x01, 0x83, 0x02], 0, 5).unwrap();
        assert!(parsed.is_exception());
        assert!(parsed.is_reply_to(READ_HOLDING_REGISTERS));
        assert!(!parsed.is_reply_to(WRITE_SINGLE_REGISTER));
        assert_eq!(parsed.words(), None);
    }

    #[test]
    fn register_pdu_truncated() {
        assert_matches!(parse_register_pdu(&[], 0, 0), Err(FrameError::Malformed(_)));
        assert_matches!(parse_register_pdu(&[0x01], 0, 1), Err(FrameError::Malformed(_)));
        assert_matches!(
            parse_register_pdu(&[0x01, 0x03], 0, 2),
            Err(FrameError::Malformed(_))
        );
        // byte count says 4, only 3 bytes follow
        assert_matches!(
            parse_register_pdu(&[0x01, 0x03, 0x04, 0x00, 0x01, 0x02], 0, 6),
            Err(FrameError::Malformed(_))
        );
        assert_matches!(
            parse_register_pdu(&[0x01, 0x03, 0x03, 0x00, 0x01, 0x02], 0, 6),
            Err(FrameError::Malformed(_))
        );
        assert_matches!(
            parse_register_pdu(&[0x01, 0x06, 0x00, 0x07, 0x27], 0, 5),
            Err(FrameError::Malformed(_))
        );
        assert_matches!(
            parse_register_pdu(&[0x01, 0x10, 0x00], 0, 3),
            Err(FrameError::UnknownCommand(0x10))
        );
    }

    #[test]
    fn empty_payload_has_no_words() {
        let response = ParsedResponse {
            address: 1,
            command: READ_HOLDING_REGISTERS,
            register: None,
            payload: Payload::Words(Vec::new()),
            checksum: 0,
            length: 0,
        };
        assert_eq!(response.words(), None);
        assert_eq!(response.signed_words(), None);
        assert_eq!(response.text(), None);
    }

    #[test]
    fn signed_words() {
        let response = ParsedResponse {
            address: 1,
            command: READ_HOLDING_REGISTERS,
            register: None,
            payload: Payload::Words(vec![0x0001, 0x7FFF, 0x8000, 0xFFFF]),
            checksum: 0,
            length: 0,
        };
        assert_eq!(response.signed_words(), Some(vec![1, i16::MAX, i16::MIN, -1]));
        assert_eq!(response.words(), Some(&[0x0001, 0x7FFF, 0x8000, 0xFFFF][..]));
    }
}
