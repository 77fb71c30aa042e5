//! `:`-prefixed hexadecimal framing protected by an LRC.
//!
//! ```text
//! ':' ADDR CMD REGISTER(2) DATA(2) LRC '\r' '\n'
//! ```
//!
//! Every byte between the colon and CR LF is sent as two uppercase hex
//! digits, multi-byte fields big-endian. Read replies carry a byte count and
//! two bytes per register instead of REGISTER/DATA; write replies echo the
//! register and value.

use super::{
    parse_register_pdu, FrameCodec, FrameEnd, FrameError, ParsedResponse, Request,
    READ_HOLDING_REGISTERS, WRITE_SINGLE_REGISTER,
};
use crate::checksum::lrc;
use crate::Error;
use std::ops::RangeInclusive;

pub(crate) const START: u8 = b':';
pub(crate) const TERMINATOR: &[u8] = b"\r\n";

/// Frames `pdu` as `:` + hex(pdu) + hex(LRC) + CR LF.
pub(crate) fn encode_frame(pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 * pdu.len() + 5);
    frame.push(START);
    frame.extend_from_slice(hex::encode_upper(pdu).as_bytes());
    frame.extend_from_slice(hex::encode_upper([lrc(pdu)]).as_bytes());
    frame.extend_from_slice(TERMINATOR);
    frame
}

/// Extracts the checked binary payload (LRC removed) and the received LRC.
///
/// Bytes before the start colon are line noise and skipped.
pub(crate) fn ascii_payload(frame: &[u8]) -> Result<(Vec<u8>, u8), FrameError> {
    let end = frame
        .iter()
        .rposition(|b| !b"\r\n".contains(b))
        .map_or(0, |p| p + 1);
    let frame = &frame[..end];
    if frame.is_empty() {
        return Err(FrameError::Empty);
    }
    let start = frame
        .iter()
        .position(|&b| b == START)
        .ok_or_else(|| FrameError::malformed("missing ':' start character"))?;
    let mut bytes = hex::decode(&frame[start + 1..])
        .map_err(|err| FrameError::malformed(format!("invalid hex: {err}")))?;
    let received = bytes
        .pop()
        .ok_or_else(|| FrameError::malformed("frame without LRC"))?;
    let calculated = lrc(&bytes);
    if received != calculated {
        return Err(FrameError::ChecksumMismatch {
            received: received.into(),
            calculated: calculated.into(),
        });
    }
    Ok((bytes, received))
}

/// Parses a complete `:`-framed register reply.
pub(crate) fn decode_frame(frame: &[u8]) -> Result<ParsedResponse, FrameError> {
    let (pdu, received) = ascii_payload(frame)?;
    parse_register_pdu(&pdu, received.into(), frame.len())
}

pub(crate) fn address_byte(address: u16, range: RangeInclusive<u16>) -> crate::Result<u8> {
    if range.contains(&address) {
        if let Ok(byte) = u8::try_from(address) {
            return Ok(byte);
        }
    }
    Err(Error::AddressOutOfRange {
        address,
        min: *range.start(),
        max: *range.end(),
    })
}

pub(crate) fn register_pdu(address: u8, command: u8, register: u16, value: u16) -> [u8; 6] {
    let [reg_hi, reg_lo] = register.to_be_bytes();
    let [val_hi, val_lo] = value.to_be_bytes();
    [address, command, reg_hi, reg_lo, val_hi, val_lo]
}

/// Codec of the quartz thickness-monitor family.
#[derive(Debug, Clone, Copy, Default)]
pub struct LrcAsciiCodec;

impl LrcAsciiCodec {
    pub const ADDRESS_MIN: u16 = 1;
    pub const ADDRESS_MAX: u16 = 254;

    fn request(
        &self,
        address: u16,
        command: u8,
        register: u16,
        value: u16,
    ) -> crate::Result<Request> {
        let address = address_byte(address, self.address_range())?;
        // a write is acknowledged by an echo of the written word
        let expected_words = if command == READ_HOLDING_REGISTERS {
            usize::from(value)
        } else {
            1
        };
        Ok(Request {
            frame: encode_frame(&register_pdu(address, command, register, value)),
            command,
            response_end: FrameEnd::Terminator(b'\n'),
            expected_words: Some(expected_words),
        })
    }
}

impl FrameCodec for LrcAsciiCodec {
    type Value = u16;

    fn address_range(&self) -> RangeInclusive<u16> {
        Self::ADDRESS_MIN..=Self::ADDRESS_MAX
    }

    fn encode_read(&self, address: u16, register: u16, count: u16) -> crate::Result<Request> {
        self.request(address, READ_HOLDING_REGISTERS, register, count)
    }

    fn encode_write(&self, address: u16, register: u16, value: &u16) -> crate::Result<Request> {
        self.request(address, WRITE_SINGLE_REGISTER, register, *value)
    }

    fn decode(&self, frame: &[u8]) -> Result<ParsedResponse, FrameError> {
        decode_frame(frame)
    }

    fn checksum(&self, bytes: &[u8]) -> u16 {
        lrc(bytes).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Payload;
    use assert_matches::assert_matches;

    #[test]
    fn read_request_layout() {
        let request = LrcAsciiCodec.encode_read(1, 0, 16).unwrap();
        assert_eq!(request.frame, b":010300000010EC\r\n");
        assert_eq!(request.command, READ_HOLDING_REGISTERS);
        assert_eq!(request.response_end, FrameEnd::Terminator(b'\n'));
    }

    #[test]
    fn write_request_layout() {
        // 0x0A + 0x06 + 0x07 + 0x27 + 0x06 = 0x44 -> LRC 0xBC
        let request = LrcAsciiCodec.encode_write(10, 7, &9990).unwrap();
        assert_eq!(request.frame, b":0A0600072706BC\r\n");
        assert_eq!(request.command, WRITE_SINGLE_REGISTER);
    }

    #[test]
    fn address_range() {
        assert_matches!(
            LrcAsciiCodec.encode_read(0, 0, 1),
            Err(Error::AddressOutOfRange { address: 0, .. })
        );
        assert_matches!(
            LrcAsciiCodec.encode_read(255, 0, 1),
            Err(Error::AddressOutOfRange { address: 255, .. })
        );
        assert!(LrcAsciiCodec.encode_read(254, 0, 1).is_ok());
    }

    #[test]
    fn lrc_survives_framing() {
        for payload in [
            &[0x01u8, 0x03, 0x00, 0x00, 0x00, 0x10][..],
            &[0xFE, 0x06, 0x00, 0x0E, 0x00, 0x05][..],
            &[0x00][..],
            &[0xFF; 12][..],
        ] {
            let (decoded, received) = ascii_payload(&encode_frame(payload)).unwrap();
            assert_eq!(decoded, payload);
            assert_eq!(lrc(&decoded), lrc(payload));
            assert_eq!(received, lrc(payload));
        }
    }

    #[test]
    fn decode_read_reply() {
        let frame = encode_frame(&[0x01, 0x03, 0x04, 0x00, 0x00, 0x30, 0x39]);
        let parsed = LrcAsciiCodec.decode(&frame).unwrap();
        assert_eq!(parsed.address, 1);
        assert_eq!(parsed.command, READ_HOLDING_REGISTERS);
        assert_eq!(parsed.payload, Payload::Words(vec![0, 12345]));
        assert_eq!(parsed.length, frame.len());
    }

    #[test]
    fn decode_write_echo_round_trips_request() {
        let request = LrcAsciiCodec.encode_write(3, 14, &5).unwrap();
        let parsed = LrcAsciiCodec.decode(&request.frame).unwrap();
        assert_eq!(parsed.address, 3);
        assert_eq!(parsed.command, WRITE_SINGLE_REGISTER);
        assert_eq!(parsed.register, Some(14));
        assert_eq!(parsed.words(), Some(&[5][..]));
    }

    #[test]
    fn decode_skips_leading_noise() {
        let mut frame = vec![0x00, 0x7F];
        frame.extend(encode_frame(&[0x01, 0x06, 0x00, 0x07, 0x00, 0x01]));
        assert!(LrcAsciiCodec.decode(&frame).is_ok());
    }

    #[test]
    fn decode_rejects_corruption() {
        assert_matches!(LrcAsciiCodec.decode(b""), Err(FrameError::Empty));
        assert_matches!(LrcAsciiCodec.decode(b"\r\n"), Err(FrameError::Empty));
        assert_matches!(
            LrcAsciiCodec.decode(b"010300\r\n"),
            Err(FrameError::Malformed(_))
        );
        assert_matches!(
            LrcAsciiCodec.decode(b":0103ZZ\r\n"),
            Err(FrameError::Malformed(_))
        );
        assert_matches!(
            LrcAsciiCodec.decode(b":010\r\n"),
            Err(FrameError::Malformed(_))
        );
        assert_matches!(
            LrcAsciiCodec.decode(b":010300000010ED\r\n"),
            Err(FrameError::ChecksumMismatch {
                received: 0xED,
                calculated: 0xEC
            })
        );
        // truncated read reply with a valid LRC
        let frame = encode_frame(&[0x01, 0x03, 0x04, 0x00]);
        assert_matches!(LrcAsciiCodec.decode(&frame), Err(FrameError::Malformed(_)));
    }
}
