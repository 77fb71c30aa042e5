//! Modbus holding-register framing in its RTU and ASCII variants.
//!
//! RTU frames are `ADDR FC REGISTER(2) VALUE(2) CRC(2)` with the CRC sent low
//! byte first. ASCII frames share the `:`-prefixed LRC framing with the
//! thickness monitors.

use super::{
    lrc_ascii, parse_register_pdu, FrameCodec, FrameEnd, FrameError, ParsedResponse, Request,
    READ_HOLDING_REGISTERS, WRITE_SINGLE_REGISTER,
};
use crate::checksum::{crc16, lrc};
use crate::config::Framer;
use std::ops::RangeInclusive;

/// Smallest valid RTU reply: address, exception code, one byte, CRC.
const RTU_MIN_LENGTH: usize = 5;

/// Codec of Modbus slaves such as frequency drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModbusCodec {
    framer: Framer,
}

impl ModbusCodec {
    pub const ADDRESS_MIN: u16 = 1;
    pub const ADDRESS_MAX: u16 = 247;

    pub fn new(framer: Framer) -> Self {
        Self { framer }
    }

    pub fn framer(&self) -> Framer {
        self.framer
    }

    fn request(
        &self,
        address: u16,
        command: u8,
        register: u16,
        value: u16,
        rtu_reply_length: usize,
    ) -> crate::Result<Request> {
        let address = lrc_ascii::address_byte(address, self.address_range())?;
        let pdu = lrc_ascii::register_pdu(address, command, register, value);
        let (frame, response_end) = match self.framer {
            Framer::Rtu => {
                let mut frame = pdu.to_vec();
                frame.extend_from_slice(&crc16(&pdu).to_le_bytes());
                (frame, FrameEnd::Length(rtu_reply_length))
            }
            Framer::Ascii => (lrc_ascii::encode_frame(&pdu), FrameEnd::Terminator(b'\n')),
        };
        let expected_words = if command == READ_HOLDING_REGISTERS {
            usize::from(value)
        } else {
            1
        };
        Ok(Request {
            frame,
            command,
            response_end,
            expected_words: Some(expected_words),
        })
    }

    fn decode_rtu(&self, frame: &[u8]) -> Result<ParsedResponse, FrameError> {
        if frame.is_empty() {
            return Err(FrameError::Empty);
        }
        if frame.len() < RTU_MIN_LENGTH {
            return Err(FrameError::malformed(format!(
                "{} bytes is too short for an RTU frame",
                frame.len()
            )));
        }
        let (pdu, crc) = frame.split_at(frame.len() - 2);
        let received = u16::from_le_bytes([crc[0], crc[1]]);
        let calculated = crc16(pdu);
        if received != calculated {
            return Err(FrameError::ChecksumMismatch {
                received,
                calculated,
            });
        }
        parse_register_pdu(pdu, received, frame.len())
    }
}

impl FrameCodec for ModbusCodec {
    type Value = u16;

    fn address_range(&self) -> RangeInclusive<u16> {
        Self::ADDRESS_MIN..=Self::ADDRESS_MAX
    }

    fn encode_read(&self, address: u16, register: u16, count: u16) -> crate::Result<Request> {
        // address, function, byte count, data, CRC
        let reply_length = 5 + 2 * usize::from(count);
        self.request(address, READ_HOLDING_REGISTERS, register, count, reply_length)
    }

    fn encode_write(&self, address: u16, register: u16, value: &u16) -> crate::Result<Request> {
        self.request(address, WRITE_SINGLE_REGISTER, register, *value, 8)
    }

    fn decode(&self, frame: &[u8]) -> Result<ParsedResponse, FrameError> {
        match self.framer {
            Framer::Rtu => self.decode_rtu(frame),
            Framer::Ascii => lrc_ascii::decode_frame(frame),
        }
    }

    fn checksum(&self, bytes: &[u8]) -> u16 {
        match self.framer {
            Framer::Rtu => crc16(bytes),
            Framer::Ascii => lrc(bytes).into(),
        }
    }
}
