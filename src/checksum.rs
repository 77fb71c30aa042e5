//! Integrity checks used by the supported wire protocols.
//!
//! * [`lrc`] – two's-complement of the byte sum, used by the `:`-prefixed ASCII
//!   framing (thickness monitors and Modbus ASCII).
//! * [`crc16`] – Modbus CRC-16 (seed `0xFFFF`, reflected polynomial `0xA001`),
//!   used by binary RTU framing.
//! * [`mod64`] – the single printable checksum byte of the vacuum-gauge
//!   command-letter protocol.

/// Longitudinal redundancy check over `payload`.
///
/// # Examples
///
/// ```
/// use rs485_lab_lib::checksum::lrc;
///
/// assert_eq!(lrc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x10]), 0xEC);
/// ```
pub fn lrc(payload: &[u8]) -> u8 {
    let sum = payload
        .iter()
        .fold(0u32, |acc, &byte| acc.wrapping_add(u32::from(byte)));
    (((sum ^ 0xFF) + 1) & 0xFF) as u8
}

/// Verifies that the last byte of `message` is the LRC of the bytes before it.
///
/// An empty message never passes.
pub fn check_lrc(message: &[u8]) -> bool {
    match message.split_last() {
        Some((&expected, payload)) => lrc(payload) == expected,
        None => false,
    }
}

/// Modbus CRC-16 over `payload`.
pub fn crc16(payload: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in payload {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Verifies the trailing CRC-16 (low byte first) of a binary RTU frame.
pub fn check_crc16(message: &[u8]) -> bool {
    if message.len() < 3 {
        return false;
    }
    let (payload, crc) = message.split_at(message.len() - 2);
    crc16(payload) == u16::from_le_bytes([crc[0], crc[1]])
}

/// Sum of all bytes modulo 64, offset into the printable range by 64.
///
/// # Examples
///
/// ```
/// use rs485_lab_lib::checksum::mod64;
///
/// assert_eq!(mod64(b"002M"), b'_');
/// ```
pub fn mod64(message: &[u8]) -> u8 {
    let sum = message
        .iter()
        .fold(0u32, |acc, &byte| acc.wrapping_add(u32::from(byte)));
    (sum % 64 + 64) as u8
}
