//! [`Transport`] over a local serial port.
//!
//! The port is opened for each exchange and closed again when the exchange
//! ends, so a wedged adapter or a changed baud rate is picked up by the next
//! attempt.

use crate::config::ConnectionConfig;
use crate::frame::{FrameEnd, EXCEPTION_FLAG};
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tokio_serial::SerialPortBuilderExt;

/// Length of an RTU exception reply: address, function, code, CRC.
const EXCEPTION_REPLY_LENGTH: usize = 5;

#[derive(Debug, Clone, Copy, Default)]
pub struct SerialTransport;

impl SerialTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn transact(
        &mut self,
        config: &ConnectionConfig,
        request: &[u8],
        end: FrameEnd,
        delay: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let mut port = config
            .serial_port_builder()
            .open_native_async()
            .map_err(|error| TransportError::Open {
                port: config.port.clone(),
                reason: error.to_string(),
            })?;

        let write = async {
            port.write_all(request).await?;
            port.flush().await
        };
        match config.write_timeout {
            Some(limit) => timeout(limit, write)
                .await
                .map_err(|_| TransportError::Timeout(limit))??,
            None => write.await?,
        }

        tokio::time::sleep(delay).await;
        read_frame(&mut port, end, config.timeout, config.inter_byte_timeout).await
    }
}

/// Reads one reply from `reader`.
///
/// Stops at the frame end, at end of stream, when `total` has elapsed, or when
/// the line stayed silent for `inter_byte` after the first byte. Returns
/// whatever arrived; only a reply without any byte is a timeout.
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    end: FrameEnd,
    total: Duration,
    inter_byte: Option<Duration>,
) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin + Send,
{
    let deadline = Instant::now() + total;
    let mut frame = Vec::new();
    let mut buffer = [0u8; 256];
    loop {
        if let Some(length) = complete_length(&frame, end) {
            frame.truncate(length);
            break;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let wait = match inter_byte {
            Some(gap) if !frame.is_empty() => gap.min(remaining),
            _ => remaining,
        };
        match timeout(wait, reader.read(&mut buffer)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => frame.extend_from_slice(&buffer[..n]),
            Ok(Err(error)) => return Err(error.into()),
        }
    }
    if frame.is_empty() {
        Err(TransportError::Timeout(total))
    } else {
        log::trace!("<- {}", frame.escape_ascii());
        Ok(frame)
    }
}

/// Length of the complete frame at the start of `frame`, if one has arrived.
fn complete_length(frame: &[u8], end: FrameEnd) -> Option<usize> {
    match end {
        FrameEnd::Terminator(byte) => frame.iter().position(|&b| b == byte).map(|p| p + 1),
        FrameEnd::Length(length) => {
            let length = match frame.get(1) {
                Some(function) if function & EXCEPTION_FLAG != 0 => EXCEPTION_REPLY_LENGTH,
                _ => length,
            };
            (frame.len() >= length).then_some(length)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn terminator_ends_frame() {
        assert_eq!(complete_length(b":01\r", FrameEnd::Terminator(b'\n')), None);
        assert_eq!(
            complete_length(b":01\r\n:02", FrameEnd::Terminator(b'\n')),
            Some(5)
        );
    }

    #[test]
    fn length_ends_frame() {
        assert_eq!(complete_length(&[1, 3, 2, 0], FrameEnd::Length(7)), None);
        assert_eq!(complete_length(&[1, 3, 2, 0, 1, 0, 0, 9], FrameEnd::Length(7)), Some(7));
        // exception replies are shorter than the expected reply
        assert_eq!(complete_length(&[1, 0x83, 2, 0, 0], FrameEnd::Length(25)), Some(5));
    }

    #[tokio::test]
    async fn read_stops_at_terminator() {
        let mut reader: &[u8] = b"002M100023X\r002M";
        let frame = read_frame(
            &mut reader,
            FrameEnd::Terminator(b'\r'),
            Duration::from_millis(100),
            None,
        )
        .await
        .unwrap();
        assert_eq!(frame, b"002M100023X\r");
    }

    #[tokio::test]
    async fn read_returns_partial_frame_at_end_of_stream() {
        let mut reader: &[u8] = &[0x01, 0x03, 0x04];
        let frame = read_frame(&mut reader, FrameEnd::Length(9), Duration::from_millis(100), None)
            .await
            .unwrap();
        assert_eq!(frame, [0x01, 0x03, 0x04]);
    }

    #[tokio::test]
    async fn silent_line_times_out() {
        let (mut client, _server) = tokio::io::duplex(64);
        let result = read_frame(
            &mut client,
            FrameEnd::Terminator(b'\n'),
            Duration::from_millis(20),
            None,
        )
        .await;
        assert_matches!(result, Err(TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn inter_byte_gap_ends_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(b":0103").await.unwrap();
        let frame = read_frame(
            &mut client,
            FrameEnd::Terminator(b'\n'),
            Duration::from_secs(5),
            Some(Duration::from_millis(20)),
        )
        .await
        .unwrap();
        assert_eq!(frame, b":0103");
    }
}
