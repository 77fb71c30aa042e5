//! The link below the frame codecs.
//!
//! A [`Transport`] performs exactly one request/response exchange: write the
//! request, wait the inter-transaction delay, read until the frame end or the
//! read timeout. Implementations must not keep the link open between calls
//! so that every retry starts from a fresh port.

use crate::config::ConnectionConfig;
use crate::frame::FrameEnd;
use async_trait::async_trait;
use std::time::Duration;

/// Reasons an exchange produced no bytes to decode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Cannot open serial port {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        TransportError::Io(error.to_string())
    }
}

/// One request/response exchange on a serial link.
#[async_trait]
pub trait Transport: Send {
    /// Sends `request` and returns the raw reply.
    ///
    /// The reply may be incomplete if the read timeout expired after the
    /// first bytes arrived; the codec decides whether it is usable.
    async fn transact(
        &mut self,
        config: &ConnectionConfig,
        request: &[u8],
        end: FrameEnd,
        delay: Duration,
    ) -> Result<Vec<u8>, TransportError>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    pub(crate) enum MockReply {
        Frame(Vec<u8>),
        Timeout,
    }

    #[derive(Debug, Default)]
    struct State {
        replies: VecDeque<MockReply>,
        fallback: Option<MockReply>,
        requests: Vec<Vec<u8>>,
        baud_rates: Vec<u32>,
    }

    /// Replays scripted replies and records what was sent.
    ///
    /// Clones share their state, so a test keeps one handle while the client
    /// owns the other. Once the script runs out the fallback reply is used, a
    /// timeout if none was set.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockTransport {
        state: Arc<Mutex<State>>,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn reply(&self, frame: impl Into<Vec<u8>>) -> &Self {
            self.push(MockReply::Frame(frame.into()))
        }

        pub(crate) fn timeout(&self) -> &Self {
            self.push(MockReply::Timeout)
        }

        pub(crate) fn always(&self, reply: MockReply) -> &Self {
            self.state.lock().unwrap().fallback = Some(reply);
            self
        }

        pub(crate) fn requests(&self) -> Vec<Vec<u8>> {
            self.state.lock().unwrap().requests.clone()
        }

        pub(crate) fn transactions(&self) -> usize {
            self.state.lock().unwrap().requests.len()
        }

        pub(crate) fn baud_rates(&self) -> Vec<u32> {
            self.state.lock().unwrap().baud_rates.clone()
        }

        fn push(&self, reply: MockReply) -> &Self {
            self.state.lock().unwrap().replies.push_back(reply);
            self
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn transact(
            &mut self,
            config: &ConnectionConfig,
            request: &[u8],
            _end: FrameEnd,
            _delay: Duration,
        ) -> Result<Vec<u8>, TransportError> {
            let mut state = self.state.lock().unwrap();
            state.requests.push(request.to_vec());
            state.baud_rates.push(config.baud_rate);
            let reply = state
                .replies
                .pop_front()
                .or_else(|| state.fallback.clone())
                .unwrap_or(MockReply::Timeout);
            match reply {
                MockReply::Frame(frame) => Ok(frame),
                MockReply::Timeout => Err(TransportError::Timeout(config.timeout)),
            }
        }
    }
}
