//! The retrying register client shared by every device family.
//!
//! [`DeviceClient`] combines a [`FrameCodec`] with a [`Transport`] and applies
//! one retry discipline to all of them: each attempt is a full transaction,
//! and a reply is accepted only if it decodes, comes from the client's
//! address and answers the command that was sent. Anything else is noise on
//! the shared bus and costs one attempt. After `retries` failed attempts the
//! operation yields `Ok(None)`.
//!
//! ```no_run
//! # #[cfg(feature = "serial")]
//! # async fn demo() -> rs485_lab_lib::Result<()> {
//! use rs485_lab_lib::client::{DeviceClient, RegisterFloatExt};
//! use rs485_lab_lib::config::ConnectionConfig;
//! use rs485_lab_lib::frame::LrcAsciiCodec;
//! use rs485_lab_lib::tokio_serial::SerialTransport;
//!
//! let config = ConnectionConfig::new("/dev/ttyUSB0");
//! let mut client = DeviceClient::new(LrcAsciiCodec, SerialTransport, config, 1)?;
//! if let Some(pwm) = client.read_single_register_float(7, 100.0).await? {
//!     println!("PWM {pwm:.2} %");
//! }
//! # Ok(())
//! # }
//! ```

use crate::codec::{composite_to_scaled, raw_to_scaled, scaled_to_raw};
use crate::config::{ConfigError, ConnectionConfig};
use crate::frame::{FrameCodec, ParsedResponse, Payload, Request};
use crate::transport::Transport;
use crate::{Error, Result};
use async_trait::async_trait;
use log::{debug, trace, warn};
use std::time::Duration;

/// Attempts per operation unless configured otherwise.
pub const DEFAULT_RETRIES: u32 = 5;
/// Pause between sending a request and reading the reply.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(5);

/// Register access as seen by the device facades.
///
/// `Ok(None)` means no valid reply arrived within the retry budget.
#[async_trait]
pub trait RegisterClient: Send {
    /// Value written by [`write_register`](Self::write_register).
    type Value: Send + Sync;

    /// Bus address replies must come from.
    fn address(&self) -> u16;

    /// The link configuration currently in use.
    fn config(&self) -> &ConnectionConfig;

    async fn read_registers(&mut self, start: u16, count: u16) -> Result<Option<ParsedResponse>>;

    async fn write_register(
        &mut self,
        register: u16,
        value: &Self::Value,
    ) -> Result<Option<ParsedResponse>>;

    /// Talks to `address` from now on.
    fn set_address(&mut self, address: u16) -> Result<()>;

    /// Uses `baud_rate` for all following transactions.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;
}

/// Scaled and composite register access for word-oriented protocols.
#[async_trait]
pub trait RegisterFloatExt: RegisterClient<Value = u16> {
    /// Reads one register and divides it by `factor`.
    async fn read_single_register_float(&mut self, register: u16, factor: f64) -> Result<Option<f64>> {
        let response = self.read_registers(register, 1).await?;
        Ok(response
            .as_ref()
            .and_then(ParsedResponse::words)
            .map(|words| raw_to_scaled(words[0], factor)))
    }

    /// Reads the 32-bit composite at `start` and `start + 1` and divides it by `factor`.
    async fn read_two_register_float(&mut self, start: u16, factor: f64) -> Result<Option<f64>> {
        let response = self.read_registers(start, 2).await?;
        match response.as_ref().and_then(ParsedResponse::words) {
            Some(words) => Ok(Some(composite_to_scaled(words, factor)?)),
            None => Ok(None),
        }
    }

    /// Writes `value * factor` and returns the value the device holds afterwards.
    ///
    /// The acknowledged value is used when the device echoes the write;
    /// otherwise the register is read back.
    async fn write_single_register_float(
        &mut self,
        register: u16,
        value: f64,
        factor: f64,
    ) -> Result<Option<f64>> {
        let raw = scaled_to_raw(value, factor);
        let response = self.write_register(register, &raw).await?;
        match response.as_ref().and_then(ParsedResponse::words) {
            Some(words) => Ok(Some(raw_to_scaled(words[0], factor))),
            None => {
                debug!("No acknowledgement for register {register}, reading it back");
                self.read_single_register_float(register, factor).await
            }
        }
    }
}

impl<T: RegisterClient<Value = u16> + ?Sized> RegisterFloatExt for T {}

/// A [`RegisterClient`] for one device on one link.
#[derive(Debug)]
pub struct DeviceClient<C, T> {
    codec: C,
    transport: T,
    config: ConnectionConfig,
    address: u16,
    retries: u32,
    delay: Duration,
}

impl<C: FrameCodec, T: Transport> DeviceClient<C, T> {
    /// Creates a client for the device at `address`.
    ///
    /// Fails if `config` is unusable or `address` cannot be expressed by `codec`.
    pub fn new(codec: C, transport: T, config: ConnectionConfig, address: u16) -> Result<Self> {
        config.validate()?;
        check_address(&codec, address)?;
        Ok(Self {
            codec,
            transport,
            config,
            address,
            retries: DEFAULT_RETRIES,
            delay: DEFAULT_DELAY,
        })
    }

    /// Sets the number of attempts per operation, at least one.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    /// Sets the pause between request and reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `request` until a matching reply arrives or the attempts are used up.
    async fn transaction(&mut self, request: Request) -> Option<ParsedResponse> {
        for attempt in 1..=self.retries {
            trace!("-> {}", request.frame.escape_ascii());
            let raw = match self
                .transport
                .transact(&self.config, &request.frame, request.response_end, self.delay)
                .await
            {
                Ok(raw) => raw,
                Err(error) => {
                    debug!("Attempt {attempt}/{}: {error}", self.retries);
                    continue;
                }
            };
            let response = match self.codec.decode(&raw) {
                Ok(response) => response,
                Err(error) => {
                    debug!("Attempt {attempt}/{}: {error}", self.retries);
                    continue;
                }
            };
            if response.address != self.address {
                debug!(
                    "Attempt {attempt}/{}: discarding reply from address {}, expected {}",
                    self.retries, response.address, self.address
                );
                continue;
            }
            if !response.is_reply_to(request.command) {
                debug!(
                    "Attempt {attempt}/{}: discarding reply to command {:#04X}, expected {:#04X}",
                    self.retries, response.command, request.command
                );
                continue;
            }
            if let (Some(expected), Payload::Words(words)) =
                (request.expected_words, &response.payload)
            {
                if words.len() != expected {
                    debug!(
                        "Attempt {attempt}/{}: reply carries {} registers, expected {expected}",
                        self.retries,
                        words.len()
                    );
                    continue;
                }
            }
            if let Payload::Exception(code) = response.payload {
                warn!("Device {} rejected the request with exception {code:#04X}", self.address);
            }
            return Some(response);
        }
        warn!(
            "No valid reply from device {} after {} attempts",
            self.address, self.retries
        );
        None
    }
}

#[async_trait]
impl<C, T> RegisterClient for DeviceClient<C, T>
where
    C: FrameCodec,
    T: Transport,
{
    type Value = C::Value;

    fn address(&self) -> u16 {
        self.address
    }

    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn read_registers(&mut self, start: u16, count: u16) -> Result<Option<ParsedResponse>> {
        let request = self.codec.encode_read(self.address, start, count)?;
        Ok(self.transaction(request).await)
    }

    async fn write_register(
        &mut self,
        register: u16,
        value: &Self::Value,
    ) -> Result<Option<ParsedResponse>> {
        let request = self.codec.encode_write(self.address, register, value)?;
        Ok(self.transaction(request).await)
    }

    fn set_address(&mut self, address: u16) -> Result<()> {
        check_address(&self.codec, address)?;
        debug!("Client address {} -> {address}", self.address);
        self.address = address;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        if baud_rate == 0 {
            return Err(ConfigError::ZeroBaudRate.into());
        }
        debug!("Client baud rate {} -> {baud_rate}", self.config.baud_rate);
        self.config = self.config.with_baud_rate(baud_rate);
        Ok(())
    }
}

pub(crate) fn check_address<C: FrameCodec>(codec: &C, address: u16) -> Result<()> {
    let range = codec.address_range();
    if range.contains(&address) {
        Ok(())
    } else {
        Err(Error::AddressOutOfRange {
            address,
            min: *range.start(),
            max: *range.end(),
        })
    }
}
