//! Modbus RTU backend built on `tokio-modbus`.
//!
//! [`ModbusRtuClient`] is an alternative to
//! `DeviceClient<ModbusCodec, SerialTransport>` that leaves framing and CRC
//! handling to `tokio-modbus`. It keeps the retry contract of
//! [`RegisterClient`]: a fresh port and Modbus context per attempt, `Ok(None)`
//! once all attempts failed.

use crate::checksum::crc16;
use crate::client::{check_address, RegisterClient, DEFAULT_DELAY, DEFAULT_RETRIES};
use crate::config::{ConfigError, ConnectionConfig};
use crate::frame::{
    ModbusCodec, ParsedResponse, Payload, EXCEPTION_FLAG, READ_HOLDING_REGISTERS,
    WRITE_SINGLE_REGISTER,
};
use crate::transport::TransportError;
use crate::Result;
use async_trait::async_trait;
use log::{debug, warn};
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::{rtu, Client, Reader, Writer};
use tokio_modbus::{ExceptionCode, Slave};
use tokio_serial::SerialPortBuilderExt;

#[derive(Debug, Clone, Copy)]
enum Operation {
    Read { start: u16, count: u16 },
    Write { register: u16, value: u16 },
}

impl Operation {
    fn command(&self) -> u8 {
        match self {
            Operation::Read { .. } => READ_HOLDING_REGISTERS,
            Operation::Write { .. } => WRITE_SINGLE_REGISTER,
        }
    }
}

/// Register client for Modbus RTU slaves such as frequency drives.
#[derive(Debug, Clone)]
pub struct ModbusRtuClient {
    config: ConnectionConfig,
    address: u16,
    retries: u32,
    delay: Duration,
}

impl ModbusRtuClient {
    pub fn new(config: ConnectionConfig, address: u16) -> Result<Self> {
        config.validate()?;
        check_address(&ModbusCodec::default(), address)?;
        Ok(Self {
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

    /// Sets the bus idle time before each attempt.
    ///
    /// `tokio-modbus` sends the request and reads the reply in one call, so
    /// unlike [`DeviceClient`](crate::client::DeviceClient) the delay is spent
    /// before the request goes out rather than between request and reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn run(&self, operation: Operation) -> Option<ParsedResponse> {
        for attempt in 1..=self.retries {
            match self.exchange(operation).await {
                Ok(response) => {
                    if let Payload::Exception(code) = response.payload {
                        warn!(
                            "Device {} rejected the request with exception {code:#04X}",
                            self.address
                        );
                    }
                    return Some(response);
                }
                Err(error) => debug!("Attempt {attempt}/{}: {error}", self.retries),
            }
        }
        warn!(
            "No valid reply from device {} after {} attempts",
            self.address, self.retries
        );
        None
    }

    async fn exchange(
        &self,
        operation: Operation,
    ) -> std::result::Result<ParsedResponse, TransportError> {
        let serial = self
            .config
            .serial_port_builder()
            .open_native_async()
            .map_err(|error| TransportError::Open {
                port: self.config.port.clone(),
                reason: error.to_string(),
            })?;
        // the address was range checked against 1..=247
        let mut ctx = rtu::attach_slave(serial, Slave(self.address as u8));
        tokio::time::sleep(self.delay).await;

        let outcome = match operation {
            Operation::Read { start, count } => {
                timeout(self.config.timeout, ctx.read_holding_registers(start, count))
                    .await
                    .map(|result| result.map(|reply| reply.map(Payload::Words)))
            }
            Operation::Write { register, value } => {
                timeout(self.config.timeout, ctx.write_single_register(register, value))
                    .await
                    .map(|result| result.map(|reply| reply.map(|()| Payload::Words(vec![value]))))
            }
        };
        if let Err(error) = ctx.disconnect().await {
            debug!("Error closing {}: {error:?}", self.config.port);
        }

        let payload = match outcome {
            Err(_) => return Err(TransportError::Timeout(self.config.timeout)),
            Ok(Err(error)) => return Err(TransportError::Io(error.to_string())),
            Ok(Ok(Err(exception))) => Payload::Exception(exception_code(&exception)),
            Ok(Ok(Ok(payload))) => payload,
        };
        Ok(reply(self.address as u8, operation, payload))
    }
}

/// Rebuilds the reply frame the slave sent, to report its checksum and length.
fn reply(address: u8, operation: Operation, payload: Payload) -> ParsedResponse {
    let mut pdu = vec![address];
    let (command, register) = match (&payload, operation) {
        (Payload::Exception(code), _) => {
            let command = operation.command() | EXCEPTION_FLAG;
            pdu.extend_from_slice(&[command, *code]);
            (command, None)
        }
        (_, Operation::Read { .. }) => {
            let words = match &payload {
                Payload::Words(words) => words.as_slice(),
                _ => &[],
            };
            pdu.push(READ_HOLDING_REGISTERS);
            pdu.push((2 * words.len()) as u8);
            pdu.extend(words.iter().flat_map(|word| word.to_be_bytes()));
            (READ_HOLDING_REGISTERS, None)
        }
        (_, Operation::Write { register, value }) => {
            pdu.push(WRITE_SINGLE_REGISTER);
            pdu.extend_from_slice(&register.to_be_bytes());
            pdu.extend_from_slice(&value.to_be_bytes());
            (WRITE_SINGLE_REGISTER, Some(register))
        }
    };
    ParsedResponse {
        address: address.into(),
        command,
        register,
        payload,
        checksum: crc16(&pdu),
        length: pdu.len() + 2,
    }
}

fn exception_code(code: &ExceptionCode) -> u8 {
    match code {
        ExceptionCode::IllegalFunction => 0x01,
        ExceptionCode::IllegalDataAddress => 0x02,
        ExceptionCode::IllegalDataValue => 0x03,
        ExceptionCode::ServerDeviceFailure => 0x04,
        ExceptionCode::Acknowledge => 0x05,
        ExceptionCode::ServerDeviceBusy => 0x06,
        ExceptionCode::MemoryParityError => 0x08,
        ExceptionCode::GatewayPathUnavailable => 0x0A,
        ExceptionCode::GatewayTargetDevice => 0x0B,
        _ => 0xFF,
    }
}

#[async_trait]
impl RegisterClient for ModbusRtuClient {
    type Value = u16;

    fn address(&self) -> u16 {
        self.address
    }

    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn read_registers(&mut self, start: u16, count: u16) -> Result<Option<ParsedResponse>> {
        Ok(self.run(Operation::Read { start, count }).await)
    }

    async fn write_register(&mut self, register: u16, value: &u16) -> Result<Option<ParsedResponse>> {
        Ok(self
            .run(Operation::Write {
                register,
                value: *value,
            })
            .await)
    }

    fn set_address(&mut self, address: u16) -> Result<()> {
        check_address(&ModbusCodec::default(), address)?;
        self.address = address;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        if baud_rate == 0 {
            return Err(ConfigError::ZeroBaudRate.into());
        }
        self.config = self.config.with_baud_rate(baud_rate);
        Ok(())
    }
}
