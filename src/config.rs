//! Serial link description shared by every device on one RS-485 port.
//!
//! A [`ConnectionConfig`] is created once and treated as immutable. When a
//! device accepts a new baud rate the owning client swaps in a copy made with
//! [`ConnectionConfig::with_baud_rate`]; the original value is never mutated.
use std::time::Duration;

/// Errors raised when a connection description is not usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Serial port name must not be empty")]
    EmptyPort,
    #[error("Baud rate must be greater than zero")]
    ZeroBaudRate,
    #[error("Read timeout must be greater than zero")]
    ZeroTimeout,
}

/// Byte framing used by register-oriented (Modbus style) devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Framer {
    /// Binary frames protected by a CRC-16.
    #[default]
    Rtu,
    /// `:`-prefixed hex text frames protected by an LRC and ended by CR LF.
    Ascii,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// Parameters of one serial link.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConnectionConfig {
    /// Device name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// How long to wait for a complete response.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub timeout: Duration,
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub write_timeout: Option<Duration>,
    /// Maximum silence between two bytes of one response, `None` to disable.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub inter_byte_timeout: Option<Duration>,
    pub framer: Framer,
}

impl ConnectionConfig {
    pub const DEFAULT_PORT: &'static str = "/dev/serial0";
    pub const DEFAULT_BAUD_RATE: u32 = 9600;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(200);

    /// Creates a configuration for `port` with 9600 baud, 8N1 and RTU framing.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn inter_byte_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inter_byte_timeout = timeout;
        self
    }

    pub fn framer(mut self, framer: Framer) -> Self {
        self.framer = framer;
        self
    }

    /// Returns a copy of this configuration running at `baud_rate`.
    pub fn with_baud_rate(&self, baud_rate: u32) -> Self {
        self.clone().baud_rate(baud_rate)
    }

    /// Checks the values that would make every transaction fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.trim().is_empty() {
            return Err(ConfigError::EmptyPort);
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::ZeroBaudRate);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Creates a `tokio_serial::SerialPortBuilder` with these settings.
    #[cfg(feature = "serial")]
    pub fn serial_port_builder(&self) -> tokio_serial::SerialPortBuilder {
        tokio_serial::new(&self.port, self.baud_rate)
            .data_bits(match self.data_bits {
                DataBits::Five => tokio_serial::DataBits::Five,
                DataBits::Six => tokio_serial::DataBits::Six,
                DataBits::Seven => tokio_serial::DataBits::Seven,
                DataBits::Eight => tokio_serial::DataBits::Eight,
            })
            .parity(match self.parity {
                Parity::None => tokio_serial::Parity::None,
                Parity::Even => tokio_serial::Parity::Even,
                Parity::Odd => tokio_serial::Parity::Odd,
            })
            .stop_bits(match self.stop_bits {
                StopBits::One => tokio_serial::StopBits::One,
                StopBits::Two => tokio_serial::StopBits::Two,
            })
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(self.timeout)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: Self::DEFAULT_PORT.to_string(),
            baud_rate: Self::DEFAULT_BAUD_RATE,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            timeout: Self::DEFAULT_TIMEOUT,
            write_timeout: None,
            inter_byte_timeout: None,
            framer: Framer::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.port, "/dev/serial0");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.framer, Framer::Rtu);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn with_baud_rate_leaves_original_untouched() {
        let config = ConnectionConfig::new("/dev/ttyUSB0").framer(Framer::Ascii);
        let faster = config.with_baud_rate(19200);
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(faster.baud_rate, 19200);
        assert_eq!(faster.port, "/dev/ttyUSB0");
        assert_eq!(faster.framer, Framer::Ascii);
    }

    #[test]
    fn validate() {
        assert_eq!(
            ConnectionConfig::new(" ").validate(),
            Err(ConfigError::EmptyPort)
        );
        assert_eq!(
            ConnectionConfig::new("COM3").baud_rate(0).validate(),
            Err(ConfigError::ZeroBaudRate)
        );
        assert_eq!(
            ConnectionConfig::new("COM3")
                .timeout(Duration::ZERO)
                .validate(),
            Err(ConfigError::ZeroTimeout)
        );
    }
}
