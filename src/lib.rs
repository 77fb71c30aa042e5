//! A library for talking to laboratory process-control hardware on a shared
//! RS-485 bus.
//!
//! Three device families are supported, each with its own wire protocol:
//!
//! | Device | Facade | Codec |
//! |--------|--------|-------|
//! | Quartz crystal thickness monitor | [`qtm::Qtm`] | [`frame::LrcAsciiCodec`] |
//! | Active vacuum gauge | [`gauge::Gauge`] | [`frame::CommandAsciiCodec`] |
//! | Variable-frequency drive | [`vfd::Vfd`] | [`frame::ModbusCodec`] |
//!
//! The facades sit on a [`client::RegisterClient`]. The usual one is
//! [`client::DeviceClient`], which pairs a codec with a
//! [`transport::Transport`] and retries every operation until a checksummed
//! reply from the right device arrives. Operations return `Ok(None)` when
//! the device stayed silent and `Err` only for requests that could never be
//! sent.
//!
//! ## Features
//!
//! - `serial`: [`tokio_serial::SerialTransport`] for local serial ports.
//! - `tokio-rtu`: [`tokio_modbus_client::ModbusRtuClient`], a Modbus RTU client built on `tokio-modbus`.
//! - `serde`: `Serialize`/`Deserialize` for configuration and decoded values.
//!
//! ## Quick Start
//!
//! ```no_run
//! # #[cfg(feature = "serial")]
//! # async fn demo() -> rs485_lab_lib::Result<()> {
//! use rs485_lab_lib::client::DeviceClient;
//! use rs485_lab_lib::config::ConnectionConfig;
//! use rs485_lab_lib::frame::CommandAsciiCodec;
//! use rs485_lab_lib::gauge::Gauge;
//! use rs485_lab_lib::tokio_serial::SerialTransport;
//!
//! let config = ConnectionConfig::new("/dev/ttyUSB0");
//! let client = DeviceClient::new(CommandAsciiCodec, SerialTransport, config, 1)?;
//! let mut gauge = Gauge::new(client);
//! match gauge.get_pressure().await? {
//!     Some(pressure) => println!("Pressure: {pressure:.2e} mbar"),
//!     None => println!("Gauge did not answer"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod analog;
pub mod checksum;
pub mod client;
pub mod codec;
pub mod config;
mod error;
pub mod frame;
pub mod gauge;
pub mod materials;
pub mod qtm;
pub mod transport;
pub mod vfd;

pub use error::{Error, Result};

#[cfg_attr(docsrs, doc(cfg(feature = "serial")))]
#[cfg(feature = "serial")]
pub mod tokio_serial;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-rtu")))]
#[cfg(feature = "tokio-rtu")]
pub mod tokio_modbus_client;
