use crate::{codec::ValueError, config::ConfigError};

/// Errors returned by client and device operations.
///
/// These are hard failures of the request itself. Communication failures
/// (timeouts, corrupted or foreign frames) never show up here: they are
/// retried and finally reported as `Ok(None)`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Wraps `codec::ValueError`.
    #[error(transparent)]
    Value(#[from] ValueError),

    /// Wraps `config::ConfigError`.
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Device address {address} is outside the range {min}..={max}")]
    AddressOutOfRange { address: u16, min: u16, max: u16 },

    #[error("Register {0} has no command mapping")]
    UnknownRegister(u16),

    #[error("Unknown material '{0}'")]
    UnknownMaterial(String),

    #[error("Unknown gas '{0}'")]
    UnknownGas(String),

    #[error("Unknown gauge model '{0}'")]
    UnknownGaugeModel(String),

    #[error("No calibration factor for {gas} on channel {channel}")]
    NoCalibrationFactor { gas: String, channel: u8 },
}

/// The result type for client and device operations.
pub type Result<T> = std::result::Result<T, Error>;
