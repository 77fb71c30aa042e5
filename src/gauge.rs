//! Active vacuum gauges on the command-letter protocol.
//!
//! Tested against Pirani/Penning combination gauges (MTP4D, MTM9D). Protected
//! values are changed in two steps: the write command is first sent with the
//! channel number, and only if the gauge echoes that number back is the new
//! value sent with the same command. A gauge that does not echo is left alone
//! and the current value is read instead.

use crate::client::RegisterClient;
use crate::codec::{
    decode_calibration, decode_pressure, encode_calibration, encode_pressure, ValueError,
};
use crate::frame::GaugeRegister;
use crate::{Error, Result};
use log::{debug, warn};
use std::fmt;
use std::str::FromStr;

/// Calibration channel of the Pirani sensor.
pub const PIRANI_CHANNEL: u8 = 1;
/// Calibration channel of the Penning sensor.
pub const PENNING_CHANNEL: u8 = 2;

/// Data of the adjust command selecting atmosphere adjustment.
const ADJUST_ATMOSPHERE: &str = "1";
/// Atmospheric pressure, 1000 mbar.
const ATMOSPHERE_PRESSURE: &str = "100023";
const ADJUST_ZERO: &str = "0";
const ZERO_PRESSURE: &str = "000000";

/// Process gases with tabulated gauge correction factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Gas {
    Air,
    Ar,
    Co,
    Co2,
    H2,
    He,
    N2,
    Ne,
    Kr,
    Xe,
    O2,
}

impl Gas {
    pub const ALL: [Gas; 11] = [
        Gas::Air,
        Gas::Ar,
        Gas::Co,
        Gas::Co2,
        Gas::H2,
        Gas::He,
        Gas::N2,
        Gas::Ne,
        Gas::Kr,
        Gas::Xe,
        Gas::O2,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            Gas::Air => "Air",
            Gas::Ar => "Ar",
            Gas::Co => "CO",
            Gas::Co2 => "CO2",
            Gas::H2 => "H2",
            Gas::He => "He",
            Gas::N2 => "N2",
            Gas::Ne => "Ne",
            Gas::Kr => "Kr",
            Gas::Xe => "Xe",
            Gas::O2 => "O2",
        }
    }

    /// Correction factor of the Pirani sensor, `None` if not tabulated.
    pub fn pirani_factor(&self) -> Option<f64> {
        match self {
            Gas::Air | Gas::Co | Gas::He | Gas::N2 => Some(1.0),
            Gas::Ar => Some(1.6),
            Gas::Co2 => Some(0.89),
            Gas::H2 => Some(0.57),
            Gas::Ne => Some(1.4),
            Gas::Kr => Some(2.4),
            Gas::Xe | Gas::O2 => None,
        }
    }

    /// Correction factor of the Penning sensor, `None` if not tabulated.
    pub fn penning_factor(&self) -> Option<f64> {
        match self {
            Gas::Air | Gas::N2 => Some(1.0),
            Gas::Ar => Some(0.8),
            Gas::Co2 => Some(0.74),
            Gas::H2 => Some(2.4),
            Gas::He => Some(5.9),
            Gas::Ne => Some(3.5),
            Gas::Kr => Some(0.6),
            Gas::Xe => Some(0.41),
            Gas::Co | Gas::O2 => None,
        }
    }

    /// Correction factor for calibration `channel`.
    pub fn calibration_factor(&self, channel: u8) -> Option<f64> {
        match channel {
            PIRANI_CHANNEL => self.pirani_factor(),
            PENNING_CHANNEL => self.penning_factor(),
            _ => None,
        }
    }
}

impl FromStr for Gas {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Gas::ALL
            .into_iter()
            .find(|gas| gas.symbol().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownGas(s.to_string()))
    }
}

impl fmt::Display for Gas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Facade over one vacuum gauge.
///
/// Pressures are in mbar. Operations return `Ok(None)` when the gauge did not
/// answer or answered with an unreadable data field.
pub struct Gauge<C> {
    client: C,
}

impl<C: RegisterClient<Value = String>> Gauge<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn into_inner(self) -> C {
        self.client
    }

    async fn query(&mut self, register: GaugeRegister, channel: u8) -> Result<Option<String>> {
        let response = self
            .client
            .read_registers(register.register(), channel.into())
            .await?;
        Ok(response.as_ref().and_then(|r| r.text()).map(str::to_string))
    }

    async fn command(&mut self, register: GaugeRegister, data: &str) -> Result<Option<String>> {
        let response = self
            .client
            .write_register(register.register(), &data.to_string())
            .await?;
        Ok(response.as_ref().and_then(|r| r.text()).map(str::to_string))
    }

    /// Sends `selector` with `register`, then `data` if the gauge echoed the
    /// selector. Returns the data field of the second reply.
    async fn unlock_then_write(
        &mut self,
        register: GaugeRegister,
        selector: &str,
        data: &str,
    ) -> Result<Option<String>> {
        let echo = self.command(register, selector).await?;
        if echo.as_deref() != Some(selector) {
            warn!(
                "Gauge {} did not unlock '{register}{selector}', echo {echo:?}",
                self.client.address()
            );
            return Ok(None);
        }
        debug!("Gauge {} unlocked '{register}{selector}'", self.client.address());
        Ok(self
            .command(register, data)
            .await?
            .filter(|reply| reply.len() > 1))
    }

    pub async fn get_gauge_type(&mut self) -> Result<Option<String>> {
        Ok(self
            .query(GaugeRegister::GaugeType, 0)
            .await?
            .map(|model| model.trim().to_string()))
    }

    pub async fn get_pressure(&mut self) -> Result<Option<f64>> {
        let data = self.query(GaugeRegister::Measurement, 0).await?;
        Ok(parse_field(data, decode_pressure))
    }

    /// Reads the switching pressure of setpoint `channel`.
    pub async fn get_setpoint(&mut self, channel: u8) -> Result<Option<f64>> {
        let data = self.query(GaugeRegister::Setpoint, channel).await?;
        Ok(parse_field(data, decode_pressure))
    }

    /// Sets the switching pressure of setpoint `channel`.
    ///
    /// Fails before any I/O if `pressure` cannot be encoded.
    pub async fn set_setpoint(&mut self, pressure: f64, channel: u8) -> Result<Option<f64>> {
        let data = encode_pressure(pressure)?;
        let reply = self
            .unlock_then_write(GaugeRegister::SetpointWrite, &channel.to_string(), &data)
            .await?;
        match parse_field(reply, decode_pressure) {
            Some(pressure) => Ok(Some(pressure)),
            None => self.get_setpoint(channel).await,
        }
    }

    /// Reads the correction factor of calibration `channel`.
    pub async fn get_calibration(&mut self, channel: u8) -> Result<Option<f64>> {
        let data = self.query(GaugeRegister::Calibration, channel).await?;
        Ok(parse_field(data, decode_calibration))
    }

    /// Sets the correction factor of calibration `channel`.
    pub async fn set_calibration(&mut self, factor: f64, channel: u8) -> Result<Option<f64>> {
        let data = encode_calibration(factor)?;
        let reply = self
            .unlock_then_write(GaugeRegister::CalibrationWrite, &channel.to_string(), &data)
            .await?;
        match parse_field(reply, decode_calibration) {
            Some(factor) => Ok(Some(factor)),
            None => self.get_calibration(channel).await,
        }
    }

    /// Sets the tabulated correction factor of `gas` on `channel`.
    pub async fn set_gas_calibration(&mut self, gas: Gas, channel: u8) -> Result<Option<f64>> {
        let factor = gas
            .calibration_factor(channel)
            .ok_or_else(|| Error::NoCalibrationFactor {
                gas: gas.to_string(),
                channel,
            })?;
        self.set_calibration(factor, channel).await
    }

    /// Adjusts the gauge to read atmospheric pressure (1000 mbar) now.
    ///
    /// Returns the pressure the gauge reports after the adjustment.
    pub async fn set_atmosphere(&mut self) -> Result<Option<f64>> {
        self.adjust(ADJUST_ATMOSPHERE, ATMOSPHERE_PRESSURE).await
    }

    /// Adjusts the gauge zero at base pressure.
    pub async fn set_zero(&mut self) -> Result<Option<f64>> {
        self.adjust(ADJUST_ZERO, ZERO_PRESSURE).await
    }

    async fn adjust(&mut self, selector: &str, data: &str) -> Result<Option<f64>> {
        let reply = self
            .unlock_then_write(GaugeRegister::Adjust, selector, data)
            .await?;
        match parse_field(reply, decode_pressure) {
            Some(pressure) => Ok(Some(pressure)),
            None => self.get_pressure().await,
        }
    }

    /// Whether the Penning sensor is switched on.
    pub async fn get_penning_state(&mut self) -> Result<Option<bool>> {
        let data = self.query(GaugeRegister::PenningEnable, 0).await?;
        Ok(parse_field(data, decode_flag))
    }

    pub async fn set_penning_state(&mut self, enable: bool) -> Result<Option<bool>> {
        let data = u8::from(enable).to_string();
        let reply = self
            .command(GaugeRegister::PenningEnableWrite, &data)
            .await?;
        match parse_field(reply, decode_flag) {
            Some(state) => Ok(Some(state)),
            None => self.get_penning_state().await,
        }
    }

    /// Whether the Penning sensor follows the Pirani reading when switching.
    pub async fn get_penning_sync(&mut self) -> Result<Option<bool>> {
        let data = self.query(GaugeRegister::PenningSync, 0).await?;
        Ok(parse_field(data, decode_flag))
    }

    pub async fn set_penning_sync(&mut self, enable: bool) -> Result<Option<bool>> {
        let data = format!("{:06}", u8::from(enable));
        let reply = self.command(GaugeRegister::PenningSyncWrite, &data).await?;
        match parse_field(reply, decode_flag) {
            Some(state) => Ok(Some(state)),
            None => self.get_penning_sync().await,
        }
    }
}

fn decode_flag(data: &str) -> std::result::Result<bool, ValueError> {
    data.trim()
        .parse::<u32>()
        .map(|flag| flag != 0)
        .map_err(|_| ValueError::InvalidField(data.to_string()))
}

/// Unreadable fields are treated like a missing reply.
fn parse_field<T>(
    data: Option<String>,
    parse: impl Fn(&str) -> std::result::Result<T, ValueError>,
) -> Option<T> {
    let data = data?;
    match parse(&data) {
        Ok(value) => Some(value),
        Err(error) => {
            warn!("Ignoring gauge reply: {error}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DeviceClient;
    use crate::config::ConnectionConfig;
    use crate::frame::{CommandAsciiCodec, FrameCodec};
    use crate::transport::mock::MockTransport;
    use assert_matches::assert_matches;

    type TestGauge = Gauge<DeviceClient<CommandAsciiCodec, MockTransport>>;

    fn gauge(mock: &MockTransport) -> TestGauge {
        let client = DeviceClient::new(
            CommandAsciiCodec,
            mock.clone(),
            ConnectionConfig::new("/dev/ttyUSB0"),
            1,
        )
        .unwrap()
        .with_retries(2);
        Gauge::new(client)
    }

    /// Gauge replies are framed like requests.
    fn frame(register: GaugeRegister, data: &str) -> Vec<u8> {
        CommandAsciiCodec
            .encode_write(1, register.register(), &data.to_string())
            .unwrap()
            .frame
    }

    #[test]
    fn gas_tables() {
        assert_eq!(Gas::Ar.pirani_factor(), Some(1.6));
        assert_eq!(Gas::Ar.penning_factor(), Some(0.8));
        assert_eq!(Gas::Xe.pirani_factor(), None);
        assert_eq!(Gas::Co.penning_factor(), None);
        assert_eq!(Gas::He.calibration_factor(PENNING_CHANNEL), Some(5.9));
        assert_eq!(Gas::He.calibration_factor(3), None);
        assert_eq!("co2".parse::<Gas>().unwrap(), Gas::Co2);
        assert_matches!("SF6".parse::<Gas>(), Err(Error::UnknownGas(_)));
    }

    #[tokio::test]
    async fn pressure_and_type() {
        let mock = MockTransport::new();
        mock.reply(frame(GaugeRegister::Measurement, "123015"))
            .reply(frame(GaugeRegister::GaugeType, "MTP4D "));
        let mut gauge = gauge(&mock);

        let pressure = gauge.get_pressure().await.unwrap().unwrap();
        assert!((pressure - 1.23e-5).abs() < 1e-12);
        assert_eq!(gauge.get_gauge_type().await, Ok(Some("MTP4D".to_string())));
        assert_eq!(mock.requests()[0], b"001M^\r");
    }

    #[tokio::test]
    async fn setpoint_two_step_write() {
        let mock = MockTransport::new();
        mock.reply(frame(GaugeRegister::SetpointWrite, "1"))
            .reply(frame(GaugeRegister::SetpointWrite, "500016"));
        let mut gauge = gauge(&mock);

        let setpoint = gauge.set_setpoint(5e-4, 1).await.unwrap().unwrap();
        assert!((setpoint - 5e-4).abs() < 1e-12);
        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], frame(GaugeRegister::SetpointWrite, "1"));
        assert_eq!(requests[1], frame(GaugeRegister::SetpointWrite, "500016"));
    }

    #[tokio::test]
    async fn rejected_unlock_reads_back() {
        let mock = MockTransport::new();
        mock.reply(frame(GaugeRegister::SetpointWrite, "2"))
            .reply(frame(GaugeRegister::Setpoint, "100023"));
        let mut gauge = gauge(&mock);

        assert_eq!(gauge.set_setpoint(5e-4, 1).await, Ok(Some(1000.0)));
        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        // the value itself was never sent
        assert!(!requests.contains(&frame(GaugeRegister::SetpointWrite, "500016")));
        assert_eq!(
            requests[1],
            CommandAsciiCodec
                .encode_read(1, GaugeRegister::Setpoint.register(), 1)
                .unwrap()
                .frame
        );
    }

    #[tokio::test]
    async fn silent_gauge() {
        let mock = MockTransport::new();
        let mut gauge = gauge(&mock);

        assert_eq!(gauge.set_calibration(1.6, PIRANI_CHANNEL).await, Ok(None));
        // unlock attempts, then the read-back attempts
        assert_eq!(mock.transactions(), 4);
        assert_eq!(gauge.get_pressure().await, Ok(None));
    }

    #[tokio::test]
    async fn invalid_values_fail_before_io() {
        let mock = MockTransport::new();
        let mut gauge = gauge(&mock);

        assert_matches!(
            gauge.set_setpoint(-1.0, 1).await,
            Err(Error::Value(ValueError::PressureOutOfRange(_)))
        );
        assert_matches!(
            gauge.set_calibration(1e5, 1).await,
            Err(Error::Value(ValueError::CalibrationOutOfRange(_)))
        );
        assert_matches!(
            gauge.set_gas_calibration(Gas::Xe, PIRANI_CHANNEL).await,
            Err(Error::NoCalibrationFactor { channel: 1, .. })
        );
        assert_eq!(mock.transactions(), 0);
    }

    #[tokio::test]
    async fn gas_calibration() {
        let mock = MockTransport::new();
        mock.reply(frame(GaugeRegister::CalibrationWrite, "2"))
            .reply(frame(GaugeRegister::CalibrationWrite, "000590"));
        let mut gauge = gauge(&mock);

        assert_eq!(
            gauge.set_gas_calibration(Gas::He, PENNING_CHANNEL).await,
            Ok(Some(5.9))
        );
        assert_eq!(mock.requests()[1], frame(GaugeRegister::CalibrationWrite, "000590"));
    }

    #[tokio::test]
    async fn atmosphere_and_zero() {
        let mock = MockTransport::new();
        mock.reply(frame(GaugeRegister::Adjust, "1"))
            .reply(frame(GaugeRegister::Adjust, "100023"))
            .reply(frame(GaugeRegister::Adjust, "1"))
            .reply(frame(GaugeRegister::Measurement, "100023"));
        let mut gauge = gauge(&mock);

        assert_eq!(gauge.set_atmosphere().await, Ok(Some(1000.0)));
        // zero adjustment rejected: the echo was "1"
        assert_eq!(gauge.set_zero().await, Ok(Some(1000.0)));
        let requests = mock.requests();
        assert_eq!(requests[1], frame(GaugeRegister::Adjust, ATMOSPHERE_PRESSURE));
        assert_eq!(requests[2], frame(GaugeRegister::Adjust, ADJUST_ZERO));
        assert!(!requests.contains(&frame(GaugeRegister::Adjust, ZERO_PRESSURE)));
    }

    #[tokio::test]
    async fn penning_switches() {
        let mock = MockTransport::new();
        mock.reply(frame(GaugeRegister::PenningEnableWrite, "1"))
            .reply(frame(GaugeRegister::PenningSync, "000000"))
            .reply(frame(GaugeRegister::PenningSyncWrite, "x"))
            .reply(frame(GaugeRegister::PenningSync, "000001"));
        let mut gauge = gauge(&mock);

        assert_eq!(gauge.set_penning_state(true).await, Ok(Some(true)));
        assert_eq!(gauge.get_penning_sync().await, Ok(Some(false)));
        // an unreadable acknowledgement falls back to a read
        assert_eq!(gauge.set_penning_sync(true).await, Ok(Some(true)));
        let requests = mock.requests();
        assert_eq!(requests[2], frame(GaugeRegister::PenningSyncWrite, "000001"));
        assert_eq!(requests.len(), 4);
    }
}
