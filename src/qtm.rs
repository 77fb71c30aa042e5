//! Quartz crystal thickness monitor (QTM) on the LRC-ASCII protocol.
//!
//! Register map, 16 holding registers:
//!
//! | Register | Content | Scale |
//! |----------|---------|-------|
//! | 0 | firmware version | ÷100 |
//! | 1–2 | thickness in Å | ÷100, 32-bit |
//! | 3–4 | rate in Å/s | ÷100, 32-bit |
//! | 5–6 | crystal frequency in Hz | ÷100, 32-bit |
//! | 7 | PWM in % | ÷100 |
//! | 8 | [`ConSettings`] nibbles | |
//! | 9 | [`RunSettings`] nibbles | |
//! | 10 | density in g/cm³ | ÷100 |
//! | 11 | Z-ratio | ÷1000 |
//! | 12 | scale factor | ÷1000 |
//! | 13 | rate range in Å/s | |
//! | 14 | bus address | |
//! | 15 | baud-rate code in the top nibble | |

use crate::client::{RegisterClient, RegisterFloatExt};
use crate::codec::{
    baud_rate_from_code, code_from_baud_rate, combine_words, nibble, pack_nibbles, raw_to_scaled,
    ValueError,
};
use crate::materials::Material;
use crate::Result;
use log::{debug, warn};
use std::fmt;
use std::time::Duration;

pub const VERSION_REG_ADDR: u16 = 0;
pub const THICKNESS_REG_ADDR: u16 = 1;
pub const RATE_REG_ADDR: u16 = 3;
pub const FREQUENCY_REG_ADDR: u16 = 5;
pub const PWM_REG_ADDR: u16 = 7;
pub const CON_REG_ADDR: u16 = 8;
pub const RUN_REG_ADDR: u16 = 9;
pub const DENSITY_REG_ADDR: u16 = 10;
pub const Z_RATIO_REG_ADDR: u16 = 11;
pub const SCALE_REG_ADDR: u16 = 12;
pub const RANGE_REG_ADDR: u16 = 13;
pub const ADDRESS_REG_ADDR: u16 = 14;
pub const BAUD_RATE_REG_ADDR: u16 = 15;

pub const STATE_REG_ADDR: u16 = 0;
pub const STATE_REG_QUAN: u16 = 16;

pub const VERSION_FACTOR: f64 = 100.0;
pub const COMPOSITE_FACTOR: f64 = 100.0;
pub const PWM_FACTOR: f64 = 100.0;
pub const DENSITY_FACTOR: f64 = 100.0;
pub const Z_RATIO_FACTOR: f64 = 1000.0;
pub const SCALE_FACTOR: f64 = 1000.0;

pub const PWM_MIN: f64 = 0.0;
pub const PWM_MAX: f64 = 99.99;
pub const DENSITY_MIN: f64 = 0.4;
pub const DENSITY_MAX: f64 = 99.99;
pub const Z_RATIO_MIN: f64 = 0.1;
pub const Z_RATIO_MAX: f64 = 9.999;
pub const SCALE_MIN: f64 = 1.0;
pub const SCALE_MAX: f64 = 65.535;
pub const RANGE_MAX: u16 = 9999;
pub const ADDRESS_MIN: u16 = 1;
pub const ADDRESS_MAX: u16 = 254;

/// Pause between the two writes of [`Qtm::set_material`].
pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_millis(5);

/// Measurement configuration packed into register 8.
///
/// Nibble 0 holds the gate time in 100 ms steps (0–11), nibble 1 the analog
/// output mode (0 stop, 1 auto, 2 manual), nibble 2 the rate algorithm
/// (0 immediate, 1 weighted, 2 ten-sample average).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConSettings {
    pub gate_time: u8,
    pub analog_output: u8,
    pub rate_mode: u8,
}

impl ConSettings {
    pub const GATE_TIME_MAX: u8 = 11;
    pub const ANALOG_OUTPUT_MAX: u8 = 2;
    pub const RATE_MODE_MAX: u8 = 2;

    /// Creates settings, clamping every field to its valid range.
    pub fn new(gate_time: u8, analog_output: u8, rate_mode: u8) -> Self {
        Self {
            gate_time: gate_time.min(Self::GATE_TIME_MAX),
            analog_output: analog_output.min(Self::ANALOG_OUTPUT_MAX),
            rate_mode: rate_mode.min(Self::RATE_MODE_MAX),
        }
    }

    pub fn decode_from_holding_register(word: u16) -> Self {
        Self {
            gate_time: nibble(word, 0),
            analog_output: nibble(word, 1),
            rate_mode: nibble(word, 2),
        }
    }

    pub fn encode_for_write_register(&self) -> std::result::Result<u16, ValueError> {
        pack_nibbles([self.gate_time, self.analog_output, self.rate_mode, 0])
    }

    pub fn gate_duration(&self) -> Duration {
        Duration::from_millis(100 * u64::from(self.gate_time))
    }
}

impl fmt::Display for ConSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gate {:?}, analog output {}, rate mode {}",
            self.gate_duration(),
            self.analog_output,
            self.rate_mode
        )
    }
}

/// Run control in register 9.
///
/// The run flag sits in the least significant nibble and the thickness
/// reset flag in the nibble above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunSettings {
    pub run: u8,
    pub reset: u8,
}

impl RunSettings {
    pub const START: RunSettings = RunSettings { run: 1, reset: 1 };
    pub const STOP: RunSettings = RunSettings { run: 0, reset: 0 };

    /// Creates settings, clamping both flags to 0 or 1.
    pub fn new(run: u8, reset: u8) -> Self {
        Self {
            run: run.min(1),
            reset: reset.min(1),
        }
    }

    pub fn decode_from_holding_register(word: u16) -> Self {
        Self {
            run: nibble(word, 3),
            reset: nibble(word, 2),
        }
    }

    pub fn encode_for_write_register(&self) -> std::result::Result<u16, ValueError> {
        pack_nibbles([0, 0, self.reset, self.run])
    }
}

impl fmt::Display for RunSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            if self.run == 1 { "running" } else { "stopped" },
            if self.reset == 1 { ", thickness reset" } else { "" }
        )
    }
}

/// All registers of the monitor, decoded from one burst read.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct QtmState {
    pub version: f64,
    /// Å
    pub thickness: f64,
    /// Å/s
    pub rate: f64,
    /// Hz
    pub frequency: f64,
    /// %
    pub pwm: f64,
    pub con: ConSettings,
    pub run: RunSettings,
    /// g/cm³
    pub density: f64,
    pub z_ratio: f64,
    pub scale: f64,
    pub range: u16,
    pub address: u16,
    /// 0 if the device reports an unknown code.
    pub baud_rate: u32,
}

impl QtmState {
    pub fn decode_from_holding_registers(
        words: &[u16],
    ) -> std::result::Result<Self, ValueError> {
        let words: &[u16; STATE_REG_QUAN as usize] =
            words.try_into().map_err(|_| ValueError::RegisterCount {
                expected: STATE_REG_QUAN.into(),
                actual: words.len(),
            })?;
        let composite = |hi: usize| f64::from(combine_words(words[hi], words[hi + 1])) / COMPOSITE_FACTOR;
        Ok(Self {
            version: raw_to_scaled(words[0], VERSION_FACTOR),
            thickness: composite(1),
            rate: composite(3),
            frequency: composite(5),
            pwm: raw_to_scaled(words[7], PWM_FACTOR),
            con: ConSettings::decode_from_holding_register(words[8]),
            run: RunSettings::decode_from_holding_register(words[9]),
            density: raw_to_scaled(words[10], DENSITY_FACTOR),
            z_ratio: raw_to_scaled(words[11], Z_RATIO_FACTOR),
            scale: raw_to_scaled(words[12], SCALE_FACTOR),
            range: words[13],
            address: words[14],
            baud_rate: baud_rate_from_code(nibble(words[15], 0)),
        })
    }
}

impl fmt::Display for QtmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Version:   {:.2}", self.version)?;
        writeln!(f, "Thickness: {:.2} Å", self.thickness)?;
        writeln!(f, "Rate:      {:.2} Å/s", self.rate)?;
        writeln!(f, "Frequency: {:.2} Hz", self.frequency)?;
        writeln!(f, "PWM:       {:.2} %", self.pwm)?;
        writeln!(f, "CON:       {}", self.con)?;
        writeln!(f, "RUN:       {}", self.run)?;
        writeln!(f, "Density:   {:.2} g/cm³", self.density)?;
        writeln!(f, "Z-ratio:   {:.3}", self.z_ratio)?;
        writeln!(f, "Scale:     {:.3}", self.scale)?;
        writeln!(f, "Range:     {} Å/s", self.range)?;
        writeln!(f, "Address:   {}", self.address)?;
        write!(f, "Baud rate: {}", self.baud_rate)
    }
}

/// Facade over one thickness monitor.
///
/// Getters return `Ok(None)` when the monitor did not answer. Setters clamp
/// their input to the accepted range and return the value the monitor
/// reports after the write.
pub struct Qtm<C> {
    client: C,
    settle_time: Duration,
}

impl<C: RegisterClient<Value = u16>> Qtm<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            settle_time: DEFAULT_SETTLE_TIME,
        }
    }

    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn into_inner(self) -> C {
        self.client
    }

    async fn read_word(&mut self, register: u16) -> Result<Option<u16>> {
        let response = self.client.read_registers(register, 1).await?;
        Ok(response.as_ref().and_then(|r| r.words()).map(|w| w[0]))
    }

    /// Writes `raw` and returns the acknowledged word, or the word read back
    /// if the write was not acknowledged.
    async fn write_word(&mut self, register: u16, raw: u16) -> Result<Option<u16>> {
        let response = self.client.write_register(register, &raw).await?;
        match response.as_ref().and_then(|r| r.words()) {
            Some(words) => Ok(Some(words[0])),
            None => self.read_word(register).await,
        }
    }

    pub async fn get_version(&mut self) -> Result<Option<f64>> {
        self.client
            .read_single_register_float(VERSION_REG_ADDR, VERSION_FACTOR)
            .await
    }

    pub async fn get_thickness(&mut self) -> Result<Option<f64>> {
        self.client
            .read_two_register_float(THICKNESS_REG_ADDR, COMPOSITE_FACTOR)
            .await
    }

    pub async fn get_rate(&mut self) -> Result<Option<f64>> {
        self.client
            .read_two_register_float(RATE_REG_ADDR, COMPOSITE_FACTOR)
            .await
    }

    pub async fn get_frequency(&mut self) -> Result<Option<f64>> {
        self.client
            .read_two_register_float(FREQUENCY_REG_ADDR, COMPOSITE_FACTOR)
            .await
    }

    pub async fn get_pwm(&mut self) -> Result<Option<f64>> {
        self.client
            .read_single_register_float(PWM_REG_ADDR, PWM_FACTOR)
            .await
    }

    pub async fn set_pwm(&mut self, pwm: f64) -> Result<Option<f64>> {
        self.client
            .write_single_register_float(PWM_REG_ADDR, pwm.clamp(PWM_MIN, PWM_MAX), PWM_FACTOR)
            .await
    }

    pub async fn get_con(&mut self) -> Result<Option<ConSettings>> {
        Ok(self
            .read_word(CON_REG_ADDR)
            .await?
            .map(ConSettings::decode_from_holding_register))
    }

    pub async fn set_con(&mut self, con: ConSettings) -> Result<Option<ConSettings>> {
        let con = ConSettings::new(con.gate_time, con.analog_output, con.rate_mode);
        let raw = con.encode_for_write_register()?;
        Ok(self
            .write_word(CON_REG_ADDR, raw)
            .await?
            .map(ConSettings::decode_from_holding_register))
    }

    pub async fn get_run(&mut self) -> Result<Option<RunSettings>> {
        Ok(self
            .read_word(RUN_REG_ADDR)
            .await?
            .map(RunSettings::decode_from_holding_register))
    }

    pub async fn set_run(&mut self, run: RunSettings) -> Result<Option<RunSettings>> {
        let raw = RunSettings::new(run.run, run.reset).encode_for_write_register()?;
        Ok(self
            .write_word(RUN_REG_ADDR, raw)
            .await?
            .map(RunSettings::decode_from_holding_register))
    }

    /// Starts a measurement with the thickness reset.
    pub async fn start_measurement(&mut self) -> Result<Option<RunSettings>> {
        self.set_run(RunSettings::START).await
    }

    pub async fn stop_measurement(&mut self) -> Result<Option<RunSettings>> {
        self.set_run(RunSettings::STOP).await
    }

    pub async fn get_density(&mut self) -> Result<Option<f64>> {
        self.client
            .read_single_register_float(DENSITY_REG_ADDR, DENSITY_FACTOR)
            .await
    }

    pub async fn set_density(&mut self, density: f64) -> Result<Option<f64>> {
        self.client
            .write_single_register_float(
                DENSITY_REG_ADDR,
                density.clamp(DENSITY_MIN, DENSITY_MAX),
                DENSITY_FACTOR,
            )
            .await
    }

    pub async fn get_z_ratio(&mut self) -> Result<Option<f64>> {
        self.client
            .read_single_register_float(Z_RATIO_REG_ADDR, Z_RATIO_FACTOR)
            .await
    }

    pub async fn set_z_ratio(&mut self, z_ratio: f64) -> Result<Option<f64>> {
        self.client
            .write_single_register_float(
                Z_RATIO_REG_ADDR,
                z_ratio.clamp(Z_RATIO_MIN, Z_RATIO_MAX),
                Z_RATIO_FACTOR,
            )
            .await
    }

    pub async fn get_scale(&mut self) -> Result<Option<f64>> {
        self.client
            .read_single_register_float(SCALE_REG_ADDR, SCALE_FACTOR)
            .await
    }

    pub async fn set_scale(&mut self, scale: f64) -> Result<Option<f64>> {
        self.client
            .write_single_register_float(
                SCALE_REG_ADDR,
                scale.clamp(SCALE_MIN, SCALE_MAX),
                SCALE_FACTOR,
            )
            .await
    }

    pub async fn get_range(&mut self) -> Result<Option<u16>> {
        self.read_word(RANGE_REG_ADDR).await
    }

    pub async fn set_range(&mut self, range: u16) -> Result<Option<u16>> {
        self.write_word(RANGE_REG_ADDR, range.min(RANGE_MAX)).await
    }

    pub async fn get_address(&mut self) -> Result<Option<u16>> {
        self.read_word(ADDRESS_REG_ADDR).await
    }

    /// Moves the monitor to a new bus address and follows it there.
    ///
    /// The client adopts the address the monitor acknowledged. Without an
    /// acknowledgement the register is read back at the requested address;
    /// if that fails too the client stays at its old address. A rejected
    /// write or an acknowledged address the client cannot use also leaves
    /// the client where it was.
    pub async fn set_address(&mut self, address: u16) -> Result<Option<u16>> {
        let address = address.clamp(ADDRESS_MIN, ADDRESS_MAX);
        let response = self.client.write_register(ADDRESS_REG_ADDR, &address).await?;
        let previous = self.client.address();
        if response.as_ref().is_some_and(|r| r.is_exception()) {
            warn!("Monitor at address {previous} rejected the new address {address}");
            return Ok(None);
        }
        let acknowledged = response.as_ref().and_then(|r| r.words()).map(|w| w[0]);
        let new_address = match acknowledged {
            Some(acknowledged) => Some(acknowledged),
            None => {
                self.client.set_address(address)?;
                let read_back = self.read_word(ADDRESS_REG_ADDR).await?;
                if read_back.is_none() {
                    self.client.set_address(previous)?;
                }
                read_back
            }
        };
        let Some(new_address) = new_address else {
            warn!("Monitor at address {previous} did not confirm the new address");
            return Ok(None);
        };
        if let Err(error) = self.client.set_address(new_address) {
            warn!("Monitor at address {previous} reported an unusable address: {error}");
            self.client.set_address(previous)?;
            return Ok(None);
        }
        debug!("Monitor moved from address {previous} to {new_address}");
        Ok(Some(new_address))
    }

    pub async fn get_baud_rate(&mut self) -> Result<Option<u32>> {
        Ok(self
            .read_word(BAUD_RATE_REG_ADDR)
            .await?
            .map(|word| baud_rate_from_code(nibble(word, 0))))
    }

    /// Switches the monitor to `baud_rate` and the client with it.
    ///
    /// Unsupported rates select 9600 baud. Confirmation works as for
    /// [`set_address`](Self::set_address).
    pub async fn set_baud_rate(&mut self, baud_rate: u32) -> Result<Option<u32>> {
        let requested = baud_rate_from_code(code_from_baud_rate(baud_rate));
        let raw = u16::from(code_from_baud_rate(baud_rate)) << 12;
        let response = self.client.write_register(BAUD_RATE_REG_ADDR, &raw).await?;
        if response.as_ref().is_some_and(|r| r.is_exception()) {
            warn!("Monitor rejected the baud rate {requested}");
            return Ok(None);
        }
        let acknowledged = response
            .as_ref()
            .and_then(|r| r.words())
            .map(|w| baud_rate_from_code(nibble(w[0], 0)));
        let previous = self.client.config().baud_rate;
        let new_baud_rate = match acknowledged {
            Some(acknowledged) => Some(acknowledged),
            None => {
                self.client.set_baud_rate(requested)?;
                let read_back = self.get_baud_rate().await?;
                if read_back.is_none() {
                    self.client.set_baud_rate(previous)?;
                }
                read_back
            }
        };
        match new_baud_rate {
            Some(0) => warn!("Monitor acknowledged an unknown baud-rate code"),
            Some(new_baud_rate) => {
                self.client.set_baud_rate(new_baud_rate)?;
                debug!("Monitor switched from {previous} to {new_baud_rate} baud");
            }
            None => warn!("Monitor did not confirm the new baud rate"),
        }
        Ok(new_baud_rate)
    }

    /// Reads all 16 registers in one transaction.
    pub async fn get_state(&mut self) -> Result<Option<QtmState>> {
        let response = self
            .client
            .read_registers(STATE_REG_ADDR, STATE_REG_QUAN)
            .await?;
        match response.as_ref().and_then(|r| r.words()) {
            Some(words) => Ok(Some(QtmState::decode_from_holding_registers(words)?)),
            None => Ok(None),
        }
    }

    /// Writes the density and Z-ratio of `material`.
    ///
    /// Returns the pair the monitor holds afterwards, `None` if either write
    /// went unconfirmed.
    pub async fn set_material(&mut self, material: &Material) -> Result<Option<(f64, f64)>> {
        let density = self.set_density(material.density).await?;
        tokio::time::sleep(self.settle_time).await;
        let z_ratio = self.set_z_ratio(material.z_ratio).await?;
        tokio::time::sleep(self.settle_time).await;
        Ok(density.zip(z_ratio))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DeviceClient;
    use crate::config::ConnectionConfig;
    use crate::frame::{lrc_ascii_frame, FrameCodec, LrcAsciiCodec};
    use crate::transport::mock::MockTransport;
    use assert_matches::assert_matches;

    type TestQtm = Qtm<DeviceClient<LrcAsciiCodec, MockTransport>>;

    fn qtm(mock: &MockTransport) -> TestQtm {
        let client = DeviceClient::new(
            LrcAsciiCodec,
            mock.clone(),
            ConnectionConfig::new("/dev/ttyUSB0"),
            1,
        )
        .unwrap()
        .with_retries(2);
        Qtm::new(client).with_settle_time(Duration::ZERO)
    }

    fn read_reply(address: u8, words: &[u16]) -> Vec<u8> {
        let mut pdu = vec![address, 0x03, (2 * words.len()) as u8];
        pdu.extend(words.iter().flat_map(|w| w.to_be_bytes()));
        lrc_ascii_frame(&pdu)
    }

    fn write_request(address: u16, register: u16, value: u16) -> Vec<u8> {
        LrcAsciiCodec.encode_write(address, register, &value).unwrap().frame
    }

    const STATE: [u16; 16] = [
        100, 0, 12345, 0, 500, 0x005B, 0x8D80, 9990, 0x1110, 0x0001, 4000, 380, 1000, 100, 1,
        0x3000,
    ];

    #[test]
    fn decode_state() {
        let state = QtmState::decode_from_holding_registers(&STATE).unwrap();
        assert_eq!(state.version, 1.0);
        assert_eq!(state.thickness, 123.45);
        assert_eq!(state.rate, 5.0);
        assert_eq!(state.frequency, 60000.0);
        assert_eq!(state.pwm, 99.9);
        assert_eq!(state.con, ConSettings::new(1, 1, 1));
        assert_eq!(state.run, RunSettings { run: 1, reset: 0 });
        assert_eq!(state.density, 40.0);
        assert_eq!(state.z_ratio, 0.38);
        assert_eq!(state.scale, 1.0);
        assert_eq!(state.range, 100);
        assert_eq!(state.address, 1);
        assert_eq!(state.baud_rate, 9600);

        assert_matches!(
            QtmState::decode_from_holding_registers(&STATE[..15]),
            Err(ValueError::RegisterCount {
                expected: 16,
                actual: 15
            })
        );
    }

    #[test]
    fn packed_settings() {
        let con = ConSettings::new(5, 1, 2);
        assert_eq!(con.encode_for_write_register(), Ok(0x5120));
        assert_eq!(ConSettings::decode_from_holding_register(0x5120), con);
        assert_eq!(ConSettings::new(20, 7, 9), ConSettings::new(11, 2, 2));
        assert_eq!(con.gate_duration(), Duration::from_millis(500));

        assert_eq!(RunSettings::START.encode_for_write_register(), Ok(0x0011));
        assert_eq!(RunSettings::new(1, 0).encode_for_write_register(), Ok(0x0001));
        assert_eq!(RunSettings::new(0, 1).encode_for_write_register(), Ok(0x0010));
        assert_eq!(
            RunSettings::decode_from_holding_register(0x0010),
            RunSettings { run: 0, reset: 1 }
        );
    }

    #[tokio::test]
    async fn get_state_in_one_transaction() {
        let mock = MockTransport::new();
        mock.reply(read_reply(1, &STATE));
        let mut qtm = qtm(&mock);

        let state = qtm.get_state().await.unwrap().unwrap();
        assert_eq!(state.thickness, 123.45);
        assert_eq!(state.frequency, 60000.0);
        assert_eq!(mock.transactions(), 1);
        assert_eq!(mock.requests()[0], b":010300000010EC\r\n");
    }

    #[tokio::test]
    async fn silent_monitor() {
        let mock = MockTransport::new();
        let mut qtm = qtm(&mock);
        assert_eq!(qtm.get_state().await, Ok(None));
        assert_eq!(qtm.get_thickness().await, Ok(None));
        assert_eq!(qtm.get_con().await, Ok(None));
        assert_eq!(mock.transactions(), 6);
    }

    #[tokio::test]
    async fn getters() {
        let mock = MockTransport::new();
        mock.reply(read_reply(1, &[0, 12345]))
            .reply(read_reply(1, &[0x5120]))
            .reply(read_reply(1, &[0x4000]));
        let mut qtm = qtm(&mock);

        assert_eq!(qtm.get_thickness().await, Ok(Some(123.45)));
        assert_eq!(qtm.get_con().await, Ok(Some(ConSettings::new(5, 1, 2))));
        assert_eq!(qtm.get_baud_rate().await, Ok(Some(19200)));
    }

    #[tokio::test]
    async fn setters_clamp() {
        let mock = MockTransport::new();
        mock.reply(write_request(1, PWM_REG_ADDR, 9999))
            .reply(write_request(1, DENSITY_REG_ADDR, 40))
            .reply(write_request(1, SCALE_REG_ADDR, 65535))
            .reply(write_request(1, RANGE_REG_ADDR, 9999));
        let mut qtm = qtm(&mock);

        assert_eq!(qtm.set_pwm(150.0).await, Ok(Some(99.99)));
        assert_eq!(qtm.set_density(0.1).await, Ok(Some(0.4)));
        assert_eq!(qtm.set_scale(100.0).await, Ok(Some(65.535)));
        assert_eq!(qtm.set_range(20000).await, Ok(Some(9999)));
        let requests = mock.requests();
        assert_eq!(requests[0], write_request(1, PWM_REG_ADDR, 9999));
        assert_eq!(requests[1], write_request(1, DENSITY_REG_ADDR, 40));
    }

    #[tokio::test]
    async fn start_and_stop() {
        let mock = MockTransport::new();
        mock.reply(write_request(1, RUN_REG_ADDR, 0x0011))
            .reply(write_request(1, RUN_REG_ADDR, 0x0000));
        let mut qtm = qtm(&mock);

        assert_eq!(qtm.start_measurement().await, Ok(Some(RunSettings::START)));
        assert_eq!(qtm.stop_measurement().await, Ok(Some(RunSettings::STOP)));
        assert_eq!(mock.requests()[0], write_request(1, RUN_REG_ADDR, 0x0011));
    }

    #[tokio::test]
    async fn address_change_is_followed() {
        let mock = MockTransport::new();
        mock.reply(write_request(1, ADDRESS_REG_ADDR, 5))
            .reply(read_reply(5, &[100]));
        let mut qtm = qtm(&mock);

        assert_eq!(qtm.set_address(5).await, Ok(Some(5)));
        assert_eq!(qtm.client().address(), 5);
        assert_eq!(qtm.get_version().await, Ok(Some(1.0)));
        assert!(mock.requests()[1].starts_with(b":05"));
    }

    #[tokio::test]
    async fn unconfirmed_address_change_keeps_old_address() {
        let mock = MockTransport::new();
        let mut qtm = qtm(&mock);

        assert_eq!(qtm.set_address(300).await, Ok(None));
        assert_eq!(qtm.client().address(), 1);
        // two write attempts, two read-back attempts at the clamped address
        let requests = mock.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[0], write_request(1, ADDRESS_REG_ADDR, 254));
        assert!(requests[2].starts_with(b":FE"));
    }

    #[tokio::test]
    async fn invalid_acknowledged_address_keeps_old_address() {
        let mock = MockTransport::new();
        mock.reply(write_request(1, ADDRESS_REG_ADDR, 0));
        let mut qtm = qtm(&mock);

        assert_eq!(qtm.set_address(5).await, Ok(None));
        assert_eq!(qtm.client().address(), 1);
        assert_eq!(mock.transactions(), 1);
    }

    #[tokio::test]
    async fn invalid_read_back_address_keeps_old_address() {
        let mock = MockTransport::new();
        mock.timeout().timeout().reply(read_reply(5, &[300]));
        let mut qtm = qtm(&mock);

        assert_eq!(qtm.set_address(5).await, Ok(None));
        assert_eq!(qtm.client().address(), 1);
    }

    #[tokio::test]
    async fn rejected_address_change_is_not_read_back() {
        let mock = MockTransport::new();
        mock.reply(lrc_ascii_frame(&[0x01, 0x86, 0x02]));
        let mut qtm = qtm(&mock);

        assert_eq!(qtm.set_address(5).await, Ok(None));
        assert_eq!(qtm.client().address(), 1);
        assert_eq!(mock.transactions(), 1);
    }

    #[tokio::test]
    async fn old_address_is_ignored_after_address_change() {
        let mock = MockTransport::new();
        mock.reply(write_request(1, ADDRESS_REG_ADDR, 5))
            .reply(read_reply(1, &[100]))
            .reply(read_reply(5, &[200]));
        let mut qtm = qtm(&mock);

        assert_eq!(qtm.set_address(5).await, Ok(Some(5)));
        assert_eq!(qtm.get_version().await, Ok(Some(2.0)));
        assert_eq!(mock.transactions(), 3);

        mock.reply(read_reply(1, &[100])).reply(read_reply(1, &[100]));
        assert_eq!(qtm.get_version().await, Ok(None));
        assert_eq!(mock.transactions(), 5);
    }

    #[tokio::test]
    async fn baud_rate_change_is_followed() {
        let mock = MockTransport::new();
        mock.reply(write_request(1, BAUD_RATE_REG_ADDR, 0x4000))
            .reply(read_reply(1, &[1]));
        let mut qtm = qtm(&mock);

        assert_eq!(qtm.set_baud_rate(19200).await, Ok(Some(19200)));
        assert_eq!(qtm.client().config().baud_rate, 19200);
        assert_eq!(qtm.get_range().await, Ok(Some(1)));
        assert_eq!(mock.baud_rates(), [9600, 19200]);
    }

    #[tokio::test]
    async fn material() {
        let mock = MockTransport::new();
        mock.reply(write_request(1, DENSITY_REG_ADDR, 1930))
            .reply(write_request(1, Z_RATIO_REG_ADDR, 380));
        let mut qtm = qtm(&mock);

        let gold = Material::by_symbol("Au").unwrap();
        assert_eq!(qtm.set_material(gold).await, Ok(Some((19.3, 0.38))));
        assert_eq!(
            mock.requests(),
            [
                write_request(1, DENSITY_REG_ADDR, 1930),
                write_request(1, Z_RATIO_REG_ADDR, 380)
            ]
        );
    }
}
