//! Intek SPE-B variable-frequency drive over Modbus.
//!
//! | Register | Content | Scale |
//! |----------|---------|-------|
//! | 2000 | control command, see [`VfdCommand`] | |
//! | 2001 | frequency set point in Hz | ÷100 |
//! | 3000 | run state, see [`VfdState`] | |
//! | 3001 | output frequency in Hz | ÷100 |
//! | 3002 | output voltage in V | |
//! | 3003 | output current in A | ÷10 |
//! | 3004 | output power in kW | ÷10 |
//! | 8000 | fault code, see [`fault`] | |
//! | 8001 | communication fault code, see [`com_fault`] | |

use crate::client::{RegisterClient, RegisterFloatExt};
use crate::codec::raw_to_scaled;
use crate::Result;
use log::{debug, warn};
use std::fmt;

pub const CONTROL_REG_ADDR: u16 = 2000;
pub const FREQUENCY_REG_ADDR: u16 = 2001;
pub const STATE_REG_ADDR: u16 = 3000;
pub const PARAMETERS_REG_ADDR: u16 = 3000;
pub const PARAMETERS_REG_QUAN: u16 = 5;
pub const FAULT_REG_ADDR: u16 = 8000;
pub const COM_FAULT_REG_ADDR: u16 = 8001;

pub const FREQUENCY_FACTOR: f64 = 100.0;
pub const VOLTAGE_FACTOR: f64 = 1.0;
pub const CURRENT_FACTOR: f64 = 10.0;
pub const POWER_FACTOR: f64 = 10.0;

/// Maximum output frequency unless configured otherwise.
pub const DEFAULT_MAX_FREQUENCY: f64 = 50.0;

/// Values of the control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum VfdCommand {
    Forward = 1,
    Reverse = 2,
    /// Forward at jog (slow) speed.
    JogForward = 3,
    JogReverse = 4,
    /// Decelerate along the ramp.
    Stop = 5,
    /// Switch the output off and let the motor coast.
    CoastStop = 6,
    FaultReset = 7,
}

impl VfdCommand {
    pub fn code(&self) -> u16 {
        *self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(VfdCommand::Forward),
            2 => Some(VfdCommand::Reverse),
            3 => Some(VfdCommand::JogForward),
            4 => Some(VfdCommand::JogReverse),
            5 => Some(VfdCommand::Stop),
            6 => Some(VfdCommand::CoastStop),
            7 => Some(VfdCommand::FaultReset),
            _ => None,
        }
    }
}

/// Decoded run-state register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VfdState {
    #[default]
    Unknown,
    Stopped,
    RunningForward,
    RunningBackward,
}

impl VfdState {
    pub fn decode_from_holding_register(word: u16) -> Self {
        match word {
            1 => VfdState::RunningForward,
            2 => VfdState::RunningBackward,
            3 => VfdState::Stopped,
            _ => VfdState::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, VfdState::RunningForward | VfdState::RunningBackward)
    }
}

impl fmt::Display for VfdState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            VfdState::Unknown => "Unknown",
            VfdState::Stopped => "Stopped",
            VfdState::RunningForward => "Running forward",
            VfdState::RunningBackward => "Running backward",
        };
        f.write_str(text)
    }
}

/// A fault code with its description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Fault {
    pub code: u16,
    pub message: &'static str,
}

impl Fault {
    pub fn is_fault(&self) -> bool {
        self.code != 0
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

const UNKNOWN_FAULT: &str = "Unknown error";

const FAULTS: &[(u16, &str)] = &[
    (0, "No error"),
    (1, "Reserved"),
    (2, "Current overload during acceleration"),
    (3, "Current overload during deceleration"),
    (4, "Current overload at constant speed"),
    (5, "Voltage overload during acceleration"),
    (6, "Voltage overload during deceleration"),
    (7, "Voltage overload at constant speed"),
    (8, "Control circuits power failure"),
    (9, "Undervoltage error"),
    (10, "VFD overload"),
    (11, "Motor overload"),
    (12, "Input phase error"),
    (13, "Output phase error"),
    (14, "Overheat of power converter"),
    (15, "External error"),
    (16, "Remote connection error"),
    (17, "Internal contactor failure"),
    (18, "Current sensor failure"),
    (19, "Automatic motor tuning failure"),
    (21, "EEPROM IO error"),
    (22, "VFD hardware error"),
    (23, "Grounding failure"),
    (24, "Reserved"),
    (25, "Reserved"),
    (26, "Total operation timeout"),
    (27, "User error 1"),
    (28, "User error 2"),
    (29, "Power on timeout"),
    (30, "Underloaded error"),
    (31, "PID feedback connection loss"),
    (40, "IGBT current limiter failure"),
    (41, "Running motor switch error"),
    (42, "Speed error"),
    (43, "Over speed error"),
    (45, "Motor overheat error"),
    (92, "Positioning error"),
    (94, "Calculated speed error"),
];

const COM_FAULTS: &[(u16, &str)] = &[
    (0, "No error"),
    (1, "Wrong password"),
    (2, "Command code error"),
    (3, "CRC error"),
    (4, "Invalid address"),
    (5, "Invalid parameter"),
    (6, "Parameter can not be edited"),
    (7, "System is blocked"),
    (8, "EEPROM write during operation"),
];

fn lookup(table: &[(u16, &'static str)], code: u16) -> Fault {
    let message = table
        .iter()
        .find(|(c, _)| *c == code)
        .map_or(UNKNOWN_FAULT, |&(_, message)| message);
    Fault { code, message }
}

/// Describes a drive fault code. Codes missing from the table are reported
/// as "Unknown error".
pub fn fault(code: u16) -> Fault {
    lookup(FAULTS, code)
}

/// Describes a communication fault code.
pub fn com_fault(code: u16) -> Fault {
    lookup(COM_FAULTS, code)
}

/// Operating values read in one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VfdParameters {
    pub state: VfdState,
    /// Output frequency in Hz.
    pub frequency: f64,
    /// Output frequency relative to the maximum frequency.
    pub frequency_percent: f64,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

impl VfdParameters {
    pub fn decode_from_holding_registers(words: &[u16], max_frequency: f64) -> Option<Self> {
        let &[state, frequency, voltage, current, power] = words else {
            return None;
        };
        let frequency = raw_to_scaled(frequency, FREQUENCY_FACTOR);
        Some(Self {
            state: VfdState::decode_from_holding_register(state),
            frequency,
            frequency_percent: if max_frequency > 0.0 {
                frequency / max_frequency * 100.0
            } else {
                0.0
            },
            voltage: raw_to_scaled(voltage, VOLTAGE_FACTOR),
            current: raw_to_scaled(current, CURRENT_FACTOR),
            power: raw_to_scaled(power, POWER_FACTOR),
        })
    }

    pub fn started(&self) -> bool {
        self.state.is_running()
    }
}

impl fmt::Display for VfdParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "State: {}", self.state)?;
        writeln!(
            f,
            "Frequency: {:.2} Hz ({:.1} %)",
            self.frequency, self.frequency_percent
        )?;
        writeln!(f, "Voltage: {:.0} V", self.voltage)?;
        writeln!(f, "Current: {:.1} A", self.current)?;
        write!(f, "Power: {:.1} kW", self.power)
    }
}

/// Facade over one drive.
pub struct Vfd<C> {
    client: C,
    max_frequency: f64,
}

impl<C: RegisterClient<Value = u16>> Vfd<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            max_frequency: DEFAULT_MAX_FREQUENCY,
        }
    }

    /// Sets the frequency that set points are clamped to.
    pub fn with_max_frequency(mut self, max_frequency: f64) -> Self {
        self.max_frequency = max_frequency.max(0.0);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn max_frequency(&self) -> f64 {
        self.max_frequency
    }

    /// Writes `command` to the control register.
    ///
    /// Returns the command the drive acknowledged.
    pub async fn send_command(&mut self, command: VfdCommand) -> Result<Option<VfdCommand>> {
        let response = self
            .client
            .write_register(CONTROL_REG_ADDR, &command.code())
            .await?;
        let acknowledged = response
            .as_ref()
            .and_then(|r| r.words())
            .map(|words| words[0]);
        match acknowledged {
            Some(code) if code == command.code() => {
                debug!("Drive {} accepted {command:?}", self.client.address());
                Ok(Some(command))
            }
            Some(code) => {
                warn!(
                    "Drive {} acknowledged command {code} instead of {}",
                    self.client.address(),
                    command.code()
                );
                Ok(VfdCommand::from_code(code))
            }
            None => Ok(None),
        }
    }

    pub async fn start_forward(&mut self) -> Result<Option<VfdCommand>> {
        self.send_command(VfdCommand::Forward).await
    }

    pub async fn start_reverse(&mut self) -> Result<Option<VfdCommand>> {
        self.send_command(VfdCommand::Reverse).await
    }

    pub async fn jog_forward(&mut self) -> Result<Option<VfdCommand>> {
        self.send_command(VfdCommand::JogForward).await
    }

    pub async fn jog_reverse(&mut self) -> Result<Option<VfdCommand>> {
        self.send_command(VfdCommand::JogReverse).await
    }

    /// Ramps the motor down.
    pub async fn stop(&mut self) -> Result<Option<VfdCommand>> {
        self.send_command(VfdCommand::Stop).await
    }

    /// Cuts the output immediately.
    pub async fn coast_stop(&mut self) -> Result<Option<VfdCommand>> {
        self.send_command(VfdCommand::CoastStop).await
    }

    pub async fn get_frequency(&mut self) -> Result<Option<f64>> {
        self.client
            .read_single_register_float(FREQUENCY_REG_ADDR, FREQUENCY_FACTOR)
            .await
    }

    /// Sets the frequency set point, clamped to `0..=max_frequency` Hz.
    pub async fn set_frequency(&mut self, frequency: f64) -> Result<Option<f64>> {
        let frequency = frequency.clamp(0.0, self.max_frequency);
        self.client
            .write_single_register_float(FREQUENCY_REG_ADDR, frequency, FREQUENCY_FACTOR)
            .await
    }

    pub async fn get_state(&mut self) -> Result<Option<VfdState>> {
        let response = self.client.read_registers(STATE_REG_ADDR, 1).await?;
        Ok(response
            .as_ref()
            .and_then(|r| r.words())
            .map(|words| VfdState::decode_from_holding_register(words[0])))
    }

    /// Reads state, output frequency, voltage, current and power at once.
    pub async fn get_parameters(&mut self) -> Result<Option<VfdParameters>> {
        let response = self
            .client
            .read_registers(PARAMETERS_REG_ADDR, PARAMETERS_REG_QUAN)
            .await?;
        Ok(response
            .as_ref()
            .and_then(|r| r.words())
            .and_then(|words| VfdParameters::decode_from_holding_registers(words, self.max_frequency)))
    }

    async fn read_code(&mut self, register: u16) -> Result<Option<u16>> {
        let response = self.client.read_registers(register, 1).await?;
        Ok(response.as_ref().and_then(|r| r.words()).map(|w| w[0]))
    }

    pub async fn get_error(&mut self) -> Result<Option<Fault>> {
        Ok(self.read_code(FAULT_REG_ADDR).await?.map(fault))
    }

    pub async fn get_com_error(&mut self) -> Result<Option<Fault>> {
        Ok(self.read_code(COM_FAULT_REG_ADDR).await?.map(com_fault))
    }

    /// Resets the drive fault and returns the fault present afterwards.
    pub async fn clear_error(&mut self) -> Result<Option<Fault>> {
        if self.send_command(VfdCommand::FaultReset).await?.is_none() {
            warn!("Drive {} did not acknowledge the fault reset", self.client.address());
        }
        self.get_error().await
    }
}
