use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use rs485_lab_lib::analog::AnalogGauge;
use rs485_lab_lib::codec::BaudRate;
use rs485_lab_lib::config::{ConnectionConfig, Framer};
use rs485_lab_lib::gauge::Gas;
use rs485_lab_lib::materials::Material;
use std::path::PathBuf;
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

fn parse_address(s: &str) -> Result<u16, String> {
    clap_num::maybe_hex::<u16>(s).map_err(|e| format!("Invalid address format: {e}"))
}

fn parse_baud_rate(s: &str) -> Result<BaudRate, String> {
    let rate_val = s
        .parse::<u32>()
        .map_err(|e| format!("Invalid baud rate number format: {e}"))?;
    BaudRate::try_from(rate_val).map_err(|e| e.to_string())
}

fn parse_framer(s: &str) -> Result<Framer, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "rtu" => Ok(Framer::Rtu),
        "ascii" => Ok(Framer::Ascii),
        _ => Err(format!("Unknown framer '{s}', expected 'rtu' or 'ascii'")),
    }
}

fn parse_material(s: &str) -> Result<Material, String> {
    s.parse().map_err(|e: rs485_lab_lib::Error| e.to_string())
}

fn parse_gas(s: &str) -> Result<Gas, String> {
    s.parse().map_err(|e: rs485_lab_lib::Error| e.to_string())
}

fn parse_analog_gauge(s: &str) -> Result<AnalogGauge, String> {
    s.parse().map_err(|e: rs485_lab_lib::Error| e.to_string())
}

fn parse_switch(s: &str) -> Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "on" | "1" | "true" | "enable" => Ok(true),
        "off" | "0" | "false" | "disable" => Ok(false),
        _ => Err(format!("Invalid switch value '{s}', expected 'on' or 'off'")),
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum QtmCommands {
    /// Read all registers of the monitor in one transaction.
    ReadAll,

    /// Read thickness, rate and crystal frequency.
    Read,

    /// Continuously print thickness, rate and crystal frequency.
    Monitor {
        /// Interval between two readings (e.g., "500ms", "2s").
        #[arg(value_parser = humantime::parse_duration, short, long, default_value = "1s")]
        poll_interval: Duration,
    },

    /// Start a measurement and reset the thickness.
    Start,

    /// Stop the running measurement.
    Stop,

    /// Set the heater PWM in percent (0 to 99.99).
    SetPwm { pwm: f64 },

    /// Set gate time, analog output mode and rate algorithm.
    /// Gate time in 100 ms steps (0 to 11), output mode 0 stop, 1 auto, 2 manual,
    /// rate algorithm 0 immediate, 1 weighted, 2 ten-sample average.
    #[clap(verbatim_doc_comment)]
    SetCon {
        gate_time: u8,
        analog_output: u8,
        rate_mode: u8,
    },

    /// Set the film density in g/cm³.
    SetDensity { density: f64 },

    /// Set the acoustic impedance ratio of the film.
    SetZRatio { z_ratio: f64 },

    /// Set the tooling scale factor.
    SetScale { scale: f64 },

    /// Set the rate range in Å/s.
    SetRange { range: u16 },

    /// Set density and Z-ratio from the material table.
    /// The material is given by its symbol (e.g. "Au") or table id.
    #[clap(verbatim_doc_comment)]
    SetMaterial {
        #[arg(value_parser = parse_material)]
        material: Material,
    },

    /// Move the monitor to a new bus address (1 to 254).
    /// **Important:** Further communication must use the new address.
    #[clap(verbatim_doc_comment)]
    SetAddress {
        #[arg(value_parser = parse_address)]
        address: u16,
    },

    /// Switch the monitor to a new baud rate.
    /// Supported values: 1200, 2400, 4800, 9600, 19200, 38400.
    #[clap(verbatim_doc_comment)]
    SetBaudRate {
        #[arg(value_parser = parse_baud_rate)]
        baud_rate: BaudRate,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum GaugeCommands {
    /// Read the pressure in mbar.
    Read,

    /// Read the gauge model.
    ReadType,

    /// Read the switching pressure of a setpoint.
    ReadSetpoint {
        #[arg(default_value_t = 1)]
        channel: u8,
    },

    /// Set the switching pressure of a setpoint in mbar.
    SetSetpoint {
        pressure: f64,
        #[arg(default_value_t = 1)]
        channel: u8,
    },

    /// Read a calibration factor (channel 1 Pirani, 2 Penning).
    ReadCalibration {
        #[arg(default_value_t = 1)]
        channel: u8,
    },

    /// Set a calibration factor (channel 1 Pirani, 2 Penning).
    SetCalibration {
        factor: f64,
        #[arg(default_value_t = 1)]
        channel: u8,
    },

    /// Set the tabulated calibration factor of a process gas.
    SetGas {
        #[arg(value_parser = parse_gas)]
        gas: Gas,
        #[arg(default_value_t = 1)]
        channel: u8,
    },

    /// Adjust the gauge to atmospheric pressure.
    /// The gauge must be vented when this command is sent.
    #[clap(verbatim_doc_comment)]
    Atmosphere,

    /// Adjust the gauge zero.
    /// The gauge must be at base pressure when this command is sent.
    #[clap(verbatim_doc_comment)]
    Zero,

    /// Read whether the Penning sensor is switched on.
    ReadPenning,

    /// Switch the Penning sensor on or off.
    SetPenning {
        #[arg(value_parser = parse_switch)]
        enable: bool,
    },

    /// Read whether Penning switching follows the Pirani reading.
    ReadPenningSync,

    /// Switch Penning/Pirani synchronisation on or off.
    SetPenningSync {
        #[arg(value_parser = parse_switch)]
        enable: bool,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum VfdCommands {
    /// Start the motor.
    Start {
        /// Run backwards.
        #[arg(long)]
        reverse: bool,
        /// Run at jog (slow) speed.
        #[arg(long)]
        jog: bool,
    },

    /// Stop the motor along the deceleration ramp.
    Stop {
        /// Cut the output and let the motor coast.
        #[arg(long)]
        coast: bool,
    },

    /// Read the frequency set point in Hz.
    ReadFrequency,

    /// Set the frequency set point in Hz.
    SetFrequency { frequency: f64 },

    /// Read the run state.
    ReadState,

    /// Read state, output frequency, voltage, current and power.
    ReadParameters,

    /// Read the fault and the communication fault.
    ReadError,

    /// Reset the fault and read it again.
    ClearError,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliDevice {
    /// Quartz crystal thickness monitor.
    Qtm {
        #[command(subcommand)]
        command: QtmCommands,
    },

    /// Active vacuum gauge.
    Gauge {
        #[command(subcommand)]
        command: GaugeCommands,
    },

    /// Variable-frequency drive.
    Vfd {
        /// Maximum output frequency in Hz, set points are clamped to it.
        #[arg(long, default_value_t = 50.0)]
        max_frequency: f64,

        /// Use the tokio-modbus RTU client instead of the built-in codec.
        #[arg(long)]
        tokio_modbus: bool,

        #[command(subcommand)]
        command: VfdCommands,
    },

    /// Convert the analog output voltage of a gauge to pressure.
    /// Models: MTP4D, MTM9D, "TTR 101 N", Leybold, Edwards.
    #[clap(verbatim_doc_comment)]
    Analog {
        #[arg(value_parser = parse_analog_gauge)]
        model: AnalogGauge,
        voltage: f64,
    },

    /// Calculate the film thickness from a crystal frequency shift.
    Film {
        /// Frequency of the uncoated crystal in Hz.
        f0: f64,
        /// Frequency of the coated crystal in Hz.
        f1: f64,
        #[arg(value_parser = parse_material)]
        material: Material,
    },

    /// List the deposition materials.
    Materials,
}

const fn about_text() -> &'static str {
    "labctl - Control thickness monitors, vacuum gauges and drives on an RS-485 bus."
}

#[derive(Parser, Debug)]
#[command(name = "labctl", author, version, about = about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is off.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// Serial port device name.
    /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
    #[arg(global = true, short, long, default_value_t = default_device_name(), verbatim_doc_comment)]
    pub device: String,

    /// Baud rate for serial communication.
    #[arg(global = true, long, default_value_t = ConnectionConfig::DEFAULT_BAUD_RATE)]
    pub baud_rate: u32,

    /// Bus address of the device.
    /// Can be specified in decimal or hexadecimal (e.g., "0x01").
    #[arg(global = true, short, long, default_value_t = 1, value_parser = parse_address, verbatim_doc_comment)]
    pub address: u16,

    /// Framing of Modbus devices: "rtu" or "ascii".
    #[arg(global = true, long, default_value = "rtu", value_parser = parse_framer)]
    pub framer: Framer,

    /// Attempts per operation before giving up.
    #[arg(global = true, long, default_value_t = rs485_lab_lib::client::DEFAULT_RETRIES)]
    pub retries: u32,

    /// Time to wait for a complete response.
    /// Examples: "1s", "500ms".
    #[arg(global = true, long, default_value = "200ms", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Duration,

    /// Pause between sending a request and reading the reply.
    /// Important with USB-to-RS485 converters that need time
    /// to switch between transmitting (TX) and receiving (RX) modes.
    /// With `vfd --tokio-modbus` it is the bus idle time before each request.
    /// Examples: "5ms", "50ms".
    #[arg(global = true, long, default_value = "5ms", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub delay: Duration,

    /// YAML file with the serial link settings.
    /// Replaces --device, --baud-rate, --framer and --timeout.
    #[arg(global = true, long, verbatim_doc_comment)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliDevice,
}
