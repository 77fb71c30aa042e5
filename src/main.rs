//! labctl
//!
//! A command-line interface (CLI) application for the laboratory devices on an
//! RS-485 bus, built on the `rs485_lab_lib` crate.
//!
//! This tool allows users to:
//! - Read and configure quartz crystal thickness monitors, including a
//!   continuous console monitor.
//! - Read vacuum gauges and change their setpoints and calibration.
//! - Start, stop and query variable-frequency drives.
//! - Convert analog gauge voltages and crystal frequency shifts offline.

use anyhow::{bail, Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use rs485_lab_lib::client::{DeviceClient, RegisterClient};
use rs485_lab_lib::config::{ConnectionConfig, Framer};
use rs485_lab_lib::frame::{CommandAsciiCodec, LrcAsciiCodec, ModbusCodec};
use rs485_lab_lib::gauge::Gauge;
use rs485_lab_lib::materials::{film_thickness, MATERIALS};
use rs485_lab_lib::qtm::{ConSettings, Qtm};
use rs485_lab_lib::tokio_modbus_client::ModbusRtuClient;
use rs485_lab_lib::tokio_serial::SerialTransport;
use rs485_lab_lib::vfd::Vfd;
use std::{panic, path::Path, time::Duration};

mod commandline;

use commandline::{CliArgs, CliDevice, GaugeCommands, QtmCommands, VfdCommands};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

/// Turns the "no reply" case of a device operation into a CLI error.
fn reply<T>(value: Option<T>, what: &str) -> Result<T> {
    value.with_context(|| format!("No valid reply from the device for {what}"))
}

/// Calculates the minimum recommended delay for Modbus RTU based on baud rate.
/// This is typically 3.5 character times.
fn minimum_rtu_delay(baud_rate: u32) -> Duration {
    // start + 8 data + parity/stop + stop
    let bits_per_char = 11.0;
    let rate = baud_rate as f64;
    if rate == 0.0 {
        return Duration::from_millis(16);
    }

    let char_time_secs = bits_per_char / rate;
    let inter_frame_delay_secs = 3.5 * char_time_secs;
    let delay_micros = (inter_frame_delay_secs * 1_000_000.0) as u64;

    // Modbus fixes the silence at 1.75 ms above 19200 baud.
    const PRACTICAL_MIN_INTER_FRAME_DELAY_MICROS: u64 = 1_750;
    Duration::from_micros(delay_micros.max(PRACTICAL_MIN_INTER_FRAME_DELAY_MICROS))
}

/// Checks if the user-provided RTU delay is sufficient; if not, uses the calculated minimum.
fn check_rtu_delay(user_delay: Duration, baud_rate: u32) -> Duration {
    let min_rtu_delay = minimum_rtu_delay(baud_rate);
    if user_delay < min_rtu_delay {
        warn!(
            "User-defined RTU delay of {user_delay:?} is below the recommended minimum of {min_rtu_delay:?} for {baud_rate} baud. Using minimum."
        );
        min_rtu_delay
    } else {
        user_delay
    }
}

/// Reads the serial link settings from a YAML file.
fn load_config(path: &Path) -> Result<ConnectionConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read config file {}", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("Cannot parse config file {}", path.display()))
}

fn connection_config(args: &CliArgs) -> Result<ConnectionConfig> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ConnectionConfig::new(&args.device)
            .baud_rate(args.baud_rate)
            .framer(args.framer)
            .timeout(args.timeout),
    };
    config.validate().context("Invalid serial link settings")?;
    Ok(config)
}

/// Prompts the user for confirmation before a bus setting of a device is changed.
fn confirm_bus_change(what: &str) -> Result<bool> {
    println!(
        "WARNING: After changing the {what}, the device only answers with the new setting."
    );
    println!("Make sure no other device on the bus already uses it.");
    Confirm::new()
        .with_prompt("Do you want to continue?")
        .default(false)
        .show_default(true)
        .interact()
        .context("Failed to get user confirmation.")
}

async fn run_qtm<C: RegisterClient<Value = u16>>(
    qtm: &mut Qtm<C>,
    command: &QtmCommands,
    delay: Duration,
) -> Result<()> {
    match command {
        QtmCommands::ReadAll => {
            info!("Executing: Read monitor state");
            let state = reply(qtm.get_state().await?, "the monitor state")?;
            println!("{state}");
        }
        QtmCommands::Read => {
            let thickness = reply(qtm.get_thickness().await?, "the thickness")?;
            let rate = reply(qtm.get_rate().await?, "the rate")?;
            let frequency = reply(qtm.get_frequency().await?, "the frequency")?;
            println!("Thickness: {thickness:.2} Å");
            println!("Rate: {rate:.2} Å/s");
            println!("Frequency: {frequency:.2} Hz");
        }
        QtmCommands::Monitor { poll_interval } => {
            info!("Starting monitor: interval={poll_interval:?}");
            loop {
                match qtm.get_state().await? {
                    Some(state) => println!(
                        "{:10.2} Å  {:8.2} Å/s  {:10.2} Hz  {}",
                        state.thickness, state.rate, state.frequency, state.run
                    ),
                    None => warn!("Monitor did not answer"),
                }
                tokio::time::sleep(delay.max(*poll_interval)).await;
            }
        }
        QtmCommands::Start => {
            let run = reply(qtm.start_measurement().await?, "the run state")?;
            println!("Measurement {run}");
        }
        QtmCommands::Stop => {
            let run = reply(qtm.stop_measurement().await?, "the run state")?;
            println!("Measurement {run}");
        }
        QtmCommands::SetPwm { pwm } => {
            let pwm = reply(qtm.set_pwm(*pwm).await?, "the PWM")?;
            println!("PWM set to {pwm:.2} %");
        }
        QtmCommands::SetCon {
            gate_time,
            analog_output,
            rate_mode,
        } => {
            let con = ConSettings::new(*gate_time, *analog_output, *rate_mode);
            let con = reply(qtm.set_con(con).await?, "the measurement settings")?;
            println!("Measurement settings: {con}");
        }
        QtmCommands::SetDensity { density } => {
            let density = reply(qtm.set_density(*density).await?, "the density")?;
            println!("Density set to {density:.2} g/cm³");
        }
        QtmCommands::SetZRatio { z_ratio } => {
            let z_ratio = reply(qtm.set_z_ratio(*z_ratio).await?, "the Z-ratio")?;
            println!("Z-ratio set to {z_ratio:.3}");
        }
        QtmCommands::SetScale { scale } => {
            let scale = reply(qtm.set_scale(*scale).await?, "the scale")?;
            println!("Scale set to {scale:.3}");
        }
        QtmCommands::SetRange { range } => {
            let range = reply(qtm.set_range(*range).await?, "the range")?;
            println!("Range set to {range} Å/s");
        }
        QtmCommands::SetMaterial { material } => {
            info!("Executing: Set material {material}");
            let (density, z_ratio) = reply(qtm.set_material(material).await?, "the material")?;
            println!(
                "Material {}: density {density:.2} g/cm³, Z-ratio {z_ratio:.3}",
                material.symbol
            );
        }
        QtmCommands::SetAddress { address } => {
            if !confirm_bus_change("bus address")? {
                info!("Address change aborted by user.");
                return Ok(());
            }
            let address = reply(qtm.set_address(*address).await?, "the new address")?;
            println!(
                "Monitor address set to {address}. Subsequent communication must use this new address."
            );
        }
        QtmCommands::SetBaudRate { baud_rate } => {
            if !confirm_bus_change("baud rate")? {
                info!("Baud rate change aborted by user.");
                return Ok(());
            }
            let baud_rate = reply(
                qtm.set_baud_rate((*baud_rate).into()).await?,
                "the new baud rate",
            )?;
            println!("Monitor baud rate set to {baud_rate}.");
        }
    }
    Ok(())
}

async fn run_gauge<C: RegisterClient<Value = String>>(
    gauge: &mut Gauge<C>,
    command: &GaugeCommands,
) -> Result<()> {
    match command {
        GaugeCommands::Read => {
            let pressure = reply(gauge.get_pressure().await?, "the pressure")?;
            println!("Pressure: {pressure:.2e} mbar");
        }
        GaugeCommands::ReadType => {
            let model = reply(gauge.get_gauge_type().await?, "the gauge type")?;
            println!("Gauge type: {model}");
        }
        GaugeCommands::ReadSetpoint { channel } => {
            let pressure = reply(gauge.get_setpoint(*channel).await?, "the setpoint")?;
            println!("Setpoint {channel}: {pressure:.2e} mbar");
        }
        GaugeCommands::SetSetpoint { pressure, channel } => {
            let pressure = reply(
                gauge.set_setpoint(*pressure, *channel).await?,
                "the setpoint",
            )?;
            println!("Setpoint {channel}: {pressure:.2e} mbar");
        }
        GaugeCommands::ReadCalibration { channel } => {
            let factor = reply(gauge.get_calibration(*channel).await?, "the calibration")?;
            println!("Calibration {channel}: {factor:.2}");
        }
        GaugeCommands::SetCalibration { factor, channel } => {
            let factor = reply(
                gauge.set_calibration(*factor, *channel).await?,
                "the calibration",
            )?;
            println!("Calibration {channel}: {factor:.2}");
        }
        GaugeCommands::SetGas { gas, channel } => {
            let factor = reply(
                gauge.set_gas_calibration(*gas, *channel).await?,
                "the calibration",
            )?;
            println!("Calibration {channel} for {gas}: {factor:.2}");
        }
        GaugeCommands::Atmosphere => {
            let pressure = reply(gauge.set_atmosphere().await?, "the pressure")?;
            println!("Pressure after atmosphere adjustment: {pressure:.2e} mbar");
        }
        GaugeCommands::Zero => {
            let pressure = reply(gauge.set_zero().await?, "the pressure")?;
            println!("Pressure after zero adjustment: {pressure:.2e} mbar");
        }
        GaugeCommands::ReadPenning => {
            let enabled = reply(gauge.get_penning_state().await?, "the Penning state")?;
            println!("Penning sensor: {}", if enabled { "on" } else { "off" });
        }
        GaugeCommands::SetPenning { enable } => {
            let enabled = reply(
                gauge.set_penning_state(*enable).await?,
                "the Penning state",
            )?;
            println!("Penning sensor: {}", if enabled { "on" } else { "off" });
        }
        GaugeCommands::ReadPenningSync => {
            let enabled = reply(gauge.get_penning_sync().await?, "the Penning sync")?;
            println!("Penning sync: {}", if enabled { "on" } else { "off" });
        }
        GaugeCommands::SetPenningSync { enable } => {
            let enabled = reply(gauge.set_penning_sync(*enable).await?, "the Penning sync")?;
            println!("Penning sync: {}", if enabled { "on" } else { "off" });
        }
    }
    Ok(())
}

async fn run_vfd<C: RegisterClient<Value = u16>>(
    vfd: &mut Vfd<C>,
    command: &VfdCommands,
) -> Result<()> {
    match command {
        VfdCommands::Start { reverse, jog } => {
            let acknowledged = match (reverse, jog) {
                (false, false) => vfd.start_forward().await?,
                (true, false) => vfd.start_reverse().await?,
                (false, true) => vfd.jog_forward().await?,
                (true, true) => vfd.jog_reverse().await?,
            };
            let command = reply(acknowledged, "the start command")?;
            println!("Drive accepted {command:?}");
        }
        VfdCommands::Stop { coast } => {
            let acknowledged = if *coast {
                vfd.coast_stop().await?
            } else {
                vfd.stop().await?
            };
            let command = reply(acknowledged, "the stop command")?;
            println!("Drive accepted {command:?}");
        }
        VfdCommands::ReadFrequency => {
            let frequency = reply(vfd.get_frequency().await?, "the frequency")?;
            println!("Frequency set point: {frequency:.2} Hz");
        }
        VfdCommands::SetFrequency { frequency } => {
            let frequency = reply(vfd.set_frequency(*frequency).await?, "the frequency")?;
            println!("Frequency set point: {frequency:.2} Hz");
        }
        VfdCommands::ReadState => {
            let state = reply(vfd.get_state().await?, "the run state")?;
            println!("State: {state}");
        }
        VfdCommands::ReadParameters => {
            let parameters = reply(vfd.get_parameters().await?, "the parameters")?;
            println!("{parameters}");
        }
        VfdCommands::ReadError => {
            let fault = reply(vfd.get_error().await?, "the fault code")?;
            println!("Fault: {fault}");
            let com_fault = reply(vfd.get_com_error().await?, "the communication fault code")?;
            println!("Communication fault: {com_fault}");
        }
        VfdCommands::ClearError => {
            let fault = reply(vfd.clear_error().await?, "the fault code")?;
            if fault.is_fault() {
                bail!("Drive still reports a fault: {fault}");
            }
            println!("Fault cleared.");
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "labctl started. Log level: {}",
        args.verbose.log_level_filter()
    );

    match &args.command {
        CliDevice::Analog { model, voltage } => {
            let pressure = model.voltage_to_pressure(*voltage);
            println!("{model} at {voltage} V: {pressure:.2e} mbar");
            return Ok(());
        }
        CliDevice::Film { f0, f1, material } => {
            let thickness = film_thickness(*f0, *f1, material.density, material.z_ratio);
            println!("{} film: {thickness:.2} Å", material.symbol);
            return Ok(());
        }
        CliDevice::Materials => {
            for material in MATERIALS.iter() {
                println!("{:2}  {material}", material.id);
            }
            return Ok(());
        }
        _ => {}
    }

    let config = connection_config(&args)?;
    info!(
        "Using {} at {} baud, device address {}",
        config.port, config.baud_rate, args.address
    );

    match &args.command {
        CliDevice::Qtm { command } => {
            let client = DeviceClient::new(LrcAsciiCodec, SerialTransport::new(), config, args.address)
                .context("Cannot create thickness monitor client")?
                .with_retries(args.retries)
                .with_delay(args.delay);
            let mut qtm = Qtm::new(client);
            run_qtm(&mut qtm, command, args.delay).await?;
        }
        CliDevice::Gauge { command } => {
            let client =
                DeviceClient::new(CommandAsciiCodec, SerialTransport::new(), config, args.address)
                    .context("Cannot create gauge client")?
                    .with_retries(args.retries)
                    .with_delay(args.delay);
            let mut gauge = Gauge::new(client);
            run_gauge(&mut gauge, command).await?;
        }
        CliDevice::Vfd {
            max_frequency,
            tokio_modbus,
            command,
        } => {
            let delay = match config.framer {
                Framer::Rtu => check_rtu_delay(args.delay, config.baud_rate),
                Framer::Ascii => args.delay,
            };
            if *tokio_modbus {
                if config.framer != Framer::Rtu {
                    bail!("The tokio-modbus client only supports the RTU framer");
                }
                let client = ModbusRtuClient::new(config, args.address)
                    .context("Cannot create drive client")?
                    .with_retries(args.retries)
                    .with_delay(delay);
                let mut vfd = Vfd::new(client).with_max_frequency(*max_frequency);
                run_vfd(&mut vfd, command).await?;
            } else {
                let codec = ModbusCodec::new(config.framer);
                let client = DeviceClient::new(codec, SerialTransport::new(), config, args.address)
                    .context("Cannot create drive client")?
                    .with_retries(args.retries)
                    .with_delay(delay);
                let mut vfd = Vfd::new(client).with_max_frequency(*max_frequency);
                run_vfd(&mut vfd, command).await?;
            }
        }
        CliDevice::Analog { .. } | CliDevice::Film { .. } | CliDevice::Materials => {
            unreachable!("Offline commands are handled earlier.")
        }
    }

    Ok(())
}
