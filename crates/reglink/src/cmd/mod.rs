use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use reglink_device::{Device, Metadata};
use reglink_session::timeout::DEFAULT_RETRY;
use reglink_session::Timeout;

use crate::exit::{device_error, io_error, CliError, CliResult, USAGE};

pub mod read;
pub mod version;
pub mod write;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read a 32-bit device register.
    Read(ReadArgs),
    /// Write a 32-bit device register.
    Write(WriteArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Read(args) => read::run(args),
        Command::Write(args) => write::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DeviceArgs {
    /// Device control-plane IP address.
    #[arg(long, value_name = "IP", conflicts_with = "metadata")]
    pub peer_ip: Option<String>,

    /// UDP control port.
    #[arg(long, value_name = "PORT", default_value_t = 8192)]
    pub control_port: u16,

    /// Device serial number, used to scope the shared-bus lock files.
    /// Defaults to the peer IP.
    #[arg(long, value_name = "SERIAL")]
    pub serial: Option<String>,

    /// Enumeration metadata JSON file, as an alternative to --peer-ip.
    #[arg(long, value_name = "FILE")]
    pub metadata: Option<PathBuf>,

    /// Deadline for the register operation (e.g. 5s, 500ms).
    #[arg(long, default_value = "500ms")]
    pub timeout: String,

    /// Ask the device to verify sequence numbers on every request.
    #[arg(long)]
    pub sequence_check: bool,
}

impl DeviceArgs {
    /// Build and connect the device handle these arguments select.
    pub fn open(&self) -> CliResult<Device> {
        let metadata = self.resolve_metadata()?;
        let device =
            Device::from_metadata(&metadata).map_err(|err| device_error("device setup", err))?;
        device
            .session()
            .connect()
            .map_err(|err| session_connect_error(err))?;
        Ok(device)
    }

    fn resolve_metadata(&self) -> CliResult<Metadata> {
        if let Some(path) = &self.metadata {
            let file = File::open(path)
                .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?;
            return serde_json::from_reader(file).map_err(|err| {
                CliError::new(USAGE, format!("{} is not valid metadata: {err}", path.display()))
            });
        }
        let peer_ip = self
            .peer_ip
            .clone()
            .ok_or_else(|| CliError::new(USAGE, "either --peer-ip or --metadata is required"))?;
        Ok(Metadata {
            serial_number: Some(self.serial.clone().unwrap_or_else(|| peer_ip.clone())),
            peer_ip: Some(peer_ip),
            control_port: Some(self.control_port),
            sequence_number_checking: Some(self.sequence_check),
            ..Metadata::default()
        })
    }

    pub fn operation_timeout(&self) -> CliResult<Timeout> {
        Ok(Timeout::new(parse_duration(&self.timeout)?, DEFAULT_RETRY))
    }
}

fn session_connect_error(err: reglink_session::SessionError) -> CliError {
    crate::exit::session_error("connect failed", err)
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Register address (0x-prefixed hex or decimal).
    pub address: String,

    #[command(flatten)]
    pub device: DeviceArgs,

    /// Print the result as a JSON object.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    /// Register address (0x-prefixed hex or decimal).
    pub address: String,

    /// Value to write (0x-prefixed hex or decimal).
    pub value: String,

    #[command(flatten)]
    pub device: DeviceArgs,

    /// Read the register back after writing and print it.
    #[arg(long)]
    pub verify: bool,

    /// Print the result as a JSON object.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse a register address or value, accepting `0x` hex or decimal.
pub fn parse_word(input: &str) -> CliResult<u32> {
    let input = input.trim();
    let parsed = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| CliError::new(USAGE, format!("invalid 32-bit value: {input}")))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}
