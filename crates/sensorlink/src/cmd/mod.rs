use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use sensorlink_transport::{Link, TcpLink, UdsLink};

use crate::exit::{transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod device;
pub mod features;
pub mod send;
pub mod session;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a device with simulated sensors and serve one controller at a time.
    Device(DeviceArgs),
    /// Send one command to a device and follow it until it finishes.
    Send(SendArgs),
    /// Query and print a device's sensor features.
    Features(FeaturesArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Device(args) => device::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Features(args) => features::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where the device lives.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Socket path, or HOST:PORT with --tcp.
    pub target: String,
    /// Treat the target as a TCP address.
    #[arg(long)]
    pub tcp: bool,
}

impl LinkArgs {
    fn tcp_addr(&self) -> CliResult<SocketAddr> {
        self.target
            .parse()
            .map_err(|_| CliError::new(USAGE, format!("invalid TCP address: {}", self.target)))
    }

    /// Link a device listens on, plus a label naming the bound endpoint.
    pub fn device_link(&self) -> CliResult<(Arc<dyn Link>, String)> {
        if self.tcp {
            let link = TcpLink::listening(self.tcp_addr()?);
            let bound = link
                .bind()
                .map_err(|err| transport_error("bind failed", err))?;
            return Ok((Arc::new(link), bound.to_string()));
        }
        Ok((Arc::new(UdsLink::new(&self.target)), self.target.clone()))
    }

    /// Link a controller dials.
    pub fn controller_link(&self) -> CliResult<Arc<dyn Link>> {
        if self.tcp {
            return Ok(Arc::new(TcpLink::dialing(vec![self.tcp_addr()?])));
        }
        Ok(Arc::new(UdsLink::new(&self.target)))
    }
}

#[derive(Args, Debug)]
pub struct DeviceArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Feature definitions (JSON) replacing the simulated defaults.
    #[arg(long, value_name = "FILE")]
    pub features: Option<PathBuf>,
    /// Sensors to provide (comma-separated). Default: all.
    #[arg(long, value_delimiter = ',')]
    pub sensors: Option<Vec<String>>,
    /// Keep-alive period; also how soon a lost controller is replaced.
    #[arg(long, default_value = "30s")]
    pub ping_interval: String,
    /// Commands that may wait for a busy sensor.
    #[arg(long, default_value_t = 10)]
    pub queue_capacity: usize,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Command alias, e.g. picture, location, modify.
    pub command: String,
    /// Command arguments, passed through as wire fields.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
    /// Write received data segments to this directory.
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,
    /// How long to wait for the task to finish (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct FeaturesArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Only this sensor.
    pub sensor: Option<String>,
    /// How long to wait for the report (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('m') {
        (num, "m")
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

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        _ => Duration::from_secs(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
    }

    #[test]
    fn tcp_target_must_be_an_address() {
        let link = LinkArgs {
            target: "not-an-addr".into(),
            tcp: true,
        };
        assert_eq!(link.controller_link().err().map(|e| e.code), Some(USAGE));
    }
}
