mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "sensorlink", version, about = "Remote sensor control")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_passes_negative_args_through() {
        let cli = Cli::try_parse_from([
            "sensorlink",
            "send",
            "/tmp/sensor.sock",
            "picture",
            "3000",
            "-1",
            "1",
        ])
        .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.command, "picture");
        assert_eq!(args.args, vec!["3000", "-1", "1"]);
    }

    #[test]
    fn send_options_precede_the_command() {
        let cli = Cli::try_parse_from([
            "sensorlink",
            "send",
            "--timeout",
            "5s",
            "--out",
            "/tmp/out",
            "/tmp/sensor.sock",
            "location",
        ])
        .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.timeout, "5s");
        assert!(args.args.is_empty());
    }

    #[test]
    fn parses_device_over_tcp() {
        let cli = Cli::try_parse_from([
            "sensorlink",
            "device",
            "127.0.0.1:7070",
            "--tcp",
            "--sensors",
            "camera,mic",
        ])
        .expect("device args should parse");

        let Command::Device(args) = cli.command else {
            panic!("expected device");
        };
        assert!(args.link.tcp);
        assert_eq!(
            args.sensors,
            Some(vec!["camera".to_string(), "mic".to_string()])
        );
    }

    #[test]
    fn parses_features_subcommand() {
        let cli = Cli::try_parse_from(["sensorlink", "features", "/tmp/sensor.sock", "camera"])
            .expect("features args should parse");
        assert!(matches!(cli.command, Command::Features(_)));
    }
}
