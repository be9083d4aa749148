use std::sync::Arc;

use sensorlink_frame::Header;
use sensorlink_peer::{ControllerEvent, MemorySink};

use crate::cmd::session::Session;
use crate::cmd::{parse_duration, FeaturesArgs};
use crate::exit::{CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_capabilities, OutputFormat};

pub fn run(args: FeaturesArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let session = Session::open(&args.link, Arc::new(MemorySink::new()))?;

    let query: Vec<String> = args.sensor.iter().cloned().collect();
    if let Some(name) = &args.sensor {
        if session.protocol.sensor(name).is_none() {
            session.close();
            return Err(CliError::new(USAGE, format!("unknown sensor {name:?}")));
        }
    }

    let outcome = session.run_command(Header::QueryFeatures, query, timeout, |_| {});
    let registry = session.controller.capabilities();
    session.close();

    match outcome? {
        ControllerEvent::Completed { .. } => {
            print_capabilities(&registry, format);
            Ok(SUCCESS)
        }
        ControllerEvent::Unsupported { sensor, .. } => Err(CliError::new(
            FAILURE,
            format!("device has no sensor {sensor:?}"),
        )),
        other => Err(CliError::new(FAILURE, format!("feature query failed: {other:?}"))),
    }
}
