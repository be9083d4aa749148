use std::sync::Arc;

use sensorlink_frame::{Header, Protocol};
use sensorlink_peer::{
    ControllerEvent, DirectorySink, FlushTracker, FlushWorker, MemorySink, PersistenceSink,
};

use crate::cmd::session::Session;
use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{io_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_event, print_status, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let header = resolve_header(&args.command)?;

    let tracker = FlushTracker::new();
    let worker = match &args.out {
        Some(dir) => {
            let directory = DirectorySink::create(dir).map_err(|err| {
                io_error(&format!("failed creating {}", dir.display()), err)
            })?;
            let worker = FlushWorker::spawn_with_hook(Arc::new(directory), Some(tracker.hook()))
                .map_err(|err| io_error("failed starting flush worker", err))?;
            Some(Arc::new(worker))
        }
        None => None,
    };
    let sink: Arc<dyn PersistenceSink> = match &worker {
        Some(worker) => Arc::clone(worker) as Arc<dyn PersistenceSink>,
        None => Arc::new(MemorySink::new()),
    };

    let session = Session::open(&args.link, sink)?;
    tracker.bind(&session.controller);
    let outcome = session.run_command(header, args.args, timeout, |event| {
        print_event(event, format)
    });
    session.close();
    if let Some(worker) = &worker {
        worker.shutdown();
    }

    let terminal = outcome?;
    if let Some(failed) = tracker.take_failures().into_iter().next() {
        let context = format!(
            "failed writing segment {} of task {}",
            failed.chunk_index, failed.task_id
        );
        return Err(match failed.result {
            Err(err) => io_error(&context, err),
            Ok(()) => CliError::new(FAILURE, context),
        });
    }
    if let (Some(dir), ControllerEvent::Completed { .. }) = (&args.out, &terminal) {
        print_status("saved", &dir.display().to_string(), format);
    }
    Ok(exit_code(&terminal))
}

fn resolve_header(alias: &str) -> CliResult<Header> {
    Protocol::standard()
        .header_by_alias(alias.trim())
        .ok_or_else(|| {
            let known: Vec<&str> = Header::ALL.iter().map(|header| header.alias()).collect();
            CliError::new(
                USAGE,
                format!("unknown command {alias:?}; expected one of {}", known.join(", ")),
            )
        })
}

fn exit_code(terminal: &ControllerEvent) -> i32 {
    match terminal {
        ControllerEvent::Completed { .. } => SUCCESS,
        _ => FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_aliases_case_insensitively() {
        let header = resolve_header(Header::TakePicture.alias()).expect("alias should resolve");
        assert_eq!(header, Header::TakePicture);
        let upper = Header::GetLocation.alias().to_ascii_uppercase();
        assert_eq!(
            resolve_header(&upper).expect("alias should resolve"),
            Header::GetLocation
        );
    }

    #[test]
    fn unknown_alias_is_usage_error() {
        let err = resolve_header("launch-rocket").expect_err("alias should not resolve");
        assert_eq!(err.code, USAGE);
        assert!(err.message.contains(Header::Ping.alias()));
    }

    #[test]
    fn only_completion_succeeds() {
        assert_eq!(exit_code(&ControllerEvent::Completed { task_id: 1 }), SUCCESS);
        assert_eq!(
            exit_code(&ControllerEvent::Unsupported {
                task_id: 1,
                sensor: "camera".into()
            }),
            FAILURE
        );
    }
}
