use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sensorlink_frame::{Header, Protocol, Role};
use sensorlink_peer::{
    ConnectionManager, Controller, ControllerEvent, ManagerConfig, PersistenceSink,
};
use tracing::debug;

use crate::cmd::LinkArgs;
use crate::exit::{peer_error, CliError, CliResult, TIMEOUT};

/// A controller bound to one connection manager.
pub struct Session {
    pub protocol: Arc<Protocol>,
    pub manager: ConnectionManager,
    pub controller: Arc<Controller>,
    events: Receiver<ControllerEvent>,
}

impl Session {
    /// Build the controller and start searching. Commands sent before the
    /// link is up are held until it is.
    pub fn open(link: &LinkArgs, sink: Arc<dyn PersistenceSink>) -> CliResult<Self> {
        let protocol = Arc::new(Protocol::standard());
        let manager = ConnectionManager::new(
            link.controller_link()?,
            Role::Controller,
            ManagerConfig {
                retry_backoff: Duration::from_millis(50),
                ..ManagerConfig::default()
            },
        )
        .map_err(|err| peer_error("connection setup failed", err))?;

        let (controller, events) =
            Controller::new(Arc::clone(&protocol), sink, manager.outbox());
        let controller = Arc::new(controller);
        let inbound = Arc::clone(&controller);
        manager.set_handler(move |frame| {
            if let Err(err) = inbound.handle_frame(frame) {
                debug!(error = %err, "response not applied");
            }
        });
        manager
            .find_connection()
            .map_err(|err| peer_error("search failed", err))?;

        Ok(Self {
            protocol,
            manager,
            controller,
            events,
        })
    }

    /// Send a command and follow it to its terminal event, handing every
    /// event for it to `on_event`.
    pub fn run_command(
        &self,
        header: Header,
        args: Vec<String>,
        timeout: Duration,
        mut on_event: impl FnMut(&ControllerEvent),
    ) -> CliResult<ControllerEvent> {
        let deadline = Instant::now() + timeout;
        let task_id = self
            .controller
            .send_command(header, args)
            .map_err(|err| peer_error("command rejected", err))?;
        self.manager
            .wait_connected(deadline.saturating_duration_since(Instant::now()))
            .map_err(|err| peer_error("connect failed", err))?;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match self.events.recv_timeout(remaining) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(CliError::new(
                        TIMEOUT,
                        format!("task {task_id} did not finish within {timeout:?}"),
                    ))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CliError::new(
                        crate::exit::INTERNAL,
                        "controller stopped unexpectedly",
                    ))
                }
            };
            let ours = event.task_id().is_none_or(|id| id == task_id);
            if !ours {
                debug!(task_id = ?event.task_id(), "ignoring event for another task");
                continue;
            }
            on_event(&event);
            if event.is_terminal() {
                return Ok(event);
            }
        }
    }

    pub fn close(self) {
        self.manager.cancel();
    }
}
