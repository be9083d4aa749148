//! Controller-side task bookkeeping.
//!
//! The controller issues commands, tracks each one as a task until the device
//! reports a terminal notification, and reassembles data segments into its
//! persistence sink.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Instant;

use sensorlink_caps::{decode_report, CapabilityRegistry};
use sensorlink_frame::{
    CapturePlan, Command, Frame, Header, Notification, Protocol, Response, Role, Sensor,
    UNSOLICITED_TASK_ID,
};
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};
use crate::persist::{FlushHook, FlushOutcome, PersistenceSink};
use crate::task::{RegistryConfig, TaskRegistry};

/// Something the application should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Completed { task_id: i32 },
    Errored { task_id: i32, message: String },
    Unsupported { task_id: i32, sensor: String },
    /// A data segment was handed to the persistence sink.
    SegmentSaved { task_id: i32, chunk_index: u32 },
    Reading { task_id: i32, values: Vec<String> },
    /// The device advertised (new) features for a sensor.
    Features { task_id: i32, sensor: Sensor },
    Proximity { message: String },
    Pong { task_id: i32 },
}

impl ControllerEvent {
    pub fn task_id(&self) -> Option<i32> {
        match self {
            ControllerEvent::Completed { task_id }
            | ControllerEvent::Errored { task_id, .. }
            | ControllerEvent::Unsupported { task_id, .. }
            | ControllerEvent::SegmentSaved { task_id, .. }
            | ControllerEvent::Reading { task_id, .. }
            | ControllerEvent::Features { task_id, .. }
            | ControllerEvent::Pong { task_id } => Some(*task_id),
            ControllerEvent::Proximity { .. } => None,
        }
    }

    /// The device will send nothing further for this task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControllerEvent::Completed { .. }
                | ControllerEvent::Errored { .. }
                | ControllerEvent::Unsupported { .. }
        )
    }
}

#[derive(Debug, Default)]
struct Liveness {
    last_pong: Option<Instant>,
    last_seen: Option<Instant>,
}

/// Controller role. Shared between the reader loop (which calls
/// [`Controller::handle_frame`]) and the application (which calls
/// [`Controller::send_command`]).
pub struct Controller {
    protocol: Arc<Protocol>,
    tasks: TaskRegistry,
    capabilities: Mutex<CapabilityRegistry>,
    outbox: Sender<Frame>,
    events: Sender<ControllerEvent>,
    liveness: Mutex<Liveness>,
}

impl Controller {
    pub fn new(
        protocol: Arc<Protocol>,
        sink: Arc<dyn PersistenceSink>,
        outbox: Sender<Frame>,
    ) -> (Self, Receiver<ControllerEvent>) {
        Self::with_config(protocol, sink, outbox, RegistryConfig::default())
    }

    pub fn with_config(
        protocol: Arc<Protocol>,
        sink: Arc<dyn PersistenceSink>,
        outbox: Sender<Frame>,
        config: RegistryConfig,
    ) -> (Self, Receiver<ControllerEvent>) {
        let (events, rx) = mpsc::channel();
        let controller = Self {
            protocol,
            tasks: TaskRegistry::with_config(sink, config),
            capabilities: Mutex::new(CapabilityRegistry::new()),
            outbox,
            events,
            liveness: Mutex::new(Liveness::default()),
        };
        (controller, rx)
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Snapshot of what the device has advertised so far.
    pub fn capabilities(&self) -> CapabilityRegistry {
        self.caps().clone()
    }

    pub fn last_pong(&self) -> Option<Instant> {
        self.live().last_pong
    }

    /// When any frame last arrived from the device.
    pub fn last_seen(&self) -> Option<Instant> {
        self.live().last_seen
    }

    /// Check a command locally, register it as a task, and queue its frame.
    ///
    /// Sensor and setting checks only apply once the device has advertised
    /// its features. Returns the new task id.
    pub fn send_command(&self, header: Header, args: Vec<String>) -> Result<i32> {
        if !Role::Controller.can_emit(header) {
            return Err(PeerError::InvalidArguments {
                header: header.alias(),
                expected: "a controller command".into(),
                found: args.len(),
            });
        }
        let arity = header.arity();
        if !arity.accepts(args.len()) {
            return Err(PeerError::InvalidArguments {
                header: header.alias(),
                expected: arity.to_string(),
                found: args.len(),
            });
        }
        if header.allocates_data() {
            CapturePlan::from_args(&args)?;
        }
        self.check_against_capabilities(header, &args)?;

        if header == Header::Ping {
            self.queue(Command::new(header, UNSOLICITED_TASK_ID, args).to_frame())?;
            return Ok(UNSOLICITED_TASK_ID);
        }

        let task_id = self.tasks.create_task(header, args.clone())?;
        if let Err(err) = self.queue(Command::new(header, task_id, args).to_frame()) {
            let _ = self.tasks.remove_task(task_id);
            return Err(err);
        }
        info!(task_id, header = %header, "command sent");
        Ok(task_id)
    }

    fn check_against_capabilities(&self, header: Header, args: &[String]) -> Result<()> {
        let caps = self.caps();
        if caps.sensors().next().is_none() {
            return Ok(());
        }

        let named = |index: usize| -> Result<Option<Sensor>> {
            match args.get(index) {
                None => Ok(None),
                Some(name) => self
                    .protocol
                    .sensor(name)
                    .filter(|sensor| caps.has_sensor(*sensor))
                    .map(Some)
                    .ok_or_else(|| PeerError::UnsupportedSensor(name.clone())),
            }
        };

        match header {
            Header::ModifySensor => {
                let Some(sensor) = named(0)? else {
                    return Ok(());
                };
                let pairs: Vec<(&str, &str)> = args
                    .get(1..)
                    .unwrap_or_default()
                    .chunks(2)
                    .filter_map(|pair| match pair {
                        [key, value] => Some((key.as_str(), value.as_str())),
                        _ => None,
                    })
                    .collect();
                caps.validate_all(sensor, &pairs)?;
            }
            Header::QueryFeatures => {
                named(0)?;
            }
            _ => {
                if let Some(sensor) = header.sensor() {
                    if !caps.has_sensor(sensor) {
                        return Err(PeerError::UnsupportedSensor(sensor.alias().into()));
                    }
                }
            }
        }
        Ok(())
    }

    fn queue(&self, frame: Frame) -> Result<()> {
        self.outbox.send(frame).map_err(|_| PeerError::Closed)
    }

    /// React to one frame from the device.
    pub fn handle_frame(&self, frame: Frame) -> Result<()> {
        self.live().last_seen = Some(Instant::now());

        // Responses reuse the low codes, so a device ping is the only
        // command-shaped frame a controller accepts.
        if frame.code == Header::Ping.code() {
            debug!(task_id = frame.task_id, "device ping");
            return Ok(());
        }

        match Response::from_frame(frame, &self.protocol)? {
            Response::Data {
                task_id,
                chunk_index,
                file_type,
                bytes,
            } => {
                debug!(task_id, chunk_index, size = bytes.len(), "data received");
                self.tasks.append_chunk(task_id, &file_type, &bytes)?;
            }
            Response::Notify {
                task_id,
                notification,
                message,
            } => self.on_notification(task_id, notification, message)?,
            Response::Features { task_id, report } => {
                let advertised = decode_report(&report, &self.protocol)
                    .map_err(sensorlink_caps::CapsError::from)?;
                let sensor = advertised.sensor();
                self.caps().replace(advertised);
                debug!(task_id, %sensor, "features registered");
                self.emit(ControllerEvent::Features { task_id, sensor });
            }
            Response::Reading { task_id, values } => {
                self.emit(ControllerEvent::Reading { task_id, values });
            }
            Response::Pong { task_id } => {
                self.live().last_pong = Some(Instant::now());
                self.emit(ControllerEvent::Pong { task_id });
            }
        }
        Ok(())
    }

    fn on_notification(
        &self,
        task_id: i32,
        notification: Notification,
        message: Option<String>,
    ) -> Result<()> {
        let message = message.unwrap_or_default();
        match notification {
            Notification::NextChunk => {
                let chunk_index = self.tasks.save_chunk(task_id)?;
                self.emit(ControllerEvent::SegmentSaved {
                    task_id,
                    chunk_index,
                });
            }
            Notification::Proximity => {
                self.emit(ControllerEvent::Proximity { message });
            }
            terminal => {
                let removed = self.tasks.remove_task(task_id);
                let event = match terminal {
                    Notification::Complete => ControllerEvent::Completed { task_id },
                    Notification::Unsupported => ControllerEvent::Unsupported {
                        task_id,
                        sensor: message,
                    },
                    _ => ControllerEvent::Errored { task_id, message },
                };
                match &removed {
                    Ok(false) => debug!(task_id, "terminal notification for unknown task"),
                    Ok(true) => debug!(task_id, notification = %terminal.as_char(), "task finished"),
                    Err(err) => warn!(task_id, error = %err, "final segment not persisted; task kept"),
                }
                self.emit(event);
                removed?;
            }
        }
        Ok(())
    }

    fn emit(&self, event: ControllerEvent) {
        if self.events.send(event).is_err() {
            debug!("controller events dropped; receiver gone");
        }
    }

    fn caps(&self) -> MutexGuard<'_, CapabilityRegistry> {
        match self.capabilities.lock() {
            Ok(caps) => caps,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn live(&self) -> MutexGuard<'_, Liveness> {
        match self.liveness.lock() {
            Ok(live) => live,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Follows background flushes for a controller whose sink is a
/// [`FlushWorker`](crate::persist::FlushWorker).
///
/// Create it before the worker, hand [`FlushTracker::hook`] to the worker,
/// then [`bind`](FlushTracker::bind) the controller. Confirmed segments are
/// counted on their task; failures are kept for the caller.
#[derive(Default)]
pub struct FlushTracker {
    controller: OnceLock<Weak<Controller>>,
    failures: Mutex<Vec<FlushOutcome>>,
}

impl FlushTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hook(self: &Arc<Self>) -> FlushHook {
        let tracker = Arc::clone(self);
        Box::new(move |outcome| tracker.record(outcome))
    }

    pub fn bind(&self, controller: &Arc<Controller>) {
        if self.controller.set(Arc::downgrade(controller)).is_err() {
            debug!("flush tracker already bound");
        }
    }

    fn record(&self, outcome: FlushOutcome) {
        if outcome.result.is_err() {
            self.failures().push(outcome);
            return;
        }
        if let Some(controller) = self.controller.get().and_then(Weak::upgrade) {
            controller.tasks().note_flushed(outcome.task_id);
        }
    }

    fn failures(&self) -> MutexGuard<'_, Vec<FlushOutcome>> {
        match self.failures.lock() {
            Ok(failures) => failures,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Failed flushes seen so far, oldest first.
    pub fn take_failures(&self) -> Vec<FlushOutcome> {
        std::mem::take(&mut *self.failures())
    }
}
