//! Device-side command dispatch.
//!
//! One actor owns the command queue, the sensor ownership table, and the
//! executors. Frames from the reader loop and events from running sensors
//! arrive on the same inbox, so everything is serialized without extra locks.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use bytes::Bytes;
use sensorlink_caps::{encode_report, CapabilityRegistry};
use sensorlink_frame::{
    CapturePlan, Command, Frame, Header, Notification, Protocol, Response, Role, Sensor,
    UNSOLICITED_TASK_ID,
};
use tracing::{debug, info, warn};

use crate::error::{DispatchError, TaskError};
use crate::executor::{SensorEvent, SensorEvents, SensorExecutor};
use crate::persist::PersistenceSink;
use crate::task::TaskRegistry;

/// Dispatcher tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Low-priority commands that may wait for a busy sensor.
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { queue_capacity: 10 }
    }
}

/// Everything the dispatch actor reacts to.
#[derive(Debug)]
pub enum DispatchEvent {
    Frame(Frame),
    Sensor(SensorEvent),
    Shutdown,
}

/// Cloneable sender into a dispatcher's inbox.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    tx: Sender<DispatchEvent>,
}

impl DispatchHandle {
    /// Create an inbox. Pass the receiver to [`Dispatcher::run`].
    pub fn channel() -> (Self, Receiver<DispatchEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    pub fn frame(&self, frame: Frame) -> Result<(), DispatchError> {
        self.tx
            .send(DispatchEvent::Frame(frame))
            .map_err(|_| DispatchError::Closed)
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(DispatchEvent::Shutdown);
    }

    pub fn sensor_events(&self) -> SensorEvents {
        SensorEvents::new(self.tx.clone())
    }
}

/// Sends finished segments to the controller as data frames.
struct RemoteSink {
    outbox: Sender<Frame>,
}

impl PersistenceSink for RemoteSink {
    fn flush(&self, task_id: i32, chunk_index: u32, file_type: &str, bytes: Bytes) -> io::Result<()> {
        let frame = Response::Data {
            task_id,
            chunk_index,
            file_type: file_type.to_string(),
            bytes,
        }
        .to_frame();
        self.outbox
            .send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "outbox closed"))
    }
}

/// Device-role command dispatcher.
pub struct Dispatcher {
    protocol: Arc<Protocol>,
    capabilities: CapabilityRegistry,
    executors: BTreeMap<Sensor, Box<dyn SensorExecutor>>,
    owners: HashMap<Sensor, i32>,
    tasks: TaskRegistry,
    queue: VecDeque<Command>,
    outbox: Sender<Frame>,
    events: SensorEvents,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        protocol: Arc<Protocol>,
        handle: &DispatchHandle,
        outbox: Sender<Frame>,
        config: DispatchConfig,
    ) -> Self {
        let tasks = TaskRegistry::new(Arc::new(RemoteSink {
            outbox: outbox.clone(),
        }));
        Self {
            protocol,
            capabilities: CapabilityRegistry::new(),
            executors: BTreeMap::new(),
            owners: HashMap::new(),
            tasks,
            queue: VecDeque::new(),
            outbox,
            events: handle.sensor_events(),
            config,
        }
    }

    /// Install an executor and advertise its features.
    pub fn add_executor(&mut self, executor: Box<dyn SensorExecutor>) {
        let sensor = executor.sensor();
        self.capabilities.replace(executor.features());
        debug!(%sensor, "executor installed");
        self.executors.insert(sensor, executor);
    }

    /// Replace advertised features for sensors that have an executor.
    pub fn override_features(&mut self, overrides: &CapabilityRegistry) {
        for capabilities in overrides.iter() {
            let sensor = capabilities.sensor();
            if self.executors.contains_key(&sensor) {
                self.capabilities.replace(capabilities.clone());
            } else {
                warn!(%sensor, "ignoring features for a sensor without an executor");
            }
        }
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Process inbox events until shutdown or until every sender is gone.
    pub fn run(mut self, inbox: Receiver<DispatchEvent>) {
        info!(sensors = self.executors.len(), "dispatcher running");
        for event in inbox {
            if !self.handle(event) {
                break;
            }
        }
        for executor in self.executors.values_mut() {
            if executor.is_busy() {
                executor.kill();
            }
        }
        info!("dispatcher stopped");
    }

    /// React to one event. Returns false on shutdown.
    pub fn handle(&mut self, event: DispatchEvent) -> bool {
        match event {
            DispatchEvent::Frame(frame) => self.on_frame(frame),
            DispatchEvent::Sensor(event) => self.on_sensor_event(event),
            DispatchEvent::Shutdown => return false,
        }
        true
    }

    fn on_frame(&mut self, frame: Frame) {
        let task_id = frame.task_id;
        let command = match Command::from_frame(frame, &self.protocol) {
            Ok(command) => command,
            Err(err) => {
                warn!(error = %err, "rejecting command frame");
                if let Some(task_id) = err.task_id() {
                    self.send(Response::errored(task_id, err.to_string()));
                }
                return;
            }
        };

        if !Role::Device.can_execute(command.header) {
            self.send(Response::errored(task_id, "not executable by a device"));
            return;
        }

        if let Err(err) = self.submit(command) {
            warn!(task_id, error = %err, "command rejected");
            self.send(Response::errored(task_id, err.to_string()));
        }
    }

    /// High-priority commands run at once; the rest wait their turn.
    pub fn submit(&mut self, command: Command) -> Result<(), DispatchError> {
        debug!(task_id = command.task_id, header = %command.header, "command received");
        if command.header.is_high_priority() {
            self.execute(command);
            return Ok(());
        }

        if self.queue.len() >= self.config.queue_capacity {
            return Err(DispatchError::QueueFull {
                capacity: self.config.queue_capacity,
            });
        }
        self.queue.push_back(command);
        self.execute_next();
        Ok(())
    }

    /// Run queued commands from the head while their sensors are free.
    pub fn execute_next(&mut self) {
        loop {
            let Some(head) = self.queue.front() else {
                return;
            };
            if let Some(sensor) = head.header.sensor() {
                if !self.sensor_available(sensor) {
                    return;
                }
            }
            let Some(command) = self.queue.pop_front() else {
                return;
            };
            self.execute(command);
        }
    }

    fn sensor_available(&self, sensor: Sensor) -> bool {
        !self.owners.contains_key(&sensor)
            && self
                .executors
                .get(&sensor)
                .is_none_or(|executor| !executor.is_busy())
    }

    fn execute(&mut self, command: Command) {
        let task_id = command.task_id;
        match command.header {
            Header::NoOp => self.send(Response::complete(task_id)),
            Header::TakePicture
            | Header::RecordAudio
            | Header::ListenEnvironment
            | Header::GetLocation => self.start_sensor(command),
            Header::KillTask => self.kill_task(&command),
            Header::KillAll => self.kill_all(task_id),
            Header::ModifySensor => self.modify(&command),
            Header::QueryFeatures => self.query_features(&command),
            Header::Ping => self.send(Response::Pong { task_id }),
        }
    }

    fn start_sensor(&mut self, command: Command) {
        let task_id = command.task_id;
        let Some(sensor) = command.header.sensor() else {
            return;
        };
        if !self.capabilities.has_sensor(sensor) || !self.executors.contains_key(&sensor) {
            self.send(Response::unsupported(task_id, sensor.alias()));
            return;
        }
        if command.header.allocates_data() {
            if let Err(err) = CapturePlan::from_args(&command.args) {
                self.send(Response::errored(task_id, err.to_string()));
                return;
            }
        }
        match self.tasks.register_task(command.clone()) {
            Ok(()) => {}
            // the id's terminal notification belongs to the running task
            Err(TaskError::Duplicate(_)) => {
                warn!(task_id, header = %command.header, "duplicate task id; command dropped");
                return;
            }
            Err(err) => {
                self.send(Response::errored(task_id, err.to_string()));
                return;
            }
        }

        let events = self.events.clone();
        let started = match self.executors.get_mut(&sensor) {
            Some(executor) => executor.start(task_id, &command.args, events),
            None => return,
        };
        match started {
            Ok(()) => {
                info!(task_id, %sensor, header = %command.header, "sensor task started");
                self.owners.insert(sensor, task_id);
            }
            Err(err) => {
                warn!(task_id, %sensor, error = %err, "sensor refused task");
                self.drop_task(task_id);
                self.send(Response::errored(task_id, err.to_string()));
            }
        }
    }

    fn kill_task(&mut self, command: &Command) {
        let raw = command.args.first().map(String::as_str).unwrap_or_default();
        let Ok(target) = raw.trim().parse::<i32>() else {
            self.send(Response::errored(
                command.task_id,
                format!("invalid task id {raw:?}"),
            ));
            return;
        };

        if let Some(index) = self.queue.iter().position(|queued| queued.task_id == target) {
            self.queue.remove(index);
            self.send(Response::errored(target, "cancelled"));
            self.send(Response::complete(command.task_id));
            return;
        }

        if !self.tasks.has_task(target) {
            self.send(Response::errored(
                command.task_id,
                format!("no live task {target}"),
            ));
            return;
        }

        let owned: Vec<Sensor> = self
            .owners
            .iter()
            .filter(|(_, owner)| **owner == target)
            .map(|(sensor, _)| *sensor)
            .collect();
        for sensor in owned {
            self.owners.remove(&sensor);
            if let Some(executor) = self.executors.get_mut(&sensor) {
                executor.kill();
            }
        }
        self.drop_task(target);
        info!(task_id = target, "task killed");
        self.send(Response::errored(target, "killed"));
        self.send(Response::complete(command.task_id));
        self.execute_next();
    }

    fn kill_all(&mut self, task_id: i32) {
        for (sensor, _) in self.owners.drain() {
            if let Some(executor) = self.executors.get_mut(&sensor) {
                executor.kill();
            }
        }
        for live in self.tasks.live_ids() {
            self.drop_task(live);
            self.send(Response::errored(live, "killed"));
        }
        let cancelled: Vec<i32> = self.queue.drain(..).map(|queued| queued.task_id).collect();
        for queued in cancelled {
            self.send(Response::errored(queued, "cancelled"));
        }
        info!("all tasks killed");
        self.send(Response::complete(task_id));
    }

    fn modify(&mut self, command: &Command) {
        let task_id = command.task_id;
        let name = command.args.first().cloned().unwrap_or_default();
        let Some(sensor) = self
            .protocol
            .sensor(&name)
            .filter(|sensor| self.capabilities.has_sensor(*sensor))
        else {
            self.send(Response::unsupported(task_id, name));
            return;
        };

        let pairs: Vec<(&str, &str)> = command
            .args
            .get(1..)
            .unwrap_or_default()
            .chunks(2)
            .filter_map(|pair| match pair {
                [key, value] => Some((key.as_str(), value.as_str())),
                _ => None,
            })
            .collect();
        let validated = match self.capabilities.validate_all(sensor, &pairs) {
            Ok(validated) => validated,
            Err(err) => {
                self.send(Response::errored(task_id, err.to_string()));
                return;
            }
        };

        let refused = self.executors.get_mut(&sensor).and_then(|executor| {
            validated
                .iter()
                .find_map(|(key, value)| executor.modify(key, value).err())
        });
        if let Some(err) = refused {
            self.send(Response::errored(task_id, err.to_string()));
            return;
        }
        self.capabilities.apply(sensor, &validated);
        debug!(task_id, %sensor, settings = validated.len(), "sensor modified");
        self.send(Response::complete(task_id));
    }

    fn query_features(&mut self, command: &Command) {
        let task_id = command.task_id;
        let reports: Vec<Vec<String>> = match command.args.first() {
            Some(name) => {
                let Some(capabilities) = self
                    .protocol
                    .sensor(name)
                    .and_then(|sensor| self.capabilities.capabilities(sensor))
                else {
                    self.send(Response::unsupported(task_id, name.clone()));
                    return;
                };
                vec![encode_report(capabilities)]
            }
            None => self.capabilities.iter().map(encode_report).collect(),
        };
        for report in reports {
            self.send(Response::Features { task_id, report });
        }
        self.send(Response::complete(task_id));
    }

    fn on_sensor_event(&mut self, event: SensorEvent) {
        if let Some(task_id) = event.task_id() {
            if !self.tasks.has_task(task_id) {
                debug!(task_id, "dropping event for finished task");
                return;
            }
        }

        match event {
            SensorEvent::Chunk {
                task_id,
                file_type,
                bytes,
            } => {
                if let Err(err) = self.tasks.append_chunk(task_id, &file_type, &bytes) {
                    warn!(task_id, error = %err, "chunk dropped");
                }
            }
            SensorEvent::SaveChunk { task_id } => match self.tasks.save_chunk(task_id) {
                Ok(_) => self.send(Response::next_chunk(task_id)),
                Err(err) => warn!(task_id, error = %err, "save chunk failed"),
            },
            SensorEvent::Reading { task_id, values } => {
                self.send(Response::Reading { task_id, values })
            }
            SensorEvent::Completed { task_id } => self.finish(task_id, Response::complete(task_id)),
            SensorEvent::Failed { task_id, message } => {
                self.finish(task_id, Response::errored(task_id, message))
            }
            SensorEvent::Proximity { message } => self.send(Response::notify(
                UNSOLICITED_TASK_ID,
                Notification::Proximity,
                Some(message),
            )),
        }
    }

    fn finish(&mut self, task_id: i32, terminal: Response) {
        let _ = self.tasks.mark_completed(task_id);
        self.owners.retain(|_, owner| *owner != task_id);
        let terminal = match self.tasks.remove_task(task_id) {
            Ok(_) => terminal,
            Err(err) => {
                warn!(task_id, error = %err, "final segment lost");
                Response::errored(task_id, err.to_string())
            }
        };
        debug!(task_id, "task finished");
        self.send(terminal);
        self.execute_next();
    }

    fn drop_task(&self, task_id: i32) {
        if let Err(err) = self.tasks.remove_task(task_id) {
            warn!(task_id, error = %err, "buffered data lost");
        }
    }

    fn send(&self, response: Response) {
        if self.outbox.send(response.to_frame()).is_err() {
            warn!(task_id = response.task_id(), "outbox closed; response dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use sensorlink_caps::{Capabilities, DataType, Feature, Limiter};

    use super::*;
    use crate::error::ExecutorError;

    #[derive(Clone, Default)]
    struct Tally {
        busy: Arc<AtomicBool>,
        started: Arc<Mutex<Vec<i32>>>,
        killed: Arc<AtomicUsize>,
        settings: Arc<Mutex<Vec<(String, String)>>>,
    }

    struct ManualExecutor {
        tally: Tally,
    }

    impl SensorExecutor for ManualExecutor {
        fn sensor(&self) -> Sensor {
            Sensor::Camera
        }

        fn features(&self) -> Capabilities {
            let mut caps = Capabilities::new(Sensor::Camera);
            caps.upsert(Feature::new(
                "flash",
                DataType::String,
                Limiter::Set,
                vec!["Auto".into(), "On".into(), "Off".into()],
            ));
            caps.upsert(Feature::new(
                "zoom",
                DataType::Integer,
                Limiter::Range,
                vec!["0".into(), "10".into()],
            ));
            caps
        }

        fn start(
            &mut self,
            task_id: i32,
            _args: &[String],
            _events: SensorEvents,
        ) -> Result<(), ExecutorError> {
            self.tally.busy.store(true, Ordering::SeqCst);
            self.tally.started.lock().unwrap().push(task_id);
            Ok(())
        }

        fn modify(&mut self, key: &str, value: &str) -> Result<(), ExecutorError> {
            self.tally
                .settings
                .lock()
                .unwrap()
                .push((key.to_string(), value.to_string()));
            Ok(())
        }

        fn kill(&mut self) {
            self.tally.busy.store(false, Ordering::SeqCst);
            self.tally.killed.fetch_add(1, Ordering::SeqCst);
        }

        fn is_busy(&self) -> bool {
            self.tally.busy.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        outbox: Receiver<Frame>,
        tally: Tally,
        protocol: Arc<Protocol>,
    }

    impl Harness {
        fn new(capacity: usize) -> Self {
            let protocol = Arc::new(Protocol::standard());
            let (handle, _inbox) = DispatchHandle::channel();
            let (tx, outbox) = mpsc::channel();
            let mut dispatcher = Dispatcher::new(
                Arc::clone(&protocol),
                &handle,
                tx,
                DispatchConfig {
                    queue_capacity: capacity,
                },
            );
            let tally = Tally::default();
            dispatcher.add_executor(Box::new(ManualExecutor {
                tally: tally.clone(),
            }));
            Self {
                dispatcher,
                outbox,
                tally,
                protocol,
            }
        }

        fn submit(&mut self, header: Header, task_id: i32, args: &[&str]) {
            let frame = Command::new(
                header,
                task_id,
                args.iter().map(|a| a.to_string()).collect(),
            )
            .to_frame();
            assert!(self.dispatcher.handle(DispatchEvent::Frame(frame)));
        }

        fn sensor(&mut self, event: SensorEvent) {
            assert!(self.dispatcher.handle(DispatchEvent::Sensor(event)));
        }

        fn complete_running(&mut self, task_id: i32) {
            self.tally.busy.store(false, Ordering::SeqCst);
            self.sensor(SensorEvent::Completed { task_id });
        }

        fn responses(&self) -> Vec<Response> {
            self.outbox
                .try_iter()
                .map(|frame| Response::from_frame(frame, &self.protocol).unwrap())
                .collect()
        }

        fn started(&self) -> Vec<i32> {
            self.tally.started.lock().unwrap().clone()
        }
    }

    fn is_features(response: &Response, id: i32) -> bool {
        matches!(response, Response::Features { task_id, .. } if *task_id == id)
    }

    #[test]
    fn high_priority_overtakes_waiting_command() {
        let mut h = Harness::new(10);
        h.submit(Header::TakePicture, 1, &["3000", "-1", "1"]);
        h.submit(Header::TakePicture, 2, &[]);
        h.submit(Header::QueryFeatures, 3, &["camera"]);

        let responses = h.responses();
        assert_eq!(responses.len(), 2);
        assert!(is_features(&responses[0], 3));
        assert_eq!(responses[1], Response::complete(3));
        assert_eq!(h.started(), [1]);
        assert_eq!(h.dispatcher.queue_len(), 1);

        h.complete_running(1);
        assert_eq!(h.responses(), [Response::complete(1)]);
        assert_eq!(h.started(), [1, 2]);
    }

    #[test]
    fn unsupported_sensor_is_reported() {
        let mut h = Harness::new(10);
        h.submit(Header::RecordAudio, 4, &[]);
        h.submit(Header::GetLocation, 5, &[]);
        assert_eq!(
            h.responses(),
            [
                Response::unsupported(4, "microphone"),
                Response::unsupported(5, "location"),
            ]
        );
        assert!(h.dispatcher.tasks().is_empty());
    }

    #[test]
    fn modify_validates_everything_first() {
        let mut h = Harness::new(10);
        h.submit(Header::ModifySensor, 6, &["camera", "zoom", "5", "flash", "strobe"]);
        assert!(matches!(
            h.responses().as_slice(),
            [Response::Notify {
                notification: Notification::Errored,
                ..
            }]
        ));
        assert!(h.tally.settings.lock().unwrap().is_empty());

        h.submit(Header::ModifySensor, 7, &["CAMERA", "ZOOM", "5", "flash", "auto"]);
        assert_eq!(h.responses(), [Response::complete(7)]);
        assert_eq!(
            *h.tally.settings.lock().unwrap(),
            [
                ("zoom".to_string(), "5".to_string()),
                ("flash".to_string(), "Auto".to_string())
            ]
        );
        let caps = h.dispatcher.capabilities().capabilities(Sensor::Camera).unwrap();
        assert_eq!(caps.get("flash").unwrap().current, "Auto");

        h.submit(Header::ModifySensor, 8, &["microphone", "gain", "1"]);
        assert_eq!(h.responses(), [Response::unsupported(8, "microphone")]);
    }

    #[test]
    fn kill_task_stops_owner_and_frees_sensor() {
        let mut h = Harness::new(10);
        h.submit(Header::TakePicture, 10, &[]);
        h.submit(Header::TakePicture, 11, &[]);
        h.submit(Header::KillTask, 12, &["10"]);

        assert_eq!(
            h.responses(),
            [Response::errored(10, "killed"), Response::complete(12)]
        );
        assert_eq!(h.tally.killed.load(Ordering::SeqCst), 1);
        assert_eq!(h.started(), [10, 11]);

        h.submit(Header::KillTask, 13, &["10"]);
        assert!(matches!(
            h.responses().as_slice(),
            [Response::Notify { task_id: 13, notification: Notification::Errored, .. }]
        ));
    }

    #[test]
    fn kill_all_clears_everything() {
        let mut h = Harness::new(10);
        h.submit(Header::TakePicture, 20, &[]);
        h.submit(Header::TakePicture, 21, &[]);
        h.submit(Header::TakePicture, 22, &[]);
        h.submit(Header::KillAll, 23, &[]);

        assert_eq!(
            h.responses(),
            [
                Response::errored(20, "killed"),
                Response::errored(21, "cancelled"),
                Response::errored(22, "cancelled"),
                Response::complete(23),
            ]
        );
        assert!(h.dispatcher.tasks().is_empty());
        assert_eq!(h.dispatcher.queue_len(), 0);
    }

    #[test]
    fn full_queue_rejects_with_error() {
        let mut h = Harness::new(1);
        h.submit(Header::TakePicture, 30, &[]);
        h.submit(Header::TakePicture, 31, &[]);
        h.submit(Header::TakePicture, 32, &[]);

        let full = DispatchError::QueueFull { capacity: 1 }.to_string();
        assert_eq!(h.responses(), [Response::errored(32, full)]);
        assert_eq!(h.dispatcher.queue_len(), 1);
    }

    #[test]
    fn kill_task_cancels_queued_command() {
        let mut h = Harness::new(10);
        h.submit(Header::TakePicture, 70, &[]);
        h.submit(Header::TakePicture, 71, &[]);
        h.submit(Header::KillTask, 72, &["71"]);

        assert_eq!(
            h.responses(),
            [Response::errored(71, "cancelled"), Response::complete(72)]
        );
        assert_eq!(h.dispatcher.queue_len(), 0);
        assert_eq!(h.tally.killed.load(Ordering::SeqCst), 0);

        h.complete_running(70);
        assert_eq!(h.responses(), [Response::complete(70)]);
        assert_eq!(h.started(), [70]);
    }

    #[test]
    fn duplicate_task_id_is_dropped_silently() {
        let mut h = Harness::new(10);
        h.dispatcher
            .tasks()
            .register_task(Command::new(Header::TakePicture, 90, Vec::new()))
            .unwrap();
        h.submit(Header::TakePicture, 90, &[]);

        assert!(h.responses().is_empty());
        assert!(h.started().is_empty());
        assert!(h.dispatcher.tasks().has_task(90));
    }

    #[test]
    fn rejected_frames_still_get_an_answer() {
        let mut h = Harness::new(10);
        assert!(h.dispatcher.handle(DispatchEvent::Frame(Frame::new(40, 77))));
        assert!(h
            .dispatcher
            .handle(DispatchEvent::Frame(Frame::new(41, 4).with_args(["extra"]))));
        h.submit(Header::TakePicture, 42, &["100", "-1", "-1"]);

        let ids: Vec<i32> = h.responses().iter().map(Response::task_id).collect();
        assert_eq!(ids, [40, 41, 42]);
        assert!(h.started().is_empty());
    }

    #[test]
    fn ping_and_noop() {
        let mut h = Harness::new(10);
        h.submit(Header::Ping, 0, &[]);
        h.submit(Header::NoOp, 50, &["anything"]);
        assert_eq!(
            h.responses(),
            [Response::Pong { task_id: 0 }, Response::complete(50)]
        );
    }

    #[test]
    fn chunks_become_data_frames_in_order() {
        let mut h = Harness::new(10);
        h.submit(Header::TakePicture, 60, &["10", "-1", "2"]);
        h.sensor(SensorEvent::Chunk {
            task_id: 60,
            file_type: "jpg".into(),
            bytes: Bytes::from_static(b"one"),
        });
        h.sensor(SensorEvent::SaveChunk { task_id: 60 });
        h.sensor(SensorEvent::Chunk {
            task_id: 60,
            file_type: "jpg".into(),
            bytes: Bytes::from_static(b"two"),
        });
        h.complete_running(60);
        h.sensor(SensorEvent::Completed { task_id: 60 });

        let responses = h.responses();
        assert_eq!(responses.len(), 4);
        assert!(matches!(
            &responses[0],
            Response::Data { chunk_index: 0, bytes, .. } if bytes.as_ref() == b"one"
        ));
        assert_eq!(responses[1], Response::next_chunk(60));
        assert!(matches!(
            &responses[2],
            Response::Data { chunk_index: 1, bytes, .. } if bytes.as_ref() == b"two"
        ));
        assert_eq!(responses[3], Response::complete(60));
    }

    #[test]
    fn proximity_is_unsolicited() {
        let mut h = Harness::new(10);
        h.sensor(SensorEvent::Proximity {
            message: "object at 0.4m".into(),
        });
        assert_eq!(
            h.responses(),
            [Response::notify(
                UNSOLICITED_TASK_ID,
                Notification::Proximity,
                Some("object at 0.4m".into())
            )]
        );
    }

    #[test]
    fn shutdown_stops_handling() {
        let mut h = Harness::new(10);
        assert!(!h.dispatcher.handle(DispatchEvent::Shutdown));
    }
}
