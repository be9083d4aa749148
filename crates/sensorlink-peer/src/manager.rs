//! Connection lifecycle: search, reader loop, outbound pump, keep-alive.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use sensorlink_frame::{
    Frame, FrameConfig, FrameError, FrameReader, FrameWriter, Header, Role, UNSOLICITED_TASK_ID,
};
use sensorlink_transport::{Connection, IpcStream, Link, TransportError};
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};

const PAUSE_SLICE: Duration = Duration::from_millis(25);
const PUMP_POLL: Duration = Duration::from_millis(100);

/// Connection manager tuning.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Keep-alive period used by [`Pinger`].
    pub ping_interval: Duration,
    /// Pause between failed search attempts and between outbound retries.
    pub retry_backoff: Duration,
    /// Limits applied to every frame read or written.
    pub frame: FrameConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(250),
            frame: FrameConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Searching,
    Connected,
    Reconnecting,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Searching => "searching",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

type FrameHandler = Arc<dyn Fn(Frame) + Send + Sync>;

struct Shared {
    link: Arc<dyn Link>,
    role: Role,
    config: ManagerConfig,
    state: Mutex<ConnectionState>,
    state_changed: Condvar,
    connection: Mutex<Option<Arc<Connection>>>,
    writer: Mutex<Option<FrameWriter<IpcStream>>>,
    handler: Mutex<Option<FrameHandler>>,
    generation: AtomicU64,
    /// Connection the reader loop is currently serving.
    reading: Mutex<Option<Arc<Connection>>>,
    cancelled: AtomicBool,
    search: Mutex<Option<JoinHandle<()>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = lock(&self.state);
        if *state == ConnectionState::Closed || *state == next {
            return;
        }
        let from = *state;
        debug!(from = %from, to = %next, link = self.link.name(), "connection state");
        *state = next;
        self.state_changed.notify_all();
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
            && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Sleep for `total`, waking early once the search is superseded.
    fn pause(&self, generation: u64, total: Duration) {
        let deadline = Instant::now() + total;
        while self.is_current(generation) {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep(PAUSE_SLICE.min(deadline - now));
        }
    }

    fn establish(&self) -> std::result::Result<Connection, TransportError> {
        match self.role {
            Role::Device => self.link.listen(),
            Role::Controller => {
                let mut last = TransportError::NoTargets(self.link.name());
                for target in self.link.search()? {
                    match self.link.connect(&target) {
                        Ok(connection) => return Ok(connection),
                        Err(err) => {
                            debug!(%target, error = %err, "dial failed");
                            last = err;
                        }
                    }
                }
                Err(last)
            }
        }
    }

    fn install(self: &Arc<Self>, connection: Connection) -> Result<()> {
        let writer = FrameWriter::with_config_ipc(connection.writer()?, self.config.frame.clone())?;
        let connection = Arc::new(connection);
        if let Some(previous) = lock(&self.connection).replace(Arc::clone(&connection)) {
            previous.close();
        }
        *lock(&self.writer) = Some(writer);
        info!(peer = connection.label(), link = self.link.name(), "connection established");
        self.set_state(ConnectionState::Connected);
        self.start_reader()
    }

    fn start_reader(self: &Arc<Self>) -> Result<()> {
        let Some(connection) = lock(&self.connection).clone() else {
            return Err(PeerError::NotConnected);
        };
        let mut reading = lock(&self.reading);
        if reading
            .as_ref()
            .is_some_and(|served| Arc::ptr_eq(served, &connection))
        {
            return Ok(());
        }
        let stream = connection.reader()?;
        let mut reader = FrameReader::with_config_ipc(stream, self.config.frame.clone())?;

        let served = Arc::clone(&connection);
        let shared = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("sensorlink-reader".into())
            .spawn(move || {
                let reason = loop {
                    match reader.read_frame() {
                        Ok(frame) => shared.deliver(frame),
                        Err(err) => break err,
                    }
                };
                match reason {
                    FrameError::ConnectionClosed => debug!(peer = connection.label(), "peer hung up"),
                    err => warn!(peer = connection.label(), error = %err, "reader stopped"),
                }
                {
                    let mut reading = lock(&shared.reading);
                    if reading
                        .as_ref()
                        .is_some_and(|served| Arc::ptr_eq(served, &connection))
                    {
                        *reading = None;
                    }
                }
                shared.lost(&connection);
            });
        match spawned {
            Ok(_) => {
                *reading = Some(served);
                Ok(())
            }
            Err(err) => Err(TransportError::Io(err).into()),
        }
    }

    fn deliver(&self, frame: Frame) {
        let handler = lock(&self.handler).clone();
        match handler {
            Some(handler) => handler(frame),
            None => debug!(task_id = frame.task_id, code = frame.code, "no handler; frame dropped"),
        }
    }

    /// Forget `connection` if it is still the installed one.
    fn lost(&self, connection: &Arc<Connection>) {
        let mut current = lock(&self.connection);
        if !current
            .as_ref()
            .is_some_and(|installed| Arc::ptr_eq(installed, connection))
        {
            return;
        }
        *current = None;
        drop(current);
        connection.mark_lost();
        *lock(&self.writer) = None;
        if !self.cancelled.load(Ordering::SeqCst) {
            warn!(peer = connection.label(), "connection lost");
            self.set_state(ConnectionState::Reconnecting);
        }
    }

    fn write(&self, frame: &Frame) -> Result<()> {
        let mut writer = lock(&self.writer);
        let Some(active) = writer.as_mut() else {
            return Err(PeerError::NotConnected);
        };
        if let Err(err) = active.write_frame(frame) {
            *writer = None;
            drop(writer);
            if let Some(connection) = lock(&self.connection).clone() {
                connection.close();
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Cancel and join the running search thread. Cancelling repeats until the
    /// thread exits since a listen that starts late clears the link's flag.
    fn stop_search(&self) {
        let Some(previous) = lock(&self.search).take() else {
            return;
        };
        if previous.thread().id() == std::thread::current().id() {
            return;
        }
        while !previous.is_finished() {
            self.link.cancel_search();
            std::thread::sleep(PAUSE_SLICE);
        }
        let _ = previous.join();
    }

    fn has_connection(&self) -> bool {
        lock(&self.connection)
            .as_ref()
            .is_some_and(|connection| connection.is_connected())
    }
}

/// Owns one link and the threads that keep it usable.
///
/// Cloning is cheap; clones share the same connection. Call
/// [`ConnectionManager::cancel`] to stop every background thread.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
    outbox: Sender<Frame>,
}

impl ConnectionManager {
    pub fn new(link: Arc<dyn Link>, role: Role, config: ManagerConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            link,
            role,
            config,
            state: Mutex::new(ConnectionState::Idle),
            state_changed: Condvar::new(),
            connection: Mutex::new(None),
            writer: Mutex::new(None),
            handler: Mutex::new(None),
            generation: AtomicU64::new(0),
            reading: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            search: Mutex::new(None),
            pump: Mutex::new(None),
        });

        let (outbox, pending) = mpsc::channel();
        let pump_shared = Arc::clone(&shared);
        let pump = std::thread::Builder::new()
            .name("sensorlink-pump".into())
            .spawn(move || pump_outbound(&pump_shared, &pending))
            .map_err(TransportError::Io)?;
        *lock(&shared.pump) = Some(pump);

        Ok(Self { shared, outbox })
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn has_connection(&self) -> bool {
        self.shared.has_connection()
    }

    /// Install the callback the reader loop delivers inbound frames to.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(Frame) + Send + Sync + 'static,
    {
        *lock(&self.shared.handler) = Some(Arc::new(handler));
    }

    /// Start searching on a background thread, replacing any search in
    /// progress. The device role listens; the controller role dials.
    ///
    /// Returns immediately. A successful search installs the connection and
    /// starts the reader loop.
    pub fn find_connection(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.cancelled.load(Ordering::SeqCst) {
            return Err(PeerError::Closed);
        }
        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        shared.stop_search();
        shared.set_state(ConnectionState::Searching);

        let worker = Arc::clone(shared);
        let handle = std::thread::Builder::new()
            .name("sensorlink-search".into())
            .spawn(move || search(&worker, generation))
            .map_err(TransportError::Io)?;
        *lock(&shared.search) = Some(handle);
        Ok(())
    }

    /// Start the reader loop on the installed connection. Does nothing if
    /// one is already running.
    pub fn start_data_transfer(&self) -> Result<()> {
        self.shared.start_reader()
    }

    /// Queue a frame. Frames queued while disconnected wait for the next
    /// connection.
    pub fn send(&self, frame: Frame) -> Result<()> {
        if self.shared.cancelled.load(Ordering::SeqCst) {
            return Err(PeerError::Closed);
        }
        self.outbox.send(frame).map_err(|_| PeerError::Closed)
    }

    /// Sender feeding the outbound pump, for the dispatcher or controller.
    pub fn outbox(&self) -> Sender<Frame> {
        self.outbox.clone()
    }

    /// Write a keep-alive directly, bypassing the queue so a dead link shows
    /// up as an error.
    pub fn ping(&self) -> Result<()> {
        self.shared
            .write(&Frame::new(UNSOLICITED_TASK_ID, Header::Ping.code()))
    }

    /// Block until connected, the manager closes, or `timeout` passes.
    pub fn wait_connected(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.shared.state);
        loop {
            match *state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Closed => return Err(PeerError::Closed),
                _ => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(PeerError::Timeout(timeout));
            }
            state = match self.shared.state_changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Stop searching, close the connection, and stop the outbound pump.
    pub fn cancel(&self) {
        let shared = &self.shared;
        if shared.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        shared.stop_search();
        if let Some(connection) = lock(&shared.connection).take() {
            connection.close();
        }
        *lock(&shared.writer) = None;
        shared.set_state(ConnectionState::Closed);

        let pump = lock(&shared.pump).take();
        if let Some(pump) = pump.filter(|h| h.thread().id() != std::thread::current().id()) {
            let _ = pump.join();
        }
        info!(link = shared.link.name(), "connection manager closed");
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("link", &self.shared.link.name())
            .field("role", &self.shared.role)
            .field("state", &self.state())
            .finish()
    }
}

fn search(shared: &Arc<Shared>, generation: u64) {
    let mut attempt = 0u32;
    while shared.is_current(generation) {
        attempt += 1;
        match shared.establish() {
            Ok(connection) => {
                if !shared.is_current(generation) {
                    connection.close();
                    return;
                }
                if let Err(err) = shared.install(connection) {
                    warn!(error = %err, "failed to start connection");
                    shared.pause(generation, shared.config.retry_backoff);
                    continue;
                }
                return;
            }
            Err(err) if err.is_cancelled() => {
                debug!(generation, "search cancelled");
                return;
            }
            Err(err) => {
                if attempt == 1 {
                    debug!(link = shared.link.name(), error = %err, "no peer yet; retrying");
                }
                shared.pause(generation, shared.config.retry_backoff);
            }
        }
    }
}

fn pump_outbound(shared: &Shared, pending: &Receiver<Frame>) {
    while !shared.cancelled.load(Ordering::SeqCst) {
        let frame = match pending.recv_timeout(PUMP_POLL) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        };
        loop {
            if shared.cancelled.load(Ordering::SeqCst) {
                debug!(task_id = frame.task_id, "manager closed; frame discarded");
                return;
            }
            match shared.write(&frame) {
                Ok(()) => break,
                Err(PeerError::NotConnected) => {}
                Err(err) => debug!(task_id = frame.task_id, error = %err, "write failed; will retry"),
            }
            let state = lock(&shared.state);
            let _ = shared
                .state_changed
                .wait_timeout(state, shared.config.retry_backoff);
        }
    }
}

/// Sends a keep-alive every `ping_interval` and restarts the search when the
/// link is missing or the ping fails.
pub struct Pinger {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Pinger {
    pub fn spawn(manager: ConnectionManager) -> Result<Self> {
        let interval = manager.config().ping_interval;
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("sensorlink-pinger".into())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => return,
                }
                if manager.state() == ConnectionState::Searching {
                    continue;
                }
                let healthy = manager.has_connection() && manager.ping().is_ok();
                if !healthy {
                    debug!(state = %manager.state(), "keep-alive failed; searching");
                    if let Err(PeerError::Closed) = manager.find_connection() {
                        return;
                    }
                }
            })
            .map_err(TransportError::Io)?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Pinger {
    fn drop(&mut self) {
        self.halt();
    }
}
