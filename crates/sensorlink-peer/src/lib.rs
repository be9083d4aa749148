//! Peer runtime for sensorlink.
//!
//! Tracks tasks, dispatches commands to sensor executors on the device side,
//! reassembles responses on the controller side, and keeps the link alive.

pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod manager;
pub mod persist;
pub mod simulated;
pub mod task;

pub use controller::{Controller, ControllerEvent, FlushTracker};
pub use dispatcher::{DispatchConfig, DispatchEvent, DispatchHandle, Dispatcher};
pub use error::{DispatchError, ExecutorError, PeerError, Result, TaskError};
pub use executor::{SensorEvent, SensorEvents, SensorExecutor};
pub use manager::{ConnectionManager, ConnectionState, ManagerConfig, Pinger};
pub use persist::{
    DirectorySink, FlushHook, FlushOutcome, FlushWorker, FlushedSegment, MemorySink,
    PersistenceSink,
};
pub use simulated::SimulatedSensor;
pub use task::{IdSource, RegistryConfig, TaskInfo, TaskRegistry, TaskState};
