use std::time::Duration;

/// Errors from the task registry.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// No live task has this id.
    #[error("no live task {0}")]
    NotFound(i32),

    /// The task's command does not accumulate data.
    #[error("task {0} has no data map")]
    NoDataMap(i32),

    /// A task with this id is already live.
    #[error("task {0} is already live")]
    Duplicate(i32),

    /// Every usable id is taken by a live task.
    #[error("task id space exhausted")]
    IdSpaceExhausted,

    /// The persistence sink rejected a segment.
    #[error("failed to persist chunk {chunk_index} of task {task_id}: {source}")]
    Persist {
        task_id: i32,
        chunk_index: u32,
        #[source]
        source: std::io::Error,
    },
}

/// Errors submitting work to the command dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("command queue full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("dispatcher stopped")]
    Closed,
}

/// A sensor executor refused or failed an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ExecutorError(pub String);

impl ExecutorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] sensorlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] sensorlink_frame::FrameError),

    #[error(transparent)]
    Command(#[from] sensorlink_frame::CommandError),

    #[error("invalid capture arguments: {0}")]
    Plan(#[from] sensorlink_frame::PlanError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("rejected setting: {0}")]
    Validation(#[from] sensorlink_caps::ValidationError),

    #[error(transparent)]
    Caps(#[from] sensorlink_caps::CapsError),

    /// The peer does not carry the sensor a command needs.
    #[error("sensor {0} not supported by peer")]
    UnsupportedSensor(String),

    /// The command's argument list does not fit its header.
    #[error("{header} expects {expected}, got {found} arguments")]
    InvalidArguments {
        header: &'static str,
        expected: String,
        found: usize,
    },

    /// No connection is established.
    #[error("not connected")]
    NotConnected,

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The manager or controller was shut down.
    #[error("peer closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, PeerError>;
