//! Contract between the dispatcher and the hardware behind each sensor.

use std::sync::mpsc::Sender;

use bytes::Bytes;
use sensorlink_caps::Capabilities;
use sensorlink_frame::Sensor;

use crate::dispatcher::DispatchEvent;
use crate::error::ExecutorError;

/// Progress reported by a running sensor task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorEvent {
    /// More bytes for the task's current segment.
    Chunk {
        task_id: i32,
        file_type: String,
        bytes: Bytes,
    },
    /// The current segment is finished; start a new one.
    SaveChunk { task_id: i32 },
    /// Single-shot values such as a location fix.
    Reading { task_id: i32, values: Vec<String> },
    Completed { task_id: i32 },
    Failed { task_id: i32, message: String },
    /// Not tied to any task.
    Proximity { message: String },
}

impl SensorEvent {
    pub fn task_id(&self) -> Option<i32> {
        match self {
            SensorEvent::Chunk { task_id, .. }
            | SensorEvent::SaveChunk { task_id }
            | SensorEvent::Reading { task_id, .. }
            | SensorEvent::Completed { task_id }
            | SensorEvent::Failed { task_id, .. } => Some(*task_id),
            SensorEvent::Proximity { .. } => None,
        }
    }
}

/// Handle an executor uses to report back into the dispatch inbox.
#[derive(Debug, Clone)]
pub struct SensorEvents {
    tx: Sender<DispatchEvent>,
}

impl SensorEvents {
    pub(crate) fn new(tx: Sender<DispatchEvent>) -> Self {
        Self { tx }
    }

    /// Returns false once the dispatcher is gone.
    pub fn emit(&self, event: SensorEvent) -> bool {
        self.tx.send(DispatchEvent::Sensor(event)).is_ok()
    }

    pub fn chunk(&self, task_id: i32, file_type: &str, bytes: impl Into<Bytes>) -> bool {
        self.emit(SensorEvent::Chunk {
            task_id,
            file_type: file_type.to_string(),
            bytes: bytes.into(),
        })
    }

    pub fn save_chunk(&self, task_id: i32) -> bool {
        self.emit(SensorEvent::SaveChunk { task_id })
    }

    pub fn reading(&self, task_id: i32, values: Vec<String>) -> bool {
        self.emit(SensorEvent::Reading { task_id, values })
    }

    pub fn completed(&self, task_id: i32) -> bool {
        self.emit(SensorEvent::Completed { task_id })
    }

    pub fn failed(&self, task_id: i32, message: impl Into<String>) -> bool {
        self.emit(SensorEvent::Failed {
            task_id,
            message: message.into(),
        })
    }

    pub fn proximity(&self, message: impl Into<String>) -> bool {
        self.emit(SensorEvent::Proximity {
            message: message.into(),
        })
    }
}

/// Drives one physical (or simulated) sensor.
///
/// `start` must return promptly; long-running work reports through `events`.
/// An executor must report `is_busy() == false` before it emits the final
/// `Completed` or `Failed` event of a task.
pub trait SensorExecutor: Send {
    fn sensor(&self) -> Sensor;

    /// Features advertised for this sensor.
    fn features(&self) -> Capabilities;

    fn start(
        &mut self,
        task_id: i32,
        args: &[String],
        events: SensorEvents,
    ) -> Result<(), ExecutorError>;

    /// Apply one already-validated setting.
    fn modify(&mut self, key: &str, value: &str) -> Result<(), ExecutorError>;

    /// Stop the running task without reporting its completion.
    fn kill(&mut self);

    fn is_busy(&self) -> bool;
}
