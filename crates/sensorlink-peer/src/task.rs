//! Live task tracking.
//!
//! Every operation runs under one registry lock. Segment flushes happen after
//! the lock is released, so a slow sink never blocks other callers.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};
use sensorlink_frame::{Command, Header, UNSOLICITED_TASK_ID};
use tracing::{debug, warn};

use crate::error::TaskError;
use crate::persist::PersistenceSink;

/// Registry tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Random draws before falling back to the sequential id counter.
    pub max_id_attempts: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_id_attempts: 64,
        }
    }
}

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Accumulating,
    Flushed,
    Completed,
}

/// Snapshot of a live task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: i32,
    pub command: Command,
    /// Index of the segment currently accumulating.
    pub position: u32,
    pub state: TaskState,
    /// Bytes buffered and not yet flushed.
    pub buffered: usize,
    /// Segments the sink has confirmed.
    pub flushed: u32,
}

/// Source of candidate task ids.
pub type IdSource = Box<dyn FnMut() -> i32 + Send>;

#[derive(Debug, Default)]
struct DataSegment {
    bytes: BytesMut,
    file_type: String,
}

struct Task {
    command: Command,
    position: u32,
    data: Option<BTreeMap<u32, DataSegment>>,
    state: TaskState,
    flushed: u32,
}

impl Task {
    fn new(command: Command) -> Self {
        let data = command.header.allocates_data().then(BTreeMap::new);
        Self {
            command,
            position: 0,
            data,
            state: TaskState::Created,
            flushed: 0,
        }
    }

    fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.command.task_id,
            command: self.command.clone(),
            position: self.position,
            state: self.state,
            buffered: self
                .data
                .iter()
                .flat_map(|data| data.values())
                .map(|segment| segment.bytes.len())
                .sum(),
            flushed: self.flushed,
        }
    }
}

struct Inner {
    tasks: HashMap<i32, Task>,
    id_source: IdSource,
    next_fallback: i32,
}

impl Inner {
    fn is_free(&self, id: i32) -> bool {
        id != UNSOLICITED_TASK_ID && !self.tasks.contains_key(&id)
    }

    fn allocate_id(&mut self, max_attempts: u32) -> Result<i32, TaskError> {
        for _ in 0..max_attempts {
            let candidate = (self.id_source)();
            if self.is_free(candidate) {
                return Ok(candidate);
            }
        }

        warn!(
            attempts = max_attempts,
            live = self.tasks.len(),
            "random task ids kept colliding; using sequential ids"
        );
        if self.tasks.len() >= u32::MAX as usize {
            return Err(TaskError::IdSpaceExhausted);
        }
        // live ids plus the reserved id bound how many candidates are taken
        for _ in 0..self.tasks.len() + 2 {
            let candidate = self.next_fallback;
            self.next_fallback = self.next_fallback.wrapping_add(1);
            if self.is_free(candidate) {
                return Ok(candidate);
            }
        }
        Err(TaskError::IdSpaceExhausted)
    }
}

/// Segment pulled out of the registry, waiting to be handed to the sink.
struct PendingFlush {
    task_id: i32,
    chunk_index: u32,
    file_type: String,
    bytes: Bytes,
}

impl PendingFlush {
    fn into_segment(self) -> DataSegment {
        DataSegment {
            bytes: BytesMut::from(&self.bytes[..]),
            file_type: self.file_type,
        }
    }
}

/// Thread-safe table of live tasks.
pub struct TaskRegistry {
    inner: Mutex<Inner>,
    sink: Arc<dyn PersistenceSink>,
    config: RegistryConfig,
}

impl TaskRegistry {
    pub fn new(sink: Arc<dyn PersistenceSink>) -> Self {
        Self::with_config(sink, RegistryConfig::default())
    }

    pub fn with_config(sink: Arc<dyn PersistenceSink>, config: RegistryConfig) -> Self {
        Self::with_id_source(sink, config, Box::new(rand::random::<i32>))
    }

    /// Use a custom id source, e.g. a deterministic one in tests.
    pub fn with_id_source(
        sink: Arc<dyn PersistenceSink>,
        config: RegistryConfig,
        id_source: IdSource,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
                id_source,
                next_fallback: 1,
            }),
            sink,
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Create a task with a fresh id unique among live tasks.
    pub fn create_task(&self, header: Header, args: Vec<String>) -> Result<i32, TaskError> {
        let mut inner = self.lock();
        let id = inner.allocate_id(self.config.max_id_attempts)?;
        inner
            .tasks
            .insert(id, Task::new(Command::new(header, id, args)));
        debug!(task_id = id, %header, "task created");
        Ok(id)
    }

    /// Track a command whose id was chosen by the remote peer.
    pub fn register_task(&self, command: Command) -> Result<(), TaskError> {
        let mut inner = self.lock();
        let id = command.task_id;
        if !inner.is_free(id) {
            return Err(TaskError::Duplicate(id));
        }
        debug!(task_id = id, header = %command.header, "task registered");
        inner.tasks.insert(id, Task::new(command));
        Ok(())
    }

    pub fn get_task(&self, id: i32) -> Option<TaskInfo> {
        self.lock().tasks.get(&id).map(Task::info)
    }

    pub fn has_task(&self, id: i32) -> bool {
        self.lock().tasks.contains_key(&id)
    }

    pub fn live_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.lock().tasks.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a task, flushing every non-empty buffered segment first.
    ///
    /// Returns `Ok(false)` when the id is not live; removing twice flushes
    /// once. If the sink fails, the task stays live holding the segments that
    /// were not persisted, so a later removal retries them.
    pub fn remove_task(&self, id: i32) -> Result<bool, TaskError> {
        let Some(mut task) = self.lock().tasks.remove(&id) else {
            return Ok(false);
        };

        let mut pending: Vec<PendingFlush> = task
            .data
            .take()
            .into_iter()
            .flatten()
            .filter(|(_, segment)| !segment.bytes.is_empty())
            .map(|(chunk_index, segment)| PendingFlush {
                task_id: id,
                chunk_index,
                file_type: segment.file_type,
                bytes: segment.bytes.freeze(),
            })
            .collect();

        let mut done = 0;
        while done < pending.len() {
            if let Err(err) = self.flush(&pending[done]) {
                let unsaved = pending
                    .drain(done..)
                    .map(|flush| (flush.chunk_index, flush.into_segment()))
                    .collect();
                task.data = Some(unsaved);
                self.reinstate(id, task);
                return Err(err);
            }
            done += 1;
        }
        debug!(task_id = id, segments = done, "task removed");
        Ok(true)
    }

    /// Put back a task whose removal could not persist its data.
    fn reinstate(&self, id: i32, task: Task) {
        let mut inner = self.lock();
        if inner.tasks.contains_key(&id) {
            warn!(task_id = id, "task id reused before its segments were persisted; dropping them");
            return;
        }
        warn!(task_id = id, "segments not persisted; task kept for retry");
        inner.tasks.insert(id, task);
    }

    /// Append bytes to the task's current segment.
    pub fn append_chunk(&self, id: i32, file_type: &str, bytes: &[u8]) -> Result<(), TaskError> {
        let mut inner = self.lock();
        let task = inner.tasks.get_mut(&id).ok_or(TaskError::NotFound(id))?;
        let position = task.position;
        let data = task.data.as_mut().ok_or(TaskError::NoDataMap(id))?;
        let segment = data.entry(position).or_default();
        if segment.file_type.is_empty() {
            segment.file_type = file_type.to_string();
        }
        segment.bytes.extend_from_slice(bytes);
        task.state = TaskState::Accumulating;
        Ok(())
    }

    /// Flush the current segment and start the next one.
    ///
    /// Returns the index of the segment that was closed.
    pub fn save_chunk(&self, id: i32) -> Result<u32, TaskError> {
        let (pending, closed) = {
            let mut inner = self.lock();
            let task = inner.tasks.get_mut(&id).ok_or(TaskError::NotFound(id))?;
            let closed = task.position;
            let data = task.data.as_mut().ok_or(TaskError::NoDataMap(id))?;
            let pending = data
                .remove(&closed)
                .filter(|segment| !segment.bytes.is_empty())
                .map(|segment| PendingFlush {
                    task_id: id,
                    chunk_index: closed,
                    file_type: segment.file_type,
                    bytes: segment.bytes.freeze(),
                });
            task.position += 1;
            task.state = TaskState::Flushed;
            (pending, closed)
        };

        if let Some(flush) = pending {
            if let Err(err) = self.flush(&flush) {
                self.restore(flush);
                return Err(err);
            }
        }
        Ok(closed)
    }

    /// Return a segment the sink rejected to its task's data map.
    fn restore(&self, flush: PendingFlush) {
        let mut inner = self.lock();
        let Some(data) = inner
            .tasks
            .get_mut(&flush.task_id)
            .and_then(|task| task.data.as_mut())
        else {
            warn!(task_id = flush.task_id, chunk_index = flush.chunk_index, "task gone; unsaved segment dropped");
            return;
        };
        let chunk_index = flush.chunk_index;
        let returned = flush.into_segment();
        let segment = data.entry(chunk_index).or_default();
        if segment.file_type.is_empty() {
            segment.file_type = returned.file_type;
        }
        // the rejected bytes came first
        let mut bytes = returned.bytes;
        bytes.extend_from_slice(&segment.bytes);
        segment.bytes = bytes;
    }

    pub fn mark_completed(&self, id: i32) -> Result<(), TaskError> {
        let mut inner = self.lock();
        let task = inner.tasks.get_mut(&id).ok_or(TaskError::NotFound(id))?;
        task.state = TaskState::Completed;
        Ok(())
    }

    /// Record that the sink finished a segment. Unknown ids are ignored since
    /// the task may already be gone.
    pub fn note_flushed(&self, id: i32) {
        if let Some(task) = self.lock().tasks.get_mut(&id) {
            task.flushed += 1;
        }
    }

    fn flush(&self, flush: &PendingFlush) -> Result<(), TaskError> {
        debug!(
            task_id = flush.task_id,
            chunk_index = flush.chunk_index,
            size = flush.bytes.len(),
            "flushing segment"
        );
        self.sink
            .flush(flush.task_id, flush.chunk_index, &flush.file_type, flush.bytes.clone())
            .map_err(|source| TaskError::Persist {
                task_id: flush.task_id,
                chunk_index: flush.chunk_index,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;

    use super::*;
    use crate::persist::MemorySink;

    fn registry() -> (TaskRegistry, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (TaskRegistry::new(sink.clone()), sink)
    }

    fn sequence(ids: Vec<i32>) -> IdSource {
        let mut ids = ids.into_iter().cycle();
        Box::new(move || ids.next().unwrap_or(0))
    }

    #[test]
    fn concurrent_creation_yields_distinct_ids() {
        let (registry, _) = registry();
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..250)
                        .map(|_| {
                            registry
                                .create_task(Header::NoOp, Vec::new())
                                .expect("id should be allocated")
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("worker should finish") {
                assert_ne!(id, 0);
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 2000);
        assert_eq!(registry.len(), 2000);
    }

    #[test]
    fn collisions_are_rerolled_and_removed_ids_reused() {
        let sink: Arc<MemorySink> = Arc::new(MemorySink::new());
        let registry = TaskRegistry::with_id_source(
            sink,
            RegistryConfig::default(),
            sequence(vec![0, 5, 5, 9, 5]),
        );

        assert_eq!(registry.create_task(Header::NoOp, Vec::new()).unwrap(), 5);
        assert_eq!(registry.create_task(Header::NoOp, Vec::new()).unwrap(), 9);
        assert!(registry.remove_task(5).unwrap());
        assert_eq!(registry.create_task(Header::NoOp, Vec::new()).unwrap(), 5);
    }

    #[test]
    fn exhausted_draws_fall_back_to_counter() {
        let sink: Arc<MemorySink> = Arc::new(MemorySink::new());
        let registry = TaskRegistry::with_id_source(
            sink,
            RegistryConfig { max_id_attempts: 4 },
            sequence(vec![0]),
        );

        assert_eq!(registry.create_task(Header::NoOp, Vec::new()).unwrap(), 1);
        assert_eq!(registry.create_task(Header::NoOp, Vec::new()).unwrap(), 2);
    }

    #[test]
    fn remote_ids_must_be_unique() {
        let (registry, _) = registry();
        let command = Command::new(Header::GetLocation, 77, Vec::new());
        registry.register_task(command.clone()).unwrap();
        assert!(matches!(
            registry.register_task(command),
            Err(TaskError::Duplicate(77))
        ));
        assert!(registry
            .register_task(Command::new(Header::Ping, 0, Vec::new()))
            .is_err());
    }

    #[test]
    fn only_capture_tasks_hold_data() {
        let (registry, _) = registry();
        let location = registry.create_task(Header::GetLocation, Vec::new()).unwrap();
        assert!(matches!(
            registry.append_chunk(location, "txt", b"x"),
            Err(TaskError::NoDataMap(_))
        ));
        assert!(matches!(
            registry.save_chunk(location),
            Err(TaskError::NoDataMap(_))
        ));
        assert!(matches!(
            registry.append_chunk(12345, "txt", b"x"),
            Err(TaskError::NotFound(12345))
        ));
    }

    #[test]
    fn save_chunk_flushes_and_advances() {
        let (registry, sink) = registry();
        let id = registry.create_task(Header::RecordAudio, Vec::new()).unwrap();

        registry.append_chunk(id, "wav", b"ab").unwrap();
        registry.append_chunk(id, "wav", b"cd").unwrap();
        let info = registry.get_task(id).unwrap();
        assert_eq!(info.state, TaskState::Accumulating);
        assert_eq!(info.buffered, 4);

        assert_eq!(registry.save_chunk(id).unwrap(), 0);
        registry.append_chunk(id, "wav", b"ef").unwrap();
        let info = registry.get_task(id).unwrap();
        assert_eq!(info.position, 1);
        assert_eq!(info.buffered, 2);

        let segments = sink.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].bytes.as_ref(), b"abcd");
        assert_eq!(segments[0].file_type, "wav");
    }

    #[test]
    fn remove_twice_flushes_once() {
        let (registry, sink) = registry();
        let id = registry.create_task(Header::TakePicture, Vec::new()).unwrap();
        registry.append_chunk(id, "jpg", b"\xff\xd8").unwrap();
        registry.mark_completed(id).unwrap();

        assert!(registry.remove_task(id).unwrap());
        assert!(!registry.remove_task(id).unwrap());
        assert!(!registry.has_task(id));
        assert_eq!(sink.segments().len(), 1);
    }

    #[test]
    fn empty_segments_are_not_flushed() {
        let (registry, sink) = registry();
        let id = registry.create_task(Header::ListenEnvironment, Vec::new()).unwrap();
        registry.save_chunk(id).unwrap();
        registry.remove_task(id).unwrap();
        assert!(sink.segments().is_empty());
    }

    /// Fails the first `failures` flushes, then stores segments.
    struct FlakySink {
        failures: std::sync::atomic::AtomicUsize,
        inner: MemorySink,
    }

    impl FlakySink {
        fn failing(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures: std::sync::atomic::AtomicUsize::new(failures),
                inner: MemorySink::new(),
            })
        }
    }

    impl PersistenceSink for FlakySink {
        fn flush(
            &self,
            task_id: i32,
            chunk_index: u32,
            file_type: &str,
            bytes: Bytes,
        ) -> std::io::Result<()> {
            use std::sync::atomic::Ordering;
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(std::io::Error::other("disk busy"));
            }
            self.inner.flush(task_id, chunk_index, file_type, bytes)
        }
    }

    #[test]
    fn failed_save_keeps_segment_for_removal() {
        let sink = FlakySink::failing(1);
        let registry = TaskRegistry::new(sink.clone());
        let id = registry.create_task(Header::RecordAudio, Vec::new()).unwrap();
        registry.append_chunk(id, "wav", b"abcdefgh").unwrap();

        assert!(matches!(
            registry.save_chunk(id),
            Err(TaskError::Persist { chunk_index: 0, .. })
        ));
        let info = registry.get_task(id).unwrap();
        assert_eq!(info.buffered, 8);
        assert_eq!(info.position, 1);

        registry.append_chunk(id, "wav", b"ij").unwrap();
        assert!(registry.remove_task(id).unwrap());
        let segments = sink.inner.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].chunk_index, 0);
        assert_eq!(segments[0].bytes.as_ref(), b"abcdefgh");
        assert_eq!(segments[1].bytes.as_ref(), b"ij");
    }

    #[test]
    fn failed_removal_keeps_task_live() {
        let sink = FlakySink::failing(1);
        let registry = TaskRegistry::new(sink.clone());
        let id = registry.create_task(Header::TakePicture, Vec::new()).unwrap();
        registry.append_chunk(id, "jpg", b"\xff\xd8\xff").unwrap();

        assert!(registry.remove_task(id).is_err());
        assert!(registry.has_task(id));
        assert_eq!(registry.get_task(id).unwrap().buffered, 3);
        assert!(sink.inner.segments().is_empty());

        assert!(registry.remove_task(id).unwrap());
        assert!(!registry.has_task(id));
        assert_eq!(sink.inner.segments().len(), 1);
    }

    #[test]
    fn counter_fallback_steps_over_reserved_id() {
        let sink: Arc<MemorySink> = Arc::new(MemorySink::new());
        let registry = TaskRegistry::with_id_source(
            sink,
            RegistryConfig { max_id_attempts: 1 },
            sequence(vec![0]),
        );
        registry
            .register_task(Command::new(Header::GetLocation, -1, Vec::new()))
            .unwrap();
        registry.lock().next_fallback = -1;

        assert_eq!(registry.create_task(Header::NoOp, Vec::new()).unwrap(), 1);
    }

    #[test]
    fn note_flushed_counts() {
        let (registry, _) = registry();
        let id = registry.create_task(Header::TakePicture, Vec::new()).unwrap();
        registry.note_flushed(id);
        registry.note_flushed(id.wrapping_add(1));
        assert_eq!(registry.get_task(id).unwrap().flushed, 1);
    }
}
