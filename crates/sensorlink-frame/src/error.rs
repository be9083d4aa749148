use crate::protocol::{Arity, Header};

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A mandatory numeric field did not parse. The whole frame is dropped.
    #[error("malformed {field} field: {value:?}")]
    Parse { field: &'static str, value: String },

    /// A field contains one of the reserved delimiter bytes.
    #[error("field {index} contains reserved byte 0x{byte:02x}")]
    ReservedByte { index: usize, byte: u8 },

    /// The delimited header grew past the ceiling without an end marker.
    #[error("frame header too large ({size} bytes, max {max})")]
    HeaderTooLarge { size: usize, max: usize },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The declared argument count disagrees with the fields present.
    #[error("declared {declared} argument fields, found {found}")]
    FieldCount { declared: usize, found: usize },

    /// The header code is not part of the protocol vocabulary.
    #[error("unknown {kind} code {code}")]
    UnknownCode { kind: &'static str, code: i32 },

    /// The frame does not carry the fields its kind requires.
    #[error("invalid frame: {0}")]
    Invalid(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// True when only the offending frame is lost and the stream stays aligned.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::Parse { .. }
                | FrameError::FieldCount { .. }
                | FrameError::UnknownCode { .. }
                | FrameError::Invalid(_)
        )
    }

    pub(crate) fn parse(field: &'static str, value: &str) -> Self {
        FrameError::Parse {
            field,
            value: value.to_string(),
        }
    }
}

/// Errors from reassembling two partial fragments into one frame.
#[derive(Debug, thiserror::Error)]
pub enum StitchError {
    /// The concatenated fragments still lack an end marker or payload bytes.
    #[error("fragments do not complete a frame")]
    Incomplete,

    /// Bytes remain after the reassembled frame.
    #[error("{0} bytes left over after reassembled frame")]
    Trailing(usize),

    /// The declared field count disagrees with the fields present.
    #[error("declared {declared} argument fields, found {found}")]
    FieldCount { declared: usize, found: usize },

    /// The argument count is not one the command header accepts.
    #[error("{header} takes {expected}, frame carries {count}")]
    Arity {
        header: Header,
        expected: Arity,
        count: usize,
    },

    /// The reassembled bytes do not form a valid frame.
    #[error("reassembled frame is malformed: {0}")]
    Malformed(#[from] FrameError),
}

/// Errors turning a decoded frame into a command.
///
/// Every variant except `Frame` carries a task id that can still be answered.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("task {task_id}: unknown header code {code}")]
    UnknownHeader { task_id: i32, code: i32 },

    #[error("task {task_id}: {header} expects {expected}, got {found}")]
    Arity {
        task_id: i32,
        header: &'static str,
        expected: String,
        found: usize,
    },

    #[error("task id 0 is reserved for unsolicited notifications ({header})")]
    ReservedTaskId { header: &'static str },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl CommandError {
    /// Task id the sender should be told about, if any.
    pub fn task_id(&self) -> Option<i32> {
        match self {
            CommandError::UnknownHeader { task_id, .. } | CommandError::Arity { task_id, .. } => {
                Some(*task_id)
            }
            _ => None,
        }
    }
}

/// Errors reading capture arguments `[interval_ms, duration_ms, max_count]`.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("capture argument {index} is not an integer: {value:?}")]
    NotANumber { index: usize, value: String },

    #[error("capture argument {index} out of range: {value}")]
    OutOfRange { index: usize, value: i64 },

    #[error("capture with neither a duration nor a count limit would never finish")]
    Unbounded,
}

pub type Result<T> = std::result::Result<T, FrameError>;
