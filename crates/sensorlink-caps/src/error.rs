use crate::feature::{DataType, Limiter};

/// Why a proposed feature value was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("sensor {0:?} is not available")]
    UnknownSensor(String),

    #[error("sensor {sensor} has no feature {key:?}")]
    UnknownKey { sensor: String, key: String },

    #[error("{key}: {value:?} is not a valid {expected}")]
    TypeMismatch {
        key: String,
        expected: DataType,
        value: String,
    },

    #[error("{key}: {value} outside [{min}, {max}]")]
    OutOfRange {
        key: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("{key}: {value:?} is not one of {allowed:?}")]
    NotInSet {
        key: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("{key} is read-only ({limiter} limiter)")]
    ReadOnly { key: String, limiter: Limiter },

    #[error("{key}: unusable limits {detail}")]
    BadLimits { key: String, detail: String },
}

/// Malformed capability report fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("report is empty")]
    Empty,

    #[error("unknown sensor {0:?} in report")]
    UnknownSensor(String),

    #[error("feature entry ended after {found} of {expected} fields")]
    Truncated { expected: usize, found: usize },

    #[error("malformed {field} field: {value:?}")]
    BadField { field: &'static str, value: String },
}

/// Errors loading or merging capability definitions.
#[derive(Debug, thiserror::Error)]
pub enum CapsError {
    #[error("failed to load feature file: {0}")]
    LoadFailed(String),

    #[error("feature file is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Report(#[from] ReportError),
}

pub type Result<T> = std::result::Result<T, CapsError>;
