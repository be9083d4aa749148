//! Sensor capability model for sensorlink.
//!
//! Each sensor advertises typed features constrained by a limiter. Modify
//! requests are validated against them before anything is applied, and the
//! whole set travels to the controller as a capability report.

pub mod config;
pub mod error;
pub mod feature;
pub mod registry;
pub mod report;

pub use config::CapsConfig;
pub use error::{CapsError, ReportError, Result, ValidationError};
pub use feature::{DataType, Feature, Limiter};
pub use registry::{Capabilities, CapabilityRegistry};
pub use report::{decode_report, encode_report};
