//! Delimited command/response framing for sensorlink.
//!
//! Every message is a run of text fields separated by `0x1F`, closed by a
//! one-byte `0x1E` field, optionally followed by a raw payload whose length
//! is the last text field:
//!
//! ```text
//! task_id ␟ code ␟ arg_count ␟ arg… ␟ payload_len ␟ END ␟ payload
//! ```
//!
//! Partial reads are reassembled by [`FrameReader`]; callers only ever see
//! complete frames.

pub mod codec;
pub mod command;
pub mod error;
pub mod protocol;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod tokio_codec;

pub use codec::{
    decode, decode_frame, decode_with_config, encode, encode_frame, stitch, Decoded, Frame,
    FrameConfig, PartialFrame, DEFAULT_MAX_HEADER, DEFAULT_MAX_PAYLOAD, DELIM, END_MARKER,
    LIST_DELIM,
};
pub use command::{CapturePlan, Command, Response, UNSOLICITED_TASK_ID};
pub use error::{CommandError, FrameError, PlanError, Result, StitchError};
pub use protocol::{Arity, Header, Notification, Protocol, ResponseKind, Role, Sensor};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use tokio_codec::SensorCodec;
