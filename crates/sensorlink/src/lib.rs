//! Remote sensor control for a controller and a device sharing one link.
//!
//! The controller issues capture, location, tuning, and kill commands; the
//! device runs them on its sensors and streams data and notifications back.
//!
//! # Crate Structure
//!
//! - [`transport`]: links and byte streams (UDS, TCP)
//! - [`frame`]: the delimited wire format, protocol tables, typed commands
//! - [`caps`]: sensor features, validation, capability reports
//! - [`peer`]: tasks, dispatch, controller role, connection management
//!   (behind the `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use sensorlink_transport::*;
}

/// Re-export frame and protocol types.
pub mod frame {
    pub use sensorlink_frame::*;
}

/// Re-export capability types.
pub mod caps {
    pub use sensorlink_caps::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use sensorlink_peer::*;
}
