//! Transport-agnostic link abstraction for sensorlink peers.
//!
//! Provides a unified byte stream over the local transports a controller and
//! its devices can share:
//! - Unix domain sockets (Linux/macOS)
//! - TCP sockets (local network)
//!
//! Radio and wired-bus transports live outside this crate; they only need to
//! implement [`Link`] and hand back a [`Connection`].

pub mod error;
pub mod link;
pub mod tcp;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use link::{Connection, Link, TcpLink, Target};
pub use tcp::TcpSocket;
pub use traits::IpcStream;

#[cfg(unix)]
pub use link::UdsLink;
#[cfg(unix)]
pub use uds::UnixDomainSocket;
