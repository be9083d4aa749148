/// Errors that can occur in link and transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong { path: String, len: usize, max: usize },

    /// Discovery finished without finding any reachable target.
    #[error("no targets found by {0} search")]
    NoTargets(&'static str),

    /// The in-progress search was cancelled.
    #[error("search cancelled")]
    Cancelled,

    /// No connection is currently installed.
    #[error("not connected")]
    NotConnected,

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Returns true for errors caused by an explicit cancel rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled | TransportError::Shutdown)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
