use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use sensorlink_transport::IpcStream;
use tracing::warn;

use crate::codec::{decode_frame, Frame, FrameConfig, PartialFrame};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Bytes left over after the last complete frame are kept and stitched onto
/// the next read, so callers only ever see whole frames. Frames with malformed
/// numeric fields are dropped and reading continues.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    dropped: u64,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            dropped: 0,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match decode_frame(&mut self.buf, &self.config) {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {}
                Err(err) if err.is_recoverable() => {
                    self.dropped += 1;
                    warn!(error = %err, dropped = self.dropped, "dropping malformed frame");
                    continue;
                }
                Err(err) => return Err(err),
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn pending(&self) -> PartialFrame {
        PartialFrame::from(&self.buf[..])
    }

    /// Number of malformed frames dropped so far.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<IpcStream> {
    /// Create a frame reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: sensorlink_transport::TransportError) -> FrameError {
    match err {
        sensorlink_transport::TransportError::Io(io)
        | sensorlink_transport::TransportError::Accept(io) => FrameError::Io(io),
        sensorlink_transport::TransportError::Bind { source, .. }
        | sensorlink_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
