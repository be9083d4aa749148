//! `tokio-util` codec over the same wire layout as [`FrameReader`](crate::FrameReader).

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::codec::{decode_frame, encode_frame, Frame, FrameConfig};
use crate::error::FrameError;

/// Frame codec for `tokio_util::codec::Framed`.
///
/// Malformed frames are skipped, matching the blocking reader.
#[derive(Debug, Clone, Default)]
pub struct SensorCodec {
    config: FrameConfig,
}

impl SensorCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for SensorCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            match decode_frame(src, &self.config) {
                Err(err) if err.is_recoverable() => {
                    warn!(error = %err, "dropping malformed frame");
                }
                other => return other,
            }
        }
    }
}

impl Encoder<Frame> for SensorCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(&item, dst, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_split_input() {
        let mut codec = SensorCodec::default();
        let mut wire = BytesMut::new();
        let frame = Frame::new(19, 1).with_args(["0", "jpg"]).with_payload(vec![1u8, 2, 3]);
        codec.encode(frame.clone(), &mut wire).unwrap();

        let tail = wire.split_off(6);
        assert!(codec.decode(&mut wire).unwrap().is_none());
        wire.unsplit(tail);
        assert_eq!(codec.decode(&mut wire).unwrap(), Some(frame));
        assert!(wire.is_empty());
    }

    #[test]
    fn skips_malformed_frames() {
        let mut codec = SensorCodec::default();
        let mut wire = BytesMut::from(&b"?\x1f1\x1f0\x1f0\x1f\x1e\x1f"[..]);
        codec.encode(Frame::new(2, -5), &mut wire).unwrap();

        assert_eq!(codec.decode(&mut wire).unwrap(), Some(Frame::new(2, -5)));
    }
}
