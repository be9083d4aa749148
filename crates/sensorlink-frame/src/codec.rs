use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::error::{FrameError, Result, StitchError};
use crate::protocol::Header;

/// Field delimiter (ASCII unit separator).
pub const DELIM: u8 = 0x1F;

/// End-of-header marker, sent as a field of its own (ASCII record separator).
pub const END_MARKER: u8 = 0x1E;

/// Separates list entries inside a field sequence (ASCII group separator).
pub const LIST_DELIM: &str = "\u{1d}";

/// Default ceiling for the delimited header: 10 KiB.
pub const DEFAULT_MAX_HEADER: usize = 10 * 1024;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Fixed numeric fields around the arguments: task id, code, count, payload length.
const FIXED_FIELDS: usize = 4;

/// One complete protocol message.
///
/// `code` is a command header on controller → device frames and a response
/// kind on device → controller frames; the codec treats both the same.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Task the frame belongs to.
    pub task_id: i32,
    /// Command header or response kind.
    pub code: i32,
    /// Text argument fields.
    pub args: Vec<String>,
    /// Raw bulk payload appended after the header.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame with no arguments and no payload.
    pub fn new(task_id: i32, code: i32) -> Self {
        Self {
            task_id,
            code,
            args: Vec::new(),
            payload: Bytes::new(),
        }
    }

    /// Replace the argument fields.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a raw payload.
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Size of the delimited header on the wire.
    pub fn header_size(&self) -> usize {
        let numeric = self.task_id.to_string().len()
            + self.code.to_string().len()
            + self.args.len().to_string().len()
            + self.payload.len().to_string().len();
        let text: usize = self.args.iter().map(String::len).sum();
        // every field plus END is followed by one delimiter
        numeric + text + 1 + (FIXED_FIELDS + self.args.len() + 1)
    }

    /// Total size on the wire (header + payload).
    pub fn wire_size(&self) -> usize {
        self.header_size() + self.payload.len()
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Maximum delimited header size in bytes. Default: 10 KiB.
    pub max_header_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            max_header_size: DEFAULT_MAX_HEADER,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// task_id ␟ code ␟ arg_count ␟ arg… ␟ payload_len ␟ END ␟ payload
/// ```
/// `␟` is [`DELIM`]; `END` is the one-byte field [`END_MARKER`]. The payload is
/// appended verbatim, never delimiter-escaped.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut, config: &FrameConfig) -> Result<()> {
    for (index, arg) in frame.args.iter().enumerate() {
        // a bare list separator is a field of its own; anywhere else it is reserved
        if arg == LIST_DELIM {
            continue;
        }
        if let Some(byte) = arg.bytes().find(|b| matches!(*b, DELIM | END_MARKER | 0x1D)) {
            return Err(FrameError::ReservedByte { index, byte });
        }
    }

    let header_size = frame.header_size();
    if header_size > config.max_header_size {
        return Err(FrameError::HeaderTooLarge {
            size: header_size,
            max: config.max_header_size,
        });
    }
    if frame.payload.len() > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: frame.payload.len(),
            max: config.max_payload_size,
        });
    }

    dst.reserve(header_size + frame.payload.len());
    put_field(dst, frame.task_id.to_string().as_bytes());
    put_field(dst, frame.code.to_string().as_bytes());
    put_field(dst, frame.args.len().to_string().as_bytes());
    for arg in &frame.args {
        put_field(dst, arg.as_bytes());
    }
    put_field(dst, frame.payload.len().to_string().as_bytes());
    put_field(dst, &[END_MARKER]);
    dst.put_slice(&frame.payload);
    Ok(())
}

/// Encode a frame with default limits into a fresh buffer.
pub fn encode(frame: &Frame) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    encode_frame(frame, &mut buf, &FrameConfig::default())?;
    Ok(buf.freeze())
}

fn put_field(dst: &mut BytesMut, field: &[u8]) {
    dst.put_slice(field);
    dst.put_u8(DELIM);
}

/// Decode one frame from the front of `src`.
///
/// Returns `Ok(None)` if the buffer doesn't hold a complete frame yet; the
/// buffer is left untouched so the next read can extend it. On success the
/// frame bytes are consumed.
///
/// Recoverable errors ([`FrameError::is_recoverable`]) consume the offending
/// frame so decoding can continue with the next one. `HeaderTooLarge` and
/// `PayloadTooLarge` leave the stream unaligned.
pub fn decode_frame(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Frame>> {
    let Some((ranges, header_len)) = scan_header(src, config.max_header_size)? else {
        return Ok(None);
    };

    if ranges.len() < FIXED_FIELDS {
        src.advance(header_len);
        return Err(FrameError::Invalid(format!(
            "expected at least {FIXED_FIELDS} fields, found {}",
            ranges.len()
        )));
    }

    let (plen_start, plen_end) = ranges[ranges.len() - 1];
    let payload_len = match parse_usize(&src[plen_start..plen_end]) {
        Some(len) => len,
        None => {
            let value = String::from_utf8_lossy(&src[plen_start..plen_end]).into_owned();
            src.advance(header_len);
            return Err(FrameError::Parse {
                field: "payload_len",
                value,
            });
        }
    };
    if payload_len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: config.max_payload_size,
        });
    }

    let total = header_len + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    let parsed = parse_fields(src, &ranges);
    src.advance(header_len);
    let payload = src.split_to(payload_len).freeze();
    let (task_id, code, args) = parsed?;

    Ok(Some(Frame {
        task_id,
        code,
        args,
        payload,
    }))
}

/// Locate the end marker. Returns field byte ranges (without the marker) and
/// the header length including the marker's trailing delimiter.
fn scan_header(src: &[u8], max_header: usize) -> Result<Option<(Vec<(usize, usize)>, usize)>> {
    let mut ranges = Vec::new();
    let mut start = 0usize;

    while let Some(offset) = src[start..].iter().position(|b| *b == DELIM) {
        let end = start + offset;
        if end > max_header {
            return Err(FrameError::HeaderTooLarge {
                size: end,
                max: max_header,
            });
        }
        if end - start == 1 && src[start] == END_MARKER {
            return Ok(Some((ranges, end + 1)));
        }
        ranges.push((start, end));
        start = end + 1;
    }

    if src.len() > max_header {
        return Err(FrameError::HeaderTooLarge {
            size: src.len(),
            max: max_header,
        });
    }
    Ok(None)
}

fn parse_fields(src: &[u8], ranges: &[(usize, usize)]) -> Result<(i32, i32, Vec<String>)> {
    let text = |index: usize| -> Result<&str> {
        let (start, end) = ranges[index];
        std::str::from_utf8(&src[start..end]).map_err(|_| FrameError::Parse {
            field: "text",
            value: String::from_utf8_lossy(&src[start..end]).into_owned(),
        })
    };

    let task_id = text(0)?;
    let task_id: i32 = task_id
        .parse()
        .map_err(|_| FrameError::parse("task_id", task_id))?;
    let code = text(1)?;
    let code: i32 = code.parse().map_err(|_| FrameError::parse("code", code))?;
    let count = text(2)?;
    let declared: usize = count
        .parse()
        .map_err(|_| FrameError::parse("arg_count", count))?;

    let found = ranges.len() - FIXED_FIELDS;
    if declared != found {
        return Err(FrameError::FieldCount { declared, found });
    }

    let mut args = Vec::with_capacity(found);
    for index in 3..ranges.len() - 1 {
        args.push(text(index)?.to_string());
    }
    Ok((task_id, code, args))
}

fn parse_usize(raw: &[u8]) -> Option<usize> {
    if raw.is_empty() || !raw.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(raw).ok()?.parse().ok()
}

/// Trailing bytes of a buffer that ended before an end marker (or before the
/// declared payload was complete).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartialFrame {
    bytes: Bytes,
}

impl PartialFrame {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<&[u8]> for PartialFrame {
    fn from(bytes: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(bytes))
    }
}

/// One element of a decoded read buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    Partial(PartialFrame),
}

/// Decode every complete frame in `buffer`; trailing bytes become a partial.
///
/// Malformed frames are dropped with a warning. An oversized header drops the
/// rest of the buffer, since frame boundaries can no longer be trusted.
pub fn decode(buffer: &[u8]) -> Vec<Decoded> {
    decode_with_config(buffer, &FrameConfig::default())
}

/// [`decode`] with explicit limits.
pub fn decode_with_config(buffer: &[u8], config: &FrameConfig) -> Vec<Decoded> {
    let mut src = BytesMut::from(buffer);
    let mut out = Vec::new();

    loop {
        match decode_frame(&mut src, config) {
            Ok(Some(frame)) => out.push(Decoded::Frame(frame)),
            Ok(None) => {
                if !src.is_empty() {
                    out.push(Decoded::Partial(PartialFrame::new(src.freeze())));
                }
                break;
            }
            Err(err) if err.is_recoverable() => {
                warn!(error = %err, "dropping malformed frame");
            }
            Err(err) => {
                warn!(error = %err, dropped = src.len(), "discarding undecodable buffer");
                break;
            }
        }
    }

    out
}

/// Reassemble two fragments that are the surviving halves of one split frame.
///
/// The result is read as a command frame: a known header code must carry an
/// argument count its header accepts.
pub fn stitch(
    first: PartialFrame,
    second: PartialFrame,
) -> std::result::Result<Frame, StitchError> {
    let mut buf = BytesMut::with_capacity(first.len() + second.len());
    buf.put_slice(first.as_bytes());
    buf.put_slice(second.as_bytes());

    match decode_frame(&mut buf, &FrameConfig::default()) {
        Ok(Some(frame)) if buf.is_empty() => check_arity(frame),
        Ok(Some(_)) => Err(StitchError::Trailing(buf.len())),
        Ok(None) => Err(StitchError::Incomplete),
        Err(FrameError::FieldCount { declared, found }) => {
            Err(StitchError::FieldCount { declared, found })
        }
        Err(err) => Err(StitchError::Malformed(err)),
    }
}

fn check_arity(frame: Frame) -> std::result::Result<Frame, StitchError> {
    let header = Header::ALL.iter().copied().find(|h| h.code() == frame.code);
    match header {
        Some(header) if !header.arity().accepts(frame.args.len()) => Err(StitchError::Arity {
            header,
            expected: header.arity(),
            count: frame.args.len(),
        }),
        _ => Ok(frame),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        Frame::new(-42017, 1).with_args(["3000", "-1", "1"])
    }

    fn wire(frame: &Frame) -> Vec<u8> {
        encode(frame).unwrap().to_vec()
    }

    #[test]
    fn encode_decode_roundtrip() {
        let frame = sample();
        let decoded = decode(&wire(&frame));
        assert_eq!(decoded, vec![Decoded::Frame(frame)]);
    }

    #[test]
    fn wire_layout_is_human_legible() {
        let bytes = wire(&Frame::new(7, -4).with_args(["camera"]));
        assert_eq!(bytes, b"7\x1f-4\x1f1\x1fcamera\x1f0\x1f\x1e\x1f".to_vec());
        assert_eq!(bytes.len(), Frame::new(7, -4).with_args(["camera"]).wire_size());
    }

    #[test]
    fn payload_is_appended_verbatim() {
        // payload deliberately contains delimiter and end-marker bytes
        let payload = vec![DELIM, END_MARKER, DELIM, 0, 255];
        let frame = Frame::new(5, 1)
            .with_args(["0", "jpg"])
            .with_payload(payload.clone());
        let mut buf = BytesMut::from(&wire(&frame)[..]);

        let decoded = decode_frame(&mut buf, &FrameConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(decoded.payload.as_ref(), payload.as_slice());
        assert!(buf.is_empty());
    }

    #[test]
    fn multiple_frames_in_one_buffer() {
        let mut bytes = wire(&Frame::new(1, 0));
        bytes.extend(wire(&Frame::new(2, -5).with_args(["nonce"])));

        let decoded = decode(&bytes);
        assert_eq!(
            decoded,
            vec![
                Decoded::Frame(Frame::new(1, 0)),
                Decoded::Frame(Frame::new(2, -5).with_args(["nonce"])),
            ]
        );
    }

    #[test]
    fn trailing_bytes_become_partial() {
        let first = Frame::new(1, 0);
        let mut bytes = wire(&first);
        let second = wire(&sample());
        bytes.extend_from_slice(&second[..5]);

        let decoded = decode(&bytes);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], Decoded::Frame(first));
        assert_eq!(
            decoded[1],
            Decoded::Partial(PartialFrame::from(&second[..5]))
        );
    }

    #[test]
    fn incomplete_payload_is_partial() {
        let frame = Frame::new(3, 1).with_payload(vec![9u8; 32]);
        let bytes = wire(&frame);
        let mut buf = BytesMut::from(&bytes[..bytes.len() - 4]);
        assert!(decode_frame(&mut buf, &FrameConfig::default())
            .unwrap()
            .is_none());
        assert_eq!(buf.len(), bytes.len() - 4, "buffer left untouched");
    }

    #[test]
    fn stitch_at_every_offset_reproduces_frame() {
        let frame = Frame::new(99, 2)
            .with_args(["0", "wav"])
            .with_payload(vec![DELIM; 6]);
        let bytes = wire(&frame);

        for split in 1..bytes.len() {
            let first = match decode(&bytes[..split]).pop() {
                Some(Decoded::Partial(partial)) => partial,
                other => panic!("offset {split}: expected partial, got {other:?}"),
            };
            let second = PartialFrame::from(&bytes[split..]);
            assert_eq!(stitch(first, second).unwrap(), frame, "offset {split}");
        }
    }

    #[test]
    fn stitch_without_end_marker_fails() {
        let bytes = wire(&sample());
        let result = stitch(
            PartialFrame::from(&bytes[..4]),
            PartialFrame::from(&bytes[4..bytes.len() - 2]),
        );
        assert!(matches!(result, Err(StitchError::Incomplete)));
    }

    #[test]
    fn stitch_rejects_leftover_bytes() {
        let bytes = wire(&sample());
        let mut second = bytes[3..].to_vec();
        second.extend_from_slice(b"12");
        let result = stitch(PartialFrame::from(&bytes[..3]), PartialFrame::new(second));
        assert!(matches!(result, Err(StitchError::Trailing(2))));
    }

    #[test]
    fn stitch_detects_field_count_mismatch() {
        let bytes = b"4\x1f1\x1f3\x1f3000\x1f-1\x1f0\x1f\x1e\x1f";
        let result = stitch(
            PartialFrame::from(&bytes[..6]),
            PartialFrame::from(&bytes[6..]),
        );
        assert!(matches!(
            result,
            Err(StitchError::FieldCount {
                declared: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn stitch_rejects_count_the_header_does_not_take() {
        // kill needs the target task id
        let bytes = wire(&Frame::new(9, Header::KillTask.code()));
        let result = stitch(
            PartialFrame::from(&bytes[..3]),
            PartialFrame::from(&bytes[3..]),
        );
        assert!(matches!(
            result,
            Err(StitchError::Arity {
                header: Header::KillTask,
                count: 0,
                ..
            })
        ));

        let bytes = wire(&Frame::new(9, Header::KillTask.code()).with_args(["41"]));
        let stitched = stitch(
            PartialFrame::from(&bytes[..3]),
            PartialFrame::from(&bytes[3..]),
        )
        .expect("kill with a target should stitch");
        assert_eq!(stitched.args, vec!["41".to_string()]);
    }

    #[test]
    fn malformed_task_id_drops_only_that_frame() {
        let mut bytes = b"abc\x1f1\x1f0\x1f0\x1f\x1e\x1f".to_vec();
        bytes.extend(wire(&Frame::new(8, 0)));

        let mut buf = BytesMut::from(&bytes[..]);
        let err = decode_frame(&mut buf, &FrameConfig::default()).unwrap_err();
        assert!(matches!(err, FrameError::Parse { field: "task_id", .. }));

        let next = decode_frame(&mut buf, &FrameConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(next, Frame::new(8, 0));
        assert_eq!(decode(&bytes), vec![Decoded::Frame(Frame::new(8, 0))]);
    }

    #[test]
    fn malformed_header_code_is_parse_error() {
        let mut buf = BytesMut::from(&b"8\x1fpicture\x1f0\x1f0\x1f\x1e\x1f"[..]);
        let err = decode_frame(&mut buf, &FrameConfig::default()).unwrap_err();
        assert!(matches!(err, FrameError::Parse { field: "code", .. }));
        assert!(buf.is_empty());
    }

    #[test]
    fn reserved_bytes_rejected_on_encode() {
        let frame = Frame::new(1, 1).with_args(["ok", "bad\u{1f}field"]);
        let err = encode(&frame).unwrap_err();
        assert!(matches!(
            err,
            FrameError::ReservedByte {
                index: 1,
                byte: DELIM
            }
        ));
    }

    #[test]
    fn header_ceiling_enforced() {
        let frame = Frame::new(1, 1).with_args(vec!["x".repeat(DEFAULT_MAX_HEADER)]);
        assert!(matches!(
            encode(&frame),
            Err(FrameError::HeaderTooLarge { .. })
        ));

        let mut buf = BytesMut::from(&vec![b'7'; DEFAULT_MAX_HEADER + 1][..]);
        assert!(matches!(
            decode_frame(&mut buf, &FrameConfig::default()),
            Err(FrameError::HeaderTooLarge { .. })
        ));
    }

    #[test]
    fn payload_ceiling_enforced() {
        let cfg = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let frame = Frame::new(1, 1).with_payload(vec![0u8; 8]);
        let mut dst = BytesMut::new();
        assert!(matches!(
            encode_frame(&frame, &mut dst, &cfg),
            Err(FrameError::PayloadTooLarge { size: 8, max: 4 })
        ));

        let mut buf = BytesMut::from(&wire(&frame)[..]);
        assert!(matches!(
            decode_frame(&mut buf, &cfg),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }
}
