//! Typed views over frames: controller-to-device commands and
//! device-to-controller responses.

use std::time::Duration;

use bytes::Bytes;

use crate::codec::Frame;
use crate::error::{CommandError, FrameError, PlanError, Result};
use crate::protocol::{Header, Notification, Protocol, ResponseKind, Sensor};

/// Task id carried by notifications that belong to no task.
pub const UNSOLICITED_TASK_ID: i32 = 0;

/// A command addressed to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub header: Header,
    pub task_id: i32,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(header: Header, task_id: i32, args: Vec<String>) -> Self {
        Self {
            header,
            task_id,
            args,
        }
    }

    pub fn to_frame(&self) -> Frame {
        Frame::new(self.task_id, self.header.code()).with_args(self.args.iter().cloned())
    }

    /// Interpret a decoded frame as a command and check its argument count.
    ///
    /// Ping may use the reserved task id; every other header needs a real one.
    pub fn from_frame(frame: Frame, protocol: &Protocol) -> std::result::Result<Self, CommandError> {
        let header = protocol
            .header(frame.code)
            .map_err(|_| CommandError::UnknownHeader {
                task_id: frame.task_id,
                code: frame.code,
            })?;

        if frame.task_id == UNSOLICITED_TASK_ID && header != Header::Ping {
            return Err(CommandError::ReservedTaskId {
                header: header.alias(),
            });
        }

        let arity = header.arity();
        if !arity.accepts(frame.args.len()) {
            return Err(CommandError::Arity {
                task_id: frame.task_id,
                header: header.alias(),
                expected: arity.to_string(),
                found: frame.args.len(),
            });
        }

        Ok(Self::new(header, frame.task_id, frame.args))
    }

    /// The sensor this command targets, resolving the first argument for
    /// headers that name one.
    pub fn sensor(&self, protocol: &Protocol) -> Option<Sensor> {
        match self.header {
            Header::ModifySensor | Header::QueryFeatures => {
                self.args.first().and_then(|name| protocol.sensor(name))
            }
            other => other.sensor(),
        }
    }
}

/// A frame sent from a device back to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Notify {
        task_id: i32,
        notification: Notification,
        message: Option<String>,
    },
    Data {
        task_id: i32,
        chunk_index: u32,
        file_type: String,
        bytes: Bytes,
    },
    Features {
        task_id: i32,
        report: Vec<String>,
    },
    Reading {
        task_id: i32,
        values: Vec<String>,
    },
    Pong {
        task_id: i32,
    },
}

impl Response {
    pub fn notify(task_id: i32, notification: Notification, message: Option<String>) -> Self {
        Response::Notify {
            task_id,
            notification,
            message,
        }
    }

    pub fn complete(task_id: i32) -> Self {
        Self::notify(task_id, Notification::Complete, None)
    }

    pub fn errored(task_id: i32, message: impl Into<String>) -> Self {
        Self::notify(task_id, Notification::Errored, Some(message.into()))
    }

    pub fn unsupported(task_id: i32, sensor: impl Into<String>) -> Self {
        Self::notify(task_id, Notification::Unsupported, Some(sensor.into()))
    }

    pub fn next_chunk(task_id: i32) -> Self {
        Self::notify(task_id, Notification::NextChunk, None)
    }

    pub fn task_id(&self) -> i32 {
        match self {
            Response::Notify { task_id, .. }
            | Response::Data { task_id, .. }
            | Response::Features { task_id, .. }
            | Response::Reading { task_id, .. }
            | Response::Pong { task_id } => *task_id,
        }
    }

    pub fn kind(&self) -> ResponseKind {
        match self {
            Response::Notify { .. } => ResponseKind::Notify,
            Response::Data { .. } => ResponseKind::Data,
            Response::Features { .. } => ResponseKind::Features,
            Response::Reading { .. } => ResponseKind::Reading,
            Response::Pong { .. } => ResponseKind::Pong,
        }
    }

    /// True for complete, errored and unsupported notifications.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Response::Notify { notification, .. } if notification.is_terminal())
    }

    pub fn to_frame(&self) -> Frame {
        let frame = Frame::new(self.task_id(), self.kind().code());
        match self {
            Response::Notify {
                notification,
                message,
                ..
            } => {
                let mut args = vec![notification.as_char().to_string()];
                args.extend(message.iter().cloned());
                frame.with_args(args)
            }
            Response::Data {
                chunk_index,
                file_type,
                bytes,
                ..
            } => frame
                .with_args([chunk_index.to_string(), file_type.clone()])
                .with_payload(bytes.clone()),
            Response::Features { report, .. } => frame.with_args(report.iter().cloned()),
            Response::Reading { values, .. } => frame.with_args(values.iter().cloned()),
            Response::Pong { .. } => frame,
        }
    }

    pub fn from_frame(frame: Frame, protocol: &Protocol) -> Result<Self> {
        let task_id = frame.task_id;
        let response = match protocol.response_kind(frame.code)? {
            ResponseKind::Notify => {
                let code = frame
                    .arg(0)
                    .ok_or_else(|| FrameError::Invalid("notification without a code".into()))?;
                let notification = Notification::from_code(code).ok_or_else(|| {
                    FrameError::Invalid(format!("unknown notification code {code:?}"))
                })?;
                Response::Notify {
                    task_id,
                    notification,
                    message: frame.arg(1).map(str::to_string),
                }
            }
            ResponseKind::Data => {
                if frame.args.len() != 2 {
                    return Err(FrameError::Invalid(format!(
                        "data frame needs chunk index and file type, got {} fields",
                        frame.args.len()
                    )));
                }
                let chunk_index = frame.args[0]
                    .parse::<u32>()
                    .map_err(|_| FrameError::parse("chunk_index", &frame.args[0]))?;
                let mut args = frame.args.into_iter();
                let file_type = args.nth(1).unwrap_or_default();
                Response::Data {
                    task_id,
                    chunk_index,
                    file_type,
                    bytes: frame.payload,
                }
            }
            ResponseKind::Features => Response::Features {
                task_id,
                report: frame.args,
            },
            ResponseKind::Reading => Response::Reading {
                task_id,
                values: frame.args,
            },
            ResponseKind::Pong => Response::Pong { task_id },
        };
        Ok(response)
    }
}

/// Capture timing parsed from `[interval_ms, duration_ms, max_count]`.
///
/// `-1` leaves duration or count unbounded; missing arguments take the
/// defaults 1000 ms, unbounded, 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePlan {
    pub interval: Duration,
    pub duration: Option<Duration>,
    pub max_count: Option<u32>,
}

const DEFAULT_INTERVAL_MS: i64 = 1000;
const UNBOUNDED: i64 = -1;
const DEFAULT_MAX_COUNT: i64 = 1;

impl Default for CapturePlan {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS as u64),
            duration: None,
            max_count: Some(DEFAULT_MAX_COUNT as u32),
        }
    }
}

impl CapturePlan {
    pub fn from_args(args: &[String]) -> std::result::Result<Self, PlanError> {
        let value = |index: usize, default: i64| -> std::result::Result<i64, PlanError> {
            match args.get(index) {
                None => Ok(default),
                Some(raw) => raw.trim().parse::<i64>().map_err(|_| PlanError::NotANumber {
                    index,
                    value: raw.clone(),
                }),
            }
        };

        let interval = value(0, DEFAULT_INTERVAL_MS)?;
        if interval <= 0 {
            return Err(PlanError::OutOfRange {
                index: 0,
                value: interval,
            });
        }
        let duration = bounded(1, value(1, UNBOUNDED)?)?;
        let max_count = bounded(2, value(2, DEFAULT_MAX_COUNT)?)?;

        if duration.is_none() && max_count.is_none() {
            return Err(PlanError::Unbounded);
        }

        Ok(Self {
            interval: Duration::from_millis(interval as u64),
            duration: duration.map(|ms| Duration::from_millis(ms as u64)),
            max_count: max_count
                .map(|n| u32::try_from(n).map_err(|_| PlanError::OutOfRange { index: 2, value: n }))
                .transpose()?,
        })
    }

    /// Whether another capture may start after `taken` captures and `elapsed`
    /// time.
    pub fn allows(&self, taken: u32, elapsed: Duration) -> bool {
        let under_count = self.max_count.map_or(true, |max| taken < max);
        let under_time = self.duration.map_or(true, |limit| elapsed < limit);
        under_count && under_time
    }

    pub fn to_args(&self) -> Vec<String> {
        vec![
            self.interval.as_millis().to_string(),
            self.duration
                .map_or(UNBOUNDED.to_string(), |d| d.as_millis().to_string()),
            self.max_count
                .map_or(UNBOUNDED.to_string(), |n| n.to_string()),
        ]
    }
}

fn bounded(index: usize, value: i64) -> std::result::Result<Option<i64>, PlanError> {
    match value {
        UNBOUNDED => Ok(None),
        // zero would still take the immediate first capture
        v if v > 0 => Ok(Some(v)),
        v => Err(PlanError::OutOfRange { index, value: v }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn command_from_frame() {
        let protocol = Protocol::standard();
        let frame = Frame::new(31, 1).with_args(["3000", "-1", "1"]);
        let command = Command::from_frame(frame.clone(), &protocol).unwrap();

        assert_eq!(command.header, Header::TakePicture);
        assert_eq!(command.sensor(&protocol), Some(Sensor::Camera));
        assert_eq!(command.to_frame(), frame);
    }

    #[test]
    fn unknown_header_keeps_task_id() {
        let err = Command::from_frame(Frame::new(12, 42), &Protocol::standard()).unwrap_err();
        assert_eq!(err.task_id(), Some(12));
        assert!(matches!(err, CommandError::UnknownHeader { code: 42, .. }));
    }

    #[test]
    fn arity_is_checked() {
        let protocol = Protocol::standard();
        let err = Command::from_frame(Frame::new(3, -1), &protocol).unwrap_err();
        assert!(matches!(err, CommandError::Arity { found: 0, .. }));

        let modify = Frame::new(3, -3).with_args(["camera", "flash"]);
        assert!(Command::from_frame(modify, &protocol).is_err());
    }

    #[test]
    fn reserved_task_id_only_for_ping() {
        let protocol = Protocol::standard();
        assert!(Command::from_frame(Frame::new(0, -5), &protocol).is_ok());
        let err = Command::from_frame(Frame::new(0, 4), &protocol).unwrap_err();
        assert!(matches!(err, CommandError::ReservedTaskId { .. }));
        assert_eq!(err.task_id(), None);
    }

    #[test]
    fn modify_and_query_resolve_sensor_argument() {
        let protocol = Protocol::standard();
        let modify = Command::new(Header::ModifySensor, 5, args(&["MIC", "gain", "3"]));
        assert_eq!(modify.sensor(&protocol), Some(Sensor::Microphone));

        let query_all = Command::new(Header::QueryFeatures, 6, Vec::new());
        assert_eq!(query_all.sensor(&protocol), None);
    }

    #[test]
    fn responses_survive_frames() {
        let protocol = Protocol::standard();
        let responses = [
            Response::complete(9),
            Response::errored(9, "sensor busy"),
            Response::Data {
                task_id: 9,
                chunk_index: 2,
                file_type: "jpg".into(),
                bytes: Bytes::from_static(b"\xff\xd8\x1f\x1e"),
            },
            Response::Features {
                task_id: 9,
                report: args(&["iso", "100", "0", "1", "2", "100", "800"]),
            },
            Response::Reading {
                task_id: 9,
                values: args(&["52.52", "13.40"]),
            },
            Response::Pong { task_id: 0 },
        ];
        for response in responses {
            let back = Response::from_frame(response.to_frame(), &protocol).unwrap();
            assert_eq!(back, response);
        }
    }

    #[test]
    fn malformed_responses_are_rejected() {
        let protocol = Protocol::standard();
        assert!(Response::from_frame(Frame::new(1, 0), &protocol).is_err());
        assert!(Response::from_frame(Frame::new(1, 0).with_args(["z"]), &protocol).is_err());
        let bad_chunk = Frame::new(1, 1).with_args(["first", "jpg"]);
        assert!(matches!(
            Response::from_frame(bad_chunk, &protocol),
            Err(FrameError::Parse {
                field: "chunk_index",
                ..
            })
        ));
    }

    #[test]
    fn terminal_notifications() {
        assert!(Response::complete(1).is_terminal());
        assert!(Response::unsupported(1, "camera").is_terminal());
        assert!(!Response::next_chunk(1).is_terminal());
        assert!(!Response::Pong { task_id: 1 }.is_terminal());
    }

    #[test]
    fn capture_plan_single_shot() {
        let plan = CapturePlan::from_args(&args(&["3000", "-1", "1"])).unwrap();
        assert_eq!(plan.interval, Duration::from_secs(3));
        assert_eq!(plan.duration, None);
        assert_eq!(plan.max_count, Some(1));
        assert!(plan.allows(0, Duration::from_secs(100)));
        assert!(!plan.allows(1, Duration::ZERO));
    }

    #[test]
    fn capture_plan_defaults() {
        assert_eq!(CapturePlan::from_args(&[]).unwrap(), CapturePlan::default());
        assert_eq!(CapturePlan::default().to_args(), args(&["1000", "-1", "1"]));
    }

    #[test]
    fn capture_plan_duration_bound() {
        let plan = CapturePlan::from_args(&args(&["250", "1000", "-1"])).unwrap();
        assert!(plan.allows(500, Duration::from_millis(999)));
        assert!(!plan.allows(0, Duration::from_millis(1000)));
    }

    #[test]
    fn capture_plan_rejects_bad_input() {
        assert_eq!(
            CapturePlan::from_args(&args(&["100", "-1", "-1"])),
            Err(PlanError::Unbounded)
        );
        assert_eq!(
            CapturePlan::from_args(&args(&["0"])),
            Err(PlanError::OutOfRange { index: 0, value: 0 })
        );
        assert_eq!(
            CapturePlan::from_args(&args(&["100", "-5"])),
            Err(PlanError::OutOfRange {
                index: 1,
                value: -5
            })
        );
        assert_eq!(
            CapturePlan::from_args(&args(&["100", "-1", "0"])),
            Err(PlanError::OutOfRange { index: 2, value: 0 })
        );
        assert_eq!(
            CapturePlan::from_args(&args(&["100", "0", "-1"])),
            Err(PlanError::OutOfRange { index: 1, value: 0 })
        );
        assert!(matches!(
            CapturePlan::from_args(&args(&["fast"])),
            Err(PlanError::NotANumber { index: 0, .. })
        ));
    }
}
