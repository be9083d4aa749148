//! Protocol vocabulary: command headers, sensors, response kinds, notification
//! codes, and the lookup tables that translate between them and the wire.

use std::collections::HashMap;
use std::fmt;

use crate::error::{FrameError, Result};

/// Command header. The wire carries [`Header::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Header {
    NoOp,
    TakePicture,
    RecordAudio,
    ListenEnvironment,
    GetLocation,
    KillTask,
    KillAll,
    ModifySensor,
    QueryFeatures,
    Ping,
}

/// How many argument fields a header accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Any,
    Exact(usize),
    AtMost(usize),
    /// A sensor name followed by one or more key/value pairs.
    SensorPairs,
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Any => true,
            Arity::Exact(n) => count == n,
            Arity::AtMost(n) => count <= n,
            Arity::SensorPairs => count >= 3 && (count - 1) % 2 == 0,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Any => write!(f, "any number of arguments"),
            Arity::Exact(n) => write!(f, "exactly {n} arguments"),
            Arity::AtMost(n) => write!(f, "at most {n} arguments"),
            Arity::SensorPairs => write!(f, "a sensor followed by key/value pairs"),
        }
    }
}

impl Header {
    pub const ALL: [Header; 10] = [
        Header::NoOp,
        Header::TakePicture,
        Header::RecordAudio,
        Header::ListenEnvironment,
        Header::GetLocation,
        Header::KillTask,
        Header::KillAll,
        Header::ModifySensor,
        Header::QueryFeatures,
        Header::Ping,
    ];

    pub fn code(self) -> i32 {
        match self {
            Header::NoOp => 0,
            Header::TakePicture => 1,
            Header::RecordAudio => 2,
            Header::ListenEnvironment => 3,
            Header::GetLocation => 4,
            Header::KillTask => -1,
            Header::KillAll => -2,
            Header::ModifySensor => -3,
            Header::QueryFeatures => -4,
            Header::Ping => -5,
        }
    }

    pub fn alias(self) -> &'static str {
        match self {
            Header::NoOp => "noop",
            Header::TakePicture => "picture",
            Header::RecordAudio => "audio",
            Header::ListenEnvironment => "environment",
            Header::GetLocation => "location",
            Header::KillTask => "kill",
            Header::KillAll => "killall",
            Header::ModifySensor => "modify",
            Header::QueryFeatures => "features",
            Header::Ping => "ping",
        }
    }

    /// High-priority headers bypass the command queue.
    pub fn is_high_priority(self) -> bool {
        self.code() < 0
    }

    /// The sensor a header always drives. `ModifySensor` and `QueryFeatures`
    /// name theirs in the first argument instead.
    pub fn sensor(self) -> Option<Sensor> {
        match self {
            Header::TakePicture => Some(Sensor::Camera),
            Header::RecordAudio => Some(Sensor::Microphone),
            Header::ListenEnvironment => Some(Sensor::Environment),
            Header::GetLocation => Some(Sensor::Location),
            _ => None,
        }
    }

    /// Headers whose tasks accumulate chunked data.
    pub fn allocates_data(self) -> bool {
        matches!(
            self,
            Header::TakePicture | Header::RecordAudio | Header::ListenEnvironment
        )
    }

    pub fn arity(self) -> Arity {
        match self {
            Header::NoOp => Arity::Any,
            Header::TakePicture | Header::RecordAudio | Header::ListenEnvironment => {
                Arity::AtMost(3)
            }
            Header::GetLocation | Header::KillAll => Arity::Exact(0),
            Header::KillTask => Arity::Exact(1),
            Header::ModifySensor => Arity::SensorPairs,
            Header::QueryFeatures | Header::Ping => Arity::AtMost(1),
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alias())
    }
}

/// Sensors a device may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Sensor {
    Camera,
    Microphone,
    Environment,
    Location,
}

impl Sensor {
    pub const ALL: [Sensor; 4] = [
        Sensor::Camera,
        Sensor::Microphone,
        Sensor::Environment,
        Sensor::Location,
    ];

    pub fn alias(self) -> &'static str {
        match self {
            Sensor::Camera => "camera",
            Sensor::Microphone => "microphone",
            Sensor::Environment => "environment",
            Sensor::Location => "location",
        }
    }

    /// Extra names accepted on input.
    fn alternate_aliases(self) -> &'static [&'static str] {
        match self {
            Sensor::Camera => &["cam"],
            Sensor::Microphone => &["mic"],
            Sensor::Environment => &["env"],
            Sensor::Location => &["gps"],
        }
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alias())
    }
}

/// Kind of a device-to-controller frame. Carried in the frame's code field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// Args: `code, message?`.
    Notify,
    /// Args: `chunk_index, file_type`; payload holds the bytes.
    Data,
    /// Args: capability report.
    Features,
    /// Args: single-shot values such as a location fix.
    Reading,
    Pong,
}

impl ResponseKind {
    pub const ALL: [ResponseKind; 5] = [
        ResponseKind::Notify,
        ResponseKind::Data,
        ResponseKind::Features,
        ResponseKind::Reading,
        ResponseKind::Pong,
    ];

    pub fn code(self) -> i32 {
        match self {
            ResponseKind::Notify => 0,
            ResponseKind::Data => 1,
            ResponseKind::Features => 2,
            ResponseKind::Reading => 3,
            ResponseKind::Pong => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ResponseKind::Notify => "notify",
            ResponseKind::Data => "data",
            ResponseKind::Features => "features",
            ResponseKind::Reading => "reading",
            ResponseKind::Pong => "pong",
        }
    }
}

/// One-character notification codes carried by [`ResponseKind::Notify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    Complete,
    Errored,
    Unsupported,
    Proximity,
    NextChunk,
}

impl Notification {
    pub fn as_char(self) -> char {
        match self {
            Notification::Complete => 'c',
            Notification::Errored => 'e',
            Notification::Unsupported => 'u',
            Notification::Proximity => 'p',
            Notification::NextChunk => 'n',
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(Notification::Complete),
            "e" => Some(Notification::Errored),
            "u" => Some(Notification::Unsupported),
            "p" => Some(Notification::Proximity),
            "n" => Some(Notification::NextChunk),
            _ => None,
        }
    }

    /// Terminal notifications end a task.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Notification::Complete | Notification::Errored | Notification::Unsupported
        )
    }
}

/// Which side of a link a peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Controller,
    Device,
}

impl Role {
    /// Headers this role may put on the wire.
    pub fn can_emit(self, header: Header) -> bool {
        match self {
            Role::Controller => true,
            Role::Device => header == Header::Ping,
        }
    }

    /// Headers this role carries out when received.
    pub fn can_execute(self, header: Header) -> bool {
        match self {
            Role::Controller => header == Header::Ping,
            Role::Device => true,
        }
    }
}

/// Immutable lookup tables for the wire vocabulary.
///
/// Build once with [`Protocol::standard`] and share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Protocol {
    headers_by_code: HashMap<i32, Header>,
    headers_by_alias: HashMap<&'static str, Header>,
    sensors_by_alias: HashMap<&'static str, Sensor>,
    responses_by_code: HashMap<i32, ResponseKind>,
}

impl Protocol {
    pub fn standard() -> Self {
        let headers_by_code = Header::ALL.iter().map(|h| (h.code(), *h)).collect();
        let headers_by_alias = Header::ALL.iter().map(|h| (h.alias(), *h)).collect();
        let sensors_by_alias = Sensor::ALL
            .iter()
            .flat_map(|s| {
                std::iter::once(s.alias())
                    .chain(s.alternate_aliases().iter().copied())
                    .map(move |alias| (alias, *s))
            })
            .collect();
        let responses_by_code = ResponseKind::ALL.iter().map(|k| (k.code(), *k)).collect();

        Self {
            headers_by_code,
            headers_by_alias,
            sensors_by_alias,
            responses_by_code,
        }
    }

    pub fn header(&self, code: i32) -> Result<Header> {
        self.headers_by_code
            .get(&code)
            .copied()
            .ok_or(FrameError::UnknownCode {
                kind: "header",
                code,
            })
    }

    /// Case-insensitive alias lookup.
    pub fn header_by_alias(&self, alias: &str) -> Option<Header> {
        self.headers_by_alias
            .get(alias.to_ascii_lowercase().as_str())
            .copied()
    }

    /// Case-insensitive sensor lookup.
    pub fn sensor(&self, alias: &str) -> Option<Sensor> {
        self.sensors_by_alias
            .get(alias.trim().to_ascii_lowercase().as_str())
            .copied()
    }

    pub fn response_kind(&self, code: i32) -> Result<ResponseKind> {
        self.responses_by_code
            .get(&code)
            .copied()
            .ok_or(FrameError::UnknownCode {
                kind: "response",
                code,
            })
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::standard()
    }
}
