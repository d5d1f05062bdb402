use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The three independent logs kept per room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Speech,
    Session,
    #[serde(alias = "comments")]
    Chat,
}

impl Stream {
    pub const ALL: [Stream; 3] = [Stream::Speech, Stream::Session, Stream::Chat];

    /// File name prefix of the flushed artifact
    pub fn artifact_prefix(self) -> &'static str {
        match self {
            Stream::Speech => "recording_log",
            Stream::Session => "session_log",
            Stream::Chat => "chat_log",
        }
    }

    /// Key holding the entries inside the flushed document
    pub fn entries_key(self) -> &'static str {
        match self {
            Stream::Chat => "messages",
            _ => "events",
        }
    }
}

/// A speaking-state change reported by a client's voice activity detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechEvent {
    pub client_id: String,
    /// Server append time (ms since epoch)
    pub timestamp: i64,
    pub speaking: bool,
    /// Milliseconds spoken; only on a speaking → silent transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    /// Client-reported time, advisory only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_timestamp: Option<i64>,
}

impl SpeechEvent {
    pub fn new(
        client_id: impl Into<String>,
        timestamp: i64,
        speaking: bool,
        client_timestamp: Option<i64>,
        speaking_start: Option<i64>,
    ) -> Self {
        let end = client_timestamp.unwrap_or(timestamp);
        let duration = if speaking {
            None
        } else {
            speaking_start.map(|start| end.saturating_sub(start).max(0))
        };

        Self {
            client_id: client_id.into(),
            timestamp,
            speaking,
            duration,
            client_timestamp,
        }
    }
}

/// Membership and speaker-control audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// `join`, `leave`, `speaker-request`, ...
    #[serde(rename = "type")]
    pub kind: String,
    pub client_id: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionEvent {
    pub fn new(kind: impl Into<String>, client_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            kind: kind.into(),
            client_id: client_id.into(),
            timestamp,
            extra: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub client_id: String,
    pub timestamp: i64,
    /// Position in the room's chat log, assigned on append
    pub sequence: u64,
    pub message: Value,
}

impl ChatEvent {
    pub fn new(client_id: impl Into<String>, timestamp: i64, message: Value) -> Self {
        Self {
            client_id: client_id.into(),
            timestamp,
            sequence: 0,
            message,
        }
    }
}

/// Immutable once appended
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Speech(SpeechEvent),
    Session(SessionEvent),
    Chat(ChatEvent),
}
