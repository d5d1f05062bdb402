use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::room::PresenceEntry;

/// Messages a client sends over its socket
///
/// Field names are camelCase on the wire. Any `type` not listed here
/// becomes `Unknown` and is relayed verbatim.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Base64-encoded audio bytes
    #[serde(alias = "audio-data")]
    AudioChunk { audio: String },

    /// Base64-encoded video bytes
    #[serde(alias = "video-data")]
    VideoChunk { video: String },

    #[serde(rename_all = "camelCase")]
    StartRecording { mime_type: Option<String> },

    StopRecording,

    #[serde(rename_all = "camelCase")]
    SpeechEvent {
        #[serde(default)]
        speaking: bool,
        timestamp: Option<f64>,
        speaking_start: Option<f64>,
    },

    StartScreenShare,

    StopScreenShare,

    SpeakerRequest { recipient: Option<String> },

    SpeakerRequestResponse {
        recipient: Option<String>,
        approved: Option<bool>,
    },

    RevokeSpeaker { recipient: Option<String> },

    ChatMessage {
        #[serde(default)]
        message: Value,
    },

    /// Host ends the live show from inside the room
    EndLive,

    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse a text frame. Anything unparseable (bad JSON, known type with a
    /// malformed body) is treated as `Unknown` so it still gets relayed.
    pub fn parse(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|e| {
            debug!("Unparsed client message, relaying as-is: {}", e);
            Self::Unknown
        })
    }
}

/// Notices the server sends to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    UserJoined {
        client_id: String,
        is_host: bool,
        is_speaker: bool,
    },

    #[serde(rename_all = "camelCase")]
    UsersList {
        users: Vec<PresenceEntry>,
        screen_sharer: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    UserSpeaking { client_id: String, speaking: bool },

    RecordingStarted { filename: String, sender: String },

    RecordingStopped { filename: String, sender: String },

    /// Sent only to the member whose recording request failed
    RecordingFailed { reason: String },

    ScreenShareStarted { sender: String },

    ScreenShareStopped { sender: String },

    ChatMessage {
        sender: String,
        message: Value,
        timestamp: i64,
        sequence: u64,
    },

    #[serde(rename_all = "camelCase")]
    UserStatusUpdate { client_id: String, is_speaker: bool },

    #[serde(rename_all = "camelCase")]
    Disconnect { client_id: String },

    LiveEnded,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_chunk_names_are_accepted() {
        let msg = ClientMessage::parse(r#"{"type":"audio-data","audio":"AAEC","sender":"a"}"#);
        assert_eq!(msg, ClientMessage::AudioChunk { audio: "AAEC".to_string() });

        let msg = ClientMessage::parse(r#"{"type":"video-chunk","video":"AAEC"}"#);
        assert_eq!(msg, ClientMessage::VideoChunk { video: "AAEC".to_string() });
    }

    #[test]
    fn camel_case_fields() {
        let msg = ClientMessage::parse(
            r#"{"type":"speech-event","speaking":false,"timestamp":2000,"speakingStart":1500.0}"#,
        );
        assert_eq!(
            msg,
            ClientMessage::SpeechEvent {
                speaking: false,
                timestamp: Some(2000.0),
                speaking_start: Some(1500.0),
            }
        );

        let msg = ClientMessage::parse(r#"{"type":"start-recording","mimeType":"video/webm"}"#);
        assert_eq!(
            msg,
            ClientMessage::StartRecording {
                mime_type: Some("video/webm".to_string())
            }
        );
    }

    #[test]
    fn unknown_and_malformed_fall_back() {
        assert_eq!(ClientMessage::parse(r#"{"type":"offer","sdp":"v=0"}"#), ClientMessage::Unknown);
        assert_eq!(ClientMessage::parse(r#"{"type":"audio-chunk"}"#), ClientMessage::Unknown);
        assert_eq!(ClientMessage::parse("not json"), ClientMessage::Unknown);
        assert_eq!(ClientMessage::parse(r#"{"type":"stop-recording","sender":"a"}"#), ClientMessage::StopRecording);
    }

    #[test]
    fn outbound_wire_shape() {
        let json = serde_json::to_value(ServerMessage::UserJoined {
            client_id: "a".to_string(),
            is_host: true,
            is_speaker: true,
        })
        .unwrap();
        assert_eq!(json, json!({"type":"user-joined","clientId":"a","isHost":true,"isSpeaker":true}));

        let json = serde_json::to_value(ServerMessage::LiveEnded).unwrap();
        assert_eq!(json, json!({"type":"live-ended"}));
    }
}
