use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, error, info, warn};

use super::messages::{ClientMessage, ServerMessage};
use crate::manager::{ClientSession, ConnectionManager};
use crate::recording::StopOutcome;

const DEFAULT_MIME_TYPE: &str = "audio/webm";

/// Dispatches inbound text frames for one connection
#[derive(Clone)]
pub struct SignalRouter {
    manager: Arc<ConnectionManager>,
}

impl SignalRouter {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Handle one message from `session`.
    ///
    /// Never fails: bad payloads are logged and dropped, unknown kinds are
    /// relayed to the rest of the room.
    pub async fn route(&self, session: &ClientSession, raw: &str) {
        if !self.manager.is_current(session) {
            debug!(
                "Ignoring message from superseded connection {} ({})",
                session.connection_id, session.client_id
            );
            return;
        }

        match ClientMessage::parse(raw) {
            ClientMessage::AudioChunk { audio: payload } | ClientMessage::VideoChunk { video: payload } => {
                self.append_chunk(session, &payload).await;
            }

            ClientMessage::StartRecording { mime_type } => {
                let mime_type = mime_type.as_deref().unwrap_or(DEFAULT_MIME_TYPE);
                if let Err(e) = self.manager.start_recording(session, mime_type).await {
                    warn!("Start recording rejected for {}: {}", session.room_id, e);
                    self.recording_failed(session, e.to_string());
                }
            }

            ClientMessage::StopRecording => match self.manager.stop_recording(session).await {
                Ok(StopOutcome::Finalized(_)) => {}
                Ok(StopOutcome::NothingToStop) => {
                    debug!("Stop requested in {} with nothing recording", session.room_id);
                }
                Err(e) => {
                    error!("Failed to finalize recording for {}: {}", session.room_id, e);
                    self.recording_failed(session, e.to_string());
                }
            },

            ClientMessage::SpeechEvent {
                speaking,
                timestamp,
                speaking_start,
            } => {
                self.manager.record_speech(
                    session,
                    speaking,
                    timestamp.map(millis),
                    speaking_start.map(millis),
                );
            }

            ClientMessage::StartScreenShare => self.manager.start_screen_share(session),

            ClientMessage::StopScreenShare => self.manager.stop_screen_share(session),

            ClientMessage::SpeakerRequest { recipient } => {
                self.manager
                    .speaker_control(session, "speaker-request", recipient.as_deref(), None, raw);
            }

            ClientMessage::SpeakerRequestResponse { recipient, approved } => {
                self.manager.speaker_control(
                    session,
                    "speaker-request-response",
                    recipient.as_deref(),
                    approved,
                    raw,
                );
            }

            ClientMessage::RevokeSpeaker { recipient } => {
                self.manager
                    .speaker_control(session, "revoke-speaker", recipient.as_deref(), None, raw);
            }

            ClientMessage::ChatMessage { message } => {
                self.manager.chat(session, message);
            }

            ClientMessage::EndLive => {
                if self.manager.is_host(&session.room_id, &session.client_id) {
                    info!("Host {} ended the live in {}", session.client_id, session.room_id);
                    self.manager.end_live_session(&session.room_id);
                } else {
                    warn!(
                        "Ignoring end-live from non-host {} in {}",
                        session.client_id, session.room_id
                    );
                }
            }

            ClientMessage::Unknown => {
                self.manager.relay(session, raw);
            }
        }
    }

    async fn append_chunk(&self, session: &ClientSession, payload: &str) {
        let bytes = match STANDARD.decode(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Dropping undecodable chunk from {}: {}", session.client_id, e);
                return;
            }
        };
        self.manager.append_chunk(&session.room_id, &bytes).await;
    }

    fn recording_failed(&self, session: &ClientSession, reason: String) {
        self.manager
            .send_to(&session.client_id, &ServerMessage::RecordingFailed { reason });
    }
}

/// Client clocks report milliseconds, sometimes fractional
fn millis(value: f64) -> i64 {
    value as i64
}
