//! Connection lifecycle and room orchestration
//!
//! The `ConnectionManager` is the only owner of live connections. It maps
//! them into rooms through the `RoomRegistry`, fans out notices, drives each
//! room's recorder and event log, and decides when a room is torn down.
//!
//! ## Locking
//!
//! ```text
//! registry     std Mutex    membership/presence, never held across .await
//!   └─ events  std Mutex    appends happen inside registry sections
//! connections  std RwLock   outbound handles, cloned out before sending
//! recorders    std Mutex    room id → Arc<RoomRecorder>
//!   └─ slot    tokio Mutex  per room; held across sink I/O, not transcodes
//! ```
//!
//! Broadcasts snapshot recipients under the locks and deliver after
//! releasing them, using a non-blocking enqueue per connection.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, TeardownPolicy};
use crate::error::Result;
use crate::events::{
    ChatEvent, DetachedLogs, Event, EventLog, EventStore, FlushedLogs, SessionEvent, SpeechEvent,
    Stream,
};
use crate::media::{TranscodeProfile, Transcoder};
use crate::recording::{RecordingInfo, RoomRecorder, StopOutcome};
use crate::room::{PresenceSnapshot, RoomRegistry, RoomStatus, TeardownTicket};
use crate::signal::ServerMessage;

/// Serialized notice shared between all recipients of a broadcast
pub type Outbound = Arc<str>;

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

struct ClientConnection {
    room_id: String,
    connection_id: Uuid,
    outbound: mpsc::Sender<Outbound>,
}

/// Identifies one accepted connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    pub client_id: String,
    pub room_id: String,
    pub connection_id: Uuid,
    pub is_host: bool,
}

/// Everything a destroyed room still owned, taken in one step
struct DetachedRoom {
    ticket: TeardownTicket,
    logs: Option<DetachedLogs>,
    recorder: Option<Arc<RoomRecorder>>,
}

/// What a room's teardown wrote out
#[derive(Debug, Clone, Default, Serialize)]
pub struct TeardownReport {
    pub room_id: String,
    pub episode_id: Option<String>,
    pub logs: FlushedLogs,
    /// Artifact of a recording that was still open at teardown
    pub recording: Option<PathBuf>,
    pub recording_error: Option<String>,
}

pub struct ConnectionManager {
    registry: Mutex<RoomRegistry>,
    connections: RwLock<HashMap<String, ClientConnection>>,
    recorders: Mutex<HashMap<String, Arc<RoomRecorder>>>,
    events: Arc<EventLog>,
    transcoder: Arc<dyn Transcoder>,
    lives_dir: PathBuf,
    policy: TeardownPolicy,
    outbound_buffer: usize,
}

impl ConnectionManager {
    pub fn new(config: &Config, store: Arc<dyn EventStore>, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            registry: Mutex::new(RoomRegistry::new()),
            connections: RwLock::new(HashMap::new()),
            recorders: Mutex::new(HashMap::new()),
            events: Arc::new(EventLog::new(store)),
            transcoder,
            lives_dir: config.storage.lives_dir.clone(),
            policy: config.rooms.teardown,
            outbound_buffer: config.rooms.outbound_buffer.max(1),
        }
    }

    /// Bounded queue feeding one connection's writer task
    pub fn outbound_channel(&self) -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
        mpsc::channel(self.outbound_buffer)
    }

    fn registry(&self) -> MutexGuard<'_, RoomRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Register a connection and bring it up to date with the room.
    ///
    /// Other members get `user-joined`; the newcomer gets `users-list` and,
    /// when someone is sharing, `screen-share-started`.
    pub fn connect(
        &self,
        outbound: mpsc::Sender<Outbound>,
        client_id: &str,
        room_id: &str,
        is_host: bool,
    ) -> ClientSession {
        let connection_id = Uuid::new_v4();

        let previous = self.write_connections().insert(
            client_id.to_string(),
            ClientConnection {
                room_id: room_id.to_string(),
                connection_id,
                outbound,
            },
        );
        if let Some(previous) = previous {
            info!(
                "Client {} reconnected, superseding connection in {}",
                client_id, previous.room_id
            );
            if previous.room_id != room_id {
                self.depart(client_id, &previous.room_id);
            }
        }

        let presence = {
            let mut registry = self.registry();
            let presence = registry.join(room_id, client_id, is_host);
            self.events.append(
                room_id,
                Event::Session(SessionEvent::new("join", client_id, now_ms())),
            );
            presence
        };

        info!(
            "Client {} joined {} (host={}, members={})",
            client_id,
            room_id,
            is_host,
            presence.members.len()
        );

        self.broadcast(
            room_id,
            &ServerMessage::UserJoined {
                client_id: client_id.to_string(),
                is_host,
                is_speaker: is_host,
            },
            Some(client_id),
        );

        let sharer = presence.screen_sharer.clone();
        self.send_to(
            client_id,
            &ServerMessage::UsersList {
                users: presence.members,
                screen_sharer: sharer.clone(),
            },
        );
        if let Some(sharer) = sharer.filter(|s| s != client_id) {
            self.send_to(client_id, &ServerMessage::ScreenShareStarted { sender: sharer });
        }

        ClientSession {
            client_id: client_id.to_string(),
            room_id: room_id.to_string(),
            connection_id,
            is_host,
        }
    }

    /// Remove a client from a room.
    ///
    /// Returns the teardown task when this departure destroyed the room.
    pub fn disconnect(&self, client_id: &str, room_id: &str) -> Option<JoinHandle<TeardownReport>> {
        {
            let mut connections = self.write_connections();
            if connections
                .get(client_id)
                .is_some_and(|c| c.room_id == room_id)
            {
                connections.remove(client_id);
            }
        }
        self.depart(client_id, room_id)
    }

    /// Disconnect on behalf of a transport that is closing.
    ///
    /// A no-op if the client has since reconnected; the newer connection owns
    /// the membership now.
    pub fn disconnect_session(&self, session: &ClientSession) -> Option<JoinHandle<TeardownReport>> {
        if !self.is_current(session) {
            debug!(
                "Stale connection {} for {} closed",
                session.connection_id, session.client_id
            );
            return None;
        }
        self.disconnect(&session.client_id, &session.room_id)
    }

    /// Whether `session` is still the client's live connection
    pub fn is_current(&self, session: &ClientSession) -> bool {
        self.read_connections()
            .get(&session.client_id)
            .is_some_and(|c| c.connection_id == session.connection_id)
    }

    fn depart(&self, client_id: &str, room_id: &str) -> Option<JoinHandle<TeardownReport>> {
        let (was_sharer, remaining, ticket) = {
            let mut registry = self.registry();
            if registry.room_of(client_id) != Some(room_id) {
                debug!("Client {} not in {}, nothing to leave", client_id, room_id);
                return None;
            }

            let was_sharer = registry.screen_sharer(room_id).as_deref() == Some(client_id);
            self.events.append(
                room_id,
                Event::Session(SessionEvent::new("leave", client_id, now_ms())),
            );
            let empty = registry.leave(room_id, client_id);
            let ticket = if empty && self.should_tear_down(&registry, room_id) {
                self.detach_room(&mut registry, room_id)
            } else {
                None
            };
            (was_sharer, registry.members(room_id).len(), ticket)
        };

        info!(
            "Client {} left {} ({} remaining)",
            client_id, room_id, remaining
        );

        if was_sharer {
            self.broadcast(
                room_id,
                &ServerMessage::ScreenShareStopped {
                    sender: client_id.to_string(),
                },
                None,
            );
        }
        self.broadcast(
            room_id,
            &ServerMessage::Disconnect {
                client_id: client_id.to_string(),
            },
            Some(client_id),
        );

        ticket.map(|ticket| self.spawn_teardown(ticket))
    }

    fn should_tear_down(&self, registry: &RoomRegistry, room_id: &str) -> bool {
        match self.policy {
            TeardownPolicy::WhenEnded => !registry.is_live(room_id),
            TeardownPolicy::WhenEmpty => true,
        }
    }

    /// Explicit end of the live show.
    ///
    /// An empty room is torn down right away; otherwise the remaining members
    /// are told and teardown waits for the last one to leave.
    pub fn end_live_session(&self, room_id: &str) -> Option<JoinHandle<TeardownReport>> {
        let ticket = {
            let mut registry = self.registry();
            if !registry.contains(room_id) {
                return None;
            }
            registry.mark_live(room_id, false);
            self.detach_room(&mut registry, room_id)
        };

        info!("Live session ended for {}", room_id);

        match ticket {
            Some(ticket) => Some(self.spawn_teardown(ticket)),
            None => {
                self.broadcast(room_id, &ServerMessage::LiveEnded, None);
                None
            }
        }
    }

    /// Destroy an empty room and take its logs and recorder with it.
    ///
    /// Runs under the registry lock, so a client rejoining the same room id
    /// afterwards starts from a clean room.
    fn detach_room(&self, registry: &mut RoomRegistry, room_id: &str) -> Option<DetachedRoom> {
        let ticket = registry.take_for_teardown(room_id)?;
        let logs = self.events.detach(room_id);
        let recorder = self
            .recorders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(room_id);

        Some(DetachedRoom {
            ticket,
            logs,
            recorder,
        })
    }

    /// Flush and release a destroyed room in the background
    fn spawn_teardown(&self, detached: DetachedRoom) -> JoinHandle<TeardownReport> {
        let events = Arc::clone(&self.events);
        let transcoder = Arc::clone(&self.transcoder);

        tokio::spawn(async move {
            let DetachedRoom {
                ticket: TeardownTicket { room_id, episode_id },
                logs,
                recorder,
            } = detached;
            info!("Tearing down room {}", room_id);

            let logs = match logs {
                Some(logs) => events.persist(logs, episode_id.as_deref()).await,
                None => FlushedLogs::default(),
            };

            let mut report = TeardownReport {
                room_id,
                episode_id,
                logs,
                ..Default::default()
            };

            if let Some(recorder) = recorder {
                match recorder.stop(transcoder.as_ref()).await {
                    Ok(StopOutcome::Finalized(path)) => report.recording = Some(path),
                    Ok(StopOutcome::NothingToStop) => {}
                    Err(e) => {
                        error!("Recording for {} lost at teardown: {}", report.room_id, e);
                        report.recording_error = Some(e.to_string());
                    }
                }
            }

            info!("Room {} torn down", report.room_id);
            report
        })
    }

    // ========================================================================
    // Fan-out
    // ========================================================================

    /// Send `message` to every member of `room_id` except `exclude`.
    ///
    /// Returns how many connections accepted it. Full or closed queues are
    /// skipped.
    pub fn broadcast(&self, room_id: &str, message: &ServerMessage, exclude: Option<&str>) -> usize {
        match serde_json::to_string(message) {
            Ok(text) => self.broadcast_raw(room_id, Arc::from(text), exclude),
            Err(e) => {
                error!("Failed to serialize {:?}: {}", message, e);
                0
            }
        }
    }

    /// Fan out an already-encoded payload
    pub fn broadcast_raw(&self, room_id: &str, payload: Outbound, exclude: Option<&str>) -> usize {
        let members = self.registry().members(room_id);

        let targets: Vec<(String, mpsc::Sender<Outbound>)> = {
            let connections = self.read_connections();
            members
                .into_iter()
                .filter(|id| Some(id.as_str()) != exclude)
                .filter_map(|id| {
                    let outbound = connections.get(&id)?.outbound.clone();
                    Some((id, outbound))
                })
                .collect()
        };

        targets
            .into_iter()
            .filter(|(client_id, outbound)| deliver(client_id, outbound, Arc::clone(&payload)))
            .count()
    }

    /// Send to a single client, wherever it is
    pub fn send_to(&self, client_id: &str, message: &ServerMessage) -> bool {
        let Some(outbound) = self
            .read_connections()
            .get(client_id)
            .map(|c| c.outbound.clone())
        else {
            return false;
        };

        match serde_json::to_string(message) {
            Ok(text) => deliver(client_id, &outbound, Arc::from(text)),
            Err(e) => {
                error!("Failed to serialize {:?}: {}", message, e);
                false
            }
        }
    }

    // ========================================================================
    // Presence and room metadata
    // ========================================================================

    pub fn associate_episode(&self, room_id: &str, episode_id: &str) {
        self.registry().associate_episode(room_id, episode_id);
    }

    pub fn presence(&self, room_id: &str) -> Option<PresenceSnapshot> {
        self.registry().presence(room_id)
    }

    pub fn is_live(&self, room_id: &str) -> bool {
        self.registry().is_live(room_id)
    }

    pub fn is_host(&self, room_id: &str, client_id: &str) -> bool {
        self.registry().is_host(room_id, client_id)
    }

    pub fn start_screen_share(&self, session: &ClientSession) {
        self.registry()
            .set_screen_sharer(&session.room_id, Some(&session.client_id));
        self.broadcast(
            &session.room_id,
            &ServerMessage::ScreenShareStarted {
                sender: session.client_id.clone(),
            },
            Some(&session.client_id),
        );
    }

    pub fn stop_screen_share(&self, session: &ClientSession) {
        {
            let mut registry = self.registry();
            if registry.screen_sharer(&session.room_id).as_deref() == Some(session.client_id.as_str()) {
                registry.set_screen_sharer(&session.room_id, None);
            }
        }
        self.broadcast(
            &session.room_id,
            &ServerMessage::ScreenShareStopped {
                sender: session.client_id.clone(),
            },
            Some(&session.client_id),
        );
    }

    /// Audit a speaker-control message, relay it, and apply any change to
    /// the recipient's speaker flag.
    ///
    /// Flag changes are honoured only from a host of the sender's room and
    /// only for members of that room; the audit and relay happen regardless.
    pub fn speaker_control(
        &self,
        session: &ClientSession,
        kind: &str,
        recipient: Option<&str>,
        approved: Option<bool>,
        raw: &str,
    ) {
        let mut event = SessionEvent::new(kind, &session.client_id, now_ms());
        if let Some(recipient) = recipient {
            event = event.with("recipient", recipient);
        }
        if let Some(approved) = approved {
            event = event.with("approved", approved);
        }

        let grant = match (kind, recipient, approved) {
            ("speaker-request-response", Some(recipient), Some(true)) => Some((recipient, true)),
            ("revoke-speaker", Some(recipient), _) => Some((recipient, false)),
            _ => None,
        };

        let applied = {
            let mut registry = self.registry();
            self.events.append(&session.room_id, Event::Session(event));
            match grant {
                Some(_) if !registry.is_host(&session.room_id, &session.client_id) => {
                    warn!(
                        "Ignoring {} from non-host {} in {}",
                        kind, session.client_id, session.room_id
                    );
                    None
                }
                Some((recipient, is_speaker)) => registry
                    .set_speaker(&session.room_id, recipient, is_speaker)
                    .then_some((recipient, is_speaker)),
                None => None,
            }
        };

        self.broadcast_raw(&session.room_id, Arc::from(raw), Some(&session.client_id));

        if let Some((recipient, is_speaker)) = applied {
            self.broadcast(
                &session.room_id,
                &ServerMessage::UserStatusUpdate {
                    client_id: recipient.to_string(),
                    is_speaker,
                },
                None,
            );
        }
    }

    /// Log a speaking-state change and tell the whole room
    pub fn record_speech(
        &self,
        session: &ClientSession,
        speaking: bool,
        client_timestamp: Option<i64>,
        speaking_start: Option<i64>,
    ) {
        let event = SpeechEvent::new(
            &session.client_id,
            now_ms(),
            speaking,
            client_timestamp,
            speaking_start,
        );
        self.events.append(&session.room_id, Event::Speech(event));

        self.broadcast(
            &session.room_id,
            &ServerMessage::UserSpeaking {
                client_id: session.client_id.clone(),
                speaking,
            },
            None,
        );
    }

    /// Log a chat message and deliver it to everyone, sender included
    pub fn chat(&self, session: &ClientSession, message: Value) -> u64 {
        let timestamp = now_ms();
        let sequence = self.events.append(
            &session.room_id,
            Event::Chat(ChatEvent::new(&session.client_id, timestamp, message.clone())),
        );

        self.broadcast(
            &session.room_id,
            &ServerMessage::ChatMessage {
                sender: session.client_id.clone(),
                message,
                timestamp,
                sequence,
            },
            None,
        );
        sequence
    }

    /// Forward an unrecognized message to everyone but its sender
    pub fn relay(&self, session: &ClientSession, raw: &str) -> usize {
        self.broadcast_raw(&session.room_id, Arc::from(raw), Some(&session.client_id))
    }

    // ========================================================================
    // Recording
    // ========================================================================

    fn recorder(&self, room_id: &str) -> Option<Arc<RoomRecorder>> {
        self.recorders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(room_id)
            .cloned()
    }

    fn recorder_or_create(&self, room_id: &str) -> Arc<RoomRecorder> {
        let mut recorders = self.recorders.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(recorders.entry(room_id.to_string()).or_default())
    }

    fn artifact_prefix(&self, room_id: &str) -> String {
        match self.registry().episode_id(room_id) {
            Some(episode_id) => episode_id,
            None => format!("room_{}", room_id),
        }
    }

    /// Open a sink for the room and announce the eventual file name.
    ///
    /// Concurrent starts in one room serialize on the room's recorder; all
    /// but the first fail with `AlreadyRecording`.
    pub async fn start_recording(&self, session: &ClientSession, mime_type: &str) -> Result<RecordingInfo> {
        let prefix = self.artifact_prefix(&session.room_id);
        let info = RecordingInfo::derive(&self.lives_dir, &prefix, mime_type, Utc::now());

        let info = self
            .recorder_or_create(&session.room_id)
            .start(info)
            .await?;

        self.broadcast(
            &session.room_id,
            &ServerMessage::RecordingStarted {
                filename: info.final_filename(),
                sender: session.client_id.clone(),
            },
            Some(&session.client_id),
        );
        Ok(info)
    }

    /// Append a decoded chunk to the room's recording.
    ///
    /// Returns `false` when nothing is recording or the write failed; a
    /// failed chunk is dropped and recording continues.
    pub async fn append_chunk(&self, room_id: &str, bytes: &[u8]) -> bool {
        let Some(recorder) = self.recorder(room_id) else {
            return false;
        };
        match recorder.append(bytes).await {
            Ok(written) => written,
            Err(e) => {
                warn!("Dropping chunk for {}: {}", room_id, e);
                false
            }
        }
    }

    /// Finalize the room's recording and announce the artifact.
    ///
    /// Transcode failures are returned to the caller only; nobody else hears
    /// about them.
    pub async fn stop_recording(&self, session: &ClientSession) -> Result<StopOutcome> {
        let Some(recorder) = self.recorder(&session.room_id) else {
            return Ok(StopOutcome::NothingToStop);
        };

        let outcome = recorder.stop(self.transcoder.as_ref()).await?;
        if let StopOutcome::Finalized(path) = &outcome {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.broadcast(
                &session.room_id,
                &ServerMessage::RecordingStopped {
                    filename,
                    sender: session.client_id.clone(),
                },
                Some(&session.client_id),
            );
        }
        Ok(outcome)
    }

    /// Playable preview of the recording so far, for collaborators such as a
    /// transcription service. `None` when the room is not recording.
    pub async fn snapshot_recording(&self, room_id: &str) -> Result<Option<PathBuf>> {
        let Some(recorder) = self.recorder(room_id) else {
            return Ok(None);
        };
        let Some(info) = recorder.info().await else {
            return Ok(None);
        };

        let stem = info
            .final_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.artifact_prefix(room_id));
        let extension = TranscodeProfile::for_mime(&info.mime_type).extension();
        let dest = self
            .lives_dir
            .join(format!("summary_{}_{}.{}", stem, now_ms(), extension));

        recorder.snapshot(self.transcoder.as_ref(), &dest).await
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub async fn room_status(&self, room_id: &str) -> Option<RoomStatus> {
        let room = self.registry().snapshot(room_id)?;
        let recorder = self.recorder(room_id);

        let (recording, recording_file, last_artifact) = match recorder {
            Some(recorder) => (
                recorder.phase().await,
                recorder.info().await.map(|info| info.final_filename()),
                recorder.last_artifact().await,
            ),
            None => (None, None, None),
        };

        Some(RoomStatus {
            room,
            recording,
            recording_file,
            last_artifact,
            events: self.events.counts(room_id),
        })
    }

    pub async fn rooms(&self) -> Vec<RoomStatus> {
        let ids = self.registry().room_ids();
        let mut statuses = Vec::with_capacity(ids.len());
        for room_id in ids {
            if let Some(status) = self.room_status(&room_id).await {
                statuses.push(status);
            }
        }
        statuses
    }

    /// Latest flushed log of an episode, for collaborators reading history
    pub async fn flushed_log(&self, episode_id: &str, stream: Stream) -> anyhow::Result<Option<Value>> {
        self.events.latest_flushed(stream, episode_id).await
    }

    fn read_connections(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ClientConnection>> {
        self.connections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_connections(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ClientConnection>> {
        self.connections.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Non-blocking enqueue; a slow or gone peer never stalls the others
fn deliver(client_id: &str, outbound: &mpsc::Sender<Outbound>, payload: Outbound) -> bool {
    match outbound.try_send(payload) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Outbound queue full for {}, dropping message", client_id);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Connection for {} already closed", client_id);
            false
        }
    }
}
