use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use super::store::EventStore;
use super::types::{ChatEvent, Event, SessionEvent, SpeechEvent, Stream};

#[derive(Default)]
struct RoomLogs {
    speech: Vec<SpeechEvent>,
    session: Vec<SessionEvent>,
    chat: Vec<ChatEvent>,
}

impl RoomLogs {
    fn entries(&self, stream: Stream) -> serde_json::Result<Value> {
        match stream {
            Stream::Speech => serde_json::to_value(&self.speech),
            Stream::Session => serde_json::to_value(&self.session),
            Stream::Chat => serde_json::to_value(&self.chat),
        }
    }

    fn len(&self, stream: Stream) -> usize {
        match stream {
            Stream::Speech => self.speech.len(),
            Stream::Session => self.session.len(),
            Stream::Chat => self.chat.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventCounts {
    pub speech: usize,
    pub session: usize,
    pub chat: usize,
}

/// Artifact locations from a flush; `None` for empty or failed streams
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushedLogs {
    pub speech: Option<PathBuf>,
    pub session: Option<PathBuf>,
    pub chat: Option<PathBuf>,
}

impl FlushedLogs {
    fn set(&mut self, stream: Stream, path: PathBuf) {
        match stream {
            Stream::Speech => self.speech = Some(path),
            Stream::Session => self.session = Some(path),
            Stream::Chat => self.chat = Some(path),
        }
    }
}

/// A room's logs, removed from the live set and awaiting `persist`
pub struct DetachedLogs {
    room_id: String,
    logs: RoomLogs,
}

/// Ordered per-room speech, session and chat logs
///
/// Order within a stream is append order; client timestamps are carried but
/// never used for sorting.
pub struct EventLog {
    rooms: Mutex<HashMap<String, RoomLogs>>,
    store: Arc<dyn EventStore>,
}

impl EventLog {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Append to the event's stream and return its position in that stream
    pub fn append(&self, room_id: &str, event: Event) -> u64 {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        let logs = rooms.entry(room_id.to_string()).or_default();

        match event {
            Event::Speech(e) => {
                logs.speech.push(e);
                logs.speech.len() as u64 - 1
            }
            Event::Session(e) => {
                logs.session.push(e);
                logs.session.len() as u64 - 1
            }
            Event::Chat(mut e) => {
                e.sequence = logs.chat.len() as u64;
                let sequence = e.sequence;
                logs.chat.push(e);
                sequence
            }
        }
    }

    pub fn counts(&self, room_id: &str) -> EventCounts {
        let rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        rooms
            .get(room_id)
            .map(|logs| EventCounts {
                speech: logs.len(Stream::Speech),
                session: logs.len(Stream::Session),
                chat: logs.len(Stream::Chat),
            })
            .unwrap_or_default()
    }

    /// Take the room's logs out of the live set. Later appends for the same
    /// room id start a fresh set, so a rejoined room never shares entries
    /// with its predecessor.
    pub fn detach(&self, room_id: &str) -> Option<DetachedLogs> {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        rooms.remove(room_id).map(|logs| DetachedLogs {
            room_id: room_id.to_string(),
            logs,
        })
    }

    /// Serialize every non-empty stream of the room to the store.
    ///
    /// The room's logs are drained, so only the first flush of a room
    /// lifetime writes anything.
    pub async fn flush(&self, room_id: &str, episode_id: Option<&str>) -> FlushedLogs {
        match self.detach(room_id) {
            Some(detached) => self.persist(detached, episode_id).await,
            None => FlushedLogs::default(),
        }
    }

    /// Latest document the store holds for one stream of an episode or room
    /// key; earlier lifetimes stay on disk untouched.
    pub async fn latest_flushed(&self, stream: Stream, key: &str) -> anyhow::Result<Option<Value>> {
        self.store.latest(stream, key).await
    }

    /// Write detached logs, one document per non-empty stream.
    ///
    /// A stream that fails to persist is logged and reported as `None`; the
    /// others are still written.
    pub async fn persist(&self, detached: DetachedLogs, episode_id: Option<&str>) -> FlushedLogs {
        let DetachedLogs { room_id, logs } = detached;
        let mut flushed = FlushedLogs::default();

        let key = match episode_id {
            Some(episode_id) => episode_id.to_string(),
            None => format!("room_{}", room_id),
        };
        let session_end = Utc::now().to_rfc3339();

        for stream in Stream::ALL {
            if logs.len(stream) == 0 {
                continue;
            }

            let entries = match logs.entries(stream) {
                Ok(entries) => entries,
                Err(e) => {
                    error!("Failed to serialize {:?} log for {}: {}", stream, room_id, e);
                    continue;
                }
            };

            let mut document = json!({
                "room_id": room_id,
                "episode_id": episode_id,
                "session_end": session_end,
            });
            document[stream.entries_key()] = entries;

            match self.store.persist(stream, &key, &document).await {
                Ok(path) => flushed.set(stream, path),
                Err(e) => error!("Failed to save {:?} log for {}: {:#}", stream, room_id, e),
            }
        }

        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[derive(Default)]
    struct MemoryStore {
        written: Mutex<Vec<(Stream, String, Value)>>,
    }

    #[async_trait::async_trait]
    impl EventStore for MemoryStore {
        async fn persist(&self, stream: Stream, key: &str, document: &Value) -> anyhow::Result<PathBuf> {
            self.written
                .lock()
                .unwrap()
                .push((stream, key.to_string(), document.clone()));
            Ok(Path::new("mem").join(key))
        }

        async fn latest(&self, stream: Stream, key: &str) -> anyhow::Result<Option<Value>> {
            let written = self.written.lock().unwrap();
            Ok(written
                .iter()
                .rev()
                .find(|(s, k, _)| *s == stream && k == key)
                .map(|(_, _, doc)| doc.clone()))
        }
    }

    #[tokio::test]
    async fn flush_writes_non_empty_streams_once() {
        let store = Arc::new(MemoryStore::default());
        let log = EventLog::new(store.clone());

        log.append("r1", Event::Session(SessionEvent::new("join", "a", 1)));
        log.append("r1", Event::Chat(ChatEvent::new("a", 2, json!("hi"))));
        let second = log.append("r1", Event::Chat(ChatEvent::new("a", 3, json!("again"))));
        assert_eq!(second, 1);

        let flushed = log.flush("r1", Some("ep42")).await;
        assert!(flushed.speech.is_none());
        assert!(flushed.session.is_some());
        assert!(flushed.chat.is_some());

        {
            let written = store.written.lock().unwrap();
            assert_eq!(written.len(), 2);
            let (_, key, chat) = written.iter().find(|(s, ..)| *s == Stream::Chat).unwrap();
            assert_eq!(key, "ep42");
            assert_eq!(chat["room_id"], "r1");
            assert_eq!(chat["messages"][1]["sequence"], 1);
        }

        assert_eq!(log.flush("r1", Some("ep42")).await, FlushedLogs::default());
        assert_eq!(store.written.lock().unwrap().len(), 2);

        let latest = log.latest_flushed(Stream::Session, "ep42").await.unwrap().unwrap();
        assert_eq!(latest["events"][0]["type"], "join");
    }

    #[tokio::test]
    async fn key_falls_back_to_room_id() {
        let store = Arc::new(MemoryStore::default());
        let log = EventLog::new(store.clone());

        log.append("r9", Event::Speech(SpeechEvent::new("a", 10, true, None, None)));
        log.flush("r9", None).await;

        let written = store.written.lock().unwrap();
        assert_eq!(written[0].1, "room_r9");
        assert!(written[0].2["episode_id"].is_null());
    }

    #[test]
    fn detached_room_starts_fresh() {
        let log = EventLog::new(Arc::new(MemoryStore::default()));
        log.append("r1", Event::Session(SessionEvent::new("join", "a", 1)));

        assert!(log.detach("r1").is_some());
        log.append("r1", Event::Session(SessionEvent::new("join", "b", 2)));
        assert_eq!(log.counts("r1").session, 1);
    }
}
