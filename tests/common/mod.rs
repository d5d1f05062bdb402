// Shared fixtures for the integration tests
//
// Builds a ConnectionManager over a temporary directory with fake
// collaborators, and connects clients through in-memory outbound queues.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use podlive::config::StorageConfig;
use podlive::events::{EventStore, FsEventStore, Stream};
use podlive::{
    ClientSession, Config, ConnectionManager, Outbound, RoomError, SignalRouter, TeardownPolicy,
    TranscodeProfile, Transcoder,
};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// "Transcodes" by copying the raw container to the destination
pub struct CopyTranscoder;

#[async_trait::async_trait]
impl Transcoder for CopyTranscoder {
    async fn transcode(
        &self,
        source: &Path,
        dest: &Path,
        _profile: TranscodeProfile,
    ) -> podlive::Result<PathBuf> {
        tokio::fs::copy(source, dest).await?;
        Ok(dest.to_path_buf())
    }
}

/// Always fails, like an ffmpeg that rejects the input
pub struct FailingTranscoder;

#[async_trait::async_trait]
impl Transcoder for FailingTranscoder {
    async fn transcode(
        &self,
        source: &Path,
        _dest: &Path,
        _profile: TranscodeProfile,
    ) -> podlive::Result<PathBuf> {
        Err(RoomError::Transcode {
            source_path: source.to_path_buf(),
            reason: "invalid data found when processing input".to_string(),
        })
    }
}

/// Filesystem store that also remembers every write
pub struct CountingStore {
    inner: FsEventStore,
    writes: Mutex<Vec<(Stream, String)>>,
}

impl CountingStore {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            inner: FsEventStore::new(storage),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn writes(&self, stream: Stream) -> usize {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stream)
            .count()
    }
}

#[async_trait::async_trait]
impl EventStore for CountingStore {
    async fn persist(&self, stream: Stream, key: &str, document: &Value) -> anyhow::Result<PathBuf> {
        self.writes.lock().unwrap().push((stream, key.to_string()));
        self.inner.persist(stream, key, document).await
    }

    async fn latest(&self, stream: Stream, key: &str) -> anyhow::Result<Option<Value>> {
        self.inner.latest(stream, key).await
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
    pub manager: Arc<ConnectionManager>,
    pub router: SignalRouter,
    pub store: Arc<CountingStore>,
}

impl Harness {
    pub fn new(policy: TeardownPolicy) -> anyhow::Result<Self> {
        Self::with_transcoder(policy, Arc::new(CopyTranscoder))
    }

    pub fn with_transcoder(policy: TeardownPolicy, transcoder: Arc<dyn Transcoder>) -> anyhow::Result<Self> {
        let dir = TempDir::new()?;

        let mut config = Config::default();
        config.storage = StorageConfig::rooted_at(dir.path());
        config.rooms.teardown = policy;

        let store = Arc::new(CountingStore::new(&config.storage));
        let manager = Arc::new(ConnectionManager::new(&config, store.clone(), transcoder));
        let router = SignalRouter::new(Arc::clone(&manager));

        Ok(Self {
            dir,
            config,
            manager,
            router,
            store,
        })
    }

    /// Connect a client and return its session with the receiving end of
    /// its outbound queue
    pub fn join(&self, client_id: &str, room_id: &str, is_host: bool) -> Client {
        let (tx, rx) = self.manager.outbound_channel();
        let session = self.manager.connect(tx, client_id, room_id, is_host);
        Client { session, rx }
    }

    pub fn lives_dir(&self) -> &Path {
        &self.config.storage.lives_dir
    }

    pub async fn send(&self, client: &Client, raw: &str) {
        self.router.route(&client.session, raw).await;
    }
}

pub struct Client {
    pub session: ClientSession,
    pub rx: mpsc::Receiver<Outbound>,
}

impl Client {
    /// Everything queued for this client so far, parsed
    pub fn drain(&mut self) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Ok(payload) = self.rx.try_recv() {
            messages.push(serde_json::from_str(&payload).unwrap_or(Value::String(payload.to_string())));
        }
        messages
    }

    /// Queued messages of one `type`
    pub fn drain_kind(&mut self, kind: &str) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter(|m| m["type"] == kind)
            .collect()
    }
}

pub fn read_json(path: &Path) -> anyhow::Result<Value> {
    Ok(serde_json::from_slice(&std::fs::read(path)?)?)
}

pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
