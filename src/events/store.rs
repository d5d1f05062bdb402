use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::types::Stream;
use crate::config::StorageConfig;

/// Attempts at finding a free artifact name within one millisecond
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Durable destination for flushed event logs
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    /// Persist one stream's document under `key` (episode id or `room_{id}`)
    /// and return where it landed. Earlier documents for the same key are
    /// kept.
    async fn persist(&self, stream: Stream, key: &str, document: &Value) -> Result<PathBuf>;

    /// Most recently persisted document for `key`, if any
    async fn latest(&self, stream: Stream, key: &str) -> Result<Option<Value>>;
}

/// Writes each stream as pretty JSON into its own directory, one file per
/// flush: `{prefix}_{key}_{%Y%m%d_%H%M%S_%3f}.json`
pub struct FsEventStore {
    speech_dir: PathBuf,
    session_dir: PathBuf,
    chat_dir: PathBuf,
}

impl FsEventStore {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            speech_dir: storage.speech_log_dir.clone(),
            session_dir: storage.session_log_dir.clone(),
            chat_dir: storage.chat_log_dir.clone(),
        }
    }

    fn dir(&self, stream: Stream) -> &PathBuf {
        match stream {
            Stream::Speech => &self.speech_dir,
            Stream::Session => &self.session_dir,
            Stream::Chat => &self.chat_dir,
        }
    }

    pub fn path_for(&self, stream: Stream, key: &str, stamp: &str) -> PathBuf {
        self.dir(stream)
            .join(format!("{}_{}_{}.json", stream.artifact_prefix(), key, stamp))
    }

    /// Every document persisted for `key`, oldest first
    pub async fn history(&self, stream: Stream, key: &str) -> Result<Vec<PathBuf>> {
        let dir = self.dir(stream);
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to list {:?}", dir)),
        };

        let prefix = format!("{}_{}_", stream.artifact_prefix(), key);
        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(order) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(stamp_order)
            else {
                continue;
            };
            found.push((order, entry.path()));
        }

        found.sort();
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }
}

/// Sort key of a `YYYYmmdd_HHMMSS_mmm[_n]` stamp; `None` for anything else,
/// so `ep1` never picks up the logs of `ep1_extra`
fn stamp_order(stamp: &str) -> Option<Vec<u64>> {
    let parts: Vec<&str> = stamp.split('_').collect();
    if !(3..=4).contains(&parts.len()) {
        return None;
    }
    parts
        .iter()
        .map(|part| {
            if !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) {
                part.parse().ok()
            } else {
                None
            }
        })
        .collect()
}

#[async_trait::async_trait]
impl EventStore for FsEventStore {
    async fn persist(&self, stream: Stream, key: &str, document: &Value) -> Result<PathBuf> {
        let dir = self.dir(stream);
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create log directory {:?}", dir))?;

        let body = serde_json::to_vec_pretty(document)?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string();

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = match attempt {
                0 => self.path_for(stream, key, &stamp),
                n => self.path_for(stream, key, &format!("{}_{}", stamp, n)),
            };

            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!("{} taken, trying next name", path.display());
                    continue;
                }
                Err(e) => return Err(e).with_context(|| format!("Failed to create {:?}", path)),
            };

            file.write_all(&body)
                .await
                .with_context(|| format!("Failed to write {:?}", path))?;
            file.flush().await?;

            info!("{:?} log saved: {}", stream, path.display());
            return Ok(path);
        }

        bail!("No free {:?} log name for {} at {}", stream, key, stamp)
    }

    async fn latest(&self, stream: Stream, key: &str) -> Result<Option<Value>> {
        let Some(path) = self.history(stream, key).await?.pop() else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        let document = serde_json::from_slice(&bytes)
            .with_context(|| format!("Corrupt log {:?}", path))?;
        Ok(Some(document))
    }
}
