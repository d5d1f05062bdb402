use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::transcode::{TranscodeProfile, Transcoder};
use crate::error::{Result, RoomError};

/// Append-only temp file receiving raw media chunks
///
/// Each `append` is written and flushed before returning, so a slow disk
/// slows the room feeding it and nothing else.
pub struct MediaSink {
    file: File,
    path: PathBuf,
    mime_type: String,
    bytes_written: u64,
    chunks_written: u64,
}

impl MediaSink {
    /// Create the temp file at `path`. An existing file is never reused, so
    /// bytes kept from a failed recording cannot be truncated.
    pub async fn open(path: impl AsRef<Path>, mime_type: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| RoomError::SinkOpen {
                    path: path.clone(),
                    source,
                })?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| RoomError::SinkOpen {
                path: path.clone(),
                source,
            })?;

        info!("Opened media sink {} ({})", path.display(), mime_type);

        Ok(Self {
            file,
            path,
            mime_type: mime_type.to_string(),
            bytes_written: 0,
            chunks_written: 0,
        })
    }

    pub async fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes).await?;
        self.file.flush().await?;
        self.bytes_written += bytes.len() as u64;
        self.chunks_written += 1;
        Ok(())
    }

    pub fn profile(&self) -> TranscodeProfile {
        TranscodeProfile::for_mime(&self.mime_type)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn chunks_written(&self) -> u64 {
        self.chunks_written
    }

    /// Copy what has been written so far to `dest` without closing the sink.
    /// Recording continues afterwards; the copy can be transcoded at leisure.
    pub async fn checkpoint(&mut self, dest: &Path) -> Result<PathBuf> {
        self.file.flush().await?;
        self.file.sync_data().await?;
        fs::copy(&self.path, dest).await?;
        Ok(dest.to_path_buf())
    }

    /// Close the temp file and transcode it into `final_path`.
    ///
    /// The temp file is removed only after a successful transcode; on failure
    /// it stays on disk and the error is returned.
    pub async fn finalize(self, transcoder: &dyn Transcoder, final_path: &Path) -> Result<PathBuf> {
        let profile = self.profile();
        let Self {
            mut file,
            path,
            mime_type,
            bytes_written,
            chunks_written,
        } = self;

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        info!(
            "Finalizing {} ({} chunks, {} bytes, {})",
            path.display(),
            chunks_written,
            bytes_written,
            mime_type
        );

        let artifact = transcoder.transcode(&path, final_path, profile).await?;

        if let Err(e) = fs::remove_file(&path).await {
            warn!("Failed to remove temp sink {}: {}", path.display(), e);
        }

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn open_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/temp_room.webm");

        let mut sink = MediaSink::open(&path, "audio/webm").await.unwrap();
        sink.append(b"abc").await.unwrap();
        sink.append(b"def").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
        assert_eq!(sink.chunks_written(), 2);
        assert_eq!(sink.bytes_written(), 6);
        assert_eq!(sink.profile(), TranscodeProfile::Audio);
    }

    #[tokio::test]
    async fn open_never_truncates_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("temp_room.webm");
        std::fs::write(&path, b"kept bytes").unwrap();

        let err = MediaSink::open(&path, "audio/webm").await.err().unwrap();
        assert!(matches!(err, RoomError::SinkOpen { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), b"kept bytes");
    }

    #[tokio::test]
    async fn open_fails_when_not_writable() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        // A regular file cannot be used as a directory
        let err = MediaSink::open(blocker.join("temp.webm"), "audio/webm")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RoomError::SinkOpen { .. }));
    }
}
