use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::session::{RecordingInfo, RecordingPhase, RecordingSession};
use crate::error::{Result, RoomError};
use crate::media::{TranscodeProfile, Transcoder};

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// No session in Recording; the request raced a stop or never had a start
    NothingToStop,
    Finalized(PathBuf),
}

/// One room's recording slot
///
/// The slot lock serializes starts, appends and stops within a room. It is
/// released while transcoding so a slow transcode never holds it.
#[derive(Default)]
pub struct RoomRecorder {
    slot: Mutex<Option<RecordingSession>>,
}

impl RoomRecorder {
    /// Start a recording unless one is already active
    pub async fn start(&self, info: RecordingInfo) -> Result<RecordingInfo> {
        let mut slot = self.slot.lock().await;

        if let Some(current) = slot.as_ref().filter(|s| s.is_active()) {
            return Err(RoomError::AlreadyRecording(current.info().final_filename()));
        }

        let mut session = RecordingSession::new(info);
        session.begin().await?;
        let info = session.info().clone();
        *slot = Some(session);

        info!("Recording started: {}", info.temp_path.display());
        Ok(info)
    }

    /// Append a decoded chunk; `Ok(false)` if nothing is recording
    pub async fn append(&self, bytes: &[u8]) -> Result<bool> {
        let mut slot = self.slot.lock().await;
        match slot.as_mut() {
            Some(session) => session.append(bytes).await,
            None => Ok(false),
        }
    }

    pub async fn stop(&self, transcoder: &dyn Transcoder) -> Result<StopOutcome> {
        let (sink, info) = {
            let mut slot = self.slot.lock().await;
            let Some(session) = slot.as_mut() else {
                return Ok(StopOutcome::NothingToStop);
            };
            let Some(sink) = session.begin_finalize() else {
                return Ok(StopOutcome::NothingToStop);
            };
            (sink, session.info().clone())
        };

        let result = sink.finalize(transcoder, &info.final_path).await;

        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.as_mut() {
            session.close(result.as_ref().ok().cloned());
        }

        match result {
            Ok(path) => {
                info!("Recording finalized: {}", path.display());
                Ok(StopOutcome::Finalized(path))
            }
            Err(e) => {
                error!(
                    "Recording finalize failed, temp kept at {}: {}",
                    info.temp_path.display(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Transcode the bytes recorded so far into `dest` without stopping.
    ///
    /// The slot is held only while copying the temp file.
    pub async fn snapshot(&self, transcoder: &dyn Transcoder, dest: &Path) -> Result<Option<PathBuf>> {
        let copy = dest.with_extension("partial");

        let checkpoint = {
            let mut slot = self.slot.lock().await;
            match slot.as_mut() {
                Some(session) => session
                    .checkpoint(&copy)
                    .await?
                    .map(|path| (path, TranscodeProfile::for_mime(&session.info().mime_type))),
                None => None,
            }
        };

        let Some((copy, profile)) = checkpoint else {
            return Ok(None);
        };

        let result = transcoder.transcode(&copy, dest, profile).await;
        if let Err(e) = tokio::fs::remove_file(&copy).await {
            warn!("Failed to remove snapshot copy {}: {}", copy.display(), e);
        }
        result.map(Some)
    }

    pub async fn phase(&self) -> Option<RecordingPhase> {
        self.slot.lock().await.as_ref().map(RecordingSession::phase)
    }

    pub async fn info(&self) -> Option<RecordingInfo> {
        self.slot.lock().await.as_ref().map(|s| s.info().clone())
    }

    pub async fn last_artifact(&self) -> Option<PathBuf> {
        self.slot
            .lock()
            .await
            .as_ref()
            .and_then(|s| s.artifact().map(Path::to_path_buf))
    }
}
