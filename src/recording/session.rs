use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Result, RoomError};
use crate::media::{MediaSink, TranscodeProfile};

/// Where a recording lives on disk and what it contains
#[derive(Debug, Clone, Serialize)]
pub struct RecordingInfo {
    pub temp_path: PathBuf,
    pub final_path: PathBuf,
    pub mime_type: String,
    pub has_video: bool,
    pub started_at: DateTime<Utc>,
}

impl RecordingInfo {
    /// Derive temp and final paths for a recording named after `prefix`
    /// (the episode id, or `room_{id}` when no episode is associated).
    ///
    /// Names carry milliseconds and a random tag, so a new recording never
    /// lands on a temp file kept from an earlier failed one.
    pub fn derive(lives_dir: &Path, prefix: &str, mime_type: &str, started_at: DateTime<Utc>) -> Self {
        let tag = Uuid::new_v4().simple().to_string();
        let stem = format!(
            "{}_{}_{}",
            prefix,
            started_at.format("%Y%m%d_%H%M%S_%3f"),
            &tag[..8]
        );
        let profile = TranscodeProfile::for_mime(mime_type);

        Self {
            temp_path: lives_dir.join(format!(
                "temp_{}.{}",
                stem,
                container_extension(mime_type)
            )),
            final_path: lives_dir.join(format!("{}.{}", stem, profile.extension())),
            mime_type: mime_type.to_string(),
            has_video: profile == TranscodeProfile::Video,
            started_at,
        }
    }

    pub fn final_filename(&self) -> String {
        self.final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Extension of the raw container the browser is sending (`audio/ogg` →
/// `ogg`); MediaRecorder output defaults to WebM.
fn container_extension(mime_type: &str) -> &str {
    let subtype = mime_type
        .split(';')
        .next()
        .and_then(|essence| essence.split('/').nth(1))
        .map(str::trim)
        .unwrap_or_default();

    match subtype {
        "ogg" => "ogg",
        "mp4" => "mp4",
        _ => "webm",
    }
}

/// Lifecycle of a single recording. Transitions only move forward:
/// Idle → Recording → Finalizing → Closed.
pub enum RecordingState {
    Idle,
    Recording(MediaSink),
    Finalizing,
    /// Carries the finished artifact, or `None` if finalizing failed
    Closed(Option<PathBuf>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingPhase {
    Idle,
    Recording,
    Finalizing,
    Closed,
}

pub struct RecordingSession {
    info: RecordingInfo,
    state: RecordingState,
}

impl RecordingSession {
    pub fn new(info: RecordingInfo) -> Self {
        Self {
            info,
            state: RecordingState::Idle,
        }
    }

    pub fn info(&self) -> &RecordingInfo {
        &self.info
    }

    pub fn phase(&self) -> RecordingPhase {
        match self.state {
            RecordingState::Idle => RecordingPhase::Idle,
            RecordingState::Recording(_) => RecordingPhase::Recording,
            RecordingState::Finalizing => RecordingPhase::Finalizing,
            RecordingState::Closed(_) => RecordingPhase::Closed,
        }
    }

    /// Anything but Closed blocks a new recording in the same room
    pub fn is_active(&self) -> bool {
        !matches!(self.state, RecordingState::Closed(_))
    }

    pub fn artifact(&self) -> Option<&Path> {
        match &self.state {
            RecordingState::Closed(artifact) => artifact.as_deref(),
            _ => None,
        }
    }

    /// Idle → Recording: open the temp sink
    pub async fn begin(&mut self) -> Result<()> {
        if !matches!(self.state, RecordingState::Idle) {
            return Err(RoomError::AlreadyRecording(self.info.final_filename()));
        }
        let sink = MediaSink::open(&self.info.temp_path, &self.info.mime_type).await?;
        self.state = RecordingState::Recording(sink);
        Ok(())
    }

    /// Append a chunk; `Ok(false)` when not in Recording
    pub async fn append(&mut self, bytes: &[u8]) -> Result<bool> {
        match &mut self.state {
            RecordingState::Recording(sink) => {
                sink.append(bytes).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Copy the bytes recorded so far to `dest`; `None` when not in Recording
    pub async fn checkpoint(&mut self, dest: &Path) -> Result<Option<PathBuf>> {
        match &mut self.state {
            RecordingState::Recording(sink) => sink.checkpoint(dest).await.map(Some),
            _ => Ok(None),
        }
    }

    /// Recording → Finalizing, handing the sink to the caller for transcoding
    pub fn begin_finalize(&mut self) -> Option<MediaSink> {
        if !matches!(self.state, RecordingState::Recording(_)) {
            return None;
        }
        match std::mem::replace(&mut self.state, RecordingState::Finalizing) {
            RecordingState::Recording(sink) => Some(sink),
            _ => None,
        }
    }

    /// Finalizing → Closed. Ignored from any other state.
    pub fn close(&mut self, artifact: Option<PathBuf>) {
        if matches!(self.state, RecordingState::Finalizing) {
            self.state = RecordingState::Closed(artifact);
        }
    }
}
