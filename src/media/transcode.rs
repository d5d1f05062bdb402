use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::config::TranscodeConfig;
use crate::error::{Result, RoomError};

/// Target container for a finished recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeProfile {
    /// H.264 + AAC in MP4
    Video,
    /// 16-bit PCM WAV at 44.1kHz
    Audio,
}

impl TranscodeProfile {
    pub fn for_mime(mime_type: &str) -> Self {
        if mime_type.contains("video") {
            Self::Video
        } else {
            Self::Audio
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::Audio => "wav",
        }
    }

    fn codec_args(self) -> &'static [&'static str] {
        match self {
            Self::Video => &[
                "-c:v", "libx264", "-preset", "fast", "-crf", "23", "-c:a", "aac", "-b:a", "128k",
            ],
            Self::Audio => &["-acodec", "pcm_s16le", "-ar", "44100"],
        }
    }
}

/// External container conversion step
///
/// Implementations turn `source` into a playable file at `dest` and return
/// the path actually written.
#[async_trait::async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        source: &Path,
        dest: &Path,
        profile: TranscodeProfile,
    ) -> Result<PathBuf>;
}

/// Runs the `ffmpeg` executable as a child process
pub struct FfmpegTranscoder {
    program: String,
    timeout: Option<Duration>,
}

impl FfmpegTranscoder {
    pub fn new(config: &TranscodeConfig) -> Self {
        Self {
            program: config.ffmpeg_path.clone(),
            timeout: config.timeout(),
        }
    }

    fn failure(source: &Path, reason: impl Into<String>) -> RoomError {
        RoomError::Transcode {
            source_path: source.to_path_buf(),
            reason: reason.into(),
        }
    }
}

#[async_trait::async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        source: &Path,
        dest: &Path,
        profile: TranscodeProfile,
    ) -> Result<PathBuf> {
        info!(
            "Transcoding {} -> {} ({:?})",
            source.display(),
            dest.display(),
            profile
        );

        let mut command = Command::new(&self.program);
        command
            .arg("-y")
            .arg("-i")
            .arg(source)
            .args(profile.codec_args())
            .arg(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| Self::failure(source, format!("failed to spawn {}: {}", self.program, e)))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| Self::failure(source, format!("timed out after {:?}", limit)))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| Self::failure(source, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr.lines().last().unwrap_or_default().to_string();
            debug!("ffmpeg stderr: {}", stderr);
            return Err(Self::failure(
                source,
                format!("ffmpeg exited with {}: {}", output.status, tail),
            ));
        }

        Ok(dest.to_path_buf())
    }
}
