//! Errors reported back to the member whose request failed

use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, RoomError>;

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("a recording ({0}) is already active")]
    AlreadyRecording(String),

    #[error("failed to open sink {path:?}: {source}")]
    SinkOpen { path: PathBuf, source: io::Error },

    #[error("failed to write sink: {0}")]
    SinkWrite(#[from] io::Error),

    #[error("transcode of {source_path:?} failed: {reason}")]
    Transcode { source_path: PathBuf, reason: String },
}
