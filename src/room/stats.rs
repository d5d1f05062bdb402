use serde::Serialize;
use std::path::PathBuf;

use super::registry::RoomSnapshot;
use crate::events::EventCounts;
use crate::recording::RecordingPhase;

/// Everything the control API reports about a room
#[derive(Debug, Clone, Serialize)]
pub struct RoomStatus {
    #[serde(flatten)]
    pub room: RoomSnapshot,

    /// Phase of the current or most recent recording
    pub recording: Option<RecordingPhase>,

    /// Final file name of the recording, once known
    pub recording_file: Option<String>,

    /// Artifact of the last successfully finalized recording
    pub last_artifact: Option<PathBuf>,

    /// Events accumulated so far, per stream
    pub events: EventCounts,
}
