//! Per-room recording lifecycle
//!
//! A `RoomRecorder` owns at most one active `RecordingSession`, which in turn
//! owns the `MediaSink` while chunks are arriving.

mod recorder;
mod session;

pub use recorder::{RoomRecorder, StopOutcome};
pub use session::{RecordingInfo, RecordingPhase, RecordingSession, RecordingState};
