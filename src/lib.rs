pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod manager;
pub mod media;
pub mod recording;
pub mod room;
pub mod signal;

pub use config::{Config, TeardownPolicy};
pub use error::{Result, RoomError};
pub use events::{EventLog, EventStore, FlushedLogs, FsEventStore};
pub use http::{create_router, AppState};
pub use manager::{ClientSession, ConnectionManager, Outbound, TeardownReport};
pub use media::{FfmpegTranscoder, MediaSink, TranscodeProfile, Transcoder};
pub use recording::{RecordingInfo, RoomRecorder, StopOutcome};
pub use room::{PresenceSnapshot, RoomRegistry, RoomStatus};
pub use signal::{ClientMessage, ServerMessage, SignalRouter};
