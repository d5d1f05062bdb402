//! Per-room speech, session and chat history
//!
//! Events accumulate in memory while the room is alive and are written out
//! once, by the room's teardown, through an `EventStore`.

mod log;
mod store;
mod types;

pub use log::{DetachedLogs, EventCounts, EventLog, FlushedLogs};
pub use store::{EventStore, FsEventStore};
pub use types::{ChatEvent, Event, SessionEvent, SpeechEvent, Stream};
