//! Room membership, presence and liveness

mod registry;
mod stats;

pub use registry::{
    Lifecycle, PresenceEntry, PresenceSnapshot, RoomRegistry, RoomSnapshot, TeardownTicket,
};
pub use stats::RoomStatus;
