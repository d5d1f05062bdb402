//! Client wire protocol and per-message dispatch
//!
//! Every text frame is a JSON object tagged by `type`. Known kinds are
//! handled by the `SignalRouter`; anything else is relayed verbatim to the
//! rest of the room (WebRTC offers, answers, ICE candidates).

mod messages;
mod router;

pub use messages::{ClientMessage, ServerMessage};
pub use router::SignalRouter;
