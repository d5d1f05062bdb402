//! HTTP and WebSocket server
//!
//! Clients join rooms over a WebSocket; operators use the REST endpoints:
//! - GET /ws/:room_id/:client_id?host=bool&episode=id - Join a room
//! - GET /rooms - Status of every active room
//! - GET /rooms/:room_id - Status of one room
//! - POST /rooms/:room_id/end - End the live session
//! - PUT /rooms/:room_id/episode/:episode_id - Associate an episode
//! - POST /rooms/:room_id/recording/snapshot - Preview the recording so far
//! - GET /episodes/:episode_id/logs/:stream - Latest flushed log of an episode
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;
mod ws;

pub use routes::create_router;
pub use state::AppState;
