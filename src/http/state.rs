use crate::manager::ConnectionManager;
use crate::signal::SignalRouter;
use std::sync::Arc;

/// Shared application state for HTTP and WebSocket handlers
#[derive(Clone)]
pub struct AppState {
    /// Owner of every live connection and room
    pub manager: Arc<ConnectionManager>,

    /// Dispatcher for inbound socket messages
    pub router: SignalRouter,
}

impl AppState {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            router: SignalRouter::new(Arc::clone(&manager)),
            manager,
        }
    }
}
