use super::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Joins with host privileges (speaker from the start, may end the live)
    #[serde(default)]
    pub host: bool,

    /// Episode the room's artifacts are named after
    pub episode: Option<String>,
}

/// GET /ws/:room_id/:client_id
/// Upgrade to a room connection
pub async fn room_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((room_id, client_id)): Path<(String, String)>,
    Query(params): Query<ConnectParams>,
) -> Response {
    ws.on_upgrade(move |socket| handle_room_socket(socket, state, room_id, client_id, params))
}

async fn handle_room_socket(
    socket: WebSocket,
    state: AppState,
    room_id: String,
    client_id: String,
    params: ConnectParams,
) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = state.manager.outbound_channel();

    // Writer: drains this connection's queue so broadcasts never wait on us
    let writer = tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if sink.send(Message::Text(payload.to_string())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let session = state
        .manager
        .connect(outbound_tx, &client_id, &room_id, params.host);
    if let Some(episode_id) = params.episode.as_deref() {
        state.manager.associate_episode(&room_id, episode_id);
    }

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => state.router.route(&session, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                debug!("Ignoring binary frame from {}", client_id);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Socket error for {} in {}: {}", client_id, room_id, e);
                break;
            }
        }
    }

    info!(
        "Socket closed for {} in {} (host={})",
        client_id, room_id, session.is_host
    );
    state.manager.disconnect_session(&session);
    writer.abort();
}
