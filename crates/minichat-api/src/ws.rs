use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, header},
    response::IntoResponse,
};
use tracing::warn;

use minichat_gateway::connection::handle_connection;
use minichat_gateway::handshake::{self, HandshakeMetadata};

use crate::state::AppState;

/// Upgrade to a gateway connection. The handshake may carry a token (query
/// `token` or `Authorization` header) or, in legacy mode, a claimed username
/// (query `username` or `username` header). A failed handshake still
/// upgrades; the connection starts unauthenticated.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(meta): Query<HandshakeMetadata>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let meta = meta.with_headers(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
        headers.get("username").and_then(|v| v.to_str().ok()),
    );

    let gateway = state.gateway.clone();
    let authenticator = gateway.authenticator.clone();
    let mode = gateway.handshake_mode();
    let identity = match tokio::task::spawn_blocking(move || {
        handshake::resolve(&meta, mode, &authenticator)
    })
    .await
    {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Handshake task failed: {}", e);
            None
        }
    };

    ws.on_upgrade(move |socket| handle_connection(socket, gateway, identity))
}
