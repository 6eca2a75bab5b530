use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::state::AppState;
use crate::{auth, groups, messages, users, ws};

async fn health() -> &'static str {
    "ok"
}

/// All HTTP and WebSocket routes with request authentication applied.
/// CORS and tracing layers are added by the binary.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/health", get(health))
        .route("/ws", get(ws::ws_upgrade));

    let api = Router::new()
        .route("/api/users", get(users::list_users))
        .route("/api/users/search", get(users::search_users))
        .route("/api/groups", post(groups::create_group).get(groups::list_groups))
        .route("/api/groups/{username}", get(groups::groups_for_user))
        .route("/api/messages/{chat_id}", get(messages::chat_history))
        .route("/api/messages/{chat_id}/last", get(messages::last_chat_message))
        .route(
            "/api/messages/group/{group_id}/last",
            get(messages::last_group_message),
        )
        .route("/api/user-chats/{username}", get(messages::user_chats));

    Router::new()
        .merge(public)
        .merge(api)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::authenticate,
        ))
        .with_state(state)
}
