use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use minichat_gateway::store::message_from_row;
use minichat_types::models::Message;

use crate::error::ApiResult;
use crate::middleware::CurrentUser;
use crate::state::{AppState, run_blocking};

/// Full history of a chat, oldest first.
pub async fn chat_history(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    let rows = run_blocking(move || Ok(state.db.messages_for_chat(&chat_id)?)).await?;
    Ok(Json(rows.into_iter().map(message_from_row).collect()))
}

fn last_or_empty(message: Option<Message>) -> Response {
    match message {
        Some(message) => Json(message).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

pub async fn last_chat_message(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(chat_id): Path<String>,
) -> ApiResult<Response> {
    let row = run_blocking(move || Ok(state.db.last_message_for_chat(&chat_id)?)).await?;
    Ok(last_or_empty(row.map(message_from_row)))
}

pub async fn last_group_message(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(group_id): Path<i64>,
) -> ApiResult<Response> {
    let row = run_blocking(move || Ok(state.db.last_message_for_group(group_id)?)).await?;
    Ok(last_or_empty(row.map(message_from_row)))
}

/// Chat ids the user has taken part in.
pub async fn user_chats(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(username): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    let chats = run_blocking(move || Ok(state.db.chat_ids_for_user(&username)?)).await?;
    Ok(Json(chats))
}
