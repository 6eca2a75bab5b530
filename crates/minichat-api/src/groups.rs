use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use minichat_types::api::CreateGroupRequest;
use minichat_types::models::Group;

use crate::error::ApiResult;
use crate::extract::ApiJson;
use crate::middleware::CurrentUser;
use crate::state::{AppState, run_blocking};

pub async fn create_group(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<CreateGroupRequest>,
) -> ApiResult<impl IntoResponse> {
    let st = state.clone();
    let creator = user.username.clone();
    let group = run_blocking(move || Ok(st.gateway.groups.create(req.name, req.members, &creator)?))
        .await?;

    info!("{} created group {} ({})", user.username, group.id, group.name);
    state.gateway.notify_group_created(&group).await;

    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn list_groups(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> ApiResult<Json<Vec<Group>>> {
    let groups = run_blocking(move || Ok(state.gateway.groups.list()?)).await?;
    Ok(Json(groups))
}

pub async fn groups_for_user(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(username): Path<String>,
) -> ApiResult<Json<Vec<Group>>> {
    let groups =
        run_blocking(move || Ok(state.gateway.groups.groups_containing(&username)?)).await?;
    Ok(Json(groups))
}
