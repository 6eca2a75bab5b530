use axum::{
    Json,
    extract::{Query, State},
};

use minichat_auth::Identity;
use minichat_db::models::UserRow;
use minichat_types::api::UserSearchQuery;
use minichat_types::models::User;

use crate::error::ApiResult;
use crate::middleware::CurrentUser;
use crate::state::{AppState, run_blocking};

fn to_users(rows: Vec<UserRow>) -> anyhow::Result<Vec<User>> {
    rows.into_iter()
        .map(|row| Identity::try_from(row).map(|identity| identity.to_user()))
        .collect()
}

pub async fn list_users(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> ApiResult<Json<Vec<User>>> {
    let users = run_blocking(move || Ok(to_users(state.db.list_users()?)?)).await?;
    Ok(Json(users))
}

/// Case-insensitive substring match on username.
pub async fn search_users(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(params): Query<UserSearchQuery>,
) -> ApiResult<Json<Vec<User>>> {
    let users =
        run_blocking(move || Ok(to_users(state.db.search_users(params.query.trim())?)?)).await?;
    Ok(Json(users))
}
