use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use minichat_auth::IdentityStore;
use minichat_auth::password::{hash_password, verify_password};
use minichat_db::{format_timestamp, is_unique_violation};
use minichat_types::api::{AuthResponse, LoginRequest, RegisterRequest};
use minichat_types::models::Role;

use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::state::{AppState, run_blocking};

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_string();
    if username.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(ApiError::Validation(
            "username, email and password are required".into(),
        ));
    }

    let st = state.clone();
    let response = run_blocking(move || {
        if st.db.username_exists(&username)? {
            return Err(ApiError::Conflict("Username already exists".into()));
        }
        if st.db.email_exists(&email)? {
            return Err(ApiError::Conflict("Email already in use".into()));
        }

        let password_hash = hash_password(&req.password).map_err(anyhow::Error::from)?;
        let id = Uuid::new_v4();
        let now = format_timestamp(Utc::now());

        // Two concurrent registrations can both pass the checks above; the
        // UNIQUE constraints decide the winner.
        match st.db.create_user(
            &id.to_string(),
            &username,
            &email,
            &password_hash,
            Role::default().as_str(),
            &now,
        ) {
            Ok(()) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(ApiError::Conflict("Username or email already exists".into()));
            }
            Err(e) => return Err(e.into()),
        }

        let token = st.authenticator.tokens().issue(&username)?;
        Ok(AuthResponse {
            token,
            username,
            email,
        })
    })
    .await?;

    info!("Registered user {}", response.username);
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let st = state.clone();
    let response = run_blocking(move || {
        let identity = st
            .db
            .find_identity(&req.username)?
            .ok_or(ApiError::InvalidCredentials)?;

        if !verify_password(&req.password, &identity.password_hash).map_err(anyhow::Error::from)? {
            return Err(ApiError::InvalidCredentials);
        }

        let token = st.authenticator.tokens().issue(&identity.username)?;
        st.db
            .set_online(&identity.username, true, &format_timestamp(Utc::now()))?;

        Ok(AuthResponse {
            token,
            username: identity.username,
            email: identity.email,
        })
    })
    .await?;

    info!("User {} logged in", response.username);
    Ok(Json(response))
}
