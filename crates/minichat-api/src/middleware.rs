use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use minichat_auth::AuthenticatedUser;

use crate::error::ApiError;
use crate::state::AppState;

/// Path prefixes that skip token verification when no token is sent.
pub const PUBLIC_PATHS: &[&str] = &["/auth/", "/health", "/ws"];

pub fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.iter().any(|prefix| path.starts_with(prefix))
}

/// Attach an [`AuthenticatedUser`] to the request if it carries a valid
/// bearer token for an existing user.
///
/// Never rejects: a missing or bad token just leaves the request without an
/// identity, and [`CurrentUser`] turns that into a 401 where required.
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Some(auth_header) = auth_header else {
        if !is_public(req.uri().path()) {
            debug!("No bearer token on {}", req.uri().path());
        }
        return next.run(req).await;
    };

    let authenticator = state.authenticator.clone();
    match tokio::task::spawn_blocking(move || authenticator.authenticate_bearer(&auth_header)).await {
        Ok(Some(user)) => {
            req.extensions_mut().insert(user);
        }
        Ok(None) => debug!("Bearer token rejected on {}", req.uri().path()),
        Err(e) => warn!("Token verification task failed: {}", e),
    }

    next.run(req).await
}

/// Extractor for handlers that need an authenticated caller.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or(ApiError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_prefixes() {
        assert!(is_public("/auth/login"));
        assert!(is_public("/ws"));
        assert!(is_public("/health"));
        assert!(!is_public("/api/users"));
        assert!(!is_public("/authx"));
    }
}
