use std::sync::Arc;

use minichat_auth::{Authenticator, TokenService};
use minichat_db::Database;
use minichat_gateway::{Gateway, GatewayConfig};

use crate::error::{ApiError, ApiResult};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub authenticator: Authenticator,
    pub gateway: Gateway,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, tokens: TokenService, config: GatewayConfig) -> AppState {
        let authenticator = Authenticator::new(tokens, db.clone());
        let gateway = Gateway::new(db.clone(), authenticator.clone(), config);
        Arc::new(Self {
            db,
            authenticator,
            gateway,
        })
    }
}

/// Run blocking storage work off the async runtime.
pub async fn run_blocking<F, T>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
}
