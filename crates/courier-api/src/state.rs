use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use courier_db::Database;
use courier_storage::ObjectStore;

use crate::error::{ApiError, ApiResult};
use crate::token::TokenService;

pub type AppState = Arc<AppStateInner>;

/// Everything a handler may touch. Built once in `main` from the loaded
/// configuration and shared read-only across requests.
pub struct AppStateInner {
    pub db: Database,
    pub tokens: TokenService,
    pub store: ObjectStore,
    /// Lifetime of access tokens issued at login.
    pub token_ttl: chrono::Duration,
    /// Lifetime of presigned download URLs.
    pub download_ttl: Duration,
    /// Per-file upload limit in bytes.
    pub max_upload_bytes: usize,
}

/// Run a blocking store operation off the async runtime.
pub async fn run_blocking<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&AppStateInner) -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Upstream(anyhow::anyhow!("blocking task failed: {}", e))
        })?
}
