use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{auth, files, messages, users};

/// Room for multipart boundaries and the text field on top of one file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// All routes, with authentication applied to the protected half. CORS and
/// request tracing are left to the binary.
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes + MULTIPART_OVERHEAD;

    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/register", post(auth::register))
        .route("/token", post(auth::login))
        .route("/users", get(users::search_users))
        .route("/files/{key}", get(files::serve_file));

    let protected_routes = Router::new()
        .route("/me", get(users::list_conversations).delete(users::delete_account))
        .route(
            "/me/{username}",
            get(messages::get_messages)
                .post(messages::send_message)
                .put(messages::edit_message)
                .delete(messages::delete_message),
        )
        .route("/files", post(files::upload_file))
        .route("/download/{key}", get(files::get_download_url))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
