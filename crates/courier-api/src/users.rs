use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
};
use tracing::info;

use courier_types::api::{UserResponse, UserSearchQuery};
use courier_types::models::User;

use crate::conversations;
use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, run_blocking};

/// GET /users?username=fragment
pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<UserSearchQuery>,
) -> ApiResult<Json<Vec<UserResponse>>> {
    let users = run_blocking(&state, move |s| conversations::search_users(&s.db, &query.username)).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// GET /me: everyone the caller has a conversation with.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<Json<Vec<UserResponse>>> {
    let partners =
        run_blocking(&state, move |s| conversations::list_conversation_partners(&s.db, &user)).await?;
    Ok(Json(partners.into_iter().map(UserResponse::from).collect()))
}

/// DELETE /me: removes the account and every message it sent or received.
/// Attachments stay in the object store.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<StatusCode> {
    let id = user.id;
    let removed = run_blocking(&state, move |s| Ok(s.db.delete_user(id)?)).await?;
    if !removed {
        return Err(ApiError::NotFound("User not found".into()));
    }

    info!("Deleted user {} ({})", user.user_name, user.id);
    Ok(StatusCode::NO_CONTENT)
}
