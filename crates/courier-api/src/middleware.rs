use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

use crate::error::ApiError;
use crate::identity;
use crate::state::{AppState, run_blocking};

/// Resolve the bearer token to a `User` and stash it in the request
/// extensions for handlers to pick up with `Extension<User>`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or(ApiError::Unauthorized)?;
    let token = bearer.token().to_string();

    let user = run_blocking(&state, move |s| identity::resolve(&s.db, &s.tokens, &token)).await?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
