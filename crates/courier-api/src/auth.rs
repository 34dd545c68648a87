use axum::{Form, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;
use validator::Validate;

use courier_types::api::{LoginForm, LoginResponse, RegisterRequest, UserResponse};
use courier_types::models::User;

use crate::error::{ApiError, ApiResult};
use crate::password::{hash_password, verify_password};
use crate::state::{AppState, run_blocking};

/// POST /register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_registration(&req)?;

    let user = run_blocking(&state, move |s| {
        let password_hash = hash_password(&req.password)?;

        s.db.create_user(&req.user_name, &req.email, &password_hash)?
            .map(User::from)
            .ok_or_else(|| ApiError::Conflict("User already exists".into()))
    })
    .await?;

    info!("Registered user {} ({})", user.user_name, user.id);
    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// POST /token: OAuth2 password flow.
pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> ApiResult<Json<LoginResponse>> {
    if form.username.is_empty() || form.password.is_empty() {
        return Err(ApiError::BadRequest("Insufficient data".into()));
    }

    let user = run_blocking(&state, move |s| {
        let row = s
            .db
            .get_user_by_username(&form.username)?
            .ok_or(ApiError::Unauthorized)?;

        if !verify_password(&form.password, &row.hashed_pwd)? {
            return Err(ApiError::Unauthorized);
        }
        Ok(User::from(row))
    })
    .await?;

    let access_token = state
        .tokens
        .issue(&user.user_name, state.token_ttl)
        .map_err(|e| ApiError::Upstream(e.into()))?;

    Ok(Json(LoginResponse {
        access_token,
        username: user.user_name,
        id: user.id,
        token_type: "bearer".into(),
    }))
}

fn validate_registration(req: &RegisterRequest) -> ApiResult<()> {
    req.validate()?;
    if req.user_name.trim() != req.user_name {
        return Err(ApiError::BadRequest("user_name must not start or end with whitespace".into()));
    }
    Ok(())
}
