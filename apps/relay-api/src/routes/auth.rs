//! Auth routes: credential login that issues gateway bearer tokens.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiError, ApiErrorBody};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/auth/login", post(login))
}

// ---------------------------------------------------------------------------
// POST /api/v1/auth/login
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    /// Bearer token to present in the gateway IDENTIFY frame.
    pub token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub user: UserInfo,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserInfo {
    pub username: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Missing username", body = ApiErrorBody),
        (status = 401, description = "Invalid credentials", body = ApiErrorBody),
    ),
)]
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let username = body.username.as_str();
    if username.trim().is_empty() {
        return Err(ApiError::bad_request("username is required"));
    }

    if !state.users.check(username, &body.password) {
        tracing::debug!(%username, "login rejected");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let token = state.tokens.mint(username)?;
    tracing::info!(%username, "issued gateway token");

    Ok(Json(LoginResponse {
        token,
        token_type: "Bearer".to_string(),
        expires_in: state.tokens.ttl_secs(),
        user: UserInfo {
            username: username.to_string(),
        },
    }))
}
