//! User lookup and Twitter connection-status endpoints.

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::users;
use crate::error::{ok, AppError, AppResult, Envelope};
use crate::identity::{require_owner, Principal};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub user_id: String,
    pub is_connected: bool,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<users::User> for UserResponse {
    fn from(u: users::User) -> Self {
        Self {
            user_id: u.user_id,
            is_connected: u.is_connected,
            token_expires_at: u.token_expires_at,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users/me", get(get_me))
        .route("/users/{userId}", get(get_user))
        .route("/users/{userId}/connect-twitter", post(connect_twitter))
        .route(
            "/users/{userId}/disconnect-twitter",
            delete(disconnect_twitter),
        )
        .route(
            "/users/{userId}/connection-status",
            post(set_connection_status),
        )
}

/// GET /users/me - find-or-create the principal's own row.
async fn get_me(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> AppResult<Json<Envelope<UserResponse>>> {
    let user = users::find_or_create(&state.db, &principal.subject).await?;
    Ok(ok(UserResponse::from(user)))
}

/// GET /users/{userId} - same as `/me`, reachable with an explicit id for
/// symmetry with the other `:userId`-scoped routes.
async fn get_user(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(user_id): Path<String>,
) -> AppResult<Json<Envelope<UserResponse>>> {
    require_owner(&principal, &user_id)?;
    let user = users::find_or_create(&state.db, &user_id).await?;
    Ok(ok(UserResponse::from(user)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTwitterRequest {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// POST /users/{userId}/connect-twitter - stores caller-supplied tokens
/// as-is; unlike `/x/auth/{userId}/connect` this does not probe Twitter first.
async fn connect_twitter(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(user_id): Path<String>,
    Json(body): Json<ConnectTwitterRequest>,
) -> AppResult<Json<Envelope<UserResponse>>> {
    require_owner(&principal, &user_id)?;
    users::find_or_create(&state.db, &user_id).await?;

    let access_ciphertext = state
        .vault
        .encrypt(Some(&body.access_token))
        .ok_or_else(|| AppError::internal("crypto", "failed to encrypt access token"))?;
    let refresh_ciphertext = body
        .refresh_token
        .as_deref()
        .and_then(|t| state.vault.encrypt(Some(t)));
    let token_expires_at = body
        .expires_in
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

    users::connect_twitter(
        &state.db,
        &user_id,
        &access_ciphertext,
        refresh_ciphertext.as_deref(),
        token_expires_at,
    )
    .await?;

    let user = users::get_by_id(&state.db, &user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ok(UserResponse::from(user)))
}

/// DELETE /users/{userId}/disconnect-twitter
async fn disconnect_twitter(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(user_id): Path<String>,
) -> AppResult<Json<Envelope<UserResponse>>> {
    require_owner(&principal, &user_id)?;
    users::disconnect_twitter(&state.db, &user_id).await?;

    let user = users::get_by_id(&state.db, &user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ok(UserResponse::from(user)))
}

#[derive(Debug, Deserialize)]
pub struct ConnectionStatusRequest {
    pub connected: bool,
}

/// POST /users/{userId}/connection-status
async fn set_connection_status(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(user_id): Path<String>,
    Json(body): Json<ConnectionStatusRequest>,
) -> AppResult<Json<Envelope<UserResponse>>> {
    require_owner(&principal, &user_id)?;
    users::update_connection_status(&state.db, &user_id, body.connected).await?;

    let user = users::get_by_id(&state.db, &user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ok(UserResponse::from(user)))
}
