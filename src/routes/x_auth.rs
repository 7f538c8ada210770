//! Twitter/X OAuth token lifecycle: connect (with live verification), disconnect,
//! status, and a cheap validity probe.

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
use crate::twitter::TwitterError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/x/auth/{userId}/connect", post(connect))
        .route("/x/auth/{userId}/disconnect", delete(disconnect))
        .route("/x/auth/{userId}/status", get(status))
        .route("/x/auth/{userId}/verify", post(verify))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub is_connected: bool,
    pub token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub username: String,
}

/// POST /x/auth/{userId}/connect - probes the supplied access token against
/// Twitter before persisting, unlike the lower-level `/users/.../connect-twitter`.
async fn connect(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(user_id): Path<String>,
    Json(body): Json<ConnectRequest>,
) -> AppResult<Json<Envelope<StatusResponse>>> {
    require_owner(&principal, &user_id)?;

    state
        .twitter
        .verify_tokens(&body.access_token)
        .await
        .map_err(twitter_error_to_app_error)?;

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
    Ok(ok(StatusResponse {
        is_connected: user.is_connected,
        token_expires_at: user.token_expires_at,
    }))
}

/// DELETE /x/auth/{userId}/disconnect
async fn disconnect(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(user_id): Path<String>,
) -> AppResult<Json<Envelope<StatusResponse>>> {
    require_owner(&principal, &user_id)?;
    users::disconnect_twitter(&state.db, &user_id).await?;
    Ok(ok(StatusResponse {
        is_connected: false,
        token_expires_at: None,
    }))
}

/// GET /x/auth/{userId}/status
async fn status(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(user_id): Path<String>,
) -> AppResult<Json<Envelope<StatusResponse>>> {
    require_owner(&principal, &user_id)?;
    let user = users::get_by_id(&state.db, &user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ok(StatusResponse {
        is_connected: user.is_connected,
        token_expires_at: user.token_expires_at,
    }))
}

/// POST /x/auth/{userId}/verify - cheap user-info probe; on a 401 attempts one
/// refresh-and-retry before surfacing failure, per the Twitter Client's error
/// taxonomy.
async fn verify(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(user_id): Path<String>,
) -> AppResult<Json<Envelope<VerifyResponse>>> {
    require_owner(&principal, &user_id)?;

    let user = users::get_by_id(&state.db, &user_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let access_token = state
        .vault
        .decrypt(user.access_token_ciphertext.as_deref())
        .ok_or(AppError::Conflict("account not connected".to_string()))?;

    match state.twitter.verify_tokens(&access_token).await {
        Ok(username) => Ok(ok(VerifyResponse { username })),
        Err(TwitterError::AuthExpired) => {
            let refresh_token = user
                .refresh_token_ciphertext
                .as_deref()
                .and_then(|c| state.vault.decrypt(Some(c)))
                .ok_or(AppError::Conflict("account not connected".to_string()))?;

            let pair = state
                .twitter
                .refresh_tokens(&refresh_token)
                .await
                .map_err(|_| {
                    AppError::UpstreamUnavailable("token refresh failed".to_string())
                })?;

            let access_ciphertext = state
                .vault
                .encrypt(Some(&pair.access_token))
                .ok_or_else(|| AppError::internal("crypto", "failed to encrypt access token"))?;
            let refresh_ciphertext = state
                .vault
                .encrypt(Some(&pair.refresh_token))
                .ok_or_else(|| AppError::internal("crypto", "failed to encrypt refresh token"))?;
            users::update_tokens_after_refresh(
                &state.db,
                &user_id,
                &access_ciphertext,
                &refresh_ciphertext,
                pair.expires_at,
            )
            .await?;

            let username = state
                .twitter
                .verify_tokens(&pair.access_token)
                .await
                .map_err(twitter_error_to_app_error)?;
            Ok(ok(VerifyResponse { username }))
        }
        Err(e) => Err(twitter_error_to_app_error(e)),
    }
}

fn twitter_error_to_app_error(e: TwitterError) -> AppError {
    match e {
        TwitterError::AuthExpired => AppError::Conflict("twitter auth expired".to_string()),
        TwitterError::RateLimited { reset_at } => AppError::RateLimited { reset_at },
        TwitterError::Transient => AppError::UpstreamUnavailable("twitter unavailable".to_string()),
        TwitterError::Fatal { reason } => AppError::UpstreamUnavailable(reason),
    }
}
