//! Device-token registration for push fan-out (§4.3 DeviceToken sub-contract).

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;
use crate::domain::{device_tokens, users};
use crate::error::{AppError, AppResult, Envelope, ok};
use crate::identity::{Principal, require_owner};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/notifications/{userId}/register", post(register))
        .route("/notifications/{userId}/tokens/{token}", delete(unregister))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    token: String,
    platform: String,
}

#[derive(Debug, Serialize)]
struct Empty {}

/// Upserts by `token`, rebinding ownership if it was previously registered to
/// someone else. Fails with `NotFound` if the user row doesn't exist, per the
/// referential-integrity requirement in §4.3.
async fn register(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(user_id): Path<String>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<Json<Envelope<Empty>>> {
    require_owner(&principal, &user_id)?;

    if !matches!(body.platform.as_str(), "ios" | "android" | "web") {
        return Err(AppError::Validation(
            "platform must be one of ios, android, web".to_string(),
        ));
    }

    users::get_by_id(&state.db, &user_id)
        .await?
        .ok_or(AppError::NotFound)?;

    device_tokens::register(&state.db, &user_id, &body.token, &body.platform).await?;
    Ok(ok(Empty {}))
}

async fn unregister(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path((user_id, token)): Path<(String, String)>,
) -> AppResult<Json<Envelope<Empty>>> {
    require_owner(&principal, &user_id)?;
    device_tokens::unregister(&state.db, &user_id, &token).await?;
    Ok(ok(Empty {}))
}
