//! Engagement Collector HTTP surface (§4.6): on-demand metric refresh for
//! published posts plus the batched and refresh-all variants.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::domain::engagement::{self, Engagement, MetricsSnapshot};
use crate::domain::posts::{self, PostStatus};
use crate::domain::users;
use crate::error::{AppError, AppResult, Envelope, ok};
use crate::identity::{Principal, require_owner};
use crate::twitter::TwitterError;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/engagements", get(list_engagements))
        .route("/engagements/{postIdX}", get(get_engagement))
        .route("/engagements/local/{postIdLocal}", get(get_engagement_by_local_id))
        .route("/engagements/refresh/{postIdX}", post(refresh_one))
        .route("/engagements/refresh/local/{postIdLocal}", post(refresh_one_by_local_id))
        .route("/engagements/refresh/batch", post(refresh_batch))
        .route("/engagements/refreshall", post(refresh_all))
}

async fn list_engagements(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> AppResult<Json<Envelope<Vec<Engagement>>>> {
    let rows = engagement::list_for_user(&state.db, &principal.subject).await?;
    Ok(ok(rows))
}

async fn get_engagement(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(post_id_x): Path<String>,
) -> AppResult<Json<Envelope<Engagement>>> {
    let row = engagement::get_by_post_id_x(&state.db, &post_id_x)
        .await?
        .ok_or(AppError::NotFound)?;
    require_owner(&principal, &row.user_id)?;
    Ok(ok(row))
}

async fn get_engagement_by_local_id(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(post_id_local): Path<Uuid>,
) -> AppResult<Json<Envelope<Engagement>>> {
    let row = engagement::get_by_post_id_local(&state.db, &principal.subject, post_id_local)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ok(row))
}

/// Synchronously calls the Twitter Client, merges metrics per §4.4's
/// non_public -> organic -> public precedence, and appends a time-series
/// datapoint. Refreshing a post that isn't `published` is a conflict: there
/// is nothing upstream to look up yet.
async fn refresh_one(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(post_id_x): Path<String>,
) -> AppResult<Json<Envelope<Engagement>>> {
    let engagement_row = engagement::get_by_post_id_x(&state.db, &post_id_x)
        .await?
        .ok_or(AppError::NotFound)?;
    require_owner(&principal, &engagement_row.user_id)?;

    do_refresh(&state, &engagement_row.user_id, &post_id_x).await.map(ok)
}

async fn refresh_one_by_local_id(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(post_id_local): Path<Uuid>,
) -> AppResult<Json<Envelope<Engagement>>> {
    let engagement_row = engagement::get_by_post_id_local(&state.db, &principal.subject, post_id_local)
        .await?
        .ok_or(AppError::NotFound)?;

    do_refresh(&state, &principal.subject, &engagement_row.post_id_x)
        .await
        .map(ok)
}

#[derive(Debug, Deserialize)]
struct RefreshBatchRequest {
    #[serde(rename = "postIds")]
    post_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshOutcome {
    post_id_x: String,
    success: bool,
    error: Option<String>,
}

async fn refresh_batch(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(body): Json<RefreshBatchRequest>,
) -> AppResult<Json<Envelope<Vec<RefreshOutcome>>>> {
    let mut outcomes = Vec::with_capacity(body.post_ids.len());

    for post_id_x in body.post_ids {
        let outcome = match refresh_owned(&state, &principal, &post_id_x).await {
            Ok(_) => RefreshOutcome {
                post_id_x,
                success: true,
                error: None,
            },
            Err(e) => RefreshOutcome {
                post_id_x,
                success: false,
                error: Some(error_message(&e)),
            },
        };
        outcomes.push(outcome);
    }

    Ok(ok(outcomes))
}

#[derive(Debug, Serialize)]
struct RefreshAllResponse {
    attempted: usize,
    succeeded: usize,
    failed: usize,
}

/// Best-effort: refreshes every engagement row owned by the principal,
/// reporting counts rather than failing the whole request on one bad post.
async fn refresh_all(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> AppResult<Json<Envelope<RefreshAllResponse>>> {
    let rows = engagement::list_for_user(&state.db, &principal.subject).await?;
    let attempted = rows.len();
    let mut succeeded = 0;

    for row in rows {
        if do_refresh(&state, &principal.subject, &row.post_id_x).await.is_ok() {
            succeeded += 1;
        }
    }

    Ok(ok(RefreshAllResponse {
        attempted,
        succeeded,
        failed: attempted - succeeded,
    }))
}

async fn refresh_owned(
    state: &AppState,
    principal: &Principal,
    post_id_x: &str,
) -> AppResult<Engagement> {
    let engagement_row = engagement::get_by_post_id_x(&state.db, post_id_x)
        .await?
        .ok_or(AppError::NotFound)?;
    require_owner(principal, &engagement_row.user_id)?;
    do_refresh(state, &engagement_row.user_id, post_id_x).await
}

async fn do_refresh(state: &AppState, user_id: &str, post_id_x: &str) -> AppResult<Engagement> {
    let post = posts::get_by_post_id_x(&state.db, post_id_x)
        .await?
        .ok_or(AppError::NotFound)?;
    if post.status != PostStatus::Published {
        return Err(AppError::Conflict(
            "post is not published; nothing to refresh".to_string(),
        ));
    }

    let user = users::get_by_id(&state.db, user_id)
        .await?
        .ok_or(AppError::Conflict("account not connected".to_string()))?;
    let access_token = state
        .vault
        .decrypt(user.access_token_ciphertext.as_deref())
        .ok_or(AppError::Conflict("account not connected".to_string()))?;

    let merged = state
        .twitter
        .get_tweet_metrics(&access_token, post_id_x)
        .await
        .map_err(twitter_error_to_app_error)?;

    let snapshot = MetricsSnapshot {
        likes: merged.likes,
        retweets: merged.retweets,
        quotes: merged.quotes,
        replies: merged.replies,
        impressions: merged.impressions,
    };

    engagement::record_refresh(&state.db, post_id_x, snapshot, Utc::now())
        .await?
        .ok_or(AppError::NotFound)
}

fn twitter_error_to_app_error(e: TwitterError) -> AppError {
    match e {
        TwitterError::AuthExpired => AppError::Conflict("twitter auth expired".to_string()),
        TwitterError::RateLimited { reset_at } => AppError::RateLimited { reset_at },
        TwitterError::Transient => AppError::UpstreamUnavailable("twitter unavailable".to_string()),
        TwitterError::Fatal { reason } => AppError::UpstreamUnavailable(reason),
    }
}

fn error_message(e: &AppError) -> String {
    match e {
        AppError::Validation(m) | AppError::Conflict(m) | AppError::UpstreamUnavailable(m) | AppError::Internal(m) => {
            m.clone()
        }
        AppError::Unauthenticated => "unauthenticated".to_string(),
        AppError::NotFound => "not found".to_string(),
        AppError::RateLimited { reset_at } => format!("rate limited until {}", reset_at),
    }
}
