//! Publication algorithm (§4.5.2) and retry policy (§4.5.3).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rand::Rng;
use uuid::Uuid;

use crate::domain::posts::Post;
use crate::domain::{engagement, posts, users};
use crate::notifier;
use crate::twitter::TwitterError;
use crate::AppState;

const CLAIM_BATCH_SIZE: i64 = 32;
const DEFAULT_CONCURRENCY: usize = 8;

fn concurrency() -> usize {
    std::env::var("SCHEDULER_CONCURRENCY")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_CONCURRENCY)
}

/// Claims and publishes everything currently due, bounded by `concurrency()`
/// in-flight publishes at a time.
pub async fn run_publish_cycle(state: &Arc<AppState>) -> Result<(), sqlx::Error> {
    let due = posts::list_due_for_publish(&state.db, CLAIM_BATCH_SIZE).await?;
    if due.is_empty() {
        return Ok(());
    }

    let limit = concurrency();
    let mut tasks = tokio::task::JoinSet::new();
    for post_id in due {
        if tasks.len() >= limit {
            tasks.join_next().await;
        }
        let state = state.clone();
        tasks.spawn(async move {
            if let Err(e) = publish_one(&state, post_id).await {
                error!("[scheduler] publish {} errored: {}", post_id, e);
            }
        });
    }
    while tasks.join_next().await.is_some() {}

    Ok(())
}

/// What a publish attempt resolved to, after Twitter-error classification.
enum Outcome {
    /// A 401 from a call made with an already-fresh-looking token; worth one
    /// in-line refresh-and-retry before giving up.
    AuthExpiredRetry,
    /// Eligible for exponential-backoff retry; consumes an attempt.
    Retry(String),
    /// 429; reschedule at `reset_at` without consuming an attempt.
    RateLimited(DateTime<Utc>),
    /// Not retried.
    Fatal(String),
}

impl From<TwitterError> for Outcome {
    fn from(e: TwitterError) -> Self {
        match e {
            TwitterError::AuthExpired => Outcome::AuthExpiredRetry,
            TwitterError::RateLimited { reset_at } => Outcome::RateLimited(reset_at),
            TwitterError::Transient => Outcome::Retry("transient twitter error".to_string()),
            TwitterError::Fatal { reason } => Outcome::Fatal(reason),
        }
    }
}

async fn publish_one(state: &Arc<AppState>, post_id: Uuid) -> Result<(), sqlx::Error> {
    if !posts::try_claim_for_publish(&state.db, post_id).await? {
        return Ok(());
    }

    let Some(post) = posts::get_by_id(&state.db, post_id).await? else {
        return Ok(());
    };

    match do_publish(state, &post).await {
        Ok(tweet_id) => {
            posts::mark_published(&state.db, post.id, &tweet_id).await?;
            engagement::create(&state.db, &post.user_id, post.post_id_local, &tweet_id).await?;
            info!("[scheduler] published post {} as tweet {}", post.id, tweet_id);

            if let Some(published) = posts::get_by_id(&state.db, post.id).await? {
                notifier::notify_published(
                    &state.db,
                    state.vapid_private_key.as_deref(),
                    &post.user_id,
                    &published,
                )
                .await;
            }
        }
        Err(Outcome::AuthExpiredRetry) => {
            // Proactive refresh in `do_publish` already handles near-expiry tokens; a
            // 401 reaching here means the token was invalid despite that check, so
            // there is no further in-line retry left to attempt.
            fail_or_retry(state, &post, "twitter auth expired").await?;
        }
        Err(Outcome::Retry(reason)) => {
            fail_or_retry(state, &post, &reason).await?;
        }
        Err(Outcome::RateLimited(reset_at)) => {
            let run_at = reset_at.max(
                Utc::now() + chrono::Duration::seconds(state.retry_policy.rate_limit_min_delay_secs),
            );
            posts::reschedule_rate_limited(&state.db, post.id, run_at).await?;
            warn!("[scheduler] post {} rate limited, retrying at {}", post.id, run_at);
        }
        Err(Outcome::Fatal(reason)) => {
            posts::mark_failed(&state.db, post.id, &reason).await?;
            warn!("[scheduler] post {} failed permanently: {}", post.id, reason);
        }
    }

    Ok(())
}

/// Applies the retry policy's exponential backoff, or gives up if `attempt`
/// has reached `max_attempts`.
async fn fail_or_retry(state: &Arc<AppState>, post: &Post, reason: &str) -> Result<(), sqlx::Error> {
    if post.attempt + 1 >= state.retry_policy.max_attempts {
        posts::mark_failed(&state.db, post.id, reason).await?;
        warn!(
            "[scheduler] post {} exhausted {} attempts, giving up: {}",
            post.id, state.retry_policy.max_attempts, reason
        );
        return Ok(());
    }

    let base = state.retry_policy.base_delay_secs;
    let exp = 2u64.saturating_pow(post.attempt.max(0) as u32);
    let delay_secs = base.saturating_mul(exp);
    let jitter = 1.0 + rand::rng().random_range(-0.2..=0.2);
    let delay_secs = ((delay_secs as f64) * jitter).max(1.0) as i64;
    let run_at = Utc::now() + chrono::Duration::seconds(delay_secs);

    posts::reschedule_retry(&state.db, post.id, run_at, Uuid::new_v4()).await?;
    warn!(
        "[scheduler] post {} retrying at {} (attempt {}): {}",
        post.id, run_at, post.attempt + 1, reason
    );
    Ok(())
}

/// Implements publication algorithm steps 3-6: decrypt/refresh tokens, upload
/// images in order, then create the tweet.
async fn do_publish(state: &Arc<AppState>, post: &Post) -> Result<String, Outcome> {
    let user = users::get_by_id(&state.db, &post.user_id)
        .await
        .map_err(|e| Outcome::Fatal(format!("db error: {}", e)))?
        .ok_or_else(|| Outcome::Fatal("account disconnected".to_string()))?;

    let access_token = state.vault.decrypt(user.access_token_ciphertext.as_deref());
    let refresh_token = state.vault.decrypt(user.refresh_token_ciphertext.as_deref());
    let (mut access_token, refresh_token) = match (access_token, refresh_token) {
        (Some(a), Some(r)) => (a, r),
        _ => return Err(Outcome::Fatal("account disconnected".to_string())),
    };

    let near_expiry = user
        .token_expires_at
        .map(|exp| exp <= Utc::now() + chrono::Duration::seconds(60))
        .unwrap_or(false);

    if near_expiry {
        access_token = refresh_or_disconnect(state, &post.user_id, &refresh_token).await?;
    }

    match try_upload_and_tweet(state, post, &access_token).await {
        Err(Outcome::AuthExpiredRetry) => {
            let access_token = refresh_or_disconnect(state, &post.user_id, &refresh_token).await?;
            try_upload_and_tweet(state, post, &access_token)
                .await
                .map_err(|e| match e {
                    Outcome::AuthExpiredRetry => {
                        Outcome::Fatal("twitter auth expired after refresh attempt".to_string())
                    }
                    other => other,
                })
        }
        other => other,
    }
}

/// Attempts a refresh-and-persist; on failure marks the user disconnected
/// (per §4.5.2 step 4) and fails the post rather than leaving stale tokens
/// that would just be retried against Twitter again next tick.
async fn refresh_or_disconnect(
    state: &Arc<AppState>,
    user_id: &str,
    refresh_token: &str,
) -> Result<String, Outcome> {
    match refresh_and_persist(state, user_id, refresh_token).await {
        Ok(access_token) => Ok(access_token),
        Err(_) => {
            error!("[scheduler] token refresh failed for {}; disconnecting", user_id);
            if let Err(e) = users::update_connection_status(&state.db, user_id, false).await {
                error!("[scheduler] failed to disconnect {} after refresh failure: {}", user_id, e);
            }
            Err(Outcome::Fatal("token refresh failed".to_string()))
        }
    }
}

async fn refresh_and_persist(
    state: &Arc<AppState>,
    user_id: &str,
    refresh_token: &str,
) -> Result<String, TwitterError> {
    let pair = state.twitter.refresh_tokens(refresh_token).await?;

    let access_ciphertext = state
        .vault
        .encrypt(Some(&pair.access_token))
        .expect("encrypting Some(_) always succeeds");
    let refresh_ciphertext = state
        .vault
        .encrypt(Some(&pair.refresh_token))
        .expect("encrypting Some(_) always succeeds");

    if let Err(e) = users::update_tokens_after_refresh(
        &state.db,
        user_id,
        &access_ciphertext,
        &refresh_ciphertext,
        pair.expires_at,
    )
    .await
    {
        error!("[scheduler] failed to persist refreshed tokens for {}: {}", user_id, e);
    }

    Ok(pair.access_token)
}

async fn try_upload_and_tweet(
    state: &Arc<AppState>,
    post: &Post,
    access_token: &str,
) -> Result<String, Outcome> {
    let mut media_ids = Vec::with_capacity(post.cloud_image_urls.0.len());

    for url in &post.cloud_image_urls.0 {
        let bytes = fetch_image_bytes(state, url)
            .await
            .map_err(|_| Outcome::Fatal("image unavailable".to_string()))?;
        let media_type = guess_media_type(url);

        let uploaded = state
            .twitter
            .upload_media(access_token, &bytes, media_type)
            .await
            .map_err(Outcome::from)?;
        media_ids.push(uploaded.media_id);
    }

    state
        .twitter
        .create_tweet(access_token, &post.content, &media_ids)
        .await
        .map_err(Outcome::from)
}

async fn fetch_image_bytes(state: &Arc<AppState>, url: &str) -> Result<Vec<u8>, reqwest::Error> {
    let resp = state.http.get(url).send().await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}

fn guess_media_type(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".gif") {
        "image/gif"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_guessed_from_extension() {
        assert_eq!(guess_media_type("https://cdn/img/photo.PNG?x=1"), "image/png");
        assert_eq!(guess_media_type("https://cdn/img/photo.jpg"), "image/jpeg");
        assert_eq!(guess_media_type("https://cdn/img/photo.gif"), "image/gif");
    }
}
