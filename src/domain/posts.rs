//! Post domain - the scheduling state machine and its persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::types::Json;
use sqlx::{Decode, Encode, Executor, Postgres, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Publishing,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Publishing => "publishing",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "scheduled" => PostStatus::Scheduled,
            "publishing" => PostStatus::Publishing,
            "published" => PostStatus::Published,
            "failed" => PostStatus::Failed,
            _ => PostStatus::Draft,
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Type<Postgres> for PostStatus {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for PostStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as Decode<Postgres>>::decode(value)?;
        Ok(PostStatus::from_str(&s))
    }
}

impl Encode<'_, Postgres> for PostStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <String as Encode<Postgres>>::encode_by_ref(&self.as_str().to_owned(), buf)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub address: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub user_id: String,
    pub post_id_local: Uuid,
    pub post_id_x: Option<String>,
    pub content: String,
    pub title: Option<String>,
    pub visibility: String,
    pub cloud_image_urls: Json<Vec<String>>,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
    pub location_address: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub status: PostStatus,
    pub failure_reason: Option<String>,
    pub queue_task_id: Option<Uuid>,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct NewPost<'a> {
    pub user_id: &'a str,
    pub post_id_local: Uuid,
    pub content: &'a str,
    pub title: Option<&'a str>,
    pub visibility: &'a str,
    pub cloud_image_urls: &'a [String],
    pub location: Option<&'a Location>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

pub async fn create<'e, E>(executor: E, new_post: NewPost<'_>) -> Result<Post, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let status = if new_post.scheduled_at.is_some() {
        "scheduled"
    } else {
        "draft"
    };

    sqlx::query_as(
        r#"
        INSERT INTO posts (
            user_id, post_id_local, content, title, visibility, cloud_image_urls,
            location_lat, location_lng, location_address, scheduled_at, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(new_post.user_id)
    .bind(new_post.post_id_local)
    .bind(new_post.content)
    .bind(new_post.title)
    .bind(new_post.visibility)
    .bind(Json(new_post.cloud_image_urls.to_vec()))
    .bind(new_post.location.map(|l| l.lat))
    .bind(new_post.location.map(|l| l.lng))
    .bind(new_post.location.and_then(|l| l.address.clone()))
    .bind(new_post.scheduled_at)
    .bind(status)
    .fetch_one(executor)
    .await
}

pub async fn get_by_id<'e, E>(
    executor: E,
    post_id: Uuid,
) -> Result<Option<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as("SELECT * FROM posts WHERE id = $1")
        .bind(post_id)
        .fetch_optional(executor)
        .await
}

pub async fn get_by_local_id<'e, E>(
    executor: E,
    user_id: &str,
    post_id_local: Uuid,
) -> Result<Option<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as("SELECT * FROM posts WHERE user_id = $1 AND post_id_local = $2")
        .bind(user_id)
        .bind(post_id_local)
        .fetch_optional(executor)
        .await
}

pub async fn get_by_post_id_x<'e, E>(
    executor: E,
    post_id_x: &str,
) -> Result<Option<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as("SELECT * FROM posts WHERE post_id_x = $1")
        .bind(post_id_x)
        .fetch_optional(executor)
        .await
}

pub async fn list_for_user<'e, E>(
    executor: E,
    user_id: &str,
) -> Result<Vec<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as("SELECT * FROM posts WHERE user_id = $1 ORDER BY created_at DESC")
        .bind(user_id)
        .fetch_all(executor)
        .await
}

pub struct PostUpdate<'a> {
    pub content: Option<&'a str>,
    pub title: Option<Option<&'a str>>,
    pub visibility: Option<&'a str>,
    pub cloud_image_urls: Option<&'a [String]>,
    pub location: Option<Option<&'a Location>>,
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
}

/// Applies a partial update. Scheduling-field changes move the row along the
/// state machine: setting `scheduled_at` from `draft`/`failed` moves to
/// `scheduled`; clearing it from `scheduled` moves back to `draft`. Callers
/// own queue enqueue/cancel side effects based on the returned transition.
pub async fn update<'e, E>(
    executor: E,
    post_id: Uuid,
    patch: PostUpdate<'_>,
) -> Result<Option<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres> + Copy,
{
    let current = get_by_id(executor, post_id).await?;
    let Some(current) = current else {
        return Ok(None);
    };
    apply_update(executor, &current, patch).await
}

async fn apply_update<'e, E>(
    executor: E,
    current: &Post,
    patch: PostUpdate<'_>,
) -> Result<Option<Post>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let content = patch.content.unwrap_or(&current.content);
    let title = match patch.title {
        Some(t) => t,
        None => current.title.as_deref(),
    };
    let visibility = patch.visibility.unwrap_or(&current.visibility);
    let cloud_image_urls = match patch.cloud_image_urls {
        Some(urls) => urls.to_vec(),
        None => current.cloud_image_urls.0.clone(),
    };
    let scheduled_at = match patch.scheduled_at {
        Some(new_value) => new_value,
        None => current.scheduled_at,
    };
    let (lat, lng, address) = match patch.location {
        Some(Some(loc)) => (Some(loc.lat), Some(loc.lng), loc.address.clone()),
        Some(None) => (None, None, None),
        None => (
            current.location_lat,
            current.location_lng,
            current.location_address.clone(),
        ),
    };

    let status = match (current.status, scheduled_at) {
        (PostStatus::Draft, Some(_)) | (PostStatus::Failed, Some(_)) => PostStatus::Scheduled,
        (PostStatus::Scheduled, None) => PostStatus::Draft,
        (other, _) => other,
    };

    sqlx::query_as(
        r#"
        UPDATE posts SET
            content = $2, title = $3, visibility = $4, cloud_image_urls = $5,
            location_lat = $6, location_lng = $7, location_address = $8,
            scheduled_at = $9, status = $10,
            failure_reason = CASE WHEN $10 = 'scheduled' THEN NULL ELSE failure_reason END,
            attempt = CASE WHEN $10 = 'scheduled' AND status != 'scheduled' THEN 0 ELSE attempt END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(current.id)
    .bind(content)
    .bind(title)
    .bind(visibility)
    .bind(Json(cloud_image_urls))
    .bind(lat)
    .bind(lng)
    .bind(address)
    .bind(scheduled_at)
    .bind(status)
    .fetch_optional(executor)
    .await
}

/// Returns `true` iff the delete was applied; disallowed while `publishing`.
pub async fn delete<'e, E>(
    executor: E,
    post_id: Uuid,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM posts WHERE id = $1 AND status != 'publishing'")
        .bind(post_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Ids of everything due to publish. Not itself a claim - callers must still
/// win the `try_claim_for_publish` CAS before acting on a returned id, since
/// another worker's tick may race on the same row.
pub async fn list_due_for_publish<'e, E>(executor: E, limit: i64) -> Result<Vec<Uuid>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM posts WHERE status = 'scheduled' AND scheduled_at <= NOW() \
         ORDER BY scheduled_at ASC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Compare-and-swap `scheduled -> publishing`. Returns `false` (a no-op) if
/// another worker or request already moved the row.
pub async fn try_claim_for_publish<'e, E>(
    executor: E,
    post_id: Uuid,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        "UPDATE posts SET status = 'publishing', updated_at = NOW() WHERE id = $1 AND status = 'scheduled'",
    )
    .bind(post_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn mark_published<'e, E>(
    executor: E,
    post_id: Uuid,
    post_id_x: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE posts SET
            status = 'published', post_id_x = $2, published_at = NOW(),
            queue_task_id = NULL, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(post_id)
    .bind(post_id_x)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn mark_failed<'e, E>(
    executor: E,
    post_id: Uuid,
    reason: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE posts SET
            status = 'failed', failure_reason = $2, queue_task_id = NULL, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(post_id)
    .bind(reason)
    .execute(executor)
    .await?;

    Ok(())
}

/// Re-enqueues for retry: moves back to `scheduled`, bumps the attempt
/// counter, and records the new queue task id for cancel-on-update.
pub async fn reschedule_retry<'e, E>(
    executor: E,
    post_id: Uuid,
    run_at: DateTime<Utc>,
    queue_task_id: Uuid,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE posts SET
            status = 'scheduled', scheduled_at = $2, attempt = attempt + 1,
            queue_task_id = $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(post_id)
    .bind(run_at)
    .bind(queue_task_id)
    .execute(executor)
    .await?;

    Ok(())
}

/// Reschedules after a rate-limit response, which does not consume a retry
/// attempt (unlike [`reschedule_retry`]).
pub async fn reschedule_rate_limited<'e, E>(
    executor: E,
    post_id: Uuid,
    run_at: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE posts SET status = 'scheduled', scheduled_at = $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(post_id)
    .bind(run_at)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn set_queue_task_id<'e, E>(
    executor: E,
    post_id: Uuid,
    queue_task_id: Option<Uuid>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE posts SET queue_task_id = $2 WHERE id = $1")
        .bind(post_id)
        .bind(queue_task_id)
        .execute(executor)
        .await?;

    Ok(())
}

/// Startup crash recovery: any post stuck in `publishing` past the lease
/// window is reset to `scheduled` so it fires again shortly.
pub async fn reconcile_stuck_publishing<'e, E>(
    executor: E,
    retry_in: chrono::Duration,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let run_at = Utc::now() + retry_in;
    let result = sqlx::query(
        "UPDATE posts SET status = 'scheduled', scheduled_at = $1, updated_at = NOW() WHERE status = 'publishing'",
    )
    .bind(run_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_matches_db_values() {
        assert_eq!(PostStatus::Draft.to_string(), "draft");
        assert_eq!(PostStatus::Publishing.to_string(), "publishing");
    }
}
