//! Engagement domain - metric snapshots and their time-series history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub likes: i64,
    pub retweets: i64,
    pub quotes: i64,
    pub replies: i64,
    pub impressions: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyDatapoint {
    pub timestamp: DateTime<Utc>,
    pub snapshot: MetricsSnapshot,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Engagement {
    pub post_id_x: String,
    pub user_id: String,
    pub post_id_local: Uuid,
    pub likes: i64,
    pub retweets: i64,
    pub quotes: i64,
    pub replies: i64,
    pub impressions: i64,
    pub hourly_metrics: Json<Vec<HourlyDatapoint>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Created exactly once, when a post first transitions to `published`.
pub async fn create<'e, E>(
    executor: E,
    user_id: &str,
    post_id_local: Uuid,
    post_id_x: &str,
) -> Result<Engagement, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        INSERT INTO engagements (post_id_x, user_id, post_id_local)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(post_id_x)
    .bind(user_id)
    .bind(post_id_local)
    .fetch_one(executor)
    .await
}

pub async fn get_by_post_id_x<'e, E>(
    executor: E,
    post_id_x: &str,
) -> Result<Option<Engagement>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as("SELECT * FROM engagements WHERE post_id_x = $1")
        .bind(post_id_x)
        .fetch_optional(executor)
        .await
}

pub async fn get_by_post_id_local<'e, E>(
    executor: E,
    user_id: &str,
    post_id_local: Uuid,
) -> Result<Option<Engagement>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as("SELECT * FROM engagements WHERE user_id = $1 AND post_id_local = $2")
        .bind(user_id)
        .bind(post_id_local)
        .fetch_optional(executor)
        .await
}

pub async fn list_for_user<'e, E>(
    executor: E,
    user_id: &str,
) -> Result<Vec<Engagement>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as("SELECT * FROM engagements WHERE user_id = $1 ORDER BY updated_at DESC")
        .bind(user_id)
        .fetch_all(executor)
        .await
}

/// Overwrites the aggregate counters with Twitter's latest values (accepted
/// verbatim, even if lower than a previous observation) and appends a
/// datapoint to the time-series.
pub async fn record_refresh<'e, E>(
    executor: E,
    post_id_x: &str,
    snapshot: MetricsSnapshot,
    observed_at: DateTime<Utc>,
) -> Result<Option<Engagement>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let datapoint = HourlyDatapoint {
        timestamp: observed_at,
        snapshot,
    };

    sqlx::query_as(
        r#"
        UPDATE engagements SET
            likes = $2, retweets = $3, quotes = $4, replies = $5, impressions = $6,
            hourly_metrics = hourly_metrics || $7::jsonb,
            updated_at = NOW()
        WHERE post_id_x = $1
        RETURNING *
        "#,
    )
    .bind(post_id_x)
    .bind(snapshot.likes)
    .bind(snapshot.retweets)
    .bind(snapshot.quotes)
    .bind(snapshot.replies)
    .bind(snapshot.impressions)
    .bind(serde_json::to_value(vec![datapoint]).expect("datapoint always serializes"))
    .fetch_optional(executor)
    .await
}
