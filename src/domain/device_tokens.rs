//! Device token sub-store, used by the Notifier for push fan-out.

use sqlx::{Executor, Postgres};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeviceToken {
    pub id: Uuid,
    pub user_id: String,
    pub token: String,
    pub platform: String,
}

/// Upsert by `token`; rebinds ownership and platform if the token was
/// previously registered elsewhere.
pub async fn register<'e, E>(
    executor: E,
    user_id: &str,
    token: &str,
    platform: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO device_tokens (user_id, token, platform)
        VALUES ($1, $2, $3)
        ON CONFLICT (token) DO UPDATE SET
            user_id = EXCLUDED.user_id,
            platform = EXCLUDED.platform
        "#,
    )
    .bind(user_id)
    .bind(token)
    .bind(platform)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn unregister<'e, E>(
    executor: E,
    user_id: &str,
    token: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("DELETE FROM device_tokens WHERE user_id = $1 AND token = $2")
        .bind(user_id)
        .bind(token)
        .execute(executor)
        .await?;

    Ok(())
}

pub async fn list_for_user<'e, E>(
    executor: E,
    user_id: &str,
) -> Result<Vec<DeviceToken>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        "SELECT id, user_id, token, platform FROM device_tokens WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_all(executor)
    .await
}

/// Removes a token the push provider reported as gone (HTTP 410).
pub async fn prune<'e, E>(executor: E, token: &str) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("DELETE FROM device_tokens WHERE token = $1")
        .bind(token)
        .execute(executor)
        .await?;

    Ok(())
}
