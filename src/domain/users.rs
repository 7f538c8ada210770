//! User & Token Store - DB queries for users and their encrypted OAuth tokens.
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub user_id: String,
    pub access_token_ciphertext: Option<String>,
    pub refresh_token_ciphertext: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub is_connected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Idempotent: on a unique-violation race from a concurrent insert, retries
/// the lookup once rather than surfacing the constraint error.
pub async fn find_or_create<'e, E>(executor: E, user_id: &str) -> Result<User, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (user_id)
        VALUES ($1)
        ON CONFLICT (user_id) DO UPDATE SET user_id = users.user_id
        RETURNING user_id, access_token_ciphertext, refresh_token_ciphertext,
                  token_expires_at, is_connected, created_at, updated_at
        "#,
    )
    .bind(user_id)
    .fetch_one(executor)
    .await?;

    Ok(result)
}

pub async fn get_by_id<'e, E>(executor: E, user_id: &str) -> Result<Option<User>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT user_id, access_token_ciphertext, refresh_token_ciphertext,
               token_expires_at, is_connected, created_at, updated_at
        FROM users WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
}

/// Stores encrypted tokens and marks the user connected. When
/// `refresh_token_ciphertext` is `None`, the prior stored refresh token is
/// preserved via `COALESCE`.
pub async fn connect_twitter<'e, E>(
    executor: E,
    user_id: &str,
    access_token_ciphertext: &str,
    refresh_token_ciphertext: Option<&str>,
    token_expires_at: Option<DateTime<Utc>>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE users SET
            access_token_ciphertext = $2,
            refresh_token_ciphertext = COALESCE($3, refresh_token_ciphertext),
            token_expires_at = $4,
            is_connected = TRUE,
            updated_at = NOW()
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .bind(access_token_ciphertext)
    .bind(refresh_token_ciphertext)
    .bind(token_expires_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Atomically clears both ciphertexts, `token_expires_at`, and disconnects.
pub async fn disconnect_twitter<'e, E>(executor: E, user_id: &str) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE users SET
            access_token_ciphertext = NULL,
            refresh_token_ciphertext = NULL,
            token_expires_at = NULL,
            is_connected = FALSE,
            updated_at = NOW()
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn update_connection_status<'e, E>(
    executor: E,
    user_id: &str,
    connected: bool,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    if connected {
        sqlx::query("UPDATE users SET is_connected = TRUE, updated_at = NOW() WHERE user_id = $1")
            .bind(user_id)
            .execute(executor)
            .await?;
        Ok(())
    } else {
        disconnect_twitter(executor, user_id).await
    }
}

/// Persists a freshly refreshed token pair unconditionally - refresh tokens
/// may be single-use, so the returned token is always written even when the
/// Twitter API happened to return the same one.
pub async fn update_tokens_after_refresh<'e, E>(
    executor: E,
    user_id: &str,
    access_token_ciphertext: &str,
    refresh_token_ciphertext: &str,
    token_expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE users SET
            access_token_ciphertext = $2,
            refresh_token_ciphertext = $3,
            token_expires_at = $4,
            updated_at = NOW()
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .bind(access_token_ciphertext)
    .bind(refresh_token_ciphertext)
    .bind(token_expires_at)
    .execute(executor)
    .await?;

    Ok(())
}
