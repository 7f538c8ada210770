//! Process-wide configuration, assembled once at startup from the environment.

use log::{info, warn};

/// Retry/backoff policy for the Twitter publisher. Policy, not contract — all
/// fields are overridable via env for testing.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay_secs: u64,
    pub max_attempts: i32,
    pub rate_limit_min_delay_secs: i64,
}

impl RetryPolicy {
    fn from_env() -> Self {
        let base_delay_secs = std::env::var("RETRY_BASE_DELAY_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        let max_attempts = std::env::var("RETRY_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);
        let rate_limit_min_delay_secs = std::env::var("RATE_LIMIT_MIN_DELAY_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(900);

        Self {
            base_delay_secs,
            max_attempts,
            rate_limit_min_delay_secs,
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub db_pool_size: u32,
    pub encryption_key: [u8; 32],
    pub identity_trust_root: String,
    pub vapid_private_key: Option<String>,
    pub twitter_client_id: String,
    pub twitter_client_secret: String,
    pub port: u16,
    pub retry_policy: RetryPolicy,
}

impl Config {
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let db_pool_size = std::env::var("DB_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(25);

        let encryption_key = crate::crypto::load_key(
            &std::env::var("ENCRYPTION_KEY").expect("ENCRYPTION_KEY must be set"),
        );

        let identity_trust_root_raw =
            std::env::var("IDENTITY_TRUST_ROOT").expect("IDENTITY_TRUST_ROOT must be set");
        let identity_trust_root = if std::path::Path::new(&identity_trust_root_raw).exists() {
            std::fs::read_to_string(&identity_trust_root_raw)
                .expect("failed to read IDENTITY_TRUST_ROOT file")
        } else {
            identity_trust_root_raw
        };

        let vapid_private_key = std::env::var("VAPID_PRIVATE_KEY").ok();
        if vapid_private_key.is_none() {
            warn!("[config] VAPID_PRIVATE_KEY not set; push notifications are disabled");
        }

        let twitter_client_id =
            std::env::var("TWITTER_CLIENT_ID").expect("TWITTER_CLIENT_ID must be set");
        let twitter_client_secret =
            std::env::var("TWITTER_CLIENT_SECRET").expect("TWITTER_CLIENT_SECRET must be set");

        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        info!("[config] loaded ({} pool connections, port {})", db_pool_size, port);

        Self {
            database_url,
            db_pool_size,
            encryption_key,
            identity_trust_root,
            vapid_private_key,
            twitter_client_id,
            twitter_client_secret,
            port,
            retry_policy: RetryPolicy::from_env(),
        }
    }
}
