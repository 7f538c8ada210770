//! Startup crash recovery for posts stuck in `publishing`.

use log::{error, info};
use sqlx::PgPool;

use crate::domain::posts;

const STUCK_RETRY_DELAY_SECS: i64 = 30;

pub async fn run_startup_reconciliation(db: &PgPool) {
    match posts::reconcile_stuck_publishing(db, chrono::Duration::seconds(STUCK_RETRY_DELAY_SECS))
        .await
    {
        Ok(0) => {}
        Ok(n) => info!("[scheduler] reconciled {} stuck publishing post(s)", n),
        Err(e) => error!("[scheduler] startup reconciliation failed: {}", e),
    }
}
