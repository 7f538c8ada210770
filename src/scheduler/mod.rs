pub mod publisher;
pub mod reconcile;

use std::str::FromStr;
use std::sync::Arc;

use apalis::prelude::*;
use apalis_cron::{CronStream, Schedule};
use apalis_sql::postgres::PostgresStorage;
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::AppState;

const DEFAULT_TICK_SECONDS: u64 = 5;

/// Cron tick payload - a pure marker, the actual work is re-deriving what's due
/// from the `posts` table on every fire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishTick {
    pub fired_at: chrono::DateTime<chrono::Utc>,
}

impl From<chrono::DateTime<chrono::Utc>> for PublishTick {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        PublishTick { fired_at: dt }
    }
}

async fn process_tick(_job: PublishTick, state: Data<Arc<AppState>>) -> Result<(), Error> {
    if let Err(e) = publisher::run_publish_cycle(&state).await {
        error!("[scheduler] publish cycle error: {}", e);
    }
    Ok(())
}

/// Starts the recurring publish-cycle worker.
///
/// This is not a per-post delayed job queue: every tick re-scans `posts` for
/// everything due (`status = 'scheduled' AND scheduled_at <= now()`), so
/// "cancel the prior job, enqueue a new one" on reschedule is just a row
/// update - the next tick picks up whatever `scheduled_at` currently holds,
/// and `try_claim_for_publish`'s CAS keeps concurrent ticks from double-firing
/// a post.
pub async fn run(state: Arc<AppState>) {
    PostgresStorage::<PublishTick>::setup(&state.db)
        .await
        .expect("failed to set up apalis storage");

    let tick_seconds = tick_seconds();
    let schedule_expr = format!("*/{} * * * * *", tick_seconds);
    let schedule = Schedule::from_str(&schedule_expr).expect("invalid scheduler tick expression");
    let storage: PostgresStorage<PublishTick> = PostgresStorage::new(state.db.clone());
    let backend = CronStream::new(schedule).pipe_to_storage(storage);

    info!("[scheduler] publish worker starting (every {}s)", tick_seconds);

    let worker = WorkerBuilder::new("publish-worker")
        .data(state)
        .backend(backend)
        .build_fn(process_tick);

    Monitor::new()
        .register(worker)
        .run()
        .await
        .expect("publish worker monitor failed");
}

fn tick_seconds() -> u64 {
    std::env::var("SCHEDULER_TICK_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v| *v > 0 && *v <= 59)
        .unwrap_or(DEFAULT_TICK_SECONDS)
}
