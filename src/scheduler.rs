//! Scheduler loop (C7): wakes on a fixed interval and makes exactly one admission
//! decision per tick — at most one job moves from admissible to `running`.

use crate::credential_pool::CredentialPool;
use crate::db;
use crate::executor::Executor;
use crate::models::SearchType;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Jobs running concurrently before 9am local time; after that, three.
const OFF_PEAK_CONCURRENCY_CAP: i64 = 1;
const PEAK_CONCURRENCY_CAP: i64 = 3;
const PEAK_HOUR: u32 = 9;

pub struct Scheduler {
    db_pool: PgPool,
    executor: Arc<Executor>,
    credential_pool: Arc<CredentialPool>,
    stall_timeout_secs: i64,
}

impl Scheduler {
    pub fn new(
        db_pool: PgPool,
        executor: Arc<Executor>,
        credential_pool: Arc<CredentialPool>,
        stall_timeout_secs: i64,
    ) -> Self {
        Self {
            db_pool,
            executor,
            credential_pool,
            stall_timeout_secs,
        }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut current_tick: Option<(tokio::task::JoinHandle<()>, CancellationToken)> = None;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(TICK_INTERVAL) => {
                    if current_tick.as_ref().is_none_or(|(h, _)| h.is_finished()) {
                        let token = CancellationToken::new();
                        let handle = tokio::spawn(run_tick(
                            self.db_pool.clone(),
                            Arc::clone(&self.executor),
                            Arc::clone(&self.credential_pool),
                            self.stall_timeout_secs,
                            token.clone(),
                        ));
                        current_tick = Some((handle, token));
                    }
                }
                _ = shutdown_rx.recv() => {
                    if let Some((handle, token)) = current_tick.take() {
                        token.cancel();
                        if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                            warn!("scheduler tick did not finish within grace period, abandoning");
                        }
                    }
                    break;
                }
            }
        }
        info!("scheduler loop stopped");
    }
}

/// One `CheckAndAdmit` pass: admits at most one job, in this order of gates —
/// free worker slot, active-job concurrency cap (hour-of-day dependent), a
/// credential available to probe with, then the highest-priority admissible job.
///
/// The credential probe is intentionally not released or consumed here: `acquire`
/// itself only performs lazy resets, so the probe is a read of availability, not a
/// reservation — the crawl engine acquires its own credential per page later.
async fn run_tick(
    db_pool: PgPool,
    executor: Arc<Executor>,
    credential_pool: Arc<CredentialPool>,
    stall_timeout_secs: i64,
    cancel: CancellationToken,
) {
    if cancel.is_cancelled() {
        return;
    }

    if executor.available_permits() == 0 {
        debug!("no free worker slots, skipping tick");
        return;
    }

    let cap = if credential_pool.local_hour() < PEAK_HOUR {
        OFF_PEAK_CONCURRENCY_CAP
    } else {
        PEAK_CONCURRENCY_CAP
    };

    let active = match db::jobs::count_active(&db_pool, stall_timeout_secs).await {
        Ok(count) => count,
        Err(e) => {
            warn!(error = ?e, "failed to count active jobs");
            return;
        }
    };
    if active >= cap {
        debug!(active, cap, "at concurrency cap, skipping tick");
        return;
    }

    if credential_pool.acquire(SearchType::Polygon).await.is_err() {
        debug!("no credential currently available, skipping tick");
        return;
    }

    if cancel.is_cancelled() {
        return;
    }

    match db::jobs::claim_next(&db_pool, stall_timeout_secs).await {
        Ok(Some(job)) => {
            if !executor.submit(job.id) {
                debug!(job_id = job.id, "executor declined submission, will retry next tick");
                let _ = db::jobs::requeue(&db_pool, job.id).await;
            }
        }
        Ok(None) => {}
        Err(e) => {
            warn!(error = ?e, "failed to claim next job");
        }
    }
}
