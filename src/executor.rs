//! Task executor (C5): runs admitted jobs to completion with bounded concurrency,
//! exposing cooperative cancellation per job and a registry of what is in flight.

use crate::crawl_engine::{self, EngineContext};
use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct Executor {
    running: Arc<DashMap<i64, CancellationToken>>,
    semaphore: Arc<Semaphore>,
    db_pool: PgPool,
    ctx: Arc<EngineContext>,
}

impl Executor {
    pub fn new(db_pool: PgPool, ctx: Arc<EngineContext>, max_workers: usize) -> Self {
        Self {
            running: Arc::new(DashMap::new()),
            semaphore: Arc::new(Semaphore::new(max_workers)),
            db_pool,
            ctx,
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn is_running(&self, job_id: i64) -> bool {
        self.running.contains_key(&job_id)
    }

    pub fn running_ids(&self) -> Vec<i64> {
        self.running.iter().map(|entry| *entry.key()).collect()
    }

    /// Spawns the job if it isn't already running and a worker slot is available.
    /// Returns `false` without spawning if either condition fails — the caller
    /// (the scheduler) is expected to requeue the job for a later tick.
    pub fn submit(&self, job_id: i64) -> bool {
        if self.running.contains_key(&job_id) {
            return false;
        }
        let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return false,
        };

        let token = CancellationToken::new();
        self.running.insert(job_id, token.clone());

        let running = Arc::clone(&self.running);
        let db_pool = self.db_pool.clone();
        let ctx = Arc::clone(&self.ctx);

        tokio::spawn(async move {
            let _permit = permit;
            info!(job_id, "job execution starting");
            if let Err(e) = crawl_engine::run_job(&db_pool, &ctx, job_id, token).await {
                error!(job_id, error = ?e, "job execution failed");
            }
            running.remove(&job_id);
        });

        true
    }

    /// Cancels every in-flight job and waits (bounded by the caller's own timeout)
    /// until the registry drains.
    pub async fn stop_all(&self) -> Vec<i64> {
        let stopped: Vec<i64> = self.running.iter().map(|e| *e.key()).collect();
        for entry in self.running.iter() {
            entry.value().cancel();
        }
        while !self.running.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        stopped
    }
}
