//! Wires the scheduler (C7) and executor (C5/C6) together as one `Service`, the way
//! the reference deployment's scraper service bundles its own scheduler and workers.

use crate::crawl_engine::EngineContext;
use crate::executor::Executor;
use crate::scheduler::Scheduler;
use crate::status::{ServiceStatus, ServiceStatusRegistry};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub struct EngineService {
    db_pool: PgPool,
    executor: Arc<Executor>,
    ctx: Arc<EngineContext>,
    stall_timeout_secs: i64,
    service_statuses: ServiceStatusRegistry,
    shutdown_tx: Option<broadcast::Sender<()>>,
    scheduler_handle: Option<JoinHandle<()>>,
}

impl EngineService {
    pub fn new(
        db_pool: PgPool,
        ctx: Arc<EngineContext>,
        max_workers: usize,
        stall_timeout_secs: i64,
        service_statuses: ServiceStatusRegistry,
    ) -> Self {
        let executor = Arc::new(Executor::new(db_pool.clone(), Arc::clone(&ctx), max_workers));
        Self {
            db_pool,
            executor,
            ctx,
            stall_timeout_secs,
            service_statuses,
            shutdown_tx: None,
            scheduler_handle: None,
        }
    }

    pub fn executor(&self) -> Arc<Executor> {
        Arc::clone(&self.executor)
    }
}

#[async_trait::async_trait]
impl crate::services::Service for EngineService {
    fn name(&self) -> &'static str {
        "engine"
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let scheduler = Scheduler::new(
            self.db_pool.clone(),
            Arc::clone(&self.executor),
            Arc::clone(&self.ctx.credential_pool),
            self.stall_timeout_secs,
        );
        self.scheduler_handle = Some(tokio::spawn(async move {
            scheduler.run(shutdown_rx).await;
        }));

        self.service_statuses
            .set("engine", ServiceStatus::Active);

        std::future::pending::<()>().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.service_statuses
            .set("engine", ServiceStatus::Disabled);

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.scheduler_handle.take() {
            handle.await?;
        }

        let stopped = self.executor.stop_all().await;
        tracing::info!(count = stopped.len(), "in-flight jobs requeued for next start");

        Ok(())
    }
}
