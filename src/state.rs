//! Application state shared across the control API and the background services.

use crate::catalog::Catalog;
use crate::credential_pool::CredentialPool;
use crate::executor::Executor;
use crate::proxy::Proxy;
use crate::sink::Sink;
use crate::status::ServiceStatusRegistry;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub credential_pool: Arc<CredentialPool>,
    pub executor: Arc<Executor>,
    pub catalog: Arc<Catalog>,
    pub service_statuses: ServiceStatusRegistry,
    pub proxy: Arc<Proxy>,
    pub sink: Arc<Sink>,
    pub stall_timeout_secs: i64,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: PgPool,
        credential_pool: Arc<CredentialPool>,
        executor: Arc<Executor>,
        catalog: Arc<Catalog>,
        service_statuses: ServiceStatusRegistry,
        proxy: Arc<Proxy>,
        sink: Arc<Sink>,
        stall_timeout_secs: i64,
    ) -> Self {
        Self {
            db_pool,
            credential_pool,
            executor,
            catalog,
            service_statuses,
            proxy,
            sink,
            stall_timeout_secs,
        }
    }
}
