//! Top-level wiring: loads configuration, opens the database pool, builds the
//! shared engine context, and registers both services with the manager.

use crate::catalog::Catalog;
use crate::cli::ServiceName;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::credential_pool::CredentialPool;
use crate::crawl_engine::EngineContext;
use crate::engine::EngineService;
use crate::proxy::Proxy;
use crate::services::manager::ServiceManager;
use crate::services::web::WebService;
use crate::sink::Sink;
use crate::state::AppState;
use crate::status::ServiceStatusRegistry;
use anyhow::Context;
use figment::value::UncasedStr;
use figment::{Figment, providers::Env};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

/// Owns every long-lived component and the service manager that drives them.
pub struct App {
    config: Config,
    app_state: AppState,
    service_manager: ServiceManager,
}

impl App {
    pub async fn new(services: &[ServiceName]) -> Result<Self, anyhow::Error> {
        let config: Config = Figment::new()
            .merge(Env::raw().map(|k| {
                if k == UncasedStr::new("RAILWAY_DEPLOYMENT_DRAINING_SECONDS") {
                    "SHUTDOWN_TIMEOUT".into()
                } else {
                    k.into()
                }
            }))
            .extract()
            .context("failed to load config")?;

        let db_pool = crate::db::connect(&config.database_url)
            .await
            .context("failed to connect to database")?;

        let catalog: Catalog = config.catalog().context("failed to parse poi_types catalog")?;
        let catalog = Arc::new(catalog);

        let clock = Arc::new(SystemClock);
        let credential_pool = Arc::new(CredentialPool::new(
            db_pool.clone(),
            clock,
            config.tz(),
            config.key_reset_hour,
        ));

        let custom_proxy_url = config.proxy_enabled.then(|| config.custom_proxy_url.clone());
        let proxy = Arc::new(
            Proxy::new(
                config.amap_base_url.clone(),
                config.request_timeout,
                custom_proxy_url,
                Arc::clone(&credential_pool),
            )
            .context("failed to build upstream client")?,
        );

        let sink = Arc::new(Sink::new(config.results_dir.clone()));

        let engine_ctx = Arc::new(EngineContext {
            catalog: (*catalog).clone(),
            credential_pool: Arc::clone(&credential_pool),
            proxy: Arc::clone(&proxy),
            sink: Arc::clone(&sink),
        });

        let service_statuses = ServiceStatusRegistry::new();

        let engine_service = EngineService::new(
            db_pool.clone(),
            Arc::clone(&engine_ctx),
            config.max_workers,
            config.stall_timeout.as_secs() as i64,
            service_statuses.clone(),
        );
        let executor = engine_service.executor();

        let app_state = AppState::new(
            db_pool,
            credential_pool,
            executor,
            catalog,
            service_statuses,
            proxy,
            sink,
            config.stall_timeout.as_secs() as i64,
        );

        if services.is_empty() {
            anyhow::bail!("no services enabled");
        }

        let mut service_manager = ServiceManager::new();
        if services.contains(&ServiceName::Engine) {
            service_manager.register_service("engine", Box::new(engine_service));
        }
        if services.contains(&ServiceName::Web) {
            service_manager.register_service("web", Box::new(WebService::new(config.port, app_state.clone())));
        }

        info!(
            port = config.port,
            max_workers = config.max_workers,
            "configuration loaded"
        );

        Ok(App {
            config,
            app_state,
            service_manager,
        })
    }

    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    pub async fn run(self) -> ExitCode {
        crate::signals::handle_shutdown_signals(self.service_manager, self.config.shutdown_timeout).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn app_state(&self) -> &AppState {
        &self.app_state
    }
}
