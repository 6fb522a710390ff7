use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::config::AppConfig;
use crate::database::DatabaseManager;
use crate::engine::ExecutionEngine;
use crate::handlers;
use crate::router::StatementRouter;
use crate::statement::{DefinitionWatcher, RescanHandle, StatementStore};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub router: StatementRouter,
    pub engine: Arc<ExecutionEngine>,
    /// Present while the definition watcher runs
    pub rescan: Option<RescanHandle>,
}

impl AppState {
    pub fn new(router: StatementRouter, engine: Arc<ExecutionEngine>) -> Self {
        Self {
            router,
            engine,
            rescan: None,
        }
    }

    pub fn with_rescan(mut self, rescan: RescanHandle) -> Self {
        self.rescan = Some(rescan);
        self
    }
}

pub fn app(state: AppState, config: &AppConfig) -> Router {
    let statement_route = format!("{}/:root/*path", state.router.prefix());

    Router::new()
        .route("/health", get(handlers::health::get))
        .route("/admin/statements", get(handlers::admin::statements))
        .route("/admin/reload", post(handlers::admin::reload))
        .route(
            &statement_route,
            post(handlers::statement::post).get(handlers::statement::get),
        )
        .with_state(state)
        // Global middleware, outermost first
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(config.api.max_request_size_bytes)),
        )
}

/// Everything a running server owns; dropping it stops the watcher
pub struct Server {
    pub state: AppState,
    pub database: Arc<DatabaseManager>,
    watcher: Option<DefinitionWatcher>,
}

impl Server {
    /// Connect the database, load every definition and start the watcher if enabled
    pub async fn build(config: &AppConfig) -> anyhow::Result<Self> {
        let store = Arc::new(StatementStore::from_config(&config.directsql));
        let report = {
            let store = Arc::clone(&store);
            tokio::task::spawn_blocking(move || store.scan()).await?
        };
        for error in &report.errors {
            tracing::warn!("{}", error);
        }
        info!("Loaded {} statements", store.len());

        let database = Arc::new(
            DatabaseManager::connect(&config.database)
                .await
                .context("failed to connect to the database")?,
        );
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&database),
            &config.cache,
            config.api.clone(),
        ));
        let router = StatementRouter::new(config.directsql.prefix.clone(), Arc::clone(&store));
        let mut state = AppState::new(router, engine);

        let watcher = if config.directsql.watch {
            let watcher = DefinitionWatcher::start(Arc::clone(&store), config.directsql.watch_queue_capacity)
                .context("failed to start the statement watcher")?;
            state = state.with_rescan(watcher.rescan_handle());
            Some(watcher)
        } else {
            None
        };

        Ok(Self {
            state,
            database,
            watcher,
        })
    }

    pub async fn run(self, addr: SocketAddr, config: &AppConfig) -> anyhow::Result<()> {
        let app = app(self.state.clone(), config);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        info!(
            "directsql listening on http://{} (statements under {})",
            addr,
            self.state.router.prefix()
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")?;

        if let Some(watcher) = self.watcher {
            watcher.shutdown();
        }
        self.database.close().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
