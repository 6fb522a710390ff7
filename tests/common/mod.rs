#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;

use directsql::config::{AppConfig, DatabaseConfig};
use directsql::database::DatabaseManager;
use directsql::engine::{EngineError, ExecutionEngine, ExecutionRequest, ExecutionResult};
use directsql::router::StatementRouter;
use directsql::server::{app, AppState};
use directsql::statement::StatementStore;

const SCHEMA: &[&str] = &[
    "CREATE TABLE plan (id INTEGER PRIMARY KEY AUTOINCREMENT, code TEXT NOT NULL UNIQUE, owner TEXT NOT NULL, name TEXT NOT NULL)",
    "CREATE TABLE task (id INTEGER PRIMARY KEY AUTOINCREMENT, plan_code TEXT NOT NULL, title TEXT NOT NULL)",
    "CREATE TABLE menu (id INTEGER PRIMARY KEY, parent_id INTEGER, name TEXT NOT NULL)",
    "CREATE TABLE account (id TEXT PRIMARY KEY, name TEXT NOT NULL)",
];

/// One statement root (`biz` -> `<tmp>/bizmodel`) plus an in-memory SQLite database
pub struct Fixture {
    pub dir: TempDir,
    pub root: PathBuf,
    pub config: AppConfig,
    pub store: Arc<StatementStore>,
    pub db: Arc<DatabaseManager>,
    pub engine: Arc<ExecutionEngine>,
    pub router: StatementRouter,
}

impl Fixture {
    pub async fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("failed to create temp dir")?;
        let root = dir.path().join("bizmodel");
        fs::create_dir_all(&root)?;

        let mut config = AppConfig::development();
        config.directsql.watch = false;
        config.directsql.roots.insert("biz".to_string(), root.clone());
        config.cache.enabled = true;
        config.database = DatabaseConfig {
            url: Some("sqlite::memory:".to_string()),
            ..DatabaseConfig::default()
        };

        let store = Arc::new(StatementStore::from_config(&config.directsql));
        let db = Arc::new(DatabaseManager::connect(&config.database).await?);
        for statement in SCHEMA {
            sqlx::query(statement).execute(db.pool()).await?;
        }

        let engine = Arc::new(ExecutionEngine::new(Arc::clone(&db), &config.cache, config.api.clone()));
        let router = StatementRouter::new(config.directsql.prefix.clone(), Arc::clone(&store));
        let root = store.root_dir("biz").context("root not registered")?.to_path_buf();

        Ok(Self {
            dir,
            root,
            config,
            store,
            db,
            engine,
            router,
        })
    }

    /// Write a definition file and install it
    pub fn define(&self, relative: &str, text: &str) -> Result<()> {
        let file = self.root.join(format!("{}.msql", relative));
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file, text)?;
        self.store
            .reload_file("biz", &PathBuf::from(format!("{}.msql", relative)))
            .with_context(|| format!("definition {} did not parse", relative))?;
        Ok(())
    }

    pub async fn exec(&self, logical: &str, request: ExecutionRequest) -> Result<Arc<ExecutionResult>, EngineError> {
        let def = self
            .store
            .get(logical)
            .unwrap_or_else(|e| panic!("statement {} not installed: {}", logical, e));
        self.engine.execute(&def, request).await
    }

    pub async fn sql(&self, statement: &str) -> Result<()> {
        sqlx::query(statement).execute(self.db.pool()).await?;
        Ok(())
    }

    pub async fn count(&self, table: &str) -> Result<i64> {
        let row = sqlx::query(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(self.db.pool())
            .await?;
        Ok(directsql::database::column_value(&row, 0).as_i64().unwrap_or(-1))
    }

    pub fn app(&self) -> Router {
        let state = AppState::new(self.router.clone(), Arc::clone(&self.engine));
        app(state, &self.config)
    }
}

pub fn object(value: Value) -> serde_json::Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
