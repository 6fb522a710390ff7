pub mod cache;
pub mod error;
pub mod nested;
pub mod request;
pub mod result;

pub use cache::{cache_key, ResultCache};
pub use error::EngineError;
pub use request::{Bindings, ExecutionRequest, Payload};
pub use result::{ExecutionResult, Row};

use serde_json::{Map, Value};
use sqlx::any::AnyQueryResult;
use sqlx::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::config::{ApiConfig, CacheConfig};
use crate::database::{bind_all, column_value, row_to_json, DatabaseManager};
use crate::statement::definition::{PAGING_LIMIT, PAGING_START};
use crate::statement::{KeyDirective, KeyStrategy, NamedStatement, SqlTemplate, StatementBody, StatementDefinition, TreeShape};
use crate::types::StatementKind;
use nested::TreeError;

/// Executes statement definitions against the database.
///
/// Dispatch is a closed match over `StatementKind`. Read kinds with a cache
/// directive go through the result cache; batch kinds run inside a single
/// transaction that is rolled back on any failure or on deadline expiry.
pub struct ExecutionEngine {
    db: Arc<DatabaseManager>,
    cache: Option<ResultCache>,
    api: ApiConfig,
}

impl ExecutionEngine {
    pub fn new(db: Arc<DatabaseManager>, cache: &CacheConfig, api: ApiConfig) -> Self {
        Self {
            db,
            cache: cache.enabled.then(|| ResultCache::new(cache)),
            api,
        }
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.db
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    /// Execute with the configured request timeout
    pub async fn execute(
        &self,
        def: &StatementDefinition,
        request: ExecutionRequest,
    ) -> Result<Arc<ExecutionResult>, EngineError> {
        self.execute_within(def, request, self.api.request_timeout()).await
    }

    /// Execute under an explicit deadline. An expired deadline drops the
    /// in-flight future, which rolls back any open transaction.
    pub async fn execute_within(
        &self,
        def: &StatementDefinition,
        request: ExecutionRequest,
        deadline: Duration,
    ) -> Result<Arc<ExecutionResult>, EngineError> {
        let expected = def.kind.payload_shape();
        let actual = request.payload.shape();
        if expected != actual {
            return Err(EngineError::shape(&def.path, expected, actual));
        }

        let started = Instant::now();
        debug!("Executing {} statement {}", def.kind, def.path);

        let outcome = match tokio::time::timeout(deadline, self.dispatch(def, request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Statement {} timed out after {}ms", def.path, deadline.as_millis());
                Err(EngineError::Timeout {
                    path: def.path.clone(),
                    timeout_ms: deadline.as_millis(),
                })
            }
        };

        self.db.observe(&def.path, started);
        if let Err(EngineError::Execution { path, source }) = &outcome {
            error!("Statement {} failed: {}", path, source);
        }
        outcome
    }

    async fn dispatch(
        &self,
        def: &StatementDefinition,
        request: ExecutionRequest,
    ) -> Result<Arc<ExecutionResult>, EngineError> {
        if let (Some(cache), Some(directive), true) = (&self.cache, &def.cache, def.kind.is_read()) {
            let bindings = self.cache_bindings(def, &request)?;
            let key = cache_key(def, &bindings);
            return cache
                .get_or_compute(key, directive, request.recache, self.run(def, &request))
                .await;
        }
        self.run(def, &request).await.map(Arc::new)
    }

    /// Bindings that identify a read result, including resolved paging controls
    fn cache_bindings(&self, def: &StatementDefinition, request: &ExecutionRequest) -> Result<Bindings, EngineError> {
        let mut bindings = match &request.payload {
            Payload::Object(bindings) => bindings.clone(),
            _ => Map::new(),
        };
        if def.kind == StatementKind::PagingSelect {
            let (start, limited) = self.paging(request)?;
            bindings.insert(PAGING_START.to_string(), Value::from(start));
            bindings.insert(PAGING_LIMIT.to_string(), Value::from(limited));
        }
        Ok(bindings)
    }

    async fn run(&self, def: &StatementDefinition, request: &ExecutionRequest) -> Result<ExecutionResult, EngineError> {
        let path = def.path.as_str();
        match (def.kind, &def.body, &request.payload) {
            (StatementKind::Select, StatementBody::Single(query), Payload::Object(params)) => {
                let rows = self.fetch_rows(path, query, params).await?;
                Ok(ExecutionResult::Rows { rows })
            }
            (StatementKind::PagingSelect, StatementBody::Paging { query, count }, Payload::Object(params)) => {
                self.paging_select(path, query, count, params, request).await
            }
            (StatementKind::NestedSelect, StatementBody::Nested { query, tree }, Payload::Object(params)) => {
                self.nested_select(path, query, tree, params).await
            }
            (StatementKind::MultiSelect, StatementBody::Multi(statements), Payload::Object(params)) => {
                self.multi_select(path, statements, params).await
            }
            (
                StatementKind::Delete | StatementKind::Insert | StatementKind::Update,
                StatementBody::Single(query),
                Payload::Object(params),
            ) => {
                let result = execute(self.db.pool(), path, query, params).await?;
                Ok(ExecutionResult::Affected {
                    count: result.rows_affected(),
                })
            }
            (
                StatementKind::BatchInsert | StatementKind::BatchUpdate,
                StatementBody::Single(query),
                Payload::Array(items),
            ) => self.batch(path, query, items).await,
            (StatementKind::BatchComplex, StatementBody::Groups(groups), Payload::Groups(payload)) => {
                self.batch_complex(path, groups, payload).await
            }
            (StatementKind::InsertPro, StatementBody::InsertPro { query, key }, Payload::Object(params)) => {
                self.insert_pro(path, query, key, params).await
            }
            (kind, _, payload) => Err(EngineError::Internal {
                path: path.to_string(),
                reason: format!("{} statement cannot run with a {} payload", kind, payload.shape()),
            }),
        }
    }

    async fn fetch_rows(&self, path: &str, template: &SqlTemplate, params: &Bindings) -> Result<Vec<Row>, EngineError> {
        fetch_rows(self.db.pool(), path, template, params).await
    }

    /// Resolved (start, limited): defaults applied, page size capped
    fn paging(&self, request: &ExecutionRequest) -> Result<(i64, i64), EngineError> {
        let start = request.start.unwrap_or(0);
        if start < 0 {
            return Err(EngineError::InvalidControl {
                field: PAGING_START,
                reason: "must not be negative".to_string(),
            });
        }
        let limited = request.limited.unwrap_or(self.api.default_page_size);
        if limited < 0 {
            return Err(EngineError::InvalidControl {
                field: PAGING_LIMIT,
                reason: "must not be negative".to_string(),
            });
        }
        Ok((start, limited.min(self.api.max_page_size)))
    }

    async fn paging_select(
        &self,
        path: &str,
        query: &SqlTemplate,
        count: &SqlTemplate,
        params: &Bindings,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, EngineError> {
        let (start, limited) = self.paging(request)?;
        let mut bound = params.clone();
        bound.insert(PAGING_START.to_string(), Value::from(start));
        bound.insert(PAGING_LIMIT.to_string(), Value::from(limited));

        let total = {
            let values = arguments(path, count, &bound)?;
            let row = bind_all(count.sql(), &values)
                .fetch_one(self.db.pool())
                .await
                .map_err(|e| EngineError::execution(path, e))?;
            total_count(column_value(&row, 0))
        };
        let rows = self.fetch_rows(path, query, &bound).await?;

        Ok(ExecutionResult::Page {
            rows,
            total,
            start,
            limited,
        })
    }

    async fn nested_select(
        &self,
        path: &str,
        query: &SqlTemplate,
        tree: &TreeShape,
        params: &Bindings,
    ) -> Result<ExecutionResult, EngineError> {
        let rows = self.fetch_rows(path, query, params).await?;
        let nodes = nested::assemble(rows, tree).map_err(|e| match e {
            TreeError::Cycle { id } => EngineError::Cycle {
                path: path.to_string(),
                id,
            },
            other => EngineError::Tree {
                path: path.to_string(),
                reason: other.to_string(),
            },
        })?;
        Ok(ExecutionResult::Tree { nodes })
    }

    async fn multi_select(
        &self,
        path: &str,
        statements: &[NamedStatement],
        params: &Bindings,
    ) -> Result<ExecutionResult, EngineError> {
        let results = futures::future::try_join_all(
            statements
                .iter()
                .map(|s| fetch_rows(self.db.pool(), path, &s.template, params)),
        )
        .await?;

        let mut sets = Map::new();
        for (statement, rows) in statements.iter().zip(results) {
            let rows = rows.into_iter().map(Value::Object).collect();
            sets.insert(statement.name.clone(), Value::Array(rows));
        }
        Ok(ExecutionResult::Sets { sets })
    }

    async fn batch(&self, path: &str, query: &SqlTemplate, items: &[Bindings]) -> Result<ExecutionResult, EngineError> {
        // Reject unbindable elements before touching the database
        for item in items {
            arguments(path, query, item)?;
        }

        let mut tx = self.db.pool().begin().await.map_err(|e| EngineError::execution(path, e))?;
        let outcome: Result<u64, EngineError> = async {
            let mut total = 0;
            for item in items {
                total += execute(&mut *tx, path, query, item).await?.rows_affected();
            }
            Ok(total)
        }
        .await;

        let count = finish(tx, path, outcome).await?;
        Ok(ExecutionResult::Affected { count })
    }

    async fn batch_complex(
        &self,
        path: &str,
        groups: &[NamedStatement],
        payload: &[(String, Vec<Bindings>)],
    ) -> Result<ExecutionResult, EngineError> {
        for (name, _) in payload {
            if !groups.iter().any(|g| &g.name == name) {
                return Err(EngineError::ShapeMismatch {
                    path: path.to_string(),
                    reason: format!("unknown group `{}`", name),
                });
            }
        }

        // Declared group order decides execution order, not payload order
        let plan: Vec<(&NamedStatement, &[Bindings])> = groups
            .iter()
            .map(|g| {
                let items = payload
                    .iter()
                    .find(|(name, _)| name == &g.name)
                    .map(|(_, items)| items.as_slice())
                    .unwrap_or(&[]);
                (g, items)
            })
            .collect();

        for (group, items) in &plan {
            for item in items.iter() {
                arguments(path, &group.template, item)?;
            }
        }

        let mut tx = self.db.pool().begin().await.map_err(|e| EngineError::execution(path, e))?;
        let outcome: Result<Map<String, Value>, EngineError> = async {
            let mut counts = Map::new();
            for (group, items) in &plan {
                let mut total = 0;
                for item in items.iter() {
                    total += execute(&mut *tx, path, &group.template, item).await?.rows_affected();
                }
                counts.insert(group.name.clone(), Value::from(total));
            }
            Ok(counts)
        }
        .await;

        let groups = finish(tx, path, outcome).await?;
        Ok(ExecutionResult::Groups { groups })
    }

    async fn insert_pro(
        &self,
        path: &str,
        query: &SqlTemplate,
        key: &KeyDirective,
        params: &Bindings,
    ) -> Result<ExecutionResult, EngineError> {
        match key.strategy {
            KeyStrategy::Uuid => {
                let value = Value::String(uuid::Uuid::new_v4().to_string());
                let mut bound = params.clone();
                bound.insert(key.name.clone(), value.clone());
                execute(self.db.pool(), path, query, &bound).await?;
                Ok(ExecutionResult::Key { value })
            }
            KeyStrategy::Returning => {
                let values = arguments(path, query, params)?;
                let row = bind_all(query.sql(), &values)
                    .fetch_optional(self.db.pool())
                    .await
                    .map_err(|e| EngineError::execution(path, e))?
                    .ok_or_else(|| EngineError::KeyUnavailable {
                        path: path.to_string(),
                        reason: "statement returned no row".to_string(),
                    })?;
                Ok(ExecutionResult::Key {
                    value: column_value(&row, 0),
                })
            }
            KeyStrategy::Auto => {
                // The key query must see the insert's connection; no key rolls the insert back
                let mut tx = self.db.pool().begin().await.map_err(|e| EngineError::execution(path, e))?;
                let key_sql = last_insert_id_sql(tx.backend_name());
                let outcome: Result<Value, EngineError> = async {
                    let key_sql = key_sql.ok_or_else(|| EngineError::KeyUnavailable {
                        path: path.to_string(),
                        reason: "backend has no last insert id query; use the returning strategy".to_string(),
                    })?;
                    execute(&mut *tx, path, query, params).await?;
                    let row = sqlx::query(key_sql)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(|e| EngineError::execution(path, e))?;
                    match column_value(&row, 0) {
                        Value::Null => Err(EngineError::KeyUnavailable {
                            path: path.to_string(),
                            reason: "backend reported no inserted key".to_string(),
                        }),
                        value => Ok(value),
                    }
                }
                .await;

                let value = finish(tx, path, outcome).await?;
                Ok(ExecutionResult::Key { value })
            }
        }
    }
}

/// Query returning the key generated by the last insert on this connection
fn last_insert_id_sql(backend: &str) -> Option<&'static str> {
    match backend.to_ascii_lowercase().as_str() {
        "sqlite" => Some("SELECT last_insert_rowid()"),
        "postgresql" | "postgres" => Some("SELECT lastval()"),
        _ => None,
    }
}

fn arguments<'a>(path: &str, template: &'a SqlTemplate, params: &'a Bindings) -> Result<Vec<&'a Value>, EngineError> {
    template.arguments(params).map_err(|name| EngineError::MissingParameter {
        path: path.to_string(),
        name: name.to_string(),
    })
}

async fn fetch_rows<'c, E>(executor: E, path: &str, template: &SqlTemplate, params: &Bindings) -> Result<Vec<Row>, EngineError>
where
    E: sqlx::Executor<'c, Database = Any>,
{
    let values = arguments(path, template, params)?;
    let rows = bind_all(template.sql(), &values)
        .fetch_all(executor)
        .await
        .map_err(|e| EngineError::execution(path, e))?;
    Ok(rows.iter().map(row_to_json).collect())
}

async fn execute<'c, E>(executor: E, path: &str, template: &SqlTemplate, params: &Bindings) -> Result<AnyQueryResult, EngineError>
where
    E: sqlx::Executor<'c, Database = Any>,
{
    let values = arguments(path, template, params)?;
    bind_all(template.sql(), &values)
        .execute(executor)
        .await
        .map_err(|e| EngineError::execution(path, e))
}

/// Commit on success, roll back on failure
async fn finish<T>(
    tx: sqlx::Transaction<'static, Any>,
    path: &str,
    outcome: Result<T, EngineError>,
) -> Result<T, EngineError> {
    match outcome {
        Ok(value) => {
            tx.commit().await.map_err(|e| EngineError::execution(path, e))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!("Rollback of {} failed: {}", path, rollback);
            } else {
                debug!("Rolled back {}", path);
            }
            Err(e)
        }
    }
}

fn total_count(value: Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_insert_id_query_per_backend() {
        assert_eq!(last_insert_id_sql("SQLite"), Some("SELECT last_insert_rowid()"));
        assert_eq!(last_insert_id_sql("PostgreSQL"), Some("SELECT lastval()"));
        assert_eq!(last_insert_id_sql("MySQL"), None);
    }
}
