use moka::future::Cache;
use moka::Expiry;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::error::EngineError;
use super::result::ExecutionResult;
use crate::config::CacheConfig;
use crate::statement::{CacheDirective, StatementDefinition};

#[derive(Clone)]
struct CachedResult {
    result: Arc<ExecutionResult>,
    ttl: Duration,
}

struct DirectiveTtl;

impl Expiry<String, CachedResult> for DirectiveTtl {
    fn expire_after_create(&self, _key: &String, value: &CachedResult, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Result cache for read statements carrying a `cache` directive.
///
/// Entries expire after the directive's ttl (or the configured default) and
/// the cache holds at most `max_entries` results. Keys include the definition
/// revision, so a reloaded definition never sees results of its predecessor.
#[derive(Clone)]
pub struct ResultCache {
    inner: Cache<String, CachedResult>,
    default_ttl: Duration,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        let inner = Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(DirectiveTtl)
            .build();
        Self {
            inner,
            default_ttl: Duration::from_secs(config.default_ttl_secs),
        }
    }

    /// Cached result for `key`, computing it at most once across concurrent
    /// callers. `recache` drops the entry first; concurrent refreshes of one
    /// key then join the same computation.
    pub async fn get_or_compute<F>(
        &self,
        key: String,
        directive: &CacheDirective,
        recache: bool,
        compute: F,
    ) -> Result<Arc<ExecutionResult>, EngineError>
    where
        F: Future<Output = Result<ExecutionResult, EngineError>>,
    {
        let ttl = directive.ttl_or(self.default_ttl);

        if recache {
            debug!("Recomputing cached result {}", key);
            self.inner.invalidate(&key).await;
        }

        self.inner
            .try_get_with(key, async move {
                compute.await.map(|result| CachedResult {
                    result: Arc::new(result),
                    ttl,
                })
            })
            .await
            .map(|cached| cached.result)
            .map_err(|e: Arc<EngineError>| (*e).clone())
    }
}

/// Cache key for one execution: logical path, revision and a digest of the
/// normalized bindings (object keys sorted at every level).
pub fn cache_key(def: &StatementDefinition, bindings: &Map<String, Value>) -> String {
    let normalized = normalize(&Value::Object(bindings.clone()));
    let mut hasher = Sha256::new();
    hasher.update(normalized.to_string().as_bytes());
    format!("{}#{}#{:x}", def.path, def.revision, hasher.finalize())
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), normalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}
