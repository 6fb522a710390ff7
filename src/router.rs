use std::sync::Arc;

use crate::statement::{StatementDefinition, StatementStore, StoreError};

/// Maps request URLs onto logical statement paths.
///
/// `<prefix>/<alias>/<relative/path>` resolves to `<alias>/<relative/path>`
/// when `alias` is a configured root. Resolution is a pure string
/// transformation; only `lookup` consults the store's entries.
#[derive(Clone)]
pub struct StatementRouter {
    prefix: String,
    store: Arc<StatementStore>,
}

impl StatementRouter {
    pub fn new(prefix: impl Into<String>, store: Arc<StatementStore>) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        Self { prefix, store }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn store(&self) -> &Arc<StatementStore> {
        &self.store
    }

    /// URL path to logical path
    pub fn resolve(&self, url_path: &str) -> Result<String, StoreError> {
        let not_found = || StoreError::NotFound(url_path.to_string());

        let rest = url_path.strip_prefix(self.prefix.as_str()).ok_or_else(not_found)?;
        let rest = rest.strip_prefix('/').ok_or_else(not_found)?;
        self.resolve_relative(rest)
    }

    /// `<alias>/<relative/path>` (prefix already removed) to logical path
    pub fn resolve_relative(&self, rest: &str) -> Result<String, StoreError> {
        let rest = rest.trim_end_matches('/');
        let (alias, relative) = rest
            .split_once('/')
            .ok_or_else(|| StoreError::InvalidPath(rest.to_string()))?;

        if self.store.root_dir(alias).is_none() {
            return Err(StoreError::UnknownRoot(alias.to_string()));
        }
        if relative
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(StoreError::InvalidPath(rest.to_string()));
        }

        Ok(format!("{}/{}", alias, relative))
    }

    /// Resolve and fetch the current definition
    pub fn lookup(&self, url_path: &str) -> Result<Arc<StatementDefinition>, StoreError> {
        self.store.get(&self.resolve(url_path)?)
    }

    /// URL under which a logical path is served
    pub fn url_for(&self, logical_path: &str) -> String {
        format!("{}/{}", self.prefix, logical_path)
    }
}
