use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Startup configuration errors. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid statement extension: {0:?}")]
    InvalidExtension(String),

    #[error("Invalid route prefix: {0:?}")]
    InvalidPrefix(String),

    #[error("Invalid root alias: {0:?}")]
    InvalidRootAlias(String),

    #[error("Root {alias} points to missing directory {}", .path.display())]
    MissingRoot { alias: String, path: PathBuf },

    #[error("Malformed root entry {0:?}, expected alias=directory")]
    MalformedRoot(String),

    #[error("No statement roots configured")]
    NoRoots,

    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub directsql: DirectSqlConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectSqlConfig {
    /// URL prefix in front of `/<root>/<statement path>`
    pub prefix: String,
    /// Statement file extension, without the dot
    pub ext: String,
    /// Reload definitions when files change
    pub watch: bool,
    /// Root alias -> directory
    pub roots: BTreeMap<String, PathBuf>,
    /// Bounded queue between filesystem notifications and the reload task
    pub watch_queue_capacity: usize,
}

impl Default for DirectSqlConfig {
    fn default() -> Self {
        Self {
            prefix: "/api/sql".to_string(),
            ext: "msql".to_string(),
            watch: false,
            roots: BTreeMap::new(),
            watch_queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub enable_slow_query_warning: bool,
    pub slow_query_threshold_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            connection_timeout: 30,
            enable_slow_query_warning: true,
            slow_query_threshold_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub default_ttl_secs: u64,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 60,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub request_timeout_ms: u64,
    pub default_page_size: i64,
    pub max_page_size: i64,
    pub max_request_size_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            default_page_size: 20,
            max_page_size: 1000,
            max_request_size_bytes: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Sections that may appear in a `DIRECTSQL_CONFIG` YAML file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    directsql: Option<DirectSqlConfig>,
    database: Option<DatabaseConfig>,
    cache: Option<CacheConfig>,
    api: Option<ApiConfig>,
}

impl AppConfig {
    /// Environment preset, then `file` (or `DIRECTSQL_CONFIG`), then specific env vars
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then the optional file, then specific env vars
        let mut config = match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        };

        let file = file
            .map(Path::to_path_buf)
            .or_else(|| env::var_os("DIRECTSQL_CONFIG").map(PathBuf::from));
        if let Some(path) = file {
            config = config.with_file(&path)?;
        }

        config.with_env_overrides()
    }

    /// Overlay sections found in a YAML config file
    pub fn with_file(mut self, path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file: FileConfig = serde_yaml::from_str(&text).map_err(|e| ConfigError::Yaml {
            path: path.to_path_buf(),
            source: e,
        })?;

        if let Some(directsql) = file.directsql {
            // Relative roots are relative to the config file
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            self.directsql = DirectSqlConfig {
                roots: directsql
                    .roots
                    .into_iter()
                    .map(|(alias, dir)| {
                        let dir = if dir.is_relative() { base.join(dir) } else { dir };
                        (alias, dir)
                    })
                    .collect(),
                ..directsql
            };
        }
        if let Some(database) = file.database {
            self.database = database;
        }
        if let Some(cache) = file.cache {
            self.cache = cache;
        }
        if let Some(api) = file.api {
            self.api = api;
        }
        Ok(self)
    }

    fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        // Statement routing overrides
        if let Ok(v) = env::var("DIRECTSQL_PREFIX") {
            self.directsql.prefix = v;
        }
        if let Ok(v) = env::var("DIRECTSQL_EXT") {
            self.directsql.ext = v;
        }
        if let Ok(v) = env::var("DIRECTSQL_WATCH") {
            self.directsql.watch = v.parse().unwrap_or(self.directsql.watch);
        }
        if let Ok(v) = env::var("DIRECTSQL_ROOTS") {
            self.directsql.roots = parse_roots(&v)?;
        }
        if let Ok(v) = env::var("DIRECTSQL_WATCH_QUEUE_CAPACITY") {
            self.directsql.watch_queue_capacity = v.parse().unwrap_or(self.directsql.watch_queue_capacity);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Ok(v) = env::var("DATABASE_ENABLE_SLOW_QUERY_WARNING") {
            self.database.enable_slow_query_warning = v.parse().unwrap_or(self.database.enable_slow_query_warning);
        }
        if let Ok(v) = env::var("DATABASE_SLOW_QUERY_THRESHOLD_MS") {
            self.database.slow_query_threshold_ms = v.parse().unwrap_or(self.database.slow_query_threshold_ms);
        }

        // Cache overrides
        if let Ok(v) = env::var("CACHE_ENABLED") {
            self.cache.enabled = v.parse().unwrap_or(self.cache.enabled);
        }
        if let Ok(v) = env::var("CACHE_DEFAULT_TTL_SECS") {
            self.cache.default_ttl_secs = v.parse().unwrap_or(self.cache.default_ttl_secs);
        }
        if let Ok(v) = env::var("CACHE_MAX_ENTRIES") {
            self.cache.max_entries = v.parse().unwrap_or(self.cache.max_entries);
        }

        // API overrides
        if let Ok(v) = env::var("API_REQUEST_TIMEOUT_MS") {
            self.api.request_timeout_ms = v.parse().unwrap_or(self.api.request_timeout_ms);
        }
        if let Ok(v) = env::var("API_DEFAULT_PAGE_SIZE") {
            self.api.default_page_size = v.parse().unwrap_or(self.api.default_page_size);
        }
        if let Ok(v) = env::var("API_MAX_PAGE_SIZE") {
            self.api.max_page_size = v.parse().unwrap_or(self.api.max_page_size);
        }
        if let Ok(v) = env::var("API_MAX_REQUEST_SIZE_BYTES") {
            self.api.max_request_size_bytes = v.parse().unwrap_or(self.api.max_request_size_bytes);
        }

        Ok(self)
    }

    /// Reject configurations the server cannot start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.directsql.validate()?;

        if self.api.default_page_size <= 0 {
            return Err(ConfigError::InvalidSetting {
                name: "api.default_page_size",
                reason: "must be positive".to_string(),
            });
        }
        if self.api.max_page_size < self.api.default_page_size {
            return Err(ConfigError::InvalidSetting {
                name: "api.max_page_size",
                reason: "must be at least the default page size".to_string(),
            });
        }
        if self.api.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "api.request_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            directsql: DirectSqlConfig {
                watch: true,
                ..DirectSqlConfig::default()
            },
            database: DatabaseConfig::default(),
            cache: CacheConfig {
                enabled: false,
                ..CacheConfig::default()
            },
            api: ApiConfig::default(),
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            directsql: DirectSqlConfig {
                watch: true,
                ..DirectSqlConfig::default()
            },
            database: DatabaseConfig {
                max_connections: 20,
                connection_timeout: 10,
                slow_query_threshold_ms: 500,
                ..DatabaseConfig::default()
            },
            cache: CacheConfig::default(),
            api: ApiConfig {
                request_timeout_ms: 15_000,
                max_page_size: 500,
                max_request_size_bytes: 5 * 1024 * 1024, // 5MB
                ..ApiConfig::default()
            },
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            directsql: DirectSqlConfig::default(),
            database: DatabaseConfig {
                max_connections: 50,
                connection_timeout: 5,
                slow_query_threshold_ms: 1000,
                ..DatabaseConfig::default()
            },
            cache: CacheConfig {
                default_ttl_secs: 300,
                ..CacheConfig::default()
            },
            api: ApiConfig {
                request_timeout_ms: 10_000,
                max_page_size: 100,
                max_request_size_bytes: 2 * 1024 * 1024, // 2MB
                ..ApiConfig::default()
            },
        }
    }
}

impl DirectSqlConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ext = self.ext.trim_start_matches('.');
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ConfigError::InvalidExtension(self.ext.clone()));
        }

        let prefix_ok = self.prefix.is_empty()
            || (self.prefix.starts_with('/')
                && !self.prefix.ends_with('/')
                && !self.prefix.contains(&['*', ':', '{', '}'][..]));
        if !prefix_ok {
            return Err(ConfigError::InvalidPrefix(self.prefix.clone()));
        }

        if self.roots.is_empty() {
            return Err(ConfigError::NoRoots);
        }
        for (alias, dir) in &self.roots {
            if !is_valid_alias(alias) {
                return Err(ConfigError::InvalidRootAlias(alias.clone()));
            }
            if !dir.is_dir() {
                return Err(ConfigError::MissingRoot {
                    alias: alias.clone(),
                    path: dir.clone(),
                });
            }
        }
        Ok(())
    }
}

fn is_valid_alias(alias: &str) -> bool {
    !alias.is_empty() && alias.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parse `biz=bizmodel,sys=sysmodel`
pub fn parse_roots(spec: &str) -> Result<BTreeMap<String, PathBuf>, ConfigError> {
    let mut roots = BTreeMap::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (alias, dir) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedRoot(entry.to_string()))?;
        let (alias, dir) = (alias.trim(), dir.trim());
        if !is_valid_alias(alias) {
            return Err(ConfigError::InvalidRootAlias(alias.to_string()));
        }
        if dir.is_empty() {
            return Err(ConfigError::MalformedRoot(entry.to_string()));
        }
        if roots.insert(alias.to_string(), PathBuf::from(dir)).is_some() {
            return Err(ConfigError::MalformedRoot(format!("duplicate alias {}", alias)));
        }
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert!(config.directsql.watch);
        assert!(!config.cache.enabled);
        assert_eq!(config.directsql.ext, "msql");
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert!(!config.directsql.watch);
        assert!(config.cache.enabled);
        assert_eq!(config.api.max_page_size, 100);
    }

    #[test]
    fn parses_root_aliases() {
        let roots = parse_roots("biz=bizmodel, sys = sysmodel").unwrap();
        assert_eq!(roots.get("biz"), Some(&PathBuf::from("bizmodel")));
        assert_eq!(roots.get("sys"), Some(&PathBuf::from("sysmodel")));

        assert!(matches!(parse_roots("biz"), Err(ConfigError::MalformedRoot(_))));
        assert!(matches!(parse_roots("b/z=dir"), Err(ConfigError::InvalidRootAlias(_))));
        assert!(matches!(parse_roots("a=x,a=y"), Err(ConfigError::MalformedRoot(_))));
    }

    #[test]
    fn validate_rejects_bad_extension_and_missing_roots() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = AppConfig::development();
        assert!(matches!(config.validate(), Err(ConfigError::NoRoots)));

        config.directsql.roots.insert("biz".to_string(), tmp.path().to_path_buf());
        assert!(config.validate().is_ok());

        config.directsql.ext = "m.sql".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidExtension(_))));

        config.directsql.ext = "msql".to_string();
        config.directsql.roots.insert("sys".to_string(), tmp.path().join("missing"));
        assert!(matches!(config.validate(), Err(ConfigError::MissingRoot { .. })));
    }

    #[test]
    fn config_file_roots_resolve_relative_to_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("directsql.yaml");
        std::fs::write(
            &file,
            "directsql:\n  prefix: /sql\n  roots:\n    biz: bizmodel\ncache:\n  enabled: false\n",
        )
        .unwrap();

        let config = AppConfig::production().with_file(&file).unwrap();
        assert_eq!(config.directsql.prefix, "/sql");
        assert_eq!(config.directsql.ext, "msql");
        assert_eq!(config.directsql.roots["biz"], tmp.path().join("bizmodel"));
        assert!(!config.cache.enabled);
    }
}
