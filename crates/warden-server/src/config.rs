use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use warden_core::cache::CacheConfig;
use warden_core::engine::EngineConfig;
use warden_core::schema::SchemaLimits;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfigValues,
    pub cache: CacheConfigValues,
    pub schema_limits: SchemaLimitsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfigValues {
    pub max_depth: usize,
    pub max_concurrent_branches: usize,
    pub check_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfigValues {
    pub capacity: usize,
    pub ttl_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchemaLimitsConfig {
    pub max_types: usize,
    pub max_relations_per_type: usize,
    pub max_permissions_per_type: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            database_url: None,
            max_connections: 10,
        }
    }
}

impl Default for EngineConfigValues {
    fn default() -> Self {
        Self {
            max_depth: 25,
            max_concurrent_branches: 10,
            check_timeout_ms: 2000,
        }
    }
}

impl Default for CacheConfigValues {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl_ms: 5000,
        }
    }
}

impl Default for SchemaLimitsConfig {
    fn default() -> Self {
        let limits = SchemaLimits::default();
        Self {
            max_types: limits.max_types,
            max_relations_per_type: limits.max_relations_per_type,
            max_permissions_per_type: limits.max_permissions_per_type,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e.to_string()))?;
            toml::from_str::<AppConfig>(&contents)
                .map_err(|e| ConfigError::ParseToml(e.to_string()))?
        } else {
            AppConfig::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// `lookup` resolves an environment variable by name.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("WARDEN_HTTP_HOST") {
            self.http.host = v;
        }
        if let Some(v) = lookup("WARDEN_HTTP_PORT")
            && let Ok(port) = v.parse()
        {
            self.http.port = port;
        }
        if let Some(v) = lookup("WARDEN_STORAGE_BACKEND") {
            match v.as_str() {
                "memory" => self.storage.backend = StorageBackend::Memory,
                "postgres" => self.storage.backend = StorageBackend::Postgres,
                _ => {}
            }
        }
        if let Some(v) = lookup("WARDEN_DATABASE_URL") {
            self.storage.database_url = Some(v);
        }
        if let Some(v) = lookup("WARDEN_DATABASE_MAX_CONNECTIONS")
            && let Ok(n) = v.parse()
        {
            self.storage.max_connections = n;
        }
        if let Some(v) = lookup("WARDEN_ENGINE_MAX_DEPTH")
            && let Ok(n) = v.parse()
        {
            self.engine.max_depth = n;
        }
        if let Some(v) = lookup("WARDEN_CHECK_TIMEOUT_MS")
            && let Ok(n) = v.parse()
        {
            self.engine.check_timeout_ms = n;
        }
        if let Some(v) = lookup("WARDEN_CACHE_TTL_MS")
            && let Ok(n) = v.parse()
        {
            self.cache.ttl_ms = n;
        }
        if let Some(v) = lookup("WARDEN_CACHE_CAPACITY")
            && let Ok(n) = v.parse()
        {
            self.cache.capacity = n;
        }
        if let Some(v) = lookup("WARDEN_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some(v) = lookup("WARDEN_LOG_FORMAT") {
            match v.as_str() {
                "json" => self.log.format = LogFormat::Json,
                "pretty" => self.log.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.http.port == 0 {
            return Err(ConfigError::Validation(
                "http.port must be non-zero".to_string(),
            ));
        }
        if self.engine.max_depth == 0 {
            return Err(ConfigError::Validation(
                "engine.max_depth must be non-zero".to_string(),
            ));
        }
        if self.engine.max_concurrent_branches == 0 {
            return Err(ConfigError::Validation(
                "engine.max_concurrent_branches must be non-zero".to_string(),
            ));
        }
        if self.storage.max_connections == 0 {
            return Err(ConfigError::Validation(
                "storage.max_connections must be non-zero".to_string(),
            ));
        }
        if self.storage.backend == StorageBackend::Postgres
            && self
                .storage
                .database_url
                .as_deref()
                .is_none_or(str::is_empty)
        {
            return Err(ConfigError::Validation(
                "storage.database_url is required for the postgres backend".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_depth: self.engine.max_depth,
            max_concurrent_branches: self.engine.max_concurrent_branches,
            check_timeout: Duration::from_millis(self.engine.check_timeout_ms),
        }
    }

    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            capacity: self.cache.capacity,
            ttl: Duration::from_millis(self.cache.ttl_ms),
        }
    }

    pub fn to_schema_limits(&self) -> SchemaLimits {
        SchemaLimits {
            max_types: self.schema_limits.max_types,
            max_relations_per_type: self.schema_limits.max_relations_per_type,
            max_permissions_per_type: self.schema_limits.max_permissions_per_type,
        }
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    ReadFile(String, String),

    #[error("failed to parse TOML config: {0}")]
    ParseToml(String),

    #[error("config validation failed: {0}")]
    Validation(String),
}
