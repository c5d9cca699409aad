//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub repository: RepositoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Stream identity
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_stream_id")]
    pub id: String,
}

fn default_stream_id() -> String {
    "default".to_string()
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            id: default_stream_id(),
        }
    }
}

/// Bucketization strategy: ordered levels, root first
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_levels")]
    pub levels: Vec<LevelConfig>,
}

fn default_levels() -> Vec<LevelConfig> {
    vec![LevelConfig::Page {
        per_page: default_per_page(),
        query: None,
    }]
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            levels: default_levels(),
        }
    }
}

/// One configured level
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LevelConfig {
    /// Bucket by the values of a predicate
    Property {
        predicate: String,
        /// Encode in this query parameter instead of a path segment
        #[serde(default)]
        query: Option<String>,
    },
    /// Fixed-size pages
    Page {
        #[serde(default = "default_per_page")]
        per_page: usize,
        #[serde(default)]
        query: Option<String>,
    },
    /// Fixed time windows; must be the last level
    Timestamp {
        predicate: String,
        #[serde(default = "default_window_ms")]
        window_ms: i64,
        #[serde(default = "default_timestamp_param")]
        param: String,
    },
}

fn default_per_page() -> usize {
    100
}

fn default_window_ms() -> i64 {
    86_400_000 // 1 day
}

fn default_timestamp_param() -> String {
    "timestamp".to_string()
}

/// Cache policy for resolved fragments
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub mode: CacheMode,

    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,

    #[serde(default = "default_public")]
    pub public: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Cacheable; immutable once sealed
    #[default]
    Sealed,
    /// Never cached by shared caches
    Private,
}

fn default_max_age() -> u64 {
    1500
}

fn default_public() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::default(),
            max_age_secs: default_max_age(),
            public: default_public(),
        }
    }
}

/// Repository backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process memory; lost on exit
    #[default]
    Memory,
    /// SQLite document collections
    Document,
    /// Key-value store with a secondary search index
    Search,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "document" => Ok(BackendKind::Document),
            "search" => Ok(BackendKind::Search),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("fragmenta").to_string_lossy().to_string())
        .unwrap_or_else(|| "./fragmenta_data".to_string())
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl RepositoryConfig {
    pub fn in_dir(backend: BackendKind, data_dir: impl AsRef<Path>) -> Self {
        Self {
            backend,
            data_dir: data_dir.as_ref().to_string_lossy().to_string(),
        }
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    /// Parse configuration text
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("fragmenta").join("config.toml")),
            Some(PathBuf::from("/etc/fragmenta/config.toml")),
            Some(PathBuf::from("./fragmenta.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(stream) = std::env::var("FRAGMENTA_STREAM") {
            self.stream.id = stream;
        }

        if let Ok(backend) = std::env::var("FRAGMENTA_BACKEND") {
            match backend.parse() {
                Ok(kind) => self.repository.backend = kind,
                Err(e) => tracing::warn!("Ignoring FRAGMENTA_BACKEND: {}", e),
            }
        }
        if let Ok(data_dir) = std::env::var("FRAGMENTA_DATA_DIR") {
            self.repository.data_dir = data_dir;
        }

        if let Ok(level) = std::env::var("FRAGMENTA_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("FRAGMENTA_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Fragmenta Configuration
#
# Environment variables override these settings:
# - FRAGMENTA_STREAM
# - FRAGMENTA_BACKEND
# - FRAGMENTA_DATA_DIR
# - FRAGMENTA_LOG_LEVEL
# - FRAGMENTA_LOG_FORMAT

[stream]
# Identifier of the member stream served by this instance
id = "default"

# Bucketization levels, root first.
# kind = "property": bucket by the values of a predicate
#   (set query = "<param>" to encode it as a query parameter)
# kind = "page": fixed-size pages of per_page members
# kind = "timestamp": fixed windows of window_ms; must be last

[[strategy.levels]]
kind = "page"
per_page = 100

# [[strategy.levels]]
# kind = "timestamp"
# predicate = "http://purl.org/dc/terms/created"
# window_ms = 86400000
# param = "timestamp"

[cache]
# sealed: cacheable, immutable once a bucket is sealed
# private: never cached by shared caches
mode = "sealed"

# Max age for cacheable fragments (seconds)
max_age_secs = 1500

# Allow shared caches
public = true

[repository]
# Backend: memory, document (SQLite) or search (indexed key-value snapshot)
backend = "memory"

# Directory for backend files
data_dir = "~/.local/share/fragmenta"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/fragmenta/fragmenta.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_template_parses() {
        let config = Config::parse(&generate_default_config()).unwrap();
        assert_eq!(config.stream.id, "default");
        assert_eq!(config.strategy.levels, default_levels());
        assert_eq!(config.cache.mode, CacheMode::Sealed);
        assert_eq!(config.cache.max_age_secs, 1500);
        assert_eq!(config.repository.backend, BackendKind::Memory);
    }

    #[test]
    fn test_parse_levels() {
        let config = Config::parse(
            r#"
            [stream]
            id = "sensors"

            [[strategy.levels]]
            kind = "property"
            predicate = "http://example.org/x"

            [[strategy.levels]]
            kind = "page"
            per_page = 5
            query = "page"

            [[strategy.levels]]
            kind = "timestamp"
            predicate = "http://example.org/t"
            window_ms = 3600000

            [cache]
            mode = "private"

            [repository]
            backend = "document"
            data_dir = "/tmp/fragmenta"
            "#,
        )
        .unwrap();

        assert_eq!(config.stream.id, "sensors");
        assert_eq!(
            config.strategy.levels,
            vec![
                LevelConfig::Property {
                    predicate: "http://example.org/x".into(),
                    query: None,
                },
                LevelConfig::Page {
                    per_page: 5,
                    query: Some("page".into()),
                },
                LevelConfig::Timestamp {
                    predicate: "http://example.org/t".into(),
                    window_ms: 3_600_000,
                    param: "timestamp".into(),
                },
            ]
        );
        assert_eq!(config.cache.mode, CacheMode::Private);
        assert_eq!(config.repository.backend, BackendKind::Document);
        assert_eq!(config.repository.data_path(), PathBuf::from("/tmp/fragmenta"));
    }

    #[test]
    fn test_parse_rejects_unknown_level_kind() {
        let result = Config::parse(
            r#"
            [[strategy.levels]]
            kind = "geo"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("Search".parse::<BackendKind>(), Ok(BackendKind::Search));
        assert!("redis".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/fragmenta.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
