use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("Failed to parse {var} as {expected_type}: {source}")]
    ParseError {
        var: String,
        expected_type: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Configuration for the result cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_entries: 20,
        }
    }
}

/// Configuration for history, library and cache files
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub history_max: usize,
    pub library_max: usize,
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_max: 50,
            library_max: 100,
            data_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("logdeck"),
        }
    }
}

impl StoreConfig {
    pub fn cache_file(&self) -> PathBuf {
        self.data_dir.join("cache.json")
    }

    pub fn history_file(&self) -> PathBuf {
        self.data_dir.join("history.json")
    }

    pub fn library_file(&self) -> PathBuf {
        self.data_dir.join("library.json")
    }
}

/// Configuration for query execution and paging
#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub page_size: usize,
    pub fetch_timeout_secs: u64,
    pub auto_load_max_pages: usize,
    pub viewport_rows: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            fetch_timeout_secs: 60,
            auto_load_max_pages: 200,
            viewport_rows: 20,
        }
    }
}

/// External commands used to reach the log backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub fetch_command: String,
    pub projects_command: String,
    pub opener: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            fetch_command:
                "gcloud logging read {filter} --project={project} --limit={limit} --format=json"
                    .to_string(),
            projects_command: "gcloud projects list --format=value(projectId)".to_string(),
            opener: std::env::var("EDITOR")
                .ok()
                .filter(|editor| !editor.trim().is_empty())
                .unwrap_or_else(|| "less".to_string()),
        }
    }
}

/// Configuration for logging functionality
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub rust_log: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            rust_log: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// Directives from `rust_log`, or `info` when they don't parse.
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.rust_log).unwrap_or_else(|e| {
            eprintln!("Ignoring invalid RUST_LOG '{}': {e}", self.rust_log);
            EnvFilter::new("info")
        })
    }
}

/// Main configuration container
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub query: QueryConfig,
    pub backend: BackendConfig,
    pub log: LogConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(ttl) = parse_var("LOGDECK_CACHE_TTL_SECS", "u64")? {
            config.cache.ttl_secs = ttl;
        }
        if let Some(max) = parse_var("LOGDECK_CACHE_MAX_ENTRIES", "usize")? {
            config.cache.max_entries = max;
        }
        if let Some(max) = parse_var("LOGDECK_HISTORY_MAX", "usize")? {
            config.store.history_max = max;
        }
        if let Some(max) = parse_var("LOGDECK_LIBRARY_MAX", "usize")? {
            config.store.library_max = max;
        }
        if let Ok(dir) = std::env::var("LOGDECK_DATA_DIR") {
            config.store.data_dir = PathBuf::from(dir);
        }
        if let Some(size) = parse_var("LOGDECK_PAGE_SIZE", "usize")? {
            config.query.page_size = size;
        }
        if let Some(timeout) = parse_var("LOGDECK_FETCH_TIMEOUT_SECS", "u64")? {
            config.query.fetch_timeout_secs = timeout;
        }
        if let Some(pages) = parse_var("LOGDECK_AUTO_LOAD_MAX_PAGES", "usize")? {
            config.query.auto_load_max_pages = pages;
        }
        if let Some(rows) = parse_var("LOGDECK_VIEWPORT_ROWS", "usize")? {
            config.query.viewport_rows = rows;
        }
        if let Ok(command) = std::env::var("LOGDECK_FETCH_COMMAND") {
            config.backend.fetch_command = command;
        }
        if let Ok(command) = std::env::var("LOGDECK_PROJECTS_COMMAND") {
            config.backend.projects_command = command;
        }
        if let Ok(opener) = std::env::var("LOGDECK_OPENER") {
            config.backend.opener = opener;
        }

        // RUST_LOG
        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            config.log.rust_log = rust_log;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("LOGDECK_CACHE_TTL_SECS", self.cache.ttl_secs == 0, "cache TTL"),
            ("LOGDECK_CACHE_MAX_ENTRIES", self.cache.max_entries == 0, "cache size"),
            ("LOGDECK_HISTORY_MAX", self.store.history_max == 0, "history size"),
            ("LOGDECK_LIBRARY_MAX", self.store.library_max == 0, "library size"),
            ("LOGDECK_PAGE_SIZE", self.query.page_size == 0, "page size"),
            ("LOGDECK_FETCH_TIMEOUT_SECS", self.query.fetch_timeout_secs == 0, "timeout"),
            ("LOGDECK_AUTO_LOAD_MAX_PAGES", self.query.auto_load_max_pages == 0, "page limit"),
            ("LOGDECK_VIEWPORT_ROWS", self.query.viewport_rows == 0, "viewport"),
        ];
        if let Some((var, _, what)) = positive.iter().find(|(_, is_zero, _)| *is_zero) {
            return Err(ConfigError::InvalidValue {
                var: var.to_string(),
                message: format!("{what} must be greater than 0"),
            });
        }

        if self.backend.fetch_command.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                var: "LOGDECK_FETCH_COMMAND".to_string(),
                message: "fetch command must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

fn parse_var<T>(var: &str, expected_type: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Ok(raw) = std::env::var(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e| ConfigError::ParseError {
            var: var.to_string(),
            expected_type: expected_type.to_string(),
            source: Box::new(e),
        })
}
