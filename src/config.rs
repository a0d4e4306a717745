//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use regex::RegexBuilder;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdimConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logs: LogsConfig,

    #[serde(default)]
    pub matcher: MatcherConfig,

    #[serde(default)]
    pub scorer: ScorerConfig,

    #[serde(default)]
    pub advisor: AdvisorConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("adim").join("adim.db").to_string_lossy().to_string())
        .unwrap_or_else(|| "./adim.db".to_string())
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Raw statement log location
#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,

    #[serde(default = "default_log_extension")]
    pub extension: String,
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_log_extension() -> String {
    "log".to_string()
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            extension: default_log_extension(),
        }
    }
}

/// Log matcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MatcherConfig {
    /// Minimum normalized similarity for a logged statement to count as an
    /// occurrence of a tracked query
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Case-insensitive regexes; matching statements are never recorded
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

fn default_similarity_threshold() -> f64 {
    0.9
}

/// Admin-tool chatter, catalog probes and session control
pub fn default_exclude_patterns() -> Vec<String> {
    [
        r"/\*pga4dash\*/",
        r"pg_catalog",
        r"pg_attribute",
        r"pg_type",
        r"pg_class",
        r"pg_namespace",
        r"attrelid\s*=",
        r"pg_depend",
        r"pg_index",
        r"pg_description",
        r"^SELECT at\.",
        r"^SELECT n\.",
        r"^SELECT nsp\.",
        r"^SELECT rel\.",
        r"^SELECT CASE\.",
        r"^SELECT version\(\)",
        r"^SET\s",
        r"^COMMIT\b",
        r"^BEGIN\b",
        r"^ROLLBACK\b",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

/// Workload scorer configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScorerConfig {
    #[serde(default)]
    pub weights: ScoreWeights,

    /// Only statements scoring strictly above this are admitted
    #[serde(default)]
    pub min_score: f64,
}

/// Per-metric weights of the workload score; they must sum to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_total_weight")]
    pub total_exec_time: f64,

    #[serde(default = "default_mean_weight")]
    pub mean_exec_time: f64,

    #[serde(default = "default_minor_weight")]
    pub calls: f64,

    #[serde(default = "default_minor_weight")]
    pub shared_blks_read: f64,

    #[serde(default = "default_minor_weight")]
    pub temp_blks_written: f64,
}

fn default_total_weight() -> f64 {
    0.30
}

fn default_mean_weight() -> f64 {
    0.25
}

fn default_minor_weight() -> f64 {
    0.15
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.total_exec_time
            + self.mean_exec_time
            + self.calls
            + self.shared_blks_read
            + self.temp_blks_written
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            total_exec_time: default_total_weight(),
            mean_exec_time: default_mean_weight(),
            calls: default_minor_weight(),
            shared_blks_read: default_minor_weight(),
            temp_blks_written: default_minor_weight(),
        }
    }
}

/// Index advisor configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdvisorConfig {
    /// Accept manually submitted index statements after parsing only,
    /// without the create-then-drop trial against the live schema
    #[serde(default)]
    pub skip_validation: bool,
}

/// Lifecycle scheduler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Number of inter-arrival deltas fed to the predictor
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    #[serde(default = "default_safety_margin")]
    pub safety_margin_hours: f64,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    #[serde(default = "default_max_parallel")]
    pub max_parallel_queries: usize,
}

fn default_window_size() -> usize {
    10
}

fn default_safety_margin() -> f64 {
    6.0
}

fn default_query_timeout() -> u64 {
    30
}

fn default_max_parallel() -> usize {
    4
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            safety_margin_hours: default_safety_margin(),
            query_timeout_secs: default_query_timeout(),
            max_parallel_queries: default_max_parallel(),
        }
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

impl AdimConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: AdimConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = AdimConfig::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("adim").join("config.toml")),
            Some(PathBuf::from("/etc/adim/config.toml")),
            Some(PathBuf::from("./adim.toml")),
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

    /// Check cross-field constraints that serde defaults cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let weight_sum = self.scorer.weights.sum();
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::Invalid(format!(
                "scorer weights must sum to 1.0, got {}",
                weight_sum
            )));
        }

        let threshold = self.matcher.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "matcher.similarity_threshold must be within 0..=1, got {}",
                threshold
            )));
        }

        if !(0.0..=1.0).contains(&self.scorer.min_score) {
            return Err(ConfigError::Invalid(format!(
                "scorer.min_score must be within 0..=1, got {}",
                self.scorer.min_score
            )));
        }

        if self.scheduler.window_size == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.window_size must be at least 1".to_string(),
            ));
        }

        if self.scheduler.max_parallel_queries == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_parallel_queries must be at least 1".to_string(),
            ));
        }

        if !self.scheduler.safety_margin_hours.is_finite()
            || self.scheduler.safety_margin_hours < 0.0
        {
            return Err(ConfigError::Invalid(format!(
                "scheduler.safety_margin_hours must be a non-negative number, got {}",
                self.scheduler.safety_margin_hours
            )));
        }

        for pattern in &self.matcher.exclude_patterns {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    ConfigError::Invalid(format!("exclude pattern {:?}: {}", pattern, e))
                })?;
        }

        Ok(())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("ADIM_DATABASE_PATH") {
            self.store.path = path;
        }

        if let Ok(dir) = std::env::var("ADIM_LOG_DIR") {
            self.logs.dir = dir;
        }

        if let Ok(hours) = std::env::var("ADIM_SAFETY_MARGIN_HOURS") {
            if let Ok(h) = hours.parse() {
                self.scheduler.safety_margin_hours = h;
            }
        }
        if let Ok(window) = std::env::var("ADIM_WINDOW_SIZE") {
            if let Ok(w) = window.parse() {
                self.scheduler.window_size = w;
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("ADIM_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("ADIM_LOG_FORMAT") {
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

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# ADIM Configuration
#
# Environment variables override these settings:
# - ADIM_DATABASE_PATH
# - ADIM_LOG_DIR
# - ADIM_SAFETY_MARGIN_HOURS
# - ADIM_WINDOW_SIZE
# - ADIM_LOG_LEVEL
# - ADIM_LOG_FORMAT

[store]
# SQLite file holding tracked queries, occurrences and maintenance logs
path = "./adim.db"

[logs]
# Directory the database server writes statement logs to
dir = "./logs"

# Only files with this extension are read
extension = "log"

[matcher]
# Minimum similarity (0..1) between a logged statement and a tracked query
similarity_threshold = 0.9

# Statements matching any of these case-insensitive regexes are ignored.
# Omit to use the built-in list (admin tools, catalog probes, BEGIN/COMMIT/SET).
# exclude_patterns = ['/\*pga4dash\*/', 'pg_catalog', '^SET\s']

[scorer]
# Only statements scoring strictly above this are tracked
min_score = 0.0

[scorer.weights]
# Must sum to 1.0
total_exec_time = 0.30
mean_exec_time = 0.25
calls = 0.15
shared_blks_read = 0.15
temp_blks_written = 0.15

[advisor]
# Accept manual index statements without a create-then-drop trial
skip_validation = false

[scheduler]
# Inter-arrival deltas fed to the predictor
window_size = 10

# Indexes are due this many hours before the predicted execution
safety_margin_hours = 6.0

# Per-query time limit within a sweep (seconds)
query_timeout_secs = 30

# Tracked queries evaluated concurrently
max_parallel_queries = 4

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/adim/adim.log"
"#
    .to_string()
}
