use crate::error::{FtsError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub segment: SegmentConfig,
    #[serde(default)]
    pub bm25: Bm25Config,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Upper bound on `offset + limit` for a single search.
    #[serde(default = "default_max_topk")]
    pub max_topk: usize,
    #[serde(default = "default_iterator_batch_size")]
    pub default_iterator_batch_size: usize,
    #[serde(default = "default_max_iterator_batch_size")]
    pub max_iterator_batch_size: usize,
    /// Postings visited between two cancellation checks.
    #[serde(default = "default_cancel_check_interval")]
    pub cancel_check_interval: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Growing segment is sealed once it holds this many rows.
    #[serde(default = "default_max_growing_rows")]
    pub max_growing_rows: usize,
    #[serde(default = "default_seal_retry_attempts")]
    pub seal_retry_attempts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Config {
    #[serde(default = "default_k1")]
    pub default_k1: f32,
    #[serde(default = "default_b")]
    pub default_b: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_max_topk() -> usize {
    std::env::var("TEXTSIFT_MAX_TOPK")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(16_384)
}
fn default_iterator_batch_size() -> usize {
    1000
}
fn default_max_iterator_batch_size() -> usize {
    16_384
}
fn default_cancel_check_interval() -> usize {
    1024
}
fn default_max_growing_rows() -> usize {
    std::env::var("TEXTSIFT_MAX_GROWING_ROWS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(65_536)
}
fn default_seal_retry_attempts() -> usize {
    std::env::var("TEXTSIFT_SEAL_RETRY_ATTEMPTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3)
}
fn default_k1() -> f32 {
    1.2
}
fn default_b() -> f32 {
    0.75
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    std::env::var("TEXTSIFT_LOG_FORMAT").unwrap_or_else(|_| "json".to_string())
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_topk: default_max_topk(),
            default_iterator_batch_size: default_iterator_batch_size(),
            max_iterator_batch_size: default_max_iterator_batch_size(),
            cancel_check_interval: default_cancel_check_interval(),
        }
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_growing_rows: default_max_growing_rows(),
            seal_retry_attempts: default_seal_retry_attempts(),
        }
    }
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            default_k1: default_k1(),
            default_b: default_b(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Resolve the configuration file path.
///
/// Priority:
/// 1. `TEXTSIFT_CONFIG` environment variable
/// 2. `./textsift.toml` if it exists
/// 3. None (use defaults)
pub fn resolve_config_path() -> Option<String> {
    std::env::var("TEXTSIFT_CONFIG").ok().or_else(|| {
        let default = "textsift.toml";
        std::path::Path::new(default)
            .exists()
            .then(|| default.to_string())
    })
}

impl Config {
    /// Load config from a TOML file, falling back to defaults.
    /// Env var > TOML file > defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p).map_err(|e| {
                    FtsError::Config(format!("failed to read config file {p}: {e}"))
                })?;
                Self::from_toml(&content)?
            }
            None => Config::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| FtsError::Config(format!("failed to parse config: {e}")))
    }

    fn validate(&self) -> Result<()> {
        if self.search.max_topk == 0 {
            return Err(FtsError::Config("search.max_topk must be > 0".into()));
        }
        if self.search.cancel_check_interval == 0 {
            return Err(FtsError::Config(
                "search.cancel_check_interval must be > 0".into(),
            ));
        }
        if self.search.default_iterator_batch_size == 0
            || self.search.default_iterator_batch_size > self.search.max_iterator_batch_size
        {
            return Err(FtsError::Config(format!(
                "search.default_iterator_batch_size must be in 1..={}",
                self.search.max_iterator_batch_size
            )));
        }
        if self.segment.max_growing_rows == 0 {
            return Err(FtsError::Config(
                "segment.max_growing_rows must be > 0".into(),
            ));
        }
        let k1 = self.bm25.default_k1;
        if !k1.is_finite() || k1 <= 0.0 || !(0.0..=1.0).contains(&self.bm25.default_b) {
            return Err(FtsError::Config(format!(
                "bm25 defaults out of range: k1={} b={}",
                self.bm25.default_k1, self.bm25.default_b
            )));
        }
        Ok(())
    }

    /// Env vars always take priority over TOML settings.
    fn apply_env_overrides(&mut self) {
        // Search
        if let Some(v) = std::env::var("TEXTSIFT_MAX_TOPK")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.search.max_topk = v;
        }

        // Segment
        if let Some(v) = std::env::var("TEXTSIFT_MAX_GROWING_ROWS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.segment.max_growing_rows = v;
        }
        if let Some(v) = std::env::var("TEXTSIFT_SEAL_RETRY_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.segment.seal_retry_attempts = v;
        }

        // Logging
        if let Ok(v) = std::env::var("TEXTSIFT_LOG_FORMAT") {
            self.logging.format = v;
        }
    }
}
