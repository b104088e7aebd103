use crate::error::{Result, ScraperError};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Top-level configuration, loaded from `config.toml`.
///
/// Every section falls back to its defaults when absent, so a missing config
/// file is not a setup failure. A malformed file is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub mapping: MappingConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Listing endpoint; the page number is appended as a query parameter.
    pub base_url: String,
    /// Which extractor to use: "listing_api" or "fixture".
    pub extractor: String,
    /// Page file served by the fixture extractor.
    pub fixture_file: String,
    pub timeout_seconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.huodongxing.com/api/events".to_string(),
            extractor: "listing_api".to_string(),
            fixture_file: "fixtures/pages.json".to_string(),
            timeout_seconds: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub cities_file: String,
    pub known_events_file: String,
    pub known_keys_file: String,
    pub output_dir: String,
    pub assets_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cities_file: "data/cities.json".to_string(),
            known_events_file: "data/known_events.json".to_string(),
            known_keys_file: "data/known_keys.json".to_string(),
            output_dir: "output".to_string(),
            assets_dir: "assets".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Consecutive pages with zero records before the walk stops.
    pub max_empty_pages: u32,
    /// No-new-records threshold used by incremental mode.
    pub incremental_threshold: u32,
    /// Inter-page delay bounds in milliseconds.
    pub page_delay_min_ms: u64,
    pub page_delay_max_ms: u64,
    /// Retry policy for a failing page fetch.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Consecutive failed pages before the whole walk gives up.
    pub max_consecutive_failures: u32,
    /// Dataset age below which a non-forced run is skipped.
    pub min_run_interval_hours: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            max_empty_pages: 3,
            incremental_threshold: 2,
            page_delay_min_ms: 1_000,
            page_delay_max_ms: 3_000,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 15_000,
            max_consecutive_failures: 3,
            min_run_interval_hours: 6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Results below this confidence are discarded.
    pub confidence_floor: f64,
    /// Similarity threshold for the edit-distance fallback.
    pub similarity_threshold: f64,
    /// Cap on mappings kept per record.
    pub max_mappings: usize,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.5,
            similarity_threshold: 0.6,
            max_mappings: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_title_chars: usize,
    pub max_location_chars: usize,
    pub min_title_chars: usize,
    /// Exclusive upper bound for view/favorite counters.
    pub counter_upper_bound: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_title_chars: 120,
            max_location_chars: 80,
            min_title_chars: 4,
            counter_upper_bound: 10_000_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub enabled: bool,
    /// Concurrent download permits.
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 4,
            max_retries: 2,
            retry_base_delay_ms: 500,
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No config file at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_missing() {
        let config = Config::load_from("definitely/not/here.toml").unwrap();
        assert_eq!(config.pagination.max_empty_pages, 3);
        assert_eq!(config.pagination.incremental_threshold, 2);
        assert_eq!(config.mapping.confidence_floor, 0.5);
        assert_eq!(config.mapping.max_mappings, 3);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [pagination]
            max_empty_pages = 5
            "#,
        )
        .unwrap();
        assert_eq!(parsed.pagination.max_empty_pages, 5);
        // untouched sections keep their defaults
        assert_eq!(parsed.pagination.incremental_threshold, 2);
        assert_eq!(parsed.validation.max_title_chars, 120);
    }
}
