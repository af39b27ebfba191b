use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub ingest: IngestConfig,
    pub search: SearchConfig,
    pub pricing: PricingConfig,
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Bytes per streamed read.
    pub chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    pub min_token_len: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PricingConfig {
    pub rating_band_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StatsConfig {
    pub outlier_threshold: f64,
    pub min_samples: usize,
    /// Offers with |z-score| above this are flagged as anomalies.
    pub anomaly_threshold: f64,
    pub forecast_days: u32,
    /// Only days this close to the newest offer feed the forecast.
    pub forecast_window_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: "info".to_string(),
            ingest: IngestConfig::default(),
            search: SearchConfig::default(),
            pricing: PricingConfig::default(),
            stats: StatsConfig::default(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig { chunk_size: 64 * 1024 }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            min_token_len: crate::search::DEFAULT_MIN_TOKEN_LEN,
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        PricingConfig {
            rating_band_percent: crate::pricing::DEFAULT_RATING_BAND,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            outlier_threshold: crate::stats::DEFAULT_OUTLIER_THRESHOLD,
            min_samples: 1,
            anomaly_threshold: crate::stats::DEFAULT_ANOMALY_THRESHOLD,
            forecast_days: crate::insight::DEFAULT_FORECAST_DAYS,
            forecast_window_days: crate::insight::DEFAULT_FORECAST_WINDOW_DAYS,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Missing file means defaults. A file that exists but is unreadable or
    /// malformed is still an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn default_template() -> &'static str {
        r#"# Trade chat analyzer configuration
#
# Every key is optional; missing keys fall back to the values shown here.

# Used when RUST_LOG is not set
log_level = "info"

[ingest]
# Bytes read per chunk while streaming a log file
chunk_size = 65536

[search]
# Indexed tokens shorter than this are skipped
min_token_len = 2

[pricing]
# GOOD at or below -band percent of the reference, BAD at or above +band
rating_band_percent = 10.0

[stats]
# Prices with |z-score| above this are dropped before computing fair value
outlier_threshold = 3.0
# Items with fewer positive prices get no price intelligence
min_samples = 1
# Offers with |z-score| above this are reported as anomalies
anomaly_threshold = 2.0
# How many days ahead the price forecast looks
forecast_days = 7
# Days of history, counted back from the newest offer, used by the forecast
forecast_window_days = 30
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_template_matches_defaults() {
        let parsed = Config::from_toml(Config::default_template()).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let parsed = Config::from_toml("[search]\nmin_token_len = 3\n").unwrap();
        assert_eq!(parsed.search.min_token_len, 3);
        assert_eq!(parsed.ingest.chunk_size, 65536);
        assert_eq!(parsed.pricing.rating_band_percent, 10.0);
        assert_eq!(parsed.log_level, "info");
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let err = Config::from_toml("[stats\noutlier_threshold = ").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_load_or_default() {
        let missing = Path::new("/definitely/not/here/config.toml");
        assert_eq!(Config::load_or_default(Some(missing)).unwrap(), Config::default());
        assert_eq!(Config::load_or_default(None).unwrap(), Config::default());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_level = \"debug\"\n[stats]\nmin_samples = 4").unwrap();
        let config = Config::load_or_default(Some(file.path())).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.stats.min_samples, 4);
        assert_eq!(config.stats.outlier_threshold, 3.0);
    }
}
