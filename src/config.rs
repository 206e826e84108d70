//! Engine configuration
//!
//! A single immutable [`EngineConfig`] snapshot is shared by every worker. It is built from
//! defaults, a named profile, or TOML text supplied by the caller; the engine itself never
//! consults the environment.

use crate::error::SheetSleuthError;
use serde::Deserialize;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors related to configuration values.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value for '{0}': {1}")]
    InvalidValue(&'static str, String),

    #[error("Unknown configuration profile '{0}'")]
    UnknownProfile(String),
}

/// Order applied to numeric dates whose day and month are both 12 or less.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateLocale {
    #[default]
    DayFirst,
    MonthFirst,
}

/// Named presets layered under explicit overrides.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    Default,
    FastScan,
    ThoroughAnalysis,
    LargeFiles,
    UnstructuredFocus,
}

impl Profile {
    /// Parses a profile from its snake_case name.
    pub fn parse(name: &str) -> Result<Self, SheetSleuthError> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "default" => Ok(Profile::Default),
            "fast_scan" => Ok(Profile::FastScan),
            "thorough_analysis" => Ok(Profile::ThoroughAnalysis),
            "large_files" => Ok(Profile::LargeFiles),
            "unstructured_focus" => Ok(Profile::UnstructuredFocus),
            _ => Err(ConfigError::UnknownProfile(name.to_owned()))?,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows of each block scanned for a header
    pub max_scan_rows: usize,
    /// Columns of each block scored when looking for a header
    pub max_scan_cols: usize,
    /// Minimum share of populated cells for a block to count as tabular
    pub min_data_density: f64,
    /// Minimum header score for a row to be accepted as a header
    pub header_confidence_threshold: f64,
    /// Wall-clock budget for one file
    #[serde(with = "seconds")]
    pub file_timeout: Duration,
    /// Wall-clock budget for one load strategy attempt, capped by the file budget
    #[serde(with = "seconds")]
    pub strategy_timeout: Duration,
    pub date_locale_preference: DateLocale,
    /// First month (1-12) of the fiscal year; fiscal years are named after the year they end in
    pub fiscal_year_start_month: u32,
    pub worker_count: usize,
    pub use_process_pool: bool,
    /// Worker executable used when `use_process_pool` is set
    pub worker_program: Option<PathBuf>,
    /// Largest accepted input, in bytes
    pub max_file_size: u64,
    /// Distinct sample values kept per column (0 disables samples)
    pub max_samples: usize,
    pub max_sample_chars: usize,
    /// Longest key or column name kept in metadata; longer ones are cut
    pub max_label_chars: usize,
    /// Glob patterns selecting the sheets to analyze
    pub sheet_patterns: Option<Vec<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_scan_rows: 20,
            max_scan_cols: 20,
            min_data_density: 0.3,
            header_confidence_threshold: 0.7,
            file_timeout: Duration::from_secs(300),
            strategy_timeout: Duration::from_secs(120),
            date_locale_preference: DateLocale::DayFirst,
            fiscal_year_start_month: 1,
            worker_count: std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(1),
            use_process_pool: false,
            worker_program: None,
            max_file_size: 100 * 1024 * 1024,
            max_samples: 3,
            max_sample_chars: 32,
            max_label_chars: 64,
            sheet_patterns: None,
        }
    }
}

/// Partial configuration read from TOML; absent fields keep the profile's values.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigOverrides {
    profile: Option<String>,
    max_scan_rows: Option<usize>,
    max_scan_cols: Option<usize>,
    min_data_density: Option<f64>,
    header_confidence_threshold: Option<f64>,
    file_timeout: Option<f64>,
    strategy_timeout: Option<f64>,
    date_locale_preference: Option<DateLocale>,
    fiscal_year_start_month: Option<u32>,
    worker_count: Option<usize>,
    use_process_pool: Option<bool>,
    worker_program: Option<PathBuf>,
    max_file_size: Option<u64>,
    max_samples: Option<usize>,
    max_sample_chars: Option<usize>,
    max_label_chars: Option<usize>,
    sheet_patterns: Option<Vec<String>>,
}

impl EngineConfig {
    /// Returns the configuration of a named profile.
    pub fn profile(profile: Profile) -> Self {
        let base = EngineConfig::default();
        match profile {
            Profile::Default => base,
            Profile::FastScan => EngineConfig {
                max_scan_rows: 10,
                max_scan_cols: 10,
                use_process_pool: true,
                ..base
            },
            Profile::ThoroughAnalysis => EngineConfig {
                max_scan_rows: 50,
                max_scan_cols: 50,
                ..base
            },
            Profile::LargeFiles => EngineConfig {
                max_file_size: 500 * 1024 * 1024,
                file_timeout: Duration::from_secs(600),
                strategy_timeout: Duration::from_secs(300),
                ..base
            },
            Profile::UnstructuredFocus => EngineConfig {
                max_scan_rows: 100,
                max_scan_cols: 20,
                min_data_density: 0.1,
                header_confidence_threshold: 0.5,
                ..base
            },
        }
    }

    /// Parses TOML text: an optional `profile` key selects the base, other keys override it.
    pub fn from_toml_str(text: &str) -> Result<Self, SheetSleuthError> {
        let overrides: ConfigOverrides = toml::from_str(text)?;
        let mut config = match &overrides.profile {
            Some(name) => EngineConfig::profile(Profile::parse(name)?),
            None => EngineConfig::default(),
        };

        macro_rules! apply {
            ($($field:ident),*) => {
                $(if let Some(value) = overrides.$field { config.$field = value; })*
            };
        }
        apply!(
            max_scan_rows, max_scan_cols, min_data_density, header_confidence_threshold,
            date_locale_preference, fiscal_year_start_month, worker_count, use_process_pool,
            max_file_size, max_samples, max_sample_chars, max_label_chars
        );
        if let Some(seconds) = overrides.file_timeout {
            config.file_timeout = seconds::from_f64("file_timeout", seconds)?;
        }
        if let Some(seconds) = overrides.strategy_timeout {
            config.strategy_timeout = seconds::from_f64("strategy_timeout", seconds)?;
        }
        if overrides.worker_program.is_some() {
            config.worker_program = overrides.worker_program;
        }
        if overrides.sheet_patterns.is_some() {
            config.sheet_patterns = overrides.sheet_patterns;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    pub fn load(path: &std::path::Path) -> Result<Self, SheetSleuthError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), SheetSleuthError> {
        if self.worker_count < 1 {
            Err(ConfigError::InvalidValue("worker_count", "must be at least 1".to_owned()))?;
        }
        if self.file_timeout.is_zero() {
            Err(ConfigError::InvalidValue("file_timeout", "must be positive".to_owned()))?;
        }
        if self.strategy_timeout.is_zero() {
            Err(ConfigError::InvalidValue("strategy_timeout", "must be positive".to_owned()))?;
        }
        if self.max_scan_rows < 1 || self.max_scan_cols < 1 {
            Err(ConfigError::InvalidValue("max_scan_rows/max_scan_cols", "must be at least 1".to_owned()))?;
        }
        if self.max_label_chars < 1 {
            Err(ConfigError::InvalidValue("max_label_chars", "must be at least 1".to_owned()))?;
        }
        if !(0.0..=1.0).contains(&self.min_data_density) {
            Err(ConfigError::InvalidValue("min_data_density", self.min_data_density.to_string()))?;
        }
        if !(0.0..=1.0).contains(&self.header_confidence_threshold) {
            Err(ConfigError::InvalidValue("header_confidence_threshold", self.header_confidence_threshold.to_string()))?;
        }
        if !(1..=12).contains(&self.fiscal_year_start_month) {
            Err(ConfigError::InvalidValue("fiscal_year_start_month", self.fiscal_year_start_month.to_string()))?;
        }
        if let Some(patterns) = &self.sheet_patterns {
            for pattern in patterns {
                glob::Pattern::new(pattern)?;
            }
        }
        Ok(())
    }

    /// Returns true when the sheet name passes the configured glob filters.
    pub fn accepts_sheet(&self, sheet_name: &str) -> bool {
        match &self.sheet_patterns {
            Some(patterns) => patterns
                .iter()
                .filter_map(|pattern| glob::Pattern::new(pattern).ok())
                .any(|pattern| pattern.matches(sheet_name)),
            None => true,
        }
    }
}

/// Durations stored as (fractional) seconds.
mod seconds {
    use super::ConfigError;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        from_f64("duration", seconds).map_err(serde::de::Error::custom)
    }

    pub(super) fn from_f64(field: &'static str, seconds: f64) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(seconds)
            .map_err(|_| ConfigError::InvalidValue(field, seconds.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_scan_rows, 20);
        assert_eq!(config.date_locale_preference, DateLocale::DayFirst);
        assert_eq!(config.file_timeout, Duration::from_secs(300));
    }

    #[test]
    fn profiles_override_defaults() {
        let fast = EngineConfig::profile(Profile::FastScan);
        assert_eq!((fast.max_scan_rows, fast.max_scan_cols), (10, 10));
        assert!(fast.use_process_pool);

        let unstructured = EngineConfig::profile(Profile::UnstructuredFocus);
        assert_eq!(unstructured.min_data_density, 0.1);
        assert_eq!(unstructured.header_confidence_threshold, 0.5);
    }

    #[test]
    fn toml_applies_profile_then_overrides() {
        let config = EngineConfig::from_toml_str(
            r#"
            profile = "large_files"
            file_timeout = 12.5
            date_locale_preference = "month_first"
            sheet_patterns = ["Summary*"]
            "#,
        )
        .unwrap();
        assert_eq!(config.max_file_size, 500 * 1024 * 1024);
        assert_eq!(config.file_timeout, Duration::from_millis(12_500));
        assert_eq!(config.date_locale_preference, DateLocale::MonthFirst);
        assert!(config.accepts_sheet("Summary 2024"));
        assert!(!config.accepts_sheet("Data"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(EngineConfig::from_toml_str("worker_count = 0").is_err());
        assert!(EngineConfig::from_toml_str("min_data_density = 1.5").is_err());
        assert!(EngineConfig::from_toml_str("fiscal_year_start_month = 13").is_err());
        assert!(EngineConfig::from_toml_str("max_label_chars = 0").is_err());
        assert!(EngineConfig::from_toml_str("profile = \"turbo\"").is_err());
        assert!(EngineConfig::from_toml_str("unknown_key = 1").is_err());
    }

    #[test]
    fn serde_round_trips_durations_as_seconds() {
        let config = EngineConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["file_timeout"], serde_json::json!(300.0));
        let back: EngineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
