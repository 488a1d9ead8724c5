//! Runtime settings: defaults, optional YAML file, CLI overrides.
//!
//! ```yaml
//! # config.yaml; every key is optional
//! model: gemini-1.5-pro
//! calls_per_minute: 30
//! calls_per_day: 10000
//! max_attempts: 3
//! retry_backoff_secs: 2
//! token_budget: 30000
//! max_pages: 3
//! page_delay_ms: 1000
//! max_patch_notes: 3
//! request_timeout_secs: 60
//! ```

use crate::cli::Cli;
use crate::digest::DigestOptions;
use crate::error::ConfigError;
use crate::governor::GovernorLimits;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-pro";
pub const DEFAULT_CALLS_PER_MINUTE: usize = 30;
pub const DEFAULT_CALLS_PER_DAY: usize = 10_000;
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 2;
pub const DEFAULT_TOKEN_BUDGET: usize = 30_000;
pub const DEFAULT_MAX_PAGES: usize = 3;
pub const DEFAULT_PAGE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_PATCH_NOTES: usize = 3;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Largest number of patch notes one run may summarize.
pub const MAX_PATCH_NOTES_LIMIT: usize = 10;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub api_base: String,
    pub model: String,
    pub calls_per_minute: usize,
    pub calls_per_day: usize,
    pub max_attempts: usize,
    pub retry_backoff_secs: u64,
    pub token_budget: usize,
    pub max_pages: usize,
    pub page_delay_ms: u64,
    pub max_patch_notes: usize,
    /// Deadline for every model call and page fetch.
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            calls_per_minute: DEFAULT_CALLS_PER_MINUTE,
            calls_per_day: DEFAULT_CALLS_PER_DAY,
            max_attempts: crate::api::DEFAULT_MAX_ATTEMPTS,
            retry_backoff_secs: DEFAULT_RETRY_BACKOFF_SECS,
            token_budget: DEFAULT_TOKEN_BUDGET,
            max_pages: DEFAULT_MAX_PAGES,
            page_delay_ms: DEFAULT_PAGE_DELAY_MS,
            max_patch_notes: DEFAULT_MAX_PATCH_NOTES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Settings {
    /// Defaults, overlaid with the YAML file at `path` if one is given.
    #[instrument(level = "info")]
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let settings = Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        info!(path, "Loaded configuration");
        Ok(settings)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Command-line values win over file values.
    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(model) = &cli.model {
            self.model = model.clone();
        }
        if let Some(n) = cli.max_patch_notes {
            self.max_patch_notes = usize::from(n);
        }
        if let Some(n) = cli.max_pages {
            self.max_pages = n;
        }
        if let Some(n) = cli.calls_per_minute {
            self.calls_per_minute = n;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive: [(&'static str, u64); 5] = [
            ("calls_per_minute", self.calls_per_minute as u64),
            ("calls_per_day", self.calls_per_day as u64),
            ("max_attempts", self.max_attempts as u64),
            ("max_pages", self.max_pages as u64),
            ("request_timeout_secs", self.request_timeout_secs),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid {
                field: *field,
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(1..=MAX_PATCH_NOTES_LIMIT).contains(&self.max_patch_notes) {
            return Err(ConfigError::Invalid {
                field: "max_patch_notes",
                reason: format!("must be between 1 and {MAX_PATCH_NOTES_LIMIT}"),
            });
        }
        if self.token_budget < 100 {
            return Err(ConfigError::Invalid {
                field: "token_budget",
                reason: "must be at least 100".to_string(),
            });
        }
        Ok(())
    }

    pub fn governor_limits(&self) -> GovernorLimits {
        GovernorLimits {
            per_minute: self.calls_per_minute,
            per_day: self.calls_per_day,
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn digest_options(&self, since: Option<chrono::NaiveDate>) -> DigestOptions {
        DigestOptions {
            max_attempts: self.max_attempts,
            token_budget: self.token_budget,
            max_pages: self.max_pages,
            page_delay: Duration::from_millis(self.page_delay_ms),
            max_patch_notes: self.max_patch_notes,
            since,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.calls_per_minute, 30);
        assert_eq!(settings.max_attempts, 3);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let settings = Settings::from_yaml("calls_per_minute: 10\nmax_pages: 5\n").unwrap();
        assert_eq!(settings.calls_per_minute, 10);
        assert_eq!(settings.max_pages, 5);
        assert_eq!(settings.calls_per_day, DEFAULT_CALLS_PER_DAY);
        assert_eq!(settings.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(Settings::from_yaml("  \n").unwrap(), Settings::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_patch_notes: 7\nretry_backoff_secs: 5").unwrap();
        let settings = Settings::load(file.path().to_str()).unwrap();
        assert_eq!(settings.max_patch_notes, 7);
        assert_eq!(settings.retry_backoff(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Settings::load(Some("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_ceiling() {
        let settings = Settings {
            calls_per_day: 0,
            ..Settings::default()
        };
        match settings.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "calls_per_day"),
            other => panic!("expected invalid calls_per_day, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_patch_note_cap() {
        let settings = Settings {
            max_patch_notes: 11,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let cli = Cli::parse_from([
            "patch_digest",
            "--url",
            "https://game.example/news",
            "--api-key",
            "k",
            "--model",
            "gemini-2.0-flash",
            "-n",
            "5",
        ]);
        let settings = Settings::from_yaml("model: gemini-1.5-pro\nmax_patch_notes: 2\n")
            .unwrap()
            .apply_cli(&cli);
        assert_eq!(settings.model, "gemini-2.0-flash");
        assert_eq!(settings.max_patch_notes, 5);
    }
}
