//! Run configuration, loaded once at startup and immutable afterwards.
//!
//! Environment variables keep the names the deployment already uses
//! (`TARGET_URL`, `RETRY_INTERVAL_MINUTES`, ...); CLI flags may override
//! individual fields before the watcher starts.

use std::env;
use std::path::PathBuf;

use crate::engine::{BrowserKind, EngineConfig, Persona};
use crate::errors::WatchError;
use crate::rules::RuleSet;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Entry page of the booking flow.
    pub target_url: String,
    /// Override for the no-availability redirect pattern, when set.
    pub error_url_pattern: Option<String>,
    /// Minutes between checks in continuous mode.
    pub poll_interval_minutes: u64,
    /// Identifier used when the operator does not supply one.
    pub fallback_rut: String,
    pub headless: bool,
    pub browser: BrowserKind,
    /// Where phase screenshots are written.
    pub screenshot_dir: PathBuf,
    /// Optional JSON file overriding the built-in site rules.
    pub rules_path: Option<PathBuf>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            target_url: "https://tramites.munistgo.cl/reservahoralicencia/".to_string(),
            error_url_pattern: None,
            poll_interval_minutes: 30,
            fallback_rut: "25334838-0".to_string(),
            headless: false,
            browser: BrowserKind::Chromium,
            screenshot_dir: PathBuf::from("."),
            rules_path: None,
        }
    }
}

impl WatchConfig {
    /// Build a configuration from the environment, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self, WatchError> {
        let defaults = Self::default();

        let poll_interval_minutes = match env::var("RETRY_INTERVAL_MINUTES") {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|_| {
                WatchError::InvalidConfig(format!("RETRY_INTERVAL_MINUTES is not a number: {raw}"))
            })?,
            Err(_) => defaults.poll_interval_minutes,
        };

        let browser = match env::var("BROWSER_TYPE") {
            Ok(raw) => raw.parse::<BrowserKind>()?,
            Err(_) => defaults.browser,
        };

        Ok(Self {
            target_url: env::var("TARGET_URL").unwrap_or(defaults.target_url),
            error_url_pattern: env::var("ERROR_URL_PATTERN").ok(),
            poll_interval_minutes,
            fallback_rut: env::var("RUT_EJEMPLO").unwrap_or(defaults.fallback_rut),
            headless: env::var("HEADLESS_MODE")
                .map(|v| v.trim().to_lowercase() == "true")
                .unwrap_or(defaults.headless),
            browser,
            screenshot_dir: env::var("SCREENSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.screenshot_dir),
            rules_path: env::var("CLASSIFIER_RULES").ok().map(PathBuf::from),
        })
    }

    /// Resolve the rule set: file override first, then the built-in tables,
    /// with the URL-pattern override applied on top.
    pub fn load_rules(&self) -> Result<RuleSet, WatchError> {
        let mut rules = match &self.rules_path {
            Some(path) => RuleSet::load(path)?,
            None => RuleSet::default(),
        };
        if let Some(pattern) = &self.error_url_pattern {
            rules.classifier.no_availability_url_pattern = pattern.clone();
        }
        Ok(rules)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            kind: self.browser,
            headless: self.headless,
            persona: Persona::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_the_booking_site() {
        let config = WatchConfig::default();
        assert!(config.target_url.contains("reservahoralicencia"));
        assert_eq!(config.poll_interval_minutes, 30);
        assert_eq!(config.browser, BrowserKind::Chromium);
        assert!(!config.headless);
    }

    #[test]
    fn error_pattern_override_lands_in_the_rules() {
        let config = WatchConfig {
            error_url_pattern: Some("otra-pagina.aspx?sin-horas".to_string()),
            ..WatchConfig::default()
        };
        let rules = config.load_rules().unwrap();
        assert_eq!(rules.classifier.no_availability_url_pattern, "otra-pagina.aspx?sin-horas");
    }

    #[test]
    fn missing_rules_file_is_a_config_error() {
        let config = WatchConfig {
            rules_path: Some(PathBuf::from("/definitely/not/here.json")),
            ..WatchConfig::default()
        };
        assert!(matches!(config.load_rules(), Err(WatchError::InvalidConfig(_))));
    }
}
