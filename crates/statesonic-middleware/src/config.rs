//! Configuration file support for statesonic
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/statesonic/config.toml`
//! - macOS: `~/Library/Application Support/statesonic/config.toml`
//! - Windows: `%APPDATA%\statesonic\config.toml`

use crate::environment::Environment;
use crate::error::{ConfigError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use statesonic_audio::sonify::{DEFAULT_DURATION_MS, MAX_DURATION_MS};
use statesonic_core::{RapidChangeConfig, RapidChangeSettings, WatchPathConfig};
use std::fs;
use std::path::{Path, PathBuf};

/// Middleware configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// Debug label used in log messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Explicit on/off switch; unset means "on outside production"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Keep the middleware active in production builds
    pub allow_in_production: bool,
    /// Mirror every trace into the process-wide debug log
    pub log_diffs: bool,
    /// Trace with the detailed diff instead of the simple one
    pub detailed_diff: bool,
    /// Base tone duration in milliseconds
    pub duration_ms: f64,
    /// Only keys matching one of these dotted paths are sonified
    pub include: Vec<String>,
    /// Keys matching one of these dotted paths are never sonified
    pub exclude: Vec<String>,
    /// Paths receiving alert treatment
    pub watch_paths: Vec<WatchPathConfig>,
    /// Anomaly detection
    pub anomaly_detection: AnomalyDetectionSettings,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            name: None,
            enabled: None,
            allow_in_production: false,
            log_diffs: false,
            detailed_diff: false,
            duration_ms: DEFAULT_DURATION_MS,
            include: Vec::new(),
            exclude: Vec::new(),
            watch_paths: Vec::new(),
            anomaly_detection: AnomalyDetectionSettings::default(),
        }
    }
}

/// Anomaly detection settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyDetectionSettings {
    /// Rapid-change detection; disabled when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rapid_change: Option<RapidChangeSettings>,
}

impl MiddlewareConfig {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(ConfigError::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load configuration from `path`
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: MiddlewareConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Save configuration to the default config file location
    pub fn save(&self) -> Result<()> {
        self.save_to(Self::config_path()?)
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "statesonic") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(ConfigError::Config("Could not determine config directory".to_string()))
        }
    }

    /// Create a default config file with comments at the default location
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::config_path()?;
        Self::write_default_config(&path)?;
        Ok(path)
    }

    /// Write the commented default config file to `path`
    pub fn write_default_config(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG)?;
        Ok(())
    }

    /// Check the configuration and compile the anomaly settings.
    pub fn validate(&self) -> Result<Option<RapidChangeConfig>> {
        if let Some(problem) = self.problems().into_iter().next() {
            return Err(ConfigError::Config(problem));
        }
        self.compile_anomaly_detection()
    }

    /// Compile the rapid-change settings on their own.
    pub fn compile_anomaly_detection(&self) -> Result<Option<RapidChangeConfig>> {
        Ok(self
            .anomaly_detection
            .rapid_change
            .as_ref()
            .map(RapidChangeSettings::compile)
            .transpose()?)
    }

    /// Replace invalid sound settings with usable ones. Returns one message
    /// per repaired setting.
    pub fn repair(&mut self) -> Vec<String> {
        let problems = self.problems();
        if !duration_in_range(self.duration_ms) {
            self.duration_ms = if self.duration_ms.is_finite() && self.duration_ms > 0.0 {
                MAX_DURATION_MS
            } else {
                DEFAULT_DURATION_MS
            };
        }
        self.watch_paths.retain(|w| !w.path.is_empty());
        let sounds = self
            .watch_paths
            .iter_mut()
            .filter_map(|w| w.custom_sound.as_mut())
            .chain(
                self.anomaly_detection
                    .rapid_change
                    .as_mut()
                    .and_then(|r| r.alert_sound.as_mut()),
            );
        for sound in sounds {
            if sound.duration_ms.is_some_and(|d| !duration_in_range(d)) {
                sound.duration_ms = None;
            }
        }
        problems
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !duration_in_range(self.duration_ms) {
            problems.push(format!(
                "duration_ms must be in (0, {}], got {}",
                MAX_DURATION_MS, self.duration_ms
            ));
        }
        for watch in &self.watch_paths {
            if watch.path.is_empty() {
                problems.push(format!(
                    "watch path with alert level {:?} has an empty path",
                    watch.alert_level
                ));
            }
            if let Some(d) = watch.custom_sound.as_ref().and_then(|c| c.duration_ms) {
                if !duration_in_range(d) {
                    problems.push(format!("custom sound for '{}' has duration_ms {}", watch.path, d));
                }
            }
        }
        let alert = self.anomaly_detection.rapid_change.as_ref().and_then(|r| r.alert_sound.as_ref());
        if let Some(d) = alert.and_then(|c| c.duration_ms) {
            if !duration_in_range(d) {
                problems.push(format!("anomaly alert sound has duration_ms {}", d));
            }
        }
        problems
    }

    /// Whether the middleware should run in `environment`.
    pub fn is_enabled_in(&self, environment: Environment) -> bool {
        if environment.is_production() && !self.allow_in_production {
            return false;
        }
        self.enabled.unwrap_or(!environment.is_production())
    }

    /// Display label for log messages.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("store")
    }
}

fn duration_in_range(duration_ms: f64) -> bool {
    duration_ms.is_finite() && duration_ms > 0.0 && duration_ms <= MAX_DURATION_MS
}

const DEFAULT_CONFIG: &str = r#"# statesonic configuration file

# Debug label used in log messages
# name = "app"

# Force the middleware on or off. When unset it runs everywhere but in
# production builds (STATESONIC_ENV=production or a release build).
# enabled = true

# Keep the middleware active in production builds
allow_in_production = false

# Mirror every trace into the in-memory debug log
log_diffs = false

# Trace with previous values and change kinds
detailed_diff = false

# Base tone duration in milliseconds (between 50 and 10000)
duration_ms = 200.0

# Only sonify these dotted paths (and everything under them)
include = []

# Never sonify these dotted paths (exclude wins over include)
exclude = []

# Paths with alert treatment
# [[watch_paths]]
# path = "user.session"
# alert_level = "critical"
#
# [watch_paths.custom_sound]
# waveform = "square"
# frequency = 990.0

# Rapid-change detection
# [anomaly_detection.rapid_change]
# count = 5
# window_ms = 1000
# path_pattern = { prefix = "cart." }
# path_pattern = { regex = "^items\\.\\d+$" }
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use statesonic_core::{AlertLevel, CustomSound, PathPatternSetting};

    #[test]
    fn test_default_config() {
        let config = MiddlewareConfig::default();
        assert_eq!(config.duration_ms, 200.0);
        assert!(config.enabled.is_none());
        assert!(!config.allow_in_production);
        assert!(config.anomaly_detection.rapid_change.is_none());
    }

    #[test]
    fn test_default_file_parses_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        MiddlewareConfig::write_default_config(&path).unwrap();

        let loaded = MiddlewareConfig::load_from(&path).unwrap();
        assert_eq!(loaded, MiddlewareConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = MiddlewareConfig {
            name: Some("cart".to_string()),
            exclude: vec!["session".to_string()],
            watch_paths: vec![WatchPathConfig::new("cart.total", AlertLevel::Critical)],
            anomaly_detection: AnomalyDetectionSettings {
                rapid_change: Some(RapidChangeSettings {
                    path_pattern: Some(PathPatternSetting::Prefix("cart.".to_string())),
                    ..Default::default()
                }),
            },
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        assert_eq!(MiddlewareConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_parse_toml() {
        let config: MiddlewareConfig = toml::from_str(
            r#"
            enabled = true
            include = ["user"]

            [[watch_paths]]
            path = "user.role"
            alert_level = "warning"

            [anomaly_detection.rapid_change]
            count = 3
            path_pattern = { regex = "^user\\." }
            "#,
        )
        .unwrap();

        assert_eq!(config.enabled, Some(true));
        assert_eq!(config.watch_paths[0].alert_level, AlertLevel::Warning);
        let rapid = config.validate().unwrap().unwrap();
        assert_eq!(rapid.count, 3);
        assert_eq!(rapid.window_ms, 1000);
        assert!(rapid.monitors("user.role"));
        assert!(!rapid.monitors("cart"));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = MiddlewareConfig::default();
        config.anomaly_detection.rapid_change = Some(RapidChangeSettings {
            path_pattern: Some(PathPatternSetting::Regex("(".to_string())),
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(ConfigError::Anomaly(_))));

        let config = MiddlewareConfig {
            duration_ms: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Config(_))));

        let config = MiddlewareConfig {
            duration_ms: 1e300,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Config(_))));

        let config = MiddlewareConfig {
            watch_paths: vec![WatchPathConfig::new("count", AlertLevel::Warning).with_custom_sound(CustomSound {
                duration_ms: Some(1e300),
                ..Default::default()
            })],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Config(_))));
    }

    #[test]
    fn test_repair_keeps_valid_settings() {
        let mut config = MiddlewareConfig {
            duration_ms: -1.0,
            watch_paths: vec![
                WatchPathConfig::new("", AlertLevel::Warning),
                WatchPathConfig::new("count", AlertLevel::Critical).with_custom_sound(CustomSound {
                    duration_ms: Some(1e300),
                    frequency: Some(990.0),
                    ..Default::default()
                }),
            ],
            anomaly_detection: AnomalyDetectionSettings {
                rapid_change: Some(RapidChangeSettings {
                    count: 1,
                    ..Default::default()
                }),
            },
            ..Default::default()
        };

        assert_eq!(config.repair().len(), 3);
        assert_eq!(config.duration_ms, DEFAULT_DURATION_MS);
        assert_eq!(config.watch_paths.len(), 1);
        let sound = config.watch_paths[0].custom_sound.as_ref().unwrap();
        assert_eq!(sound.duration_ms, None);
        assert_eq!(sound.frequency, Some(990.0));
        assert_eq!(config.validate().unwrap().unwrap().count, 1);
        assert!(config.repair().is_empty());

        let mut long = MiddlewareConfig {
            duration_ms: 60_000.0,
            ..Default::default()
        };
        long.repair();
        assert_eq!(long.duration_ms, MAX_DURATION_MS);
    }

    #[test]
    fn test_enabled_resolution() {
        let config = MiddlewareConfig::default();
        assert!(config.is_enabled_in(Environment::Development));
        assert!(!config.is_enabled_in(Environment::Production));

        let forced = MiddlewareConfig {
            enabled: Some(true),
            ..Default::default()
        };
        assert!(!forced.is_enabled_in(Environment::Production));

        let allowed = MiddlewareConfig {
            enabled: Some(true),
            allow_in_production: true,
            ..Default::default()
        };
        assert!(allowed.is_enabled_in(Environment::Production));

        let off = MiddlewareConfig {
            enabled: Some(false),
            ..Default::default()
        };
        assert!(!off.is_enabled_in(Environment::Development));
    }
}
