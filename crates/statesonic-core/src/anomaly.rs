//! Rapid-change anomaly detection.
//!
//! The [`AnomalyDetector`] keeps, per state path, the timestamps of recent
//! changes. Each check appends the current time, prunes everything older than
//! the configured window and reports an [`AnomalyRecord`] once the remaining
//! count reaches the threshold.
//!
//! The tracker lives for the lifetime of the detector. A process-wide instance
//! is available through [`AnomalyDetector::global`]; tests and embedders that
//! need isolation construct their own and pass it in.

use crate::chunks::{AlertLevel, AnomalyKind, AnomalyRecord, CustomSound};
use crate::error::{CoreError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Default change count that triggers a rapid-change anomaly.
pub const DEFAULT_RAPID_CHANGE_COUNT: usize = 5;

/// Default sliding window in milliseconds.
pub const DEFAULT_RAPID_CHANGE_WINDOW_MS: u64 = 1000;

/// Severity escalates to critical at this multiple of the threshold.
pub const CRITICAL_FACTOR: f64 = 1.5;

/// Path filter as written in configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathPatternSetting {
    /// Paths starting with this string.
    Prefix(String),
    /// Paths matching this regular expression.
    Regex(String),
}

/// Rapid-change configuration as written in configuration files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RapidChangeSettings {
    pub count: usize,
    pub window_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<PathPatternSetting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_sound: Option<CustomSound>,
}

impl Default for RapidChangeSettings {
    fn default() -> Self {
        Self {
            count: DEFAULT_RAPID_CHANGE_COUNT,
            window_ms: DEFAULT_RAPID_CHANGE_WINDOW_MS,
            path_pattern: None,
            alert_sound: None,
        }
    }
}

impl RapidChangeSettings {
    /// Validate and compile into a [`RapidChangeConfig`].
    pub fn compile(&self) -> Result<RapidChangeConfig> {
        if self.count == 0 {
            return Err(CoreError::InvalidThreshold("count must be at least 1".to_string()));
        }
        if self.window_ms == 0 {
            return Err(CoreError::InvalidThreshold("window_ms must be positive".to_string()));
        }
        let path_pattern = match &self.path_pattern {
            None => None,
            Some(PathPatternSetting::Prefix(prefix)) => Some(PathPattern::Prefix(prefix.clone())),
            Some(PathPatternSetting::Regex(pattern)) => Some(PathPattern::regex(pattern)?),
        };
        Ok(RapidChangeConfig {
            count: self.count,
            window_ms: self.window_ms,
            path_pattern,
            alert_sound: self.alert_sound.clone(),
        })
    }
}

/// Compiled path filter.
#[derive(Clone, Debug)]
pub enum PathPattern {
    Prefix(String),
    Regex(Regex),
}

impl PathPattern {
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(PathPattern::Regex)
            .map_err(|source| CoreError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathPattern::Regex(re) => re.is_match(path),
        }
    }
}

/// Compiled rapid-change configuration.
#[derive(Clone, Debug)]
pub struct RapidChangeConfig {
    pub count: usize,
    pub window_ms: u64,
    pub path_pattern: Option<PathPattern>,
    /// Overrides for the alert tone.
    pub alert_sound: Option<CustomSound>,
}

impl Default for RapidChangeConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_RAPID_CHANGE_COUNT,
            window_ms: DEFAULT_RAPID_CHANGE_WINDOW_MS,
            path_pattern: None,
            alert_sound: None,
        }
    }
}

impl RapidChangeConfig {
    pub fn new(count: usize, window_ms: u64) -> Self {
        Self {
            count,
            window_ms,
            ..Default::default()
        }
    }

    pub fn with_path_pattern(mut self, pattern: PathPattern) -> Self {
        self.path_pattern = Some(pattern);
        self
    }

    /// Whether `path` is monitored.
    pub fn monitors(&self, path: &str) -> bool {
        self.path_pattern.as_ref().map_or(true, |p| p.matches(path))
    }
}

/// Millisecond clock used to timestamp changes.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Per-path sliding-window change tracker. Clones share the tracker.
#[derive(Clone, Default)]
pub struct AnomalyDetector {
    changes: Arc<Mutex<HashMap<String, Vec<i64>>>>,
    // wall clock when unset
    clock: Option<Clock>,
}

impl std::fmt::Debug for AnomalyDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnomalyDetector")
            .field("tracked_paths", &self.tracked_paths())
            .field("custom_clock", &self.clock.is_some())
            .finish()
    }
}

static GLOBAL_DETECTOR: OnceLock<AnomalyDetector> = OnceLock::new();

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A detector that timestamps changes with `clock` instead of the wall
    /// clock, e.g. a virtual clock during offline rendering.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            changes: Arc::default(),
            clock: Some(clock),
        }
    }

    /// The process-wide detector.
    pub fn global() -> &'static AnomalyDetector {
        GLOBAL_DETECTOR.get_or_init(AnomalyDetector::new)
    }

    /// Record a change to `path` now and check it against `config`.
    pub fn check_rapid_change(&self, path: &str, config: &RapidChangeConfig) -> Option<AnomalyRecord> {
        let now_ms = match &self.clock {
            Some(clock) => clock(),
            None => chrono::Utc::now().timestamp_millis(),
        };
        self.check_rapid_change_at(path, config, now_ms)
    }

    /// Record a change to `path` at `now_ms` and check it against `config`.
    pub fn check_rapid_change_at(
        &self,
        path: &str,
        config: &RapidChangeConfig,
        now_ms: i64,
    ) -> Option<AnomalyRecord> {
        if !config.monitors(path) {
            return None;
        }

        let mut changes = self.changes.lock().expect("Anomaly tracker lock poisoned");
        let timestamps = changes.entry(path.to_string()).or_default();
        timestamps.push(now_ms);
        let cutoff = now_ms.saturating_sub(config.window_ms as i64);
        timestamps.retain(|&t| t >= cutoff);

        let change_count = timestamps.len();
        if change_count < config.count {
            return None;
        }

        let severity = if change_count as f64 >= config.count as f64 * CRITICAL_FACTOR {
            AlertLevel::Critical
        } else {
            AlertLevel::Warning
        };
        log::debug!(
            "[ANOMALY] Rapid change on '{}': {} changes in {}ms ({:?})",
            path,
            change_count,
            config.window_ms,
            severity
        );

        Some(AnomalyRecord {
            kind: AnomalyKind::RapidChange,
            path: path.to_string(),
            change_count,
            window_ms: config.window_ms,
            timestamps: timestamps.clone(),
            severity,
        })
    }

    /// Forget all tracked changes.
    pub fn clear(&self) {
        self.changes.lock().expect("Anomaly tracker lock poisoned").clear();
    }

    /// Paths with at least one tracked timestamp.
    pub fn tracked_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .changes
            .lock()
            .expect("Anomaly tracker lock poisoned")
            .keys()
            .cloned()
            .collect();
        paths.sort();
        paths
    }
}
