//! Chunk types flowing through the diff-to-signal pipeline.
//!
//! - [`DiffChunk`] - One changed key, as broadcast to visual consumers
//! - [`SonicChunk`] - One sound event descriptor derived from a changed key
//! - [`AnomalyRecord`] / [`AnomalyChunk`] - A detected burst of changes
//! - [`WatchPathConfig`] - Per-path alert configuration

use crate::diff::{ChangeKind, DiffEntry};
use crate::value::ValueKind;
use serde::{Deserialize, Serialize};

/// Alert severity for watched paths and anomalies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// Oscillator waveform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl std::fmt::Display for Waveform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Waveform::Sine => write!(f, "sine"),
            Waveform::Square => write!(f, "square"),
            Waveform::Sawtooth => write!(f, "sawtooth"),
            Waveform::Triangle => write!(f, "triangle"),
        }
    }
}

/// Per-path sound override. Unset fields keep the derived value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomSound {
    pub waveform: Option<Waveform>,
    /// Frequency in Hz.
    pub frequency: Option<f64>,
    /// Volume in `[0, 1]`.
    pub magnitude: Option<f64>,
    /// Duration in milliseconds (still clamped to the audible floor).
    pub duration_ms: Option<f64>,
    /// Detune in cents.
    pub detune: Option<f64>,
}

/// Per-path visual hint, passed through untouched to visual consumers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomVisual {
    pub color: Option<String>,
    pub intensity: Option<f64>,
    pub shape: Option<String>,
}

/// A state path receiving heightened treatment on change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WatchPathConfig {
    /// Dotted state path.
    pub path: String,
    pub alert_level: AlertLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_sound: Option<CustomSound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_visual: Option<CustomVisual>,
}

impl WatchPathConfig {
    pub fn new(path: impl Into<String>, alert_level: AlertLevel) -> Self {
        Self {
            path: path.into(),
            alert_level,
            custom_sound: None,
            custom_visual: None,
        }
    }

    pub fn with_custom_sound(mut self, sound: CustomSound) -> Self {
        self.custom_sound = Some(sound);
        self
    }

    pub fn with_custom_visual(mut self, visual: CustomVisual) -> Self {
        self.custom_visual = Some(visual);
        self
    }
}

/// One changed key, as broadcast on the `diff-chunk` channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffChunk {
    pub id: String,
    /// Dotted state path of the changed key.
    pub path: String,
    /// Add/remove/change classification.
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Runtime type of the new value.
    pub value_type: ValueKind,
    pub diff: DiffEntry,
    /// Signed change magnitude, see [`crate::diff::diff_power`].
    pub diff_power: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_level: Option<AlertLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_visual: Option<CustomVisual>,
}

impl DiffChunk {
    /// Build a chunk for `path` from its before/after entry.
    pub fn new(path: impl Into<String>, diff: DiffEntry) -> Self {
        let kind = diff.classify();
        let value_type = diff.value.kind();
        let diff_power = crate::diff::diff_power(&diff.previous_value, &diff.value);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            path: path.into(),
            kind,
            value_type,
            diff,
            diff_power,
            alert_level: None,
            custom_visual: None,
        }
    }

    /// Attach watch-path metadata.
    pub fn with_watch(mut self, watch: &WatchPathConfig) -> Self {
        self.alert_level = Some(watch.alert_level);
        self.custom_visual = watch.custom_visual.clone();
        self
    }
}

/// One discrete sound event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SonicChunk {
    pub id: String,
    /// Path the sound was derived from.
    pub path: String,
    #[serde(rename = "type")]
    pub waveform: Waveform,
    /// Frequency in Hz, always positive.
    pub frequency: f64,
    /// Volume in `[0, 1]`.
    pub magnitude: f64,
    /// Duration in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: f64,
    /// Detune in cents.
    pub detune: f64,
    pub value_type: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_level: Option<AlertLevel>,
}

/// Kind of anomaly detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyKind {
    RapidChange,
}

/// Result of an anomaly check that crossed its threshold.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyRecord {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub path: String,
    /// Changes inside the window, including the current one.
    pub change_count: usize,
    pub window_ms: u64,
    /// Change timestamps (ms since epoch) inside the window.
    pub timestamps: Vec<i64>,
    pub severity: AlertLevel,
}

/// An anomaly as broadcast on the `anomaly-chunk` channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyChunk {
    pub id: String,
    /// Detection time (ms since epoch).
    pub detected_at: i64,
    #[serde(flatten)]
    pub record: AnomalyRecord,
}

impl AnomalyChunk {
    pub fn new(record: AnomalyRecord) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            detected_at: chrono::Utc::now().timestamp_millis(),
            record,
        }
    }
}
