//! Sonification mapping.
//!
//! Turns changed keys into [`SonicChunk`] descriptors:
//!
//! - **frequency** - a 32-bit FNV-1a hash of the path picks one of three
//!   octave bands and one of five scale degrees above [`BASE_FREQUENCY`];
//!   nested paths and large changes lift the pitch slightly
//! - **waveform** - fixed by the value's type (number: sine, string: square,
//!   boolean: sawtooth, anything else or a removal: triangle)
//! - **detune** - logarithmic in the size of the change
//! - **magnitude** - fixed per change kind, lifted by watch alert levels
//! - **duration** - the requested duration, kept between [`MIN_DURATION_MS`]
//!   and [`MAX_DURATION_MS`]
//!
//! Per-path [`CustomSound`] overrides are applied last.
//! Everything here is pure; nothing touches the audio context.

use statesonic_core::{
    diff_power, edit_distance, AlertLevel, AnomalyRecord, ChangeKind, CustomSound, DiffChunk, DiffEntry,
    SonicChunk, StateDiff, StateValue, Waveform,
};

/// Audible floor for chunk durations.
pub const MIN_DURATION_MS: f64 = 50.0;

/// Longest tone the scheduler will play.
pub const MAX_DURATION_MS: f64 = 10_000.0;

/// Duration used when none is configured.
pub const DEFAULT_DURATION_MS: f64 = 200.0;

pub const BASE_FREQUENCY: f64 = 220.0;

pub const OCTAVE_BANDS: u32 = 3;

/// Just-intonation pentatonic ratios.
pub const SCALE_RATIOS: [f64; 5] = [1.0, 9.0 / 8.0, 5.0 / 4.0, 3.0 / 2.0, 5.0 / 3.0];

/// Pitch lift per nesting level of the path.
pub const DEPTH_LIFT: f64 = 0.03;

/// Maximum pitch lift from the change's diff power.
pub const DIFF_POWER_LIFT: f64 = 0.12;

pub const MAX_NUMERIC_DETUNE: f64 = 600.0;
pub const MAX_STRING_DETUNE: f64 = 300.0;
pub const BOOLEAN_DETUNE: f64 = 25.0;

pub const CHANGE_MAGNITUDE: f64 = 0.5;
pub const REMOVE_MAGNITUDE: f64 = 0.3;
pub const WARNING_MAGNITUDE: f64 = 0.7;
pub const CRITICAL_MAGNITUDE: f64 = 0.85;

/// Alert tones, played in order.
pub const ALERT_FREQUENCIES: [f64; 2] = [880.0, 660.0];
pub const ALERT_PULSE_MS: f64 = 120.0;
pub const ALERT_WARNING_MAGNITUDE: f64 = 0.6;
pub const ALERT_CRITICAL_MAGNITUDE: f64 = 0.8;

/// Path used for chunks derived from a whole-state replacement.
pub const ROOT_PATH: &str = "$";

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash of the path's UTF-8 bytes.
pub fn path_hash(path: &str) -> u32 {
    path.bytes()
        .fold(FNV_OFFSET_BASIS, |hash, byte| (hash ^ byte as u32).wrapping_mul(FNV_PRIME))
}

/// Frequency for a path, lifted by nesting depth and change size.
pub fn path_frequency(path: &str, diff_power: f64) -> f64 {
    let hash = path_hash(path);
    let degree = (hash % SCALE_RATIOS.len() as u32) as usize;
    let octave = (hash / SCALE_RATIOS.len() as u32) % OCTAVE_BANDS;
    let depth = path.matches('.').count() as f64;

    let power = if diff_power.is_finite() { diff_power.abs() } else { 0.0 };
    let power_lift = DIFF_POWER_LIFT * power / (1.0 + power);

    BASE_FREQUENCY * 2f64.powi(octave as i32) * SCALE_RATIOS[degree] * (1.0 + DEPTH_LIFT * depth + power_lift)
}

/// Waveform for a changed value.
pub fn waveform_for(value: &StateValue, kind: ChangeKind) -> Waveform {
    if kind == ChangeKind::Remove {
        return Waveform::Triangle;
    }
    match value {
        StateValue::Number(_) => Waveform::Sine,
        StateValue::String(_) => Waveform::Square,
        StateValue::Bool(_) => Waveform::Sawtooth,
        _ => Waveform::Triangle,
    }
}

/// Detune in cents for a change from `prev` to `next`.
///
/// Numbers use the delta from `prev` (or from zero when `prev` is not a
/// number); strings use the edit distance from a previous string, or their
/// length otherwise.
pub fn detune_for(prev: &StateValue, next: &StateValue) -> f64 {
    match (prev, next) {
        (_, StateValue::Number(b)) => {
            let delta = match prev {
                StateValue::Number(a) => b - a,
                _ => *b,
            };
            if !delta.is_finite() || delta == 0.0 {
                return 0.0;
            }
            (100.0 * (1.0 + delta.abs()).log2()).min(MAX_NUMERIC_DETUNE) * delta.signum()
        }
        (StateValue::String(_), StateValue::String(_)) => string_detune(edit_distance(prev, next)),
        (_, StateValue::String(s)) => string_detune(s.chars().count()),
        (_, StateValue::Bool(true)) => BOOLEAN_DETUNE,
        (_, StateValue::Bool(false)) => -BOOLEAN_DETUNE,
        _ => 0.0,
    }
}

fn string_detune(distance: usize) -> f64 {
    (60.0 * (1.0 + distance as f64).log2()).min(MAX_STRING_DETUNE)
}

/// Volume for a change kind, lifted by a watch alert level.
pub fn magnitude_for(kind: ChangeKind, alert_level: Option<AlertLevel>) -> f64 {
    let base = match kind {
        ChangeKind::Remove => REMOVE_MAGNITUDE,
        ChangeKind::Add | ChangeKind::Change => CHANGE_MAGNITUDE,
    };
    match alert_level {
        None => base,
        Some(AlertLevel::Warning) => base.max(WARNING_MAGNITUDE),
        Some(AlertLevel::Critical) => base.max(CRITICAL_MAGNITUDE),
    }
}

/// Clamp a requested duration to the playable range.
pub fn clamp_duration(duration_ms: f64) -> f64 {
    if duration_ms.is_finite() {
        duration_ms.clamp(MIN_DURATION_MS, MAX_DURATION_MS)
    } else {
        MIN_DURATION_MS
    }
}

fn apply_custom(chunk: &mut SonicChunk, custom: Option<&CustomSound>) {
    let Some(custom) = custom else {
        return;
    };
    if let Some(waveform) = custom.waveform {
        chunk.waveform = waveform;
    }
    if let Some(frequency) = custom.frequency.filter(|f| f.is_finite() && *f > 0.0) {
        chunk.frequency = frequency;
    }
    if let Some(magnitude) = custom.magnitude.filter(|m| m.is_finite()) {
        chunk.magnitude = magnitude.clamp(0.0, 1.0);
    }
    if let Some(duration) = custom.duration_ms {
        chunk.duration_ms = clamp_duration(duration);
    }
    if let Some(detune) = custom.detune.filter(|d| d.is_finite()) {
        chunk.detune = detune;
    }
}

fn derive(
    path: &str,
    kind: ChangeKind,
    prev: &StateValue,
    next: &StateValue,
    power: f64,
    alert_level: Option<AlertLevel>,
    base_duration_ms: f64,
) -> SonicChunk {
    SonicChunk {
        id: uuid::Uuid::new_v4().to_string(),
        path: path.to_string(),
        waveform: waveform_for(next, kind),
        frequency: path_frequency(path, power),
        magnitude: magnitude_for(kind, alert_level),
        duration_ms: clamp_duration(base_duration_ms),
        detune: detune_for(prev, next),
        value_type: kind,
        alert_level,
    }
}

/// Sonic chunk for a diff chunk, with optional per-path overrides.
pub fn chunk_to_sonic(chunk: &DiffChunk, base_duration_ms: f64, custom: Option<&CustomSound>) -> SonicChunk {
    let mut sonic = derive(
        &chunk.path,
        chunk.kind,
        &chunk.diff.previous_value,
        &chunk.diff.value,
        chunk.diff_power,
        chunk.alert_level,
        base_duration_ms,
    );
    apply_custom(&mut sonic, custom);
    sonic
}

/// Sonic chunk for a single before/after entry.
pub fn entry_to_sonic(path: &str, entry: &DiffEntry, base_duration_ms: f64) -> SonicChunk {
    let kind = entry.classify();
    derive(
        path,
        kind,
        &entry.previous_value,
        &entry.value,
        diff_power(&entry.previous_value, &entry.value),
        None,
        base_duration_ms,
    )
}

/// Sonic chunks for a whole diff, in key order. Empty diffs yield no chunks.
///
/// Simple diffs carry no previous values, so their keys are treated as
/// changes (or removals when the new value is `Undefined`).
pub fn diff_to_sonic(diff: &StateDiff, base_duration_ms: f64) -> Vec<SonicChunk> {
    match diff {
        StateDiff::Simple(changes) => changes
            .iter()
            .map(|(path, value)| {
                let kind = if value.is_undefined() {
                    ChangeKind::Remove
                } else {
                    ChangeKind::Change
                };
                let prev = StateValue::Undefined;
                derive(path, kind, &prev, value, diff_power(&prev, value), None, base_duration_ms)
            })
            .collect(),
        StateDiff::Detailed(entries) => entries
            .iter()
            .map(|(path, entry)| entry_to_sonic(path, entry, base_duration_ms))
            .collect(),
        StateDiff::Replaced(value) => {
            let prev = StateValue::Undefined;
            vec![derive(
                ROOT_PATH,
                ChangeKind::Change,
                &prev,
                value,
                0.0,
                None,
                base_duration_ms,
            )]
        }
    }
}

/// The two-tone alert for an anomaly.
///
/// Square pulses, high then low, so alerts never sound like regular traffic.
/// A custom frequency replaces the first tone; the second keeps the same
/// interval below it.
pub fn anomaly_alert_chunks(record: &AnomalyRecord, custom: Option<&CustomSound>) -> Vec<SonicChunk> {
    let magnitude = match record.severity {
        AlertLevel::Warning => ALERT_WARNING_MAGNITUDE,
        AlertLevel::Critical => ALERT_CRITICAL_MAGNITUDE,
    };
    let interval = ALERT_FREQUENCIES[1] / ALERT_FREQUENCIES[0];

    let mut chunks: Vec<SonicChunk> = ALERT_FREQUENCIES
        .iter()
        .map(|&frequency| SonicChunk {
            id: uuid::Uuid::new_v4().to_string(),
            path: record.path.clone(),
            waveform: Waveform::Square,
            frequency,
            magnitude,
            duration_ms: ALERT_PULSE_MS,
            detune: 0.0,
            value_type: ChangeKind::Change,
            alert_level: Some(record.severity),
        })
        .collect();

    for chunk in &mut chunks {
        apply_custom(chunk, custom);
    }
    if let Some(frequency) = custom.and_then(|c| c.frequency).filter(|f| f.is_finite() && *f > 0.0) {
        chunks[1].frequency = frequency * interval;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use statesonic_core::{calculate_detailed_diff, calculate_simple_diff, AnomalyKind};
    use serde_json::json;

    fn record(severity: AlertLevel) -> AnomalyRecord {
        AnomalyRecord {
            kind: AnomalyKind::RapidChange,
            path: "count".to_string(),
            change_count: 5,
            window_ms: 1000,
            timestamps: vec![1, 2, 3, 4, 5],
            severity,
        }
    }

    #[test]
    fn test_path_hash_is_fnv1a() {
        assert_eq!(path_hash(""), 0x811c_9dc5);
        assert_eq!(path_hash("a"), 0xe40c_292c);
        assert_eq!(path_hash("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_frequency_is_stable_and_in_range() {
        for path in ["count", "user.name", "cart.items.0", "$"] {
            let f = path_frequency(path, 0.0);
            assert_eq!(f, path_frequency(path, 0.0));
            assert!(f >= BASE_FREQUENCY);
            assert!(f < BASE_FREQUENCY * 4.0 * (5.0 / 3.0) * 1.2);
        }
    }

    #[test]
    fn test_frequency_lifts() {
        let flat = path_frequency("count", 0.0);
        assert!(path_frequency("count", 100.0) > flat);
        assert!(path_frequency("count", 1e12) <= flat * (1.0 + DIFF_POWER_LIFT) + 1e-9);
        assert!(path_frequency("count", f64::NAN) == flat);
    }

    #[test]
    fn test_waveform_table() {
        assert_eq!(waveform_for(&1.into(), ChangeKind::Change), Waveform::Sine);
        assert_eq!(waveform_for(&"x".into(), ChangeKind::Add), Waveform::Square);
        assert_eq!(waveform_for(&true.into(), ChangeKind::Change), Waveform::Sawtooth);
        assert_eq!(waveform_for(&StateValue::from(json!([1])), ChangeKind::Change), Waveform::Triangle);
        assert_eq!(waveform_for(&StateValue::Undefined, ChangeKind::Remove), Waveform::Triangle);
    }

    #[test]
    fn test_detune_rules() {
        assert_eq!(detune_for(&0.into(), &1.into()), 100.0);
        assert_eq!(detune_for(&1.into(), &0.into()), -100.0);
        assert_eq!(detune_for(&0.into(), &1e9.into()), MAX_NUMERIC_DETUNE);
        assert_eq!(detune_for(&"cat".into(), &"bat".into()), 60.0);
        assert_eq!(detune_for(&StateValue::Undefined, &"abc".into()), 120.0);
        assert_eq!(detune_for(&"".into(), &"x".repeat(10_000).as_str().into()), MAX_STRING_DETUNE);
        assert_eq!(detune_for(&false.into(), &true.into()), BOOLEAN_DETUNE);
        assert_eq!(detune_for(&true.into(), &false.into()), -BOOLEAN_DETUNE);
        assert_eq!(detune_for(&StateValue::Null, &StateValue::empty_object()), 0.0);
    }

    #[test]
    fn test_magnitude_table() {
        assert_eq!(magnitude_for(ChangeKind::Change, None), CHANGE_MAGNITUDE);
        assert_eq!(magnitude_for(ChangeKind::Add, None), CHANGE_MAGNITUDE);
        assert_eq!(magnitude_for(ChangeKind::Remove, None), REMOVE_MAGNITUDE);
        assert_eq!(magnitude_for(ChangeKind::Remove, Some(AlertLevel::Warning)), WARNING_MAGNITUDE);
        assert_eq!(magnitude_for(ChangeKind::Change, Some(AlertLevel::Critical)), CRITICAL_MAGNITUDE);
    }

    #[test]
    fn test_duration_floor() {
        let prev = StateValue::from(json!({"a": 1, "b": "x"}));
        let next = StateValue::from(json!({"a": 2, "b": "y"}));
        let chunks = diff_to_sonic(&calculate_simple_diff(&prev, &next), 1.0);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.duration_ms == MIN_DURATION_MS));
        assert_eq!(clamp_duration(f64::NAN), MIN_DURATION_MS);
        assert_eq!(clamp_duration(300.0), 300.0);
    }

    #[test]
    fn test_duration_ceiling() {
        assert_eq!(clamp_duration(1e300), MAX_DURATION_MS);
        assert_eq!(clamp_duration(f64::INFINITY), MIN_DURATION_MS);

        let chunk = DiffChunk::new("count", DiffEntry::new(0.into(), 1.into()));
        let custom = CustomSound {
            duration_ms: Some(1e300),
            ..Default::default()
        };
        let sonic = chunk_to_sonic(&chunk, 1e300, Some(&custom));
        assert_eq!(sonic.duration_ms, MAX_DURATION_MS);
    }

    #[test]
    fn test_empty_diff_yields_nothing() {
        let state = StateValue::from(json!({"a": 1}));
        assert!(diff_to_sonic(&calculate_simple_diff(&state, &state), 200.0).is_empty());
        assert!(diff_to_sonic(&calculate_detailed_diff(&state, &state), 200.0).is_empty());
        assert!(diff_to_sonic(&StateDiff::default(), 200.0).is_empty());
    }

    #[test]
    fn test_detailed_diff_keeps_key_order_and_kinds() {
        let prev = StateValue::from(json!({"count": 1, "gone": true}));
        let next = StateValue::from(json!({"count": 2, "added": "hi"}));
        let chunks = diff_to_sonic(&calculate_detailed_diff(&prev, &next), 200.0);

        let summary: Vec<(&str, ChangeKind, Waveform)> = chunks
            .iter()
            .map(|c| (c.path.as_str(), c.value_type, c.waveform))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("added", ChangeKind::Add, Waveform::Square),
                ("count", ChangeKind::Change, Waveform::Sine),
                ("gone", ChangeKind::Remove, Waveform::Triangle),
            ]
        );
        assert_eq!(chunks[2].magnitude, REMOVE_MAGNITUDE);
    }

    #[test]
    fn test_replaced_root_maps_to_single_chunk() {
        let chunks = diff_to_sonic(&StateDiff::Replaced(StateValue::Number(3.0)), 200.0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].path, ROOT_PATH);
        assert_eq!(chunks[0].waveform, Waveform::Sine);
    }

    #[test]
    fn test_chunk_to_sonic_applies_watch_and_custom_sound() {
        let watch = statesonic_core::WatchPathConfig::new("cart.total", AlertLevel::Warning);
        let chunk = DiffChunk::new("cart.total", DiffEntry::new(10.into(), 12.into())).with_watch(&watch);

        let plain = chunk_to_sonic(&chunk, 200.0, None);
        assert_eq!(plain.magnitude, WARNING_MAGNITUDE);
        assert_eq!(plain.alert_level, Some(AlertLevel::Warning));

        let custom = CustomSound {
            waveform: Some(Waveform::Sawtooth),
            frequency: Some(1000.0),
            magnitude: Some(3.0),
            duration_ms: Some(10.0),
            detune: None,
        };
        let loud = chunk_to_sonic(&chunk, 200.0, Some(&custom));
        assert_eq!(loud.waveform, Waveform::Sawtooth);
        assert_eq!(loud.frequency, 1000.0);
        assert_eq!(loud.magnitude, 1.0);
        assert_eq!(loud.duration_ms, MIN_DURATION_MS);
        assert_eq!(loud.detune, plain.detune);
    }

    #[test]
    fn test_anomaly_alert_is_distinct() {
        let warning = anomaly_alert_chunks(&record(AlertLevel::Warning), None);
        assert_eq!(warning.len(), 2);
        assert_eq!(warning[0].frequency, 880.0);
        assert_eq!(warning[1].frequency, 660.0);
        assert!(warning.iter().all(|c| c.waveform == Waveform::Square));
        assert!(warning.iter().all(|c| c.magnitude == ALERT_WARNING_MAGNITUDE));

        let critical = anomaly_alert_chunks(&record(AlertLevel::Critical), None);
        assert!(critical.iter().all(|c| c.magnitude == ALERT_CRITICAL_MAGNITUDE));

        let custom = CustomSound {
            frequency: Some(1000.0),
            ..Default::default()
        };
        let overridden = anomaly_alert_chunks(&record(AlertLevel::Warning), Some(&custom));
        assert_eq!(overridden[0].frequency, 1000.0);
        assert_eq!(overridden[1].frequency, 750.0);
    }
}
