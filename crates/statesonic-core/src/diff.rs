//! Diff engine.
//!
//! Computes the key-level delta between two state snapshots:
//!
//! - [`calculate_simple_diff`] - changed key to new value (the default)
//! - [`calculate_detailed_diff`] - changed key to a [`DiffEntry`] keeping the previous value
//! - [`diff_power`] / [`levenshtein`] - magnitude of a change, used to scale audio parameters
//!
//! Both diff forms only report keys whose value changed under
//! [`StateValue::same_value`]. Containers are compared by identity, so a
//! replaced array or object is reported as a whole; there is no element-level
//! insight. Diffing a snapshot against itself always yields an empty result.
//!
//! All functions are pure and safe to call from any thread.

use crate::value::StateValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a key changed between two snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The key was absent (or `Undefined`) before.
    Add,
    /// The key is absent (or `Undefined`) now.
    Remove,
    /// The key held a different value before.
    Change,
}

impl ChangeKind {
    /// Classify a transition from `previous` to `value`.
    pub fn classify(previous: &StateValue, value: &StateValue) -> Self {
        if value.is_undefined() {
            ChangeKind::Remove
        } else if previous.is_undefined() {
            ChangeKind::Add
        } else {
            ChangeKind::Change
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Add => write!(f, "add"),
            ChangeKind::Remove => write!(f, "remove"),
            ChangeKind::Change => write!(f, "change"),
        }
    }
}

/// One changed key's before/after pair.
///
/// Entries produced by [`calculate_detailed_diff`] always carry
/// [`ChangeKind::Change`]; additions and removals show up as an `Undefined`
/// endpoint rather than as a separate kind.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    pub value: StateValue,
    pub previous_value: StateValue,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
}

impl DiffEntry {
    pub fn new(previous_value: StateValue, value: StateValue) -> Self {
        Self {
            value,
            previous_value,
            kind: ChangeKind::Change,
        }
    }

    /// Add/remove/change classification inferred from the endpoints.
    pub fn classify(&self) -> ChangeKind {
        ChangeKind::classify(&self.previous_value, &self.value)
    }
}

/// Result of diffing two snapshots.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StateDiff {
    /// Changed key to new value.
    Simple(BTreeMap<String, StateValue>),
    /// Changed key to before/after entry.
    Detailed(BTreeMap<String, DiffEntry>),
    /// Non-object transition: the whole next value.
    Replaced(StateValue),
}

impl Default for StateDiff {
    fn default() -> Self {
        StateDiff::Simple(BTreeMap::new())
    }
}

impl StateDiff {
    /// Number of changed keys. A whole-value replacement counts as one.
    pub fn len(&self) -> usize {
        match self {
            StateDiff::Simple(map) => map.len(),
            StateDiff::Detailed(map) => map.len(),
            StateDiff::Replaced(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Changed keys in enumeration order.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            StateDiff::Simple(map) => map.keys().map(String::as_str).collect(),
            StateDiff::Detailed(map) => map.keys().map(String::as_str).collect(),
            StateDiff::Replaced(_) => Vec::new(),
        }
    }

    /// New value recorded for `key`, if it changed.
    pub fn value_of(&self, key: &str) -> Option<&StateValue> {
        match self {
            StateDiff::Simple(map) => map.get(key),
            StateDiff::Detailed(map) => map.get(key).map(|e| &e.value),
            StateDiff::Replaced(_) => None,
        }
    }
}

/// Which diff form to produce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Keep previous values and change classification.
    pub detailed: bool,
}

/// Diff two snapshots using the form selected by `options`.
pub fn diff(prev: &StateValue, next: &StateValue, options: DiffOptions) -> StateDiff {
    if options.detailed {
        calculate_detailed_diff(prev, next)
    } else {
        calculate_simple_diff(prev, next)
    }
}

/// Walk changed keys: next's own keys first, then keys only present in prev.
fn for_each_change<F>(prev: &StateValue, next: &StateValue, mut f: F)
where
    F: FnMut(&str, &StateValue, &StateValue),
{
    for key in next.own_keys() {
        let new_value = next.get_or_undefined(&key);
        let old_value = prev.get_or_undefined(&key);
        if !old_value.same_value(new_value) {
            f(&key, old_value, new_value);
        }
    }
    for key in prev.own_keys() {
        if next.get(&key).is_none() {
            f(&key, prev.get_or_undefined(&key), &StateValue::Undefined);
        }
    }
}

/// Changed key to new value. Removed keys map to `Undefined`.
pub fn calculate_simple_diff(prev: &StateValue, next: &StateValue) -> StateDiff {
    if prev.same_value(next) {
        return StateDiff::default();
    }
    if !(prev.is_object_like() && next.is_object_like()) {
        return StateDiff::Replaced(next.clone());
    }

    let mut changes = BTreeMap::new();
    for_each_change(prev, next, |key, _old, new| {
        changes.insert(key.to_string(), new.clone());
    });
    StateDiff::Simple(changes)
}

/// Changed key to [`DiffEntry`].
pub fn calculate_detailed_diff(prev: &StateValue, next: &StateValue) -> StateDiff {
    if prev.same_value(next) {
        return StateDiff::Detailed(BTreeMap::new());
    }
    if !(prev.is_object_like() && next.is_object_like()) {
        return StateDiff::Replaced(next.clone());
    }

    let mut changes = BTreeMap::new();
    for_each_change(prev, next, |key, old, new| {
        changes.insert(key.to_string(), DiffEntry::new(old.clone(), new.clone()));
    });
    StateDiff::Detailed(changes)
}

/// Levenshtein edit distance over Unicode scalar values.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev_row: Vec<usize> = (0..=b.len()).collect();
    let mut row = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            row[j + 1] = (prev_row[j + 1] + 1).min(row[j] + 1).min(prev_row[j] + cost);
        }
        std::mem::swap(&mut prev_row, &mut row);
    }
    prev_row[b.len()]
}

/// Edit distance between the canonical string forms of two values.
pub fn edit_distance(prev: &StateValue, next: &StateValue) -> usize {
    levenshtein(&prev.to_canonical_string(), &next.to_canonical_string())
}

/// Signed magnitude of a change.
///
/// - numbers: the raw delta `next - prev` (unbounded)
/// - booleans: `1.0` when switched on, `-1.0` when switched off
/// - additions / removals: `1.0` / `-1.0`
/// - everything else: normalized edit distance in `[0, 1]`, negative when
///   the canonical form got shorter
///
/// Unchanged values have zero power.
pub fn diff_power(prev: &StateValue, next: &StateValue) -> f64 {
    if prev.same_value(next) {
        return 0.0;
    }
    match (prev, next) {
        (StateValue::Number(a), StateValue::Number(b)) => {
            let delta = b - a;
            if delta.is_finite() {
                delta
            } else {
                0.0
            }
        }
        (StateValue::Bool(_), StateValue::Bool(b)) => {
            if *b {
                1.0
            } else {
                -1.0
            }
        }
        (StateValue::Undefined, _) => 1.0,
        (_, StateValue::Undefined) => -1.0,
        _ => {
            let before = prev.to_canonical_string();
            let after = next.to_canonical_string();
            let longest = before.chars().count().max(after.chars().count());
            if longest == 0 {
                return 0.0;
            }
            let normalized = levenshtein(&before, &after) as f64 / longest as f64;
            if after.chars().count() < before.chars().count() {
                -normalized
            } else {
                normalized
            }
        }
    }
}
