//! State value model.
//!
//! A [`StateValue`] is one snapshot of a store's state (or any part of it).
//! Containers are reference counted, so copying a value is cheap and two
//! snapshots can share untouched subtrees. This gives the diff engine a notion
//! of *identity*: two containers are the same value only when they are the
//! same allocation, while primitives compare by value.
//!
//! Equality follows [`StateValue::same_value`]:
//!
//! - `Undefined`, `Null` and booleans compare by variant and value
//! - numbers compare like `Object.is` (`NaN` equals `NaN`, `0.0` differs from `-0.0`)
//! - strings compare by content
//! - arrays and objects compare by pointer identity

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Ordered key/value storage for object values.
pub type ObjectMap = BTreeMap<String, StateValue>;

static UNDEFINED: StateValue = StateValue::Undefined;

/// A dynamically typed state value.
#[derive(Clone, Debug, Default)]
pub enum StateValue {
    /// Absent value. Distinct from `Null` and from a missing key.
    #[default]
    Undefined,
    /// Explicit null.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Numeric value.
    Number(f64),
    /// String value.
    String(Arc<str>),
    /// Array, compared by identity.
    Array(Arc<Vec<StateValue>>),
    /// Object, compared by identity.
    Object(Arc<ObjectMap>),
}

/// Runtime type of a [`StateValue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Undefined => "undefined",
            ValueKind::Null => "null",
            ValueKind::Boolean => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        };
        f.write_str(name)
    }
}

impl StateValue {
    /// Build an object value from key/value pairs.
    pub fn object<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<StateValue>,
    {
        StateValue::Object(Arc::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Build an empty object value.
    pub fn empty_object() -> Self {
        StateValue::Object(Arc::new(ObjectMap::new()))
    }

    /// Build an array value.
    pub fn array<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<StateValue>,
    {
        StateValue::Array(Arc::new(items.into_iter().map(Into::into).collect()))
    }

    /// Runtime type of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            StateValue::Undefined => ValueKind::Undefined,
            StateValue::Null => ValueKind::Null,
            StateValue::Bool(_) => ValueKind::Boolean,
            StateValue::Number(_) => ValueKind::Number,
            StateValue::String(_) => ValueKind::String,
            StateValue::Array(_) => ValueKind::Array,
            StateValue::Object(_) => ValueKind::Object,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, StateValue::Undefined)
    }

    /// True for arrays and objects, the values that can be diffed key by key.
    pub fn is_object_like(&self) -> bool {
        matches!(self, StateValue::Array(_) | StateValue::Object(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Object entries, if this is an object.
    pub fn as_object(&self) -> Option<&ObjectMap> {
        match self {
            StateValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Look up an own key. Array elements are addressed by decimal index.
    pub fn get(&self, key: &str) -> Option<&StateValue> {
        match self {
            StateValue::Object(map) => map.get(key),
            StateValue::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Look up an own key, treating a missing key as `Undefined`.
    pub fn get_or_undefined(&self, key: &str) -> &StateValue {
        self.get(key).unwrap_or(&UNDEFINED)
    }

    /// Own enumerable keys in enumeration order.
    pub fn own_keys(&self) -> Vec<Cow<'_, str>> {
        match self {
            StateValue::Object(map) => map.keys().map(|k| Cow::Borrowed(k.as_str())).collect(),
            StateValue::Array(items) => (0..items.len()).map(|i| Cow::Owned(i.to_string())).collect(),
            _ => Vec::new(),
        }
    }

    /// Identity/value equality used throughout the diff pipeline.
    pub fn same_value(&self, other: &StateValue) -> bool {
        match (self, other) {
            (StateValue::Undefined, StateValue::Undefined) => true,
            (StateValue::Null, StateValue::Null) => true,
            (StateValue::Bool(a), StateValue::Bool(b)) => a == b,
            (StateValue::Number(a), StateValue::Number(b)) => {
                (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
            }
            (StateValue::String(a), StateValue::String(b)) => a == b,
            (StateValue::Array(a), StateValue::Array(b)) => Arc::ptr_eq(a, b),
            (StateValue::Object(a), StateValue::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Shallow merge: a new object holding `self`'s entries overlaid by `partial`'s.
    ///
    /// Untouched entries keep their identity. Returns `partial` unchanged when
    /// either side is not an object.
    pub fn merge(&self, partial: &StateValue) -> StateValue {
        match (self, partial) {
            (StateValue::Object(base), StateValue::Object(overlay)) => {
                let mut merged = ObjectMap::clone(base);
                for (key, value) in overlay.iter() {
                    merged.insert(key.clone(), value.clone());
                }
                StateValue::Object(Arc::new(merged))
            }
            _ => partial.clone(),
        }
    }

    /// Return a copy of this object with one key set.
    pub fn with(&self, key: impl Into<String>, value: impl Into<StateValue>) -> StateValue {
        let mut map = self.as_object().cloned().unwrap_or_default();
        map.insert(key.into(), value.into());
        StateValue::Object(Arc::new(map))
    }

    /// Canonical string form used for edit distances.
    ///
    /// Strings are taken verbatim, `Undefined` becomes `"undefined"`, and
    /// everything else is rendered as compact JSON.
    pub fn to_canonical_string(&self) -> String {
        match self {
            StateValue::String(s) => s.to_string(),
            StateValue::Undefined => "undefined".to_string(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }

    /// Convert to a JSON value. `Undefined` becomes `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            StateValue::Undefined | StateValue::Null => serde_json::Value::Null,
            StateValue::Bool(b) => serde_json::Value::Bool(*b),
            StateValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            StateValue::String(s) => serde_json::Value::String(s.to_string()),
            StateValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(StateValue::to_json).collect())
            }
            StateValue::Object(map) => serde_json::Value::Object(
                map.iter()
                    .filter(|(_, v)| !v.is_undefined())
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Structural equality, for tests and assertions. Pipeline code uses
/// [`StateValue::same_value`] instead.
impl PartialEq for StateValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StateValue::Array(a), StateValue::Array(b)) => a == b,
            (StateValue::Object(a), StateValue::Object(b)) => a == b,
            (StateValue::Number(a), StateValue::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self.same_value(other),
        }
    }
}

impl From<serde_json::Value> for StateValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => StateValue::Null,
            serde_json::Value::Bool(b) => StateValue::Bool(b),
            serde_json::Value::Number(n) => StateValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => StateValue::String(s.into()),
            serde_json::Value::Array(items) => {
                StateValue::Array(Arc::new(items.into_iter().map(StateValue::from).collect()))
            }
            serde_json::Value::Object(map) => StateValue::Object(Arc::new(
                map.into_iter().map(|(k, v)| (k, StateValue::from(v))).collect(),
            )),
        }
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        StateValue::Number(value)
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        StateValue::Number(value as f64)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Number(value as f64)
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::String(value.into())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::String(value.into())
    }
}

impl<T: Into<StateValue>> From<Option<T>> for StateValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(StateValue::Undefined)
    }
}

impl Serialize for StateValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StateValue::Undefined | StateValue::Null => serializer.serialize_unit(),
            StateValue::Bool(b) => serializer.serialize_bool(*b),
            StateValue::Number(n) => {
                if n.is_finite() {
                    serializer.serialize_f64(*n)
                } else {
                    serializer.serialize_unit()
                }
            }
            StateValue::String(s) => serializer.serialize_str(s),
            StateValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            StateValue::Object(map) => {
                let defined = map.iter().filter(|(_, v)| !v.is_undefined());
                let mut out = serializer.serialize_map(None)?;
                for (key, value) in defined {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for StateValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(StateValue::from)
    }
}
