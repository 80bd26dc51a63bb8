//! State updates for the host store.

use crate::value::StateValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A requested mutation.
///
/// Partial updates are shallow-merged into the current object state unless
/// the caller asks for replacement.
pub enum StateUpdate {
    /// New (partial) state.
    Partial(StateValue),
    /// Compute the new (partial) state from the current one.
    ///
    /// Runs while the store holds its write lock, so it must not call back
    /// into the store.
    Updater(Box<dyn FnOnce(&StateValue) -> StateValue + Send>),
}

impl StateUpdate {
    pub fn partial(value: impl Into<StateValue>) -> Self {
        StateUpdate::Partial(value.into())
    }

    pub fn updater<F>(f: F) -> Self
    where
        F: FnOnce(&StateValue) -> StateValue + Send + 'static,
    {
        StateUpdate::Updater(Box::new(f))
    }

    /// Resolve against the current state.
    pub fn resolve(self, current: &StateValue) -> StateValue {
        match self {
            StateUpdate::Partial(value) => value,
            StateUpdate::Updater(f) => f(current),
        }
    }
}

impl fmt::Debug for StateUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateUpdate::Partial(value) => f.debug_tuple("Partial").field(value).finish(),
            StateUpdate::Updater(_) => f.write_str("Updater(..)"),
        }
    }
}

impl From<StateValue> for StateUpdate {
    fn from(value: StateValue) -> Self {
        StateUpdate::Partial(value)
    }
}

/// Optional label attached to a mutation, forwarded untouched to tracing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Action {
    /// Plain action name.
    Label(String),
    /// Structured action payload.
    Payload(serde_json::Value),
}

impl From<&str> for Action {
    fn from(label: &str) -> Self {
        Action::Label(label.to_string())
    }
}

impl From<String> for Action {
    fn from(label: String) -> Self {
        Action::Label(label)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Label(label) => f.write_str(label),
            Action::Payload(payload) => write!(f, "{}", payload),
        }
    }
}
