//! Trace interceptor.
//!
//! [`trace_set_state`] decorates a store's [`SetState`]. Each call:
//!
//! 1. captures the state before delegating
//! 2. delegates with the original arguments, untouched
//! 3. captures the state after delegating
//! 4. stops if both snapshots are the same value (a reference-level no-op)
//! 5. diffs the snapshots, builds a [`TraceData`] and hands it to the observer
//!
//! Observer failures, whether returned errors or panics, are logged and never
//! reach the caller of the setter. The same holds for a failing diff function.
//! Interceptors compose: the setter being wrapped may itself be decorated.

use crate::diff::{calculate_detailed_diff, calculate_simple_diff, StateDiff};
use crate::store::{Action, GetState, SetState, StateUpdate};
use crate::value::StateValue;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Record of one intercepted mutation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceData {
    pub diff: StateDiff,
    /// Wall-clock start of the mutation (ms since epoch).
    pub timestamp_start: i64,
    /// Time spent delegating and diffing, in milliseconds.
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

/// The two snapshots a trace was computed from.
#[derive(Clone, Copy, Debug)]
pub struct Transition<'a> {
    pub prev: &'a StateValue,
    pub next: &'a StateValue,
}

/// Receives every effective mutation.
pub trait TraceObserver: Send + Sync {
    fn observe(&self, transition: &Transition<'_>, trace: &TraceData) -> anyhow::Result<()>;
}

impl<F> TraceObserver for F
where
    F: Fn(&TraceData) -> anyhow::Result<()> + Send + Sync,
{
    fn observe(&self, _transition: &Transition<'_>, trace: &TraceData) -> anyhow::Result<()> {
        self(trace)
    }
}

/// Custom diff function.
pub type DiffFn = Arc<dyn Fn(&StateValue, &StateValue) -> anyhow::Result<StateDiff> + Send + Sync>;

/// The default diff function: [`calculate_simple_diff`].
pub fn default_diff_fn() -> DiffFn {
    Arc::new(|prev: &StateValue, next: &StateValue| -> anyhow::Result<StateDiff> {
        Ok(calculate_simple_diff(prev, next))
    })
}

/// Diff function producing [`StateDiff::Detailed`] traces.
pub fn detailed_diff_fn() -> DiffFn {
    Arc::new(|prev: &StateValue, next: &StateValue| -> anyhow::Result<StateDiff> {
        Ok(calculate_detailed_diff(prev, next))
    })
}

/// Interceptor configuration.
#[derive(Clone, Default)]
pub struct TraceConfig {
    /// Diff function, [`default_diff_fn`] if unset.
    pub diff_fn: Option<DiffFn>,
    /// Observer for computed traces. Without one, no diff is computed.
    pub observer: Option<Arc<dyn TraceObserver>>,
}

impl TraceConfig {
    pub fn with_observer(observer: impl TraceObserver + 'static) -> Self {
        Self {
            diff_fn: None,
            observer: Some(Arc::new(observer)),
        }
    }

    pub fn with_diff_fn(mut self, diff_fn: DiffFn) -> Self {
        self.diff_fn = Some(diff_fn);
        self
    }
}

impl std::fmt::Debug for TraceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceConfig")
            .field("custom_diff_fn", &self.diff_fn.is_some())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// Wrap `set` so every effective mutation is traced.
pub fn trace_set_state(set: SetState, get: GetState, config: TraceConfig) -> SetState {
    let diff_fn = config.diff_fn.unwrap_or_else(default_diff_fn);
    let observer = config.observer;

    Arc::new(move |update: StateUpdate, replace: bool, action: Option<Action>| {
        let started = Instant::now();
        let timestamp_start = chrono::Utc::now().timestamp_millis();

        let prev = get();
        set(update, replace, action.clone());
        let next = get();

        if prev.same_value(&next) {
            return;
        }
        let Some(observer) = observer.as_ref() else {
            return;
        };

        let diff = match panic::catch_unwind(AssertUnwindSafe(|| diff_fn(&prev, &next))) {
            Ok(Ok(diff)) => diff,
            Ok(Err(err)) => {
                log::error!("[TRACE] Sonification setup/trace failed: {:#}", err);
                return;
            }
            Err(payload) => {
                log::error!(
                    "[TRACE] Sonification setup/trace failed: diff function panicked: {}",
                    panic_message(payload.as_ref())
                );
                return;
            }
        };

        let trace = TraceData {
            diff,
            timestamp_start,
            duration: started.elapsed().as_secs_f64() * 1000.0,
            action,
        };
        let transition = Transition {
            prev: &prev,
            next: &next,
        };

        match panic::catch_unwind(AssertUnwindSafe(|| observer.observe(&transition, &trace))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::error!("[TRACE] Trace callback failed: {:#}", err),
            Err(payload) => log::error!(
                "[TRACE] Trace callback panicked: {}",
                panic_message(payload.as_ref())
            ),
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StateCreator, StateManager, StoreApi};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn traced_store(config: TraceConfig) -> StateManager {
        let creator: StateCreator = Arc::new(move |api: &mut StoreApi| {
            api.set_state = trace_set_state(api.set_state.clone(), api.get_state.clone(), config.clone());
            StateValue::from(json!({"count": 0}))
        });
        StateManager::create(creator)
    }

    fn recording() -> (Arc<Mutex<Vec<TraceData>>>, TraceConfig) {
        let traces = Arc::new(Mutex::new(Vec::new()));
        let sink = traces.clone();
        let config = TraceConfig::with_observer(move |trace: &TraceData| {
            sink.lock().unwrap().push(trace.clone());
            Ok(())
        });
        (traces, config)
    }

    #[test]
    fn test_trace_reports_diff_and_action() {
        let (traces, config) = recording();
        let store = traced_store(config);

        store.update("increment", |s| {
            let count = s.get("count").and_then(StateValue::as_f64).unwrap_or(0.0);
            StateValue::object([("count", count + 1.0)])
        });

        let traces = traces.lock().unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].diff.value_of("count"), Some(&StateValue::Number(1.0)));
        assert_eq!(traces[0].action, Some(Action::Label("increment".to_string())));
        assert!(traces[0].duration >= 0.0);
        assert!(traces[0].timestamp_start > 0);
    }

    #[test]
    fn test_identical_reference_bails_out() {
        let diff_calls = Arc::new(AtomicUsize::new(0));
        let counted = diff_calls.clone();
        let (traces, config) = recording();
        let config = config.with_diff_fn(Arc::new(move |prev: &StateValue, next: &StateValue| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(calculate_simple_diff(prev, next))
        }));
        let store = traced_store(config);

        store.update("noop", |s| s.clone());
        assert_eq!(diff_calls.load(Ordering::SeqCst), 0);
        assert!(traces.lock().unwrap().is_empty());
    }

    #[test]
    fn test_new_reference_with_equal_values_still_traces() {
        let (traces, config) = recording();
        let store = traced_store(config);

        store.merge(StateValue::object([("count", 0)]));

        let traces = traces.lock().unwrap();
        assert_eq!(traces.len(), 1);
        assert!(traces[0].diff.is_empty());
    }

    #[test]
    fn test_observer_error_is_isolated() {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = traced_store(TraceConfig::with_observer(|_: &TraceData| -> anyhow::Result<()> {
            anyhow::bail!("observer exploded")
        }));
        store.merge(StateValue::object([("count", 3)]));
        assert_eq!(store.get_state().get("count"), Some(&StateValue::Number(3.0)));
    }

    #[test]
    fn test_observer_panic_is_isolated() {
        let store = traced_store(TraceConfig::with_observer(|_: &TraceData| -> anyhow::Result<()> {
            panic!("observer panicked")
        }));
        store.merge(StateValue::object([("count", 4)]));
        assert_eq!(store.get_state().get("count"), Some(&StateValue::Number(4.0)));
    }

    #[test]
    fn test_failing_diff_fn_skips_observer() {
        let (traces, config) = recording();
        let config = config.with_diff_fn(Arc::new(|_: &StateValue, _: &StateValue| -> anyhow::Result<StateDiff> {
            Err(anyhow::anyhow!("bad diff"))
        }));
        let store = traced_store(config);

        store.merge(StateValue::object([("count", 1)]));
        assert!(traces.lock().unwrap().is_empty());
        assert_eq!(store.get_state().get("count"), Some(&StateValue::Number(1.0)));
    }

    #[test]
    fn test_interceptors_compose() {
        let (inner_traces, inner) = recording();
        let (outer_traces, outer) = recording();
        let creator: StateCreator = Arc::new(move |api: &mut StoreApi| {
            let once = trace_set_state(api.set_state.clone(), api.get_state.clone(), inner.clone());
            api.set_state = trace_set_state(once, api.get_state.clone(), outer.clone());
            StateValue::from(json!({"count": 0}))
        });
        let store = StateManager::create(creator);

        store.merge(StateValue::object([("count", 1)]));
        assert_eq!(inner_traces.lock().unwrap().len(), 1);
        assert_eq!(outer_traces.lock().unwrap().len(), 1);
        assert_eq!(
            outer_traces.lock().unwrap()[0].diff,
            inner_traces.lock().unwrap()[0].diff
        );
    }
}
