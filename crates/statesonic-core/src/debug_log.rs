//! Process-wide trace log.
//!
//! When diff logging is enabled, every [`TraceData`] is appended here in
//! addition to normal processing. The log is append-only and unbounded;
//! callers clear it when they are done inspecting it.

use crate::trace::TraceData;
use std::sync::{Mutex, MutexGuard, OnceLock};

static DEBUG_LOG: OnceLock<Mutex<Vec<TraceData>>> = OnceLock::new();

fn log() -> MutexGuard<'static, Vec<TraceData>> {
    DEBUG_LOG
        .get_or_init(|| Mutex::new(Vec::new()))
        .lock()
        .expect("Debug log lock poisoned")
}

/// Append a trace.
pub fn push(trace: TraceData) {
    log().push(trace);
}

/// Snapshot of all logged traces, oldest first.
pub fn entries() -> Vec<TraceData> {
    log().clone()
}

pub fn len() -> usize {
    log().len()
}

pub fn is_empty() -> bool {
    log().is_empty()
}

/// Drop all logged traces. Returns how many were removed.
pub fn clear() -> usize {
    let mut log = log();
    let removed = log.len();
    log.clear();
    removed
}

/// Export the log as a pretty-printed JSON array.
pub fn export_json() -> crate::error::Result<String> {
    Ok(serde_json::to_string_pretty(&*log())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::StateDiff;
    use crate::store::Action;

    fn trace(label: &str) -> TraceData {
        TraceData {
            diff: StateDiff::default(),
            timestamp_start: 1,
            duration: 0.5,
            action: Some(Action::from(label)),
        }
    }

    // The log is global; only assert on entries created by this test.
    #[test]
    fn test_push_and_export() {
        push(trace("debug-log-test-a"));
        push(trace("debug-log-test-b"));

        let labels: Vec<String> = entries()
            .into_iter()
            .filter_map(|t| t.action.map(|a| a.to_string()))
            .filter(|a| a.starts_with("debug-log-test-"))
            .collect();
        assert_eq!(labels, vec!["debug-log-test-a", "debug-log-test-b"]);
        assert!(len() >= 2);

        let json = export_json().unwrap();
        assert!(json.contains("debug-log-test-a"));
        assert!(json.contains("\"timestampStart\""));
    }
}
