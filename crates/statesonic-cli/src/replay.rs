//! Replaying JSON-lines state recordings through the middleware.
//!
//! Each non-empty line of a recording is one step:
//!
//! - a full state object, stored as is (`{"count": 1}`)
//! - a patch, `{"partial": {...}, "action": "increment", "replace": false}`
//!
//! A leading full state becomes the initial state of the store and makes no
//! sound on its own.

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use serde::Deserialize;
use statesonic_core::{Action, PipelineEvent, StateManager, StateUpdate, StateValue, StoreApi};
use statesonic_middleware::{try_apply_middleware, MiddlewareOptions};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// One recorded mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedStep {
    Snapshot(StateValue),
    Patch {
        action: Option<Action>,
        partial: StateValue,
        replace: bool,
    },
}

#[derive(Deserialize)]
struct PatchLine {
    partial: serde_json::Value,
    #[serde(default)]
    action: Option<Action>,
    #[serde(default)]
    replace: bool,
}

impl RecordedStep {
    /// Apply this step to `store`.
    pub fn apply(self, store: &StateManager) {
        match self {
            RecordedStep::Snapshot(state) => store.set_state(StateUpdate::Partial(state), true, None),
            RecordedStep::Patch {
                action,
                partial,
                replace,
            } => store.set_state(StateUpdate::Partial(partial), replace, action),
        }
    }
}

/// Parse one recording line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<RecordedStep>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(line)?;
    if value.get("partial").is_some() {
        let patch: PatchLine = serde_json::from_value(value)?;
        return Ok(Some(RecordedStep::Patch {
            action: patch.action,
            partial: StateValue::from(patch.partial),
            replace: patch.replace,
        }));
    }
    Ok(Some(RecordedStep::Snapshot(StateValue::from(value))))
}

/// Load every step of the recording at `path`.
pub fn load_recording(path: &Path) -> Result<Vec<RecordedStep>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read recording: {}", path.display()))?;

    let mut steps = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let step = parse_line(line).with_context(|| format!("{}:{}: invalid step", path.display(), index + 1))?;
        steps.extend(step);
    }
    Ok(steps)
}

/// Outcome of a replay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Steps applied after the initial state.
    pub steps: usize,
    /// Events delivered to the sink.
    pub events: usize,
}

/// Pacing of a replay.
#[derive(Clone, Copy, Debug)]
pub struct Pacing {
    /// Wait after each step.
    pub step: Duration,
    /// Wait after the last step, for tones still playing.
    pub tail: Duration,
}

/// Replay `steps` through a store wrapped with `options`.
///
/// `events` must be subscribed to the bus the options publish on; every
/// event received is handed to `sink` in order.
pub async fn replay_steps<F>(
    mut steps: Vec<RecordedStep>,
    options: MiddlewareOptions,
    pacing: Pacing,
    events: &Receiver<PipelineEvent>,
    mut sink: F,
) -> Result<ReplaySummary>
where
    F: FnMut(&PipelineEvent) -> Result<()>,
{
    let initial = match steps.first() {
        Some(RecordedStep::Snapshot(state)) => {
            let state = state.clone();
            steps.remove(0);
            state
        }
        _ => StateValue::empty_object(),
    };

    let creator = try_apply_middleware(Arc::new(move |_api: &mut StoreApi| initial.clone()), options)
        .context("Invalid middleware configuration")?;
    let store = StateManager::create(creator);

    let mut summary = ReplaySummary::default();
    for step in steps {
        step.apply(&store);
        summary.steps += 1;
        if pacing.step.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(pacing.step).await;
        }
        summary.events += drain(events, &mut sink)?;
    }

    tokio::time::sleep(pacing.tail).await;
    summary.events += drain(events, &mut sink)?;
    log::info!("Replayed {} step(s), {} event(s)", summary.steps, summary.events);
    Ok(summary)
}

fn drain<F>(events: &Receiver<PipelineEvent>, sink: &mut F) -> Result<usize>
where
    F: FnMut(&PipelineEvent) -> Result<()>,
{
    let mut count = 0;
    for event in events.try_iter() {
        sink(&event)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use statesonic_audio::{AudioContextManager, MemoryBackend, PlaybackScheduler};
    use statesonic_middleware::{AnomalyDetector, Environment, EventBus};
    use std::io::Write;

    #[test]
    fn test_parse_lines() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(
            parse_line(r#"{"count": 1}"#).unwrap(),
            Some(RecordedStep::Snapshot(StateValue::from(json!({"count": 1}))))
        );
        assert_eq!(
            parse_line(r#"{"partial": {"count": 2}, "action": "increment"}"#).unwrap(),
            Some(RecordedStep::Patch {
                action: Some(Action::Label("increment".to_string())),
                partial: StateValue::from(json!({"count": 2})),
                replace: false,
            })
        );
        assert!(parse_line("{not json").is_err());
    }

    #[test]
    fn test_load_recording_reports_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"count": 0}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "oops").unwrap();

        let err = load_recording(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains(":3: invalid step"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_emits_events_per_change() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let backend = MemoryBackend::new();
        let options = MiddlewareOptions::new()
            .environment(Environment::Development)
            .event_bus(bus.clone())
            .scheduler(PlaybackScheduler::new(AudioContextManager::new(backend.factory()), bus))
            .anomaly_detector(AnomalyDetector::new());

        let steps = vec![
            RecordedStep::Snapshot(StateValue::from(json!({"count": 0}))),
            parse_line(r#"{"partial": {"count": 1}, "action": "increment"}"#).unwrap().unwrap(),
            parse_line(r#"{"partial": {"count": 2, "label": "two"}}"#).unwrap().unwrap(),
        ];
        let pacing = Pacing {
            step: Duration::from_millis(250),
            tail: Duration::from_millis(500),
        };

        let mut names = Vec::new();
        let summary = replay_steps(steps, options, pacing, &rx, |event| {
            names.push(event.name());
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(summary.steps, 2);
        assert_eq!(summary.events, names.len());
        assert_eq!(names.iter().filter(|n| **n == "diff-chunk").count(), 3);
        assert_eq!(names.iter().filter(|n| **n == "sonic-chunk").count(), 3);
        assert_eq!(names.iter().filter(|n| **n == "trace").count(), 2);
        assert_eq!(backend.voices().len(), 3);
        assert_eq!(backend.live_node_count(), 0);
    }
}
