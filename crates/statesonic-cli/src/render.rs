//! Offline rendering of state recordings to WAV.
//!
//! The recording is replayed on a runtime with a paused clock, so pacing
//! costs no wall time, and every tone lands on a headless backend. The
//! recorded voices are then mixed and written with hound. Anomaly detection
//! runs on the same paused clock.

use crate::replay::{self, Pacing, RecordedStep};
use anyhow::{Context, Result};
use statesonic_audio::{AudioContextManager, MemoryBackend, PlaybackScheduler};
use statesonic_middleware::{AnomalyDetector, Environment, EventBus, MiddlewareConfig, MiddlewareOptions};
use std::path::Path;
use std::sync::Arc;

/// What a render produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderSummary {
    pub steps: usize,
    pub voices: usize,
    pub seconds: f64,
}

/// Render `steps` into a mono WAV file at `output`.
pub async fn render_steps(
    steps: Vec<RecordedStep>,
    config: MiddlewareConfig,
    pacing: Pacing,
    output: &Path,
    sample_rate: u32,
) -> Result<RenderSummary> {
    let bus = EventBus::new();
    let events = bus.subscribe();
    let backend = MemoryBackend::new();
    let origin = tokio::time::Instant::now();
    let detector = AnomalyDetector::with_clock(Arc::new(move || origin.elapsed().as_millis() as i64));
    let scheduler = PlaybackScheduler::new(AudioContextManager::new(backend.factory()), bus.clone());
    let options = MiddlewareOptions::from_config(config)
        .environment(Environment::Development)
        .event_bus(bus)
        .scheduler(scheduler)
        .anomaly_detector(detector);

    let summary = replay::replay_steps(steps, options, pacing, &events, |_| Ok(())).await?;

    let samples = backend.render(sample_rate);
    statesonic_audio::synth::write_wav(output, &samples, sample_rate)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    Ok(RenderSummary {
        steps: summary.steps,
        voices: backend.voices().len(),
        seconds: samples.len() as f64 / sample_rate as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use statesonic_core::{RapidChangeSettings, StateValue};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_render_writes_wav() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.wav");
        let steps = vec![
            RecordedStep::Snapshot(StateValue::from(json!({"count": 0}))),
            RecordedStep::Snapshot(StateValue::from(json!({"count": 1}))),
            RecordedStep::Snapshot(StateValue::from(json!({"count": 2}))),
        ];
        let pacing = Pacing {
            step: Duration::from_millis(300),
            tail: Duration::from_millis(500),
        };

        let summary = render_steps(steps, MiddlewareConfig::default(), pacing, &output, 8000)
            .await
            .unwrap();

        assert_eq!(summary.steps, 2);
        assert_eq!(summary.voices, 2);
        assert!(summary.seconds > 0.4);
        assert!(std::fs::metadata(&output).unwrap().len() > 44);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_paces_anomaly_detection() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("paced.wav");
        let steps = (0..6)
            .map(|i| RecordedStep::Snapshot(StateValue::from(json!({"count": i}))))
            .collect();
        let mut config = MiddlewareConfig::default();
        config.anomaly_detection.rapid_change = Some(RapidChangeSettings::default());
        let pacing = Pacing {
            step: Duration::from_millis(300),
            tail: Duration::from_millis(500),
        };

        let summary = render_steps(steps, config.clone(), pacing, &output, 8000).await.unwrap();
        assert_eq!(summary.steps, 5);
        assert_eq!(summary.voices, 5);

        // the same changes in a burst do trip the detector
        let burst = (0..6)
            .map(|i| RecordedStep::Snapshot(StateValue::from(json!({"count": i}))))
            .collect();
        let pacing = Pacing {
            step: Duration::from_millis(10),
            tail: Duration::from_millis(500),
        };
        let summary = render_steps(burst, config, pacing, &output, 8000).await.unwrap();
        assert_eq!(summary.steps, 5);
        assert_eq!(summary.voices, 6);
    }
}
