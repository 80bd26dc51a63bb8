//! Middleware options: a serialisable [`MiddlewareConfig`] plus runtime hooks.

use crate::config::{AnomalyDetectionSettings, MiddlewareConfig};
use crate::environment::Environment;
use statesonic_audio::PlaybackScheduler;
use statesonic_core::{AnomalyDetector, DiffFn, EventBus, RapidChangeSettings, TraceData, WatchPathConfig};
use std::sync::Arc;

/// User trace callback. Errors are logged, never propagated.
pub type OnTrace = Arc<dyn Fn(&TraceData) -> anyhow::Result<()> + Send + Sync>;

/// Everything [`crate::apply_middleware`] needs.
///
/// Hooks left unset fall back to the process-wide instances: the global
/// event bus, playback scheduler and anomaly detector.
#[derive(Clone, Default)]
pub struct MiddlewareOptions {
    pub config: MiddlewareConfig,
    pub diff_fn: Option<DiffFn>,
    pub on_trace: Option<OnTrace>,
    pub event_bus: Option<EventBus>,
    pub scheduler: Option<PlaybackScheduler>,
    pub anomaly_detector: Option<AnomalyDetector>,
    /// Overrides [`Environment::detect`].
    pub environment: Option<Environment>,
}

impl MiddlewareOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: MiddlewareConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = Some(enabled);
        self
    }

    pub fn allow_in_production(mut self, allow: bool) -> Self {
        self.config.allow_in_production = allow;
        self
    }

    pub fn log_diffs(mut self, log_diffs: bool) -> Self {
        self.config.log_diffs = log_diffs;
        self
    }

    pub fn duration_ms(mut self, duration_ms: f64) -> Self {
        self.config.duration_ms = duration_ms;
        self
    }

    pub fn include(mut self, path: impl Into<String>) -> Self {
        self.config.include.push(path.into());
        self
    }

    pub fn exclude(mut self, path: impl Into<String>) -> Self {
        self.config.exclude.push(path.into());
        self
    }

    pub fn watch(mut self, watch: WatchPathConfig) -> Self {
        self.config.watch_paths.push(watch);
        self
    }

    pub fn rapid_change(mut self, settings: RapidChangeSettings) -> Self {
        self.config.anomaly_detection = AnomalyDetectionSettings {
            rapid_change: Some(settings),
        };
        self
    }

    pub fn diff_fn(mut self, diff_fn: DiffFn) -> Self {
        self.diff_fn = Some(diff_fn);
        self
    }

    pub fn on_trace<F>(mut self, on_trace: F) -> Self
    where
        F: Fn(&TraceData) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_trace = Some(Arc::new(on_trace));
        self
    }

    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn scheduler(mut self, scheduler: PlaybackScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn anomaly_detector(mut self, detector: AnomalyDetector) -> Self {
        self.anomaly_detector = Some(detector);
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }
}

impl std::fmt::Debug for MiddlewareOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareOptions")
            .field("config", &self.config)
            .field("custom_diff_fn", &self.diff_fn.is_some())
            .field("on_trace", &self.on_trace.is_some())
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}
