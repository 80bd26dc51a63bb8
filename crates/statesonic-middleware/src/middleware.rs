//! The middleware facade.
//!
//! [`apply_middleware`] decorates a [`StateCreator`]: the store it creates
//! routes every mutation through [`trace_set_state`], and each trace is fed
//! to a [`SonificationPipeline`]. Per trace, the pipeline
//!
//! 1. mirrors the trace into the debug log (`log_diffs`)
//! 2. builds a [`DiffChunk`] per changed top-level key that survives the
//!    include/exclude filters, tagging watched paths and checking anomalies
//! 3. broadcasts `diff-chunk` and `anomaly-chunk` events
//! 4. schedules the tones, with an anomaly's alert replacing the key's tone
//! 5. broadcasts the `trace` event
//! 6. calls the user's `on_trace`
//!
//! A disabled middleware hands back the original creator.

use crate::config::MiddlewareConfig;
use crate::environment::Environment;
use crate::error::Result;
use crate::options::{MiddlewareOptions, OnTrace};
use statesonic_audio::sonify::{self, ROOT_PATH};
use statesonic_audio::PlaybackScheduler;
use statesonic_core::{
    debug_log, detailed_diff_fn, trace_set_state, AnomalyChunk, AnomalyDetector, DiffChunk, DiffEntry, EventBus,
    PipelineEvent, RapidChangeConfig, StateCreator, StateDiff, StoreApi, TraceConfig, TraceData, TraceObserver,
    Transition, WatchPathConfig,
};
use std::sync::Arc;

/// Wrap `creator` with the sonification middleware.
///
/// Invalid sound settings are replaced with usable ones and invalid anomaly
/// settings disable anomaly detection only; both are logged. Use
/// [`try_apply_middleware`] to reject them instead.
pub fn apply_middleware(creator: StateCreator, mut options: MiddlewareOptions) -> StateCreator {
    for problem in options.config.repair() {
        log::warn!("[MIDDLEWARE] '{}': {}; using a safe value", options.config.label(), problem);
    }
    let rapid_change = match options.config.compile_anomaly_detection() {
        Ok(rapid_change) => rapid_change,
        Err(e) => {
            log::error!(
                "[MIDDLEWARE] '{}': {}; anomaly detection disabled",
                options.config.label(),
                e
            );
            None
        }
    };
    build(creator, options, rapid_change)
}

/// Like [`apply_middleware`], but fails on invalid configuration.
pub fn try_apply_middleware(creator: StateCreator, options: MiddlewareOptions) -> Result<StateCreator> {
    let rapid_change = options.config.validate()?;
    Ok(build(creator, options, rapid_change))
}

fn build(creator: StateCreator, options: MiddlewareOptions, rapid_change: Option<RapidChangeConfig>) -> StateCreator {
    let environment = options.environment.unwrap_or_else(Environment::detect);
    if !options.config.is_enabled_in(environment) {
        log::debug!(
            "[MIDDLEWARE] '{}' disabled in {}",
            options.config.label(),
            environment
        );
        return creator;
    }

    let diff_fn = options
        .diff_fn
        .clone()
        .or_else(|| options.config.detailed_diff.then(detailed_diff_fn));
    let pipeline = Arc::new(SonificationPipeline::new(options, rapid_change));
    log::info!("[MIDDLEWARE] '{}' enabled in {}", pipeline.config.label(), environment);

    Arc::new(move |api: &mut StoreApi| {
        let trace_config = TraceConfig {
            diff_fn: diff_fn.clone(),
            observer: Some(pipeline.clone()),
        };
        api.set_state = trace_set_state(api.set_state.clone(), api.get_state.clone(), trace_config);
        creator(api)
    })
}

/// Turns traces into events and sound.
pub struct SonificationPipeline {
    config: MiddlewareConfig,
    rapid_change: Option<RapidChangeConfig>,
    bus: EventBus,
    scheduler: PlaybackScheduler,
    detector: AnomalyDetector,
    on_trace: Option<OnTrace>,
}

impl SonificationPipeline {
    pub fn new(options: MiddlewareOptions, rapid_change: Option<RapidChangeConfig>) -> Self {
        let bus = options.event_bus.unwrap_or_else(|| EventBus::global().clone());
        let scheduler = options.scheduler.unwrap_or_else(|| {
            PlaybackScheduler::new(PlaybackScheduler::global().context().clone(), bus.clone())
        });
        Self {
            config: options.config,
            rapid_change,
            bus,
            scheduler,
            detector: options.anomaly_detector.unwrap_or_else(|| AnomalyDetector::global().clone()),
            on_trace: options.on_trace,
        }
    }

    fn watch_for(&self, key: &str) -> Option<&WatchPathConfig> {
        self.config.watch_paths.iter().find(|w| watch_matches(&w.path, key))
    }
}

impl TraceObserver for SonificationPipeline {
    fn observe(&self, transition: &Transition<'_>, trace: &TraceData) -> anyhow::Result<()> {
        if self.config.log_diffs {
            debug_log::push(trace.clone());
        }

        let mut tones = Vec::new();
        for (key, entry) in changed_entries(transition, &trace.diff) {
            if !passes_filters(&key, &self.config.include, &self.config.exclude) {
                continue;
            }

            let watch = self.watch_for(&key);
            let mut chunk = DiffChunk::new(key, entry);
            if let Some(watch) = watch {
                chunk = chunk.with_watch(watch);
            }
            let anomaly = self
                .rapid_change
                .as_ref()
                .and_then(|cfg| self.detector.check_rapid_change(&chunk.path, cfg).map(|r| (r, cfg)));

            self.bus.broadcast(PipelineEvent::DiffChunk(chunk.clone()));
            match anomaly {
                Some((record, cfg)) => {
                    log::warn!(
                        "[ANOMALY] '{}' changed {} times within {}ms",
                        record.path,
                        record.change_count,
                        record.window_ms
                    );
                    self.bus.broadcast(PipelineEvent::AnomalyChunk(AnomalyChunk::new(record.clone())));
                    self.scheduler.play_anomaly_alert(&record, cfg.alert_sound.as_ref());
                }
                None => {
                    let custom = watch.and_then(|w| w.custom_sound.as_ref());
                    tones.push(sonify::chunk_to_sonic(&chunk, self.config.duration_ms, custom));
                }
            }
        }

        if !tones.is_empty() {
            log::debug!("[SONIFY] Scheduling {} tone(s)", tones.len());
            self.scheduler.schedule_chunks(tones);
        }
        self.bus.broadcast(PipelineEvent::Trace(trace.clone()));

        match &self.on_trace {
            Some(on_trace) => on_trace(trace),
            None => Ok(()),
        }
    }
}

/// Changed top-level keys with their before/after values, taken from the
/// trace's diff. Simple diffs get their previous values from the transition.
fn changed_entries(transition: &Transition<'_>, diff: &StateDiff) -> Vec<(String, DiffEntry)> {
    match diff {
        StateDiff::Detailed(entries) => entries.iter().map(|(k, e)| (k.clone(), e.clone())).collect(),
        StateDiff::Simple(values) => values
            .iter()
            .map(|(k, v)| {
                let previous = transition.prev.get_or_undefined(k).clone();
                (k.clone(), DiffEntry::new(previous, v.clone()))
            })
            .collect(),
        StateDiff::Replaced(next) => vec![(
            ROOT_PATH.to_string(),
            DiffEntry::new(transition.prev.clone(), next.clone()),
        )],
    }
}

/// `path` lies strictly below `ancestor` in dotted notation.
fn is_nested_under(path: &str, ancestor: &str) -> bool {
    path.len() > ancestor.len() && path.starts_with(ancestor) && path.as_bytes()[ancestor.len()] == b'.'
}

/// An include pattern keeps the key itself, keys below it, and keys above it.
pub fn include_matches(pattern: &str, key: &str) -> bool {
    pattern == key || is_nested_under(key, pattern) || is_nested_under(pattern, key)
}

/// An exclude pattern drops the key itself and keys below it.
pub fn exclude_matches(pattern: &str, key: &str) -> bool {
    pattern == key || is_nested_under(key, pattern)
}

/// Watch paths match by equality or dotted prefix in either direction.
pub fn watch_matches(watch_path: &str, key: &str) -> bool {
    include_matches(watch_path, key)
}

/// Whether `key` survives the include and exclude lists. Exclude wins.
pub fn passes_filters(key: &str, include: &[String], exclude: &[String]) -> bool {
    if exclude.iter().any(|p| exclude_matches(p, key)) {
        return false;
    }
    include.is_empty() || include.iter().any(|p| include_matches(p, key))
}
