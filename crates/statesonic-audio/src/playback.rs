//! Playback scheduling.
//!
//! The [`PlaybackScheduler`] turns sonic chunks into short voices on the
//! shared audio context. Chunks of one mutation are spawned as independent
//! tasks, offset by a fixed stagger so their onsets never coincide. Each
//! voice is an oscillator feeding a gain node that carries an
//! attack-sustain-release envelope.
//!
//! Every playback attempt announces its chunk on the event bus first, so
//! visual consumers react even when audio is unavailable. Nodes are always
//! disconnected afterwards, either when the oscillator reports its end or
//! when a safety timeout of the chunk duration plus [`CLEANUP_MARGIN_MS`]
//! expires, whichever comes first.

use crate::backend::{AudioBackend, ContextState};
use crate::context::AudioContextManager;
use crate::errors::Result;
use crate::graph::{Automation, NodeId};
use crate::sonify::{self, ALERT_PULSE_MS};
use statesonic_core::{AnomalyRecord, CustomSound, EventBus, PipelineEvent, SonicChunk, StateDiff};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Onset spacing of the chunks of one mutation.
pub const STAGGER_DELAY_MS: u64 = 50;

/// Extra time granted past a chunk's duration before nodes are force-disconnected.
pub const CLEANUP_MARGIN_MS: u64 = 150;

/// Envelope durations above this use exponential ramps.
pub const EXPONENTIAL_THRESHOLD_MS: f64 = 20.0;

/// Exponential ramps cannot reach zero; they stop here.
pub const SILENCE_FLOOR: f64 = 0.0001;

const MAX_ATTACK_S: f64 = 0.010;
const MAX_RELEASE_S: f64 = 0.050;

/// Gain automation for a voice starting at `start` lasting `duration_s` seconds.
pub fn envelope(start: f64, duration_s: f64, magnitude: f64) -> Vec<Automation> {
    let peak = magnitude.clamp(0.0, 1.0);
    let attack_end = start + (duration_s * 0.1).min(MAX_ATTACK_S);
    let end = start + duration_s;
    let release_start = end - (duration_s * 0.3).min(MAX_RELEASE_S);

    if duration_s * 1000.0 > EXPONENTIAL_THRESHOLD_MS && peak > SILENCE_FLOOR {
        vec![
            Automation::SetValue { value: SILENCE_FLOOR, at: start },
            Automation::ExponentialRamp { value: peak, end: attack_end },
            Automation::SetValue { value: peak, at: release_start },
            Automation::ExponentialRamp { value: SILENCE_FLOOR, end },
        ]
    } else {
        vec![
            Automation::SetValue { value: 0.0, at: start },
            Automation::LinearRamp { value: peak, end: attack_end },
            Automation::SetValue { value: peak, at: release_start },
            Automation::LinearRamp { value: 0.0, end },
        ]
    }
}

/// Schedules sonic chunks on the shared audio context.
#[derive(Clone, Debug)]
pub struct PlaybackScheduler {
    context: AudioContextManager,
    bus: EventBus,
    stagger: Duration,
}

static GLOBAL_SCHEDULER: OnceLock<PlaybackScheduler> = OnceLock::new();

impl PlaybackScheduler {
    pub fn new(context: AudioContextManager, bus: EventBus) -> Self {
        Self {
            context,
            bus,
            stagger: Duration::from_millis(STAGGER_DELAY_MS),
        }
    }

    /// Scheduler on the global audio context and event bus.
    pub fn global() -> &'static PlaybackScheduler {
        GLOBAL_SCHEDULER.get_or_init(|| {
            PlaybackScheduler::new(AudioContextManager::global().clone(), EventBus::global().clone())
        })
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn context(&self) -> &AudioContextManager {
        &self.context
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Map a diff to sonic chunks and schedule them. Returns how many were scheduled.
    pub fn sonify_changes(&self, diff: &StateDiff, duration_ms: f64) -> usize {
        self.schedule_chunks(sonify::diff_to_sonic(diff, duration_ms))
    }

    /// Schedule chunks with the configured stagger. Fire-and-forget.
    ///
    /// Outside a tokio runtime nothing can be played; the chunks are still
    /// broadcast so visual consumers see them.
    pub fn schedule_chunks(&self, chunks: Vec<SonicChunk>) -> usize {
        self.schedule_spaced(chunks, self.stagger)
    }

    /// Schedule the two-tone alert for an anomaly, one pulse after the other.
    pub fn play_anomaly_alert(&self, record: &AnomalyRecord, custom: Option<&CustomSound>) -> usize {
        let chunks = sonify::anomaly_alert_chunks(record, custom);
        let spacing = chunks
            .first()
            .map(|c| sonify::clamp_duration(c.duration_ms))
            .unwrap_or(ALERT_PULSE_MS);
        self.schedule_spaced(chunks, Duration::from_secs_f64(spacing / 1000.0))
    }

    fn schedule_spaced(&self, chunks: Vec<SonicChunk>, spacing: Duration) -> usize {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::warn!(
                    "[PLAYBACK] No async runtime, broadcasting {} sonic chunk(s) without audio",
                    chunks.len()
                );
                for chunk in chunks {
                    self.bus.broadcast(PipelineEvent::SonicChunk(chunk));
                }
                return 0;
            }
        };

        let count = chunks.len();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let scheduler = self.clone();
            let delay = spacing * index as u32;
            handle.spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                scheduler.play_sonic_chunk(&chunk).await;
            });
        }
        count
    }

    /// Play one chunk. Returns whether audio was produced.
    pub async fn play_sonic_chunk(&self, chunk: &SonicChunk) -> bool {
        self.bus.broadcast(PipelineEvent::SonicChunk(chunk.clone()));

        let backend = match self.context.get_context() {
            Ok(backend) => backend,
            Err(e) => {
                log::warn!("[PLAYBACK] No audio context for chunk {}: {}", chunk.id, e);
                return false;
            }
        };

        let state = backend.lock().expect("Audio backend lock poisoned").state();
        match state {
            ContextState::Running => {}
            ContextState::Closed => {
                log::debug!("[PLAYBACK] Audio context closed, skipping chunk {}", chunk.id);
                return false;
            }
            ContextState::Suspended => match self.context.try_resume() {
                Ok(outcome) if outcome.resumed => {}
                Ok(_) => {
                    log::warn!("[PLAYBACK] Audio context suspended, skipping chunk {}", chunk.id);
                    return false;
                }
                Err(e) => {
                    log::warn!("[PLAYBACK] Could not resume audio for chunk {}: {}", chunk.id, e);
                    return false;
                }
            },
        }

        let duration_ms = sonify::clamp_duration(chunk.duration_ms);
        let started = {
            let mut ctx = backend.lock().expect("Audio backend lock poisoned");
            let mut created = Vec::new();
            match start_voice(&mut **ctx, chunk, duration_ms, &mut created) {
                Ok((osc, gain)) => Ok((osc, gain, ctx.ended(osc))),
                Err(e) => {
                    for node in created {
                        let _ = ctx.disconnect(node);
                    }
                    Err(e)
                }
            }
        };
        let (osc, gain, ended) = match started {
            Ok(voice) => voice,
            Err(e) => {
                log::error!("[PLAYBACK] Failed to play sonic chunk {}: {}", chunk.id, e);
                return false;
            }
        };

        let safety = Duration::from_secs_f64(duration_ms / 1000.0) + Duration::from_millis(CLEANUP_MARGIN_MS);
        wait_for_end(ended, safety, &chunk.id).await;

        let mut ctx = backend.lock().expect("Audio backend lock poisoned");
        for node in [osc, gain] {
            if let Err(e) = ctx.disconnect(node) {
                log::debug!("[PLAYBACK] Disconnect of node {} failed: {}", node, e);
            }
        }
        true
    }
}

fn start_voice(
    ctx: &mut dyn AudioBackend,
    chunk: &SonicChunk,
    duration_ms: f64,
    created: &mut Vec<NodeId>,
) -> Result<(NodeId, NodeId)> {
    let osc = ctx.create_oscillator(chunk.waveform, chunk.frequency, chunk.detune)?;
    created.push(osc);
    let gain = ctx.create_gain(0.0)?;
    created.push(gain);

    ctx.connect(osc, gain)?;
    ctx.connect_to_destination(gain)?;

    let now = ctx.current_time();
    let duration_s = duration_ms / 1000.0;
    for automation in envelope(now, duration_s, chunk.magnitude) {
        ctx.schedule(gain, automation)?;
    }
    ctx.start(osc, now)?;
    ctx.stop(osc, now + duration_s)?;
    Ok((osc, gain))
}

async fn wait_for_end(ended: Option<oneshot::Receiver<()>>, safety: Duration, chunk_id: &str) {
    match ended {
        Some(ended) => {
            tokio::select! {
                _ = ended => {}
                _ = tokio::time::sleep(safety) => {
                    log::debug!("[PLAYBACK] Safety timeout for chunk {}", chunk_id);
                }
            }
        }
        None => tokio::time::sleep(safety).await,
    }
}
