//! Pipeline event bus.
//!
//! Every stage of the pipeline announces its output on a shared bus so that
//! visualizers, loggers and test harnesses can follow along without being
//! wired into the store. Subscribers receive a crossbeam [`Receiver`]; a
//! subscriber that drops its receiver is pruned on the next broadcast.
//!
//! Channels, in emission order for a single mutation:
//!
//! - `diff-chunk` - one per changed (and included) key
//! - `anomaly-chunk` - one per detected burst
//! - `sonic-chunk` - one per sound event, when it is about to play
//! - `trace` - the complete trace record

use crate::chunks::{AnomalyChunk, DiffChunk, SonicChunk};
use crate::trace::TraceData;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::sync::{Arc, Mutex, OnceLock};

/// An event emitted by the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "kebab-case")]
pub enum PipelineEvent {
    Trace(TraceData),
    DiffChunk(DiffChunk),
    SonicChunk(SonicChunk),
    AnomalyChunk(AnomalyChunk),
}

impl PipelineEvent {
    /// Channel name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::Trace(_) => "trace",
            PipelineEvent::DiffChunk(_) => "diff-chunk",
            PipelineEvent::SonicChunk(_) => "sonic-chunk",
            PipelineEvent::AnomalyChunk(_) => "anomaly-chunk",
        }
    }

    /// Serialize as a single JSON line.
    pub fn to_json_line(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Fan-out bus for [`PipelineEvent`]s.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<PipelineEvent>>>>,
}

static GLOBAL_BUS: OnceLock<EventBus> = OnceLock::new();

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide bus used when no explicit bus is configured.
    pub fn global() -> &'static EventBus {
        GLOBAL_BUS.get_or_init(EventBus::new)
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().expect("Subscriber lock poisoned").push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber. Returns how many received it.
    pub fn broadcast(&self, event: PipelineEvent) -> usize {
        let mut subscribers = self.subscribers.lock().expect("Subscriber lock poisoned");
        let before = subscribers.len();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        if subscribers.len() != before {
            log::debug!("[EVENTS] Pruned {} disconnected subscriber(s)", before - subscribers.len());
        }
        subscribers.len()
    }

    /// Number of registered subscribers (including ones not yet pruned).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("Subscriber lock poisoned").len()
    }
}
