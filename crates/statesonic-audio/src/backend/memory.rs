//! Headless audio backend.
//!
//! [`MemoryBackend`] keeps the node graph in memory and never touches an
//! audio device. Its clock follows `tokio::time::Instant`, so tests running
//! with a paused runtime see deterministic times. Every voice that was routed
//! to the destination is remembered and can be rendered offline or written
//! to a WAV file.
//!
//! The handle is cheap to clone; clones share the same context, which lets a
//! test keep one clone for inspection while the context manager owns another.

use super::{AudioBackend, ContextState};
use crate::context::BackendFactory;
use crate::errors::{AudioError, Result};
use crate::graph::{Automation, NodeGraph, NodeId, Voice};
use crate::synth;
use statesonic_core::Waveform;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

struct MemoryInner {
    graph: NodeGraph,
    state: ContextState,
    origin: Instant,
    fail_resume: bool,
    fail_create: bool,
    auto_end: bool,
    resume_calls: usize,
    start_times: Vec<f64>,
}

impl MemoryInner {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn open_graph(&mut self) -> Result<&mut NodeGraph> {
        if self.state == ContextState::Closed {
            return Err(AudioError::Closed);
        }
        Ok(&mut self.graph)
    }
}

/// In-memory audio context.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryInner>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// A running context.
    pub fn new() -> Self {
        Self::with_state(ContextState::Running)
    }

    /// A suspended context, as left by an autoplay policy.
    pub fn start_suspended() -> Self {
        Self::with_state(ContextState::Suspended)
    }

    fn with_state(state: ContextState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner {
                graph: NodeGraph::recording(),
                state,
                origin: Instant::now(),
                fail_resume: false,
                fail_create: false,
                auto_end: true,
                resume_calls: 0,
                start_times: Vec::new(),
            })),
        }
    }

    /// Do not fire end notifications on their own; only [`MemoryBackend::finish_all`] does.
    pub fn without_auto_end(self) -> Self {
        self.lock().auto_end = false;
        self
    }

    /// Make `resume` fail (simulated autoplay block).
    pub fn set_fail_resume(&self, fail: bool) {
        self.lock().fail_resume = fail;
    }

    /// Make node creation fail.
    pub fn set_fail_create(&self, fail: bool) {
        self.lock().fail_create = fail;
    }

    /// A factory that hands out clones of this backend.
    pub fn factory(&self) -> BackendFactory {
        let backend = self.clone();
        Arc::new(move || Ok(Box::new(backend.clone()) as Box<dyn AudioBackend>))
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("Memory backend lock poisoned")
    }

    /// Fire every pending end notification.
    pub fn finish_all(&self) -> usize {
        self.lock().graph.fire_all_ended()
    }

    pub fn oscillators_created(&self) -> usize {
        self.lock().graph.oscillators_created()
    }

    pub fn live_node_count(&self) -> usize {
        self.lock().graph.live_node_count()
    }

    pub fn disconnected(&self) -> Vec<NodeId> {
        self.lock().graph.disconnected().to_vec()
    }

    /// Oscillator start times in call order.
    pub fn start_times(&self) -> Vec<f64> {
        self.lock().start_times.clone()
    }

    pub fn resume_calls(&self) -> usize {
        self.lock().resume_calls
    }

    /// Every voice routed to the destination, disconnected ones first.
    pub fn voices(&self) -> Vec<Voice> {
        self.lock().graph.recorded_voices()
    }

    /// Mix all recorded voices offline.
    pub fn render(&self, sample_rate: u32) -> Vec<f32> {
        synth::render(&self.voices(), sample_rate)
    }

    pub fn write_wav(&self, path: impl AsRef<Path>, sample_rate: u32) -> Result<()> {
        synth::write_wav(path, &self.render(sample_rate), sample_rate)
    }
}

impl AudioBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn state(&self) -> ContextState {
        self.lock().state
    }

    fn current_time(&self) -> f64 {
        self.lock().now()
    }

    fn resume(&mut self) -> Result<()> {
        let mut inner = self.lock();
        inner.resume_calls += 1;
        match inner.state {
            ContextState::Closed => Err(AudioError::Closed),
            _ if inner.fail_resume => Err(AudioError::ResumeFailed(
                "playback requires a user gesture".to_string(),
            )),
            _ => {
                inner.state = ContextState::Running;
                Ok(())
            }
        }
    }

    fn suspend(&mut self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state == ContextState::Closed {
            return Err(AudioError::Closed);
        }
        inner.state = ContextState::Suspended;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != ContextState::Closed {
            inner.graph.clear();
            inner.state = ContextState::Closed;
        }
        Ok(())
    }

    fn create_oscillator(&mut self, waveform: Waveform, frequency: f64, detune: f64) -> Result<NodeId> {
        let mut inner = self.lock();
        if inner.fail_create {
            return Err(AudioError::NodeCreation {
                kind: "oscillator",
                reason: "injected failure".to_string(),
            });
        }
        inner.open_graph()?.add_oscillator(waveform, frequency, detune)
    }

    fn create_gain(&mut self, initial: f64) -> Result<NodeId> {
        let mut inner = self.lock();
        if inner.fail_create {
            return Err(AudioError::NodeCreation {
                kind: "gain",
                reason: "injected failure".to_string(),
            });
        }
        Ok(inner.open_graph()?.add_gain(initial))
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.lock().open_graph()?.connect(from, to)
    }

    fn connect_to_destination(&mut self, node: NodeId) -> Result<()> {
        self.lock().open_graph()?.connect_to_destination(node)
    }

    fn schedule(&mut self, node: NodeId, automation: Automation) -> Result<()> {
        self.lock().open_graph()?.schedule(node, automation)
    }

    fn start(&mut self, node: NodeId, at: f64) -> Result<()> {
        let mut inner = self.lock();
        inner.open_graph()?.start(node, at)?;
        inner.start_times.push(at);
        Ok(())
    }

    fn stop(&mut self, node: NodeId, at: f64) -> Result<()> {
        self.lock().open_graph()?.stop(node, at)
    }

    fn ended(&mut self, node: NodeId) -> Option<oneshot::Receiver<()>> {
        let mut inner = self.lock();
        if inner.state == ContextState::Closed {
            return None;
        }
        let rx = inner.graph.ended(node)?;

        let delay = inner
            .graph
            .voice(node)
            .and_then(|v| Duration::try_from_secs_f64((v.stop - inner.now()).max(0.0)).ok());
        if let (true, Some(delay), Ok(handle)) = (inner.auto_end, delay, tokio::runtime::Handle::try_current()) {
            let shared = self.inner.clone();
            handle.spawn(async move {
                tokio::time::sleep(delay).await;
                shared
                    .lock()
                    .expect("Memory backend lock poisoned")
                    .graph
                    .fire_node(node);
            });
        }
        Some(rx)
    }

    fn disconnect(&mut self, node: NodeId) -> Result<()> {
        let mut inner = self.lock();
        if inner.state == ContextState::Closed {
            // closing already released every node
            return Ok(());
        }
        inner.graph.disconnect(node)
    }
}
