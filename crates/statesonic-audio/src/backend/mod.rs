//! Audio backends.
//!
//! An [`AudioBackend`] is one audio context: a clock, a lifecycle state and a
//! node graph it renders to some destination.
//!
//! - [`MemoryBackend`] - Headless; records everything and renders offline
//! - `CpalBackend` - Real-time output on the default device (feature `native`)

mod memory;
#[cfg(feature = "native")]
mod cpal;

pub use memory::MemoryBackend;
#[cfg(feature = "native")]
pub use self::cpal::CpalBackend;

use crate::errors::Result;
use crate::graph::{Automation, NodeId};
use statesonic_core::Waveform;
use tokio::sync::oneshot;

/// Lifecycle state of an audio context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

impl std::fmt::Display for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextState::Suspended => write!(f, "suspended"),
            ContextState::Running => write!(f, "running"),
            ContextState::Closed => write!(f, "closed"),
        }
    }
}

/// A platform audio context.
///
/// All node operations fail with [`crate::AudioError::Closed`] once the
/// context is closed.
pub trait AudioBackend: Send {
    /// Short backend name for diagnostics.
    fn name(&self) -> &str;

    fn state(&self) -> ContextState;

    /// Context clock in seconds.
    fn current_time(&self) -> f64;

    fn resume(&mut self) -> Result<()>;

    fn suspend(&mut self) -> Result<()>;

    /// Close the context and release every node. Idempotent.
    fn close(&mut self) -> Result<()>;

    /// Create an oscillator. `detune` is in cents.
    fn create_oscillator(&mut self, waveform: Waveform, frequency: f64, detune: f64) -> Result<NodeId>;

    fn create_gain(&mut self, initial: f64) -> Result<NodeId>;

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()>;

    fn connect_to_destination(&mut self, node: NodeId) -> Result<()>;

    /// Schedule a change of the node's gain parameter.
    fn schedule(&mut self, node: NodeId, automation: Automation) -> Result<()>;

    fn start(&mut self, node: NodeId, at: f64) -> Result<()>;

    fn stop(&mut self, node: NodeId, at: f64) -> Result<()>;

    /// End-of-playback notification for an oscillator, if the backend
    /// provides one for this node.
    fn ended(&mut self, node: NodeId) -> Option<oneshot::Receiver<()>>;

    fn disconnect(&mut self, node: NodeId) -> Result<()>;
}
