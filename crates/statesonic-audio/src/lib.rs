//! Statesonic Audio - Turning state diffs into sound.
//!
//! This crate maps diffs to tones and plays them:
//!
//! - **Sonify** - Deterministic mapping from diff entries to [`SonicChunk`]s
//! - **Playback** - Staggered, self-cleaning scheduling of chunks
//! - **Context** - A lazily created, resumable audio context
//! - **Backend** - The audio graph abstraction, with an in-memory and a cpal backend
//! - **Synth** - Offline rendering and WAV export of scheduled voices
//!
//! # Architecture
//!
//! ```text
//! StateDiff ──> sonify ──> SonicChunk ──> PlaybackScheduler ──> AudioContextManager
//!                                              │                        │
//!                                              ▼                        ▼
//!                                          EventBus              dyn AudioBackend
//! ```
//!
//! [`SonicChunk`]: statesonic_core::SonicChunk

pub mod backend;
pub mod context;
pub mod errors;
pub mod graph;
pub mod playback;
pub mod sonify;
pub mod synth;

#[cfg(feature = "native")]
pub use backend::CpalBackend;
pub use backend::{AudioBackend, ContextState, MemoryBackend};
pub use context::{default_factory, AudioContextManager, BackendFactory, ResumeOutcome, SharedBackend};
pub use errors::{AudioError, Result};
pub use graph::{Automation, NodeGraph, NodeId, Voice};
pub use playback::{envelope, PlaybackScheduler};
pub use sonify::{anomaly_alert_chunks, chunk_to_sonic, diff_to_sonic, entry_to_sonic};
