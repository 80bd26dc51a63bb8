//! Statesonic Core - State values, diffing and tracing for the statesonic pipeline.
//!
//! This crate provides the audio-independent building blocks:
//!
//! - **Value** - Immutable, cheaply cloned state values with identity semantics
//! - **Store** - A minimal reactive store with a decoratable setter
//! - **Diff** - Key-level deltas between two snapshots and change magnitudes
//! - **Trace** - The setter interceptor that produces [`TraceData`]
//! - **Anomaly** - Sliding-window rapid-change detection
//! - **Chunks** - Diff, sonic and anomaly chunk types
//! - **Events** - The pipeline event bus
//!
//! # Architecture
//!
//! Every store mutation flows through a [`SetState`]. Middleware wraps that
//! setter with [`trace_set_state`], which captures the snapshots around the
//! mutation, diffs them and hands a [`TraceData`] to an observer. Observers
//! publish [`PipelineEvent`]s on an [`EventBus`] for any number of consumers.

pub mod anomaly;
pub mod chunks;
pub mod debug_log;
pub mod diff;
pub mod error;
pub mod events;
pub mod store;
pub mod trace;
pub mod value;

pub use anomaly::{AnomalyDetector, Clock, PathPattern, PathPatternSetting, RapidChangeConfig, RapidChangeSettings};
pub use chunks::{
    AlertLevel, AnomalyChunk, AnomalyKind, AnomalyRecord, CustomSound, CustomVisual, DiffChunk, SonicChunk,
    WatchPathConfig, Waveform,
};
pub use diff::{
    calculate_detailed_diff, calculate_simple_diff, diff_power, edit_distance, levenshtein, ChangeKind, DiffEntry,
    DiffOptions, StateDiff,
};
pub use error::CoreError;
pub use events::{EventBus, PipelineEvent};
pub use store::{Action, GetState, Listener, SetState, StateCreator, StateManager, StateUpdate, StoreApi};
pub use trace::{default_diff_fn, detailed_diff_fn, trace_set_state, DiffFn, TraceConfig, TraceData, TraceObserver, Transition};
pub use value::{StateValue, ValueKind};
