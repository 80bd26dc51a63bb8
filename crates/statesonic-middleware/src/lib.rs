//! Statesonic Middleware - Hear your state change.
//!
//! Wrap a store's creator with [`apply_middleware`] and every effective
//! mutation is diffed, broadcast as typed events and played as short tones:
//!
//! ```no_run
//! use statesonic_middleware::{apply_middleware, MiddlewareOptions, StateManager, StateValue, StoreApi};
//! use std::sync::Arc;
//!
//! let creator = apply_middleware(
//!     Arc::new(|_api: &mut StoreApi| StateValue::from(serde_json::json!({"count": 0}))),
//!     MiddlewareOptions::new().name("counter").exclude("session"),
//! );
//! let store = StateManager::create(creator);
//! store.merge(serde_json::json!({"count": 1}));
//! ```
//!
//! Configuration can also come from a TOML file, see [`MiddlewareConfig`].

pub mod config;
pub mod environment;
pub mod error;
pub mod middleware;
pub mod options;

pub use config::{AnomalyDetectionSettings, MiddlewareConfig};
pub use environment::Environment;
pub use error::{ConfigError, Result};
pub use middleware::{apply_middleware, passes_filters, try_apply_middleware, SonificationPipeline};
pub use options::{MiddlewareOptions, OnTrace};

pub use statesonic_audio::{AudioContextManager, PlaybackScheduler};
pub use statesonic_core::{
    debug_log, AlertLevel, AnomalyDetector, CustomSound, CustomVisual, EventBus, PipelineEvent, RapidChangeSettings,
    StateCreator, StateManager, StateValue, StoreApi, TraceData, WatchPathConfig,
};
