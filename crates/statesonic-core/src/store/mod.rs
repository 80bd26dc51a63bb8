//! Host store.
//!
//! A minimal reactive store whose mutation entry point can be decorated by
//! middleware. All mutations flow through a [`SetState`] function; the store
//! keeps the single source of truth behind an `RwLock`.
//!
//! # Architecture
//!
//! - [`StateManager`] - Thread-safe state access, listeners, the active setter
//! - [`StateUpdate`] - A partial state or an updater closure
//! - [`StoreApi`] - The setter/getter pair handed to a [`StateCreator`]

mod manager;
mod update;

pub use manager::{GetState, Listener, SetState, StateCreator, StateManager, StoreApi};
pub use update::{Action, StateUpdate};
