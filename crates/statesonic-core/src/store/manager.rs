//! State manager for thread-safe state access.
//!
//! The [`StateManager`] owns the central [`StateValue`] behind an `RwLock`
//! and routes every mutation through its active [`SetState`]. The setter is
//! chosen once, when the store is created: a [`StateCreator`] receives the
//! base setter in a [`StoreApi`] and may replace it with a decorated one
//! before returning the initial state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use super::update::{Action, StateUpdate};
use crate::value::StateValue;

/// State mutator: `(update, replace, action)`.
pub type SetState = Arc<dyn Fn(StateUpdate, bool, Option<Action>) + Send + Sync>;

/// State accessor.
pub type GetState = Arc<dyn Fn() -> StateValue + Send + Sync>;

/// Builds the initial state. May decorate `api.set_state`.
pub type StateCreator = Arc<dyn Fn(&mut StoreApi) -> StateValue + Send + Sync>;

/// Change listener, called with `(next, prev)` after every effective mutation.
pub type Listener = Arc<dyn Fn(&StateValue, &StateValue) + Send + Sync>;

/// The setter/getter pair a [`StateCreator`] works with.
#[derive(Clone)]
pub struct StoreApi {
    pub set_state: SetState,
    pub get_state: GetState,
}

impl std::fmt::Debug for StoreApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreApi").finish_non_exhaustive()
    }
}

struct Shared {
    state: RwLock<StateValue>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
}

impl Shared {
    fn read(&self) -> StateValue {
        self.state.read().expect("State lock poisoned").clone()
    }

    fn notify(&self, next: &StateValue, prev: &StateValue) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .expect("Listener lock poisoned")
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(next, prev);
        }
    }
}

/// Thread-safe manager for the central state.
#[derive(Clone)]
pub struct StateManager {
    shared: Arc<Shared>,
    api: StoreApi,
}

impl StateManager {
    /// Create a store from a creator function.
    pub fn create(creator: StateCreator) -> Self {
        let shared = Arc::new(Shared {
            state: RwLock::new(StateValue::Undefined),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
        });

        let mut api = StoreApi {
            set_state: base_setter(shared.clone()),
            get_state: {
                let shared = shared.clone();
                Arc::new(move || shared.read())
            },
        };
        let initial = creator(&mut api);
        *shared.state.write().expect("State lock poisoned") = initial;

        Self { shared, api }
    }

    /// Create a store with a fixed initial state and no decoration.
    pub fn with_state(initial: impl Into<StateValue>) -> Self {
        let initial = initial.into();
        Self::create(Arc::new(move |_api: &mut StoreApi| initial.clone()))
    }

    /// Get the current state. Cheap: containers are shared.
    pub fn get_state(&self) -> StateValue {
        (self.api.get_state)()
    }

    /// Apply an update through the active (possibly decorated) setter.
    pub fn set_state(&self, update: impl Into<StateUpdate>, replace: bool, action: Option<Action>) {
        (self.api.set_state)(update.into(), replace, action)
    }

    /// Shallow-merge a partial state.
    pub fn merge(&self, partial: impl Into<StateValue>) {
        self.set_state(StateUpdate::Partial(partial.into()), false, None);
    }

    /// Shallow-merge the result of an updater, tagging the mutation with an action.
    pub fn update<F>(&self, action: impl Into<Action>, f: F)
    where
        F: FnOnce(&StateValue) -> StateValue + Send + 'static,
    {
        self.set_state(StateUpdate::updater(f), false, Some(action.into()));
    }

    /// Register a change listener. Returns an id for [`StateManager::unsubscribe`].
    pub fn subscribe<F>(&self, listener: F) -> u64
    where
        F: Fn(&StateValue, &StateValue) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .listeners
            .lock()
            .expect("Listener lock poisoned")
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = self.shared.listeners.lock().expect("Listener lock poisoned");
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// The setter/getter pair this store routes through.
    pub fn api(&self) -> &StoreApi {
        &self.api
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("state", &self.shared.read())
            .finish_non_exhaustive()
    }
}

/// The undecorated setter.
///
/// Identical next values are ignored. Otherwise object partials are merged
/// into a new object (so the reference always changes), and replacements or
/// non-object values are stored as is.
fn base_setter(shared: Arc<Shared>) -> SetState {
    Arc::new(move |update: StateUpdate, replace: bool, _action: Option<Action>| {
        let transition = {
            let mut state = shared.state.write().expect("State lock poisoned");
            let next = update.resolve(&state);
            if next.same_value(&state) {
                None
            } else {
                let stored = if !replace && next.as_object().is_some() && state.as_object().is_some() {
                    state.merge(&next)
                } else {
                    next
                };
                let prev = std::mem::replace(&mut *state, stored.clone());
                Some((stored, prev))
            }
        };

        if let Some((next, prev)) = transition {
            shared.notify(&next, &prev);
        }
    })
}
