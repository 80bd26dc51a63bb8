//! Audio context management.
//!
//! The [`AudioContextManager`] owns the single audio context of a process
//! (or of a test). The context is created lazily on first use by a
//! [`BackendFactory`]; callers borrow it per operation through a
//! [`SharedBackend`] and never keep it across calls.
//!
//! Resume attempts are tracked: once a resume has failed (typically because
//! of an autoplay policy) the manager remembers the block and throttles new
//! attempts to one per [`RESUME_RETRY_INTERVAL`]. A successful resume clears
//! the flag.

use crate::backend::{AudioBackend, ContextState};
use crate::errors::{AudioError, Result};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::time::Instant;

/// Minimum spacing of resume attempts after a failed one.
pub const RESUME_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// The context handle lent to callers.
pub type SharedBackend = Arc<Mutex<Box<dyn AudioBackend>>>;

/// Creates a new audio context.
pub type BackendFactory = Arc<dyn Fn() -> Result<Box<dyn AudioBackend>> + Send + Sync>;

/// Outcome of [`AudioContextManager::try_resume`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResumeOutcome {
    /// The context is running.
    pub resumed: bool,
    /// Playback is blocked by a failed resume.
    pub blocked: bool,
}

#[derive(Default)]
struct Slot {
    backend: Option<SharedBackend>,
    autoplay_blocked: bool,
    last_failed_resume: Option<Instant>,
}

/// Lazily created, process-wide audio context.
#[derive(Clone)]
pub struct AudioContextManager {
    slot: Arc<Mutex<Slot>>,
    factory: BackendFactory,
}

static GLOBAL_CONTEXT: OnceLock<AudioContextManager> = OnceLock::new();

impl AudioContextManager {
    pub fn new(factory: BackendFactory) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::default())),
            factory,
        }
    }

    /// The process-wide manager, backed by [`default_factory`].
    pub fn global() -> &'static AudioContextManager {
        GLOBAL_CONTEXT.get_or_init(|| AudioContextManager::new(default_factory()))
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().expect("Audio context lock poisoned")
    }

    /// The current context, created on first access.
    pub fn get_context(&self) -> Result<SharedBackend> {
        let mut slot = self.lock();
        if let Some(backend) = &slot.backend {
            return Ok(backend.clone());
        }

        let backend = (self.factory)().map_err(|e| {
            log::error!("[AUDIO] Failed to create audio context: {}", e);
            e
        })?;
        log::debug!("[AUDIO] Created '{}' audio context", backend.name());
        let shared: SharedBackend = Arc::new(Mutex::new(backend));
        slot.backend = Some(shared.clone());
        Ok(shared)
    }

    /// Resume the context if it is suspended.
    ///
    /// After a failed attempt, further attempts within
    /// [`RESUME_RETRY_INTERVAL`] report the block without touching the context.
    pub fn try_resume(&self) -> Result<ResumeOutcome> {
        let backend = self.get_context()?;

        {
            let slot = self.lock();
            if slot.autoplay_blocked {
                if let Some(failed_at) = slot.last_failed_resume {
                    if failed_at.elapsed() < RESUME_RETRY_INTERVAL {
                        return Ok(ResumeOutcome {
                            resumed: false,
                            blocked: true,
                        });
                    }
                }
            }
        }

        let result = {
            let mut backend = backend.lock().expect("Audio backend lock poisoned");
            match backend.state() {
                ContextState::Running => Ok(()),
                ContextState::Closed => Err(AudioError::Closed),
                ContextState::Suspended => backend.resume(),
            }
        };

        let mut slot = self.lock();
        match result {
            Ok(()) => {
                if slot.autoplay_blocked {
                    log::info!("[AUDIO] Audio context resumed, autoplay block cleared");
                }
                slot.autoplay_blocked = false;
                slot.last_failed_resume = None;
                Ok(ResumeOutcome {
                    resumed: true,
                    blocked: false,
                })
            }
            Err(AudioError::Closed) => Ok(ResumeOutcome {
                resumed: false,
                blocked: false,
            }),
            Err(e) => {
                log::warn!("[AUDIO] Could not resume audio context: {}", e);
                slot.autoplay_blocked = true;
                slot.last_failed_resume = Some(Instant::now());
                Ok(ResumeOutcome {
                    resumed: false,
                    blocked: true,
                })
            }
        }
    }

    /// Resume without waiting out the retry interval, e.g. right after a user gesture.
    pub fn force_resume(&self) -> Result<ResumeOutcome> {
        self.lock().last_failed_resume = None;
        self.try_resume()
    }

    /// Whether the last resume attempt failed.
    pub fn is_autoplay_blocked(&self) -> bool {
        self.lock().autoplay_blocked
    }

    /// Close the context, if any, and reset so the next access creates a fresh one.
    pub fn cleanup(&self) -> Result<()> {
        let backend = {
            let mut slot = self.lock();
            let backend = slot.backend.take();
            *slot = Slot::default();
            backend
        };

        if let Some(backend) = backend {
            let mut backend = backend.lock().expect("Audio backend lock poisoned");
            if backend.state() != ContextState::Closed {
                backend.close()?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for AudioContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.lock();
        f.debug_struct("AudioContextManager")
            .field("created", &slot.backend.is_some())
            .field("autoplay_blocked", &slot.autoplay_blocked)
            .finish()
    }
}

/// The platform backend: cpal with the `native` feature, otherwise none.
pub fn default_factory() -> BackendFactory {
    #[cfg(feature = "native")]
    {
        Arc::new(|| {
            crate::backend::CpalBackend::open_default().map(|b| Box::new(b) as Box<dyn AudioBackend>)
        })
    }
    #[cfg(not(feature = "native"))]
    {
        Arc::new(|| {
            Err(AudioError::Unsupported(
                "built without the `native` feature".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_context_is_created_lazily_once() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let backend = MemoryBackend::new();
        let manager = AudioContextManager::new(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(backend.clone()) as Box<dyn AudioBackend>)
        }));

        assert_eq!(created.load(Ordering::SeqCst), 0);
        let a = manager.get_context().unwrap();
        let b = manager.get_context().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_creation_failure_is_surfaced() {
        let manager = AudioContextManager::new(Arc::new(|| {
            Err(AudioError::Unsupported("no device".to_string()))
        }));
        assert!(matches!(manager.get_context(), Err(AudioError::Unsupported(_))));
    }

    #[test]
    fn test_cleanup_closes_and_resets() {
        let backend = MemoryBackend::new();
        let manager = AudioContextManager::new(backend.factory());
        let first = manager.get_context().unwrap();

        manager.cleanup().unwrap();
        assert_eq!(backend.state(), ContextState::Closed);

        let second = manager.get_context().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_resume_is_throttled_then_cleared() {
        let backend = MemoryBackend::start_suspended();
        backend.set_fail_resume(true);
        let manager = AudioContextManager::new(backend.factory());

        let outcome = manager.try_resume().unwrap();
        assert_eq!(outcome, ResumeOutcome { resumed: false, blocked: true });
        assert!(manager.is_autoplay_blocked());

        // within the retry interval the backend is not asked again
        manager.try_resume().unwrap();
        assert_eq!(backend.resume_calls(), 1);

        backend.set_fail_resume(false);
        tokio::time::advance(RESUME_RETRY_INTERVAL).await;
        let outcome = manager.try_resume().unwrap();
        assert_eq!(outcome, ResumeOutcome { resumed: true, blocked: false });
        assert!(!manager.is_autoplay_blocked());
        assert_eq!(backend.resume_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_resume_skips_throttle() {
        let backend = MemoryBackend::start_suspended();
        backend.set_fail_resume(true);
        let manager = AudioContextManager::new(backend.factory());
        manager.try_resume().unwrap();

        backend.set_fail_resume(false);
        assert!(manager.force_resume().unwrap().resumed);
        assert_eq!(backend.resume_calls(), 2);
    }

    #[test]
    fn test_running_context_needs_no_resume() {
        let backend = MemoryBackend::new();
        let manager = AudioContextManager::new(backend.factory());
        assert!(manager.try_resume().unwrap().resumed);
        assert_eq!(backend.resume_calls(), 0);
    }
}
