//! Process-wide failure containment.
//!
//! A [`HealthRegister`] is created once, shared through an `Arc`, and consulted before
//! every append and apply. The first unrecoverable failure panics it; from then on
//! every caller is rejected with [`Error::Panicked`] chained to that first cause until
//! the owning component is restarted and calls [`HealthRegister::reset`].

use crate::error::{Error, Result};
use log::error;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Observes the Healthy -> Panicked transition.
pub trait PanicListener: Send + Sync {
    fn on_panic(&self, cause: &Error);
}

#[derive(Debug, Clone)]
pub enum HealthState {
    Healthy,
    Panicked(Arc<Error>),
}

#[derive(Default)]
pub struct HealthRegister {
    panicked: AtomicBool,
    cause: Mutex<Option<Arc<Error>>>,
    listeners: Mutex<Vec<Arc<dyn PanicListener>>>,
}

impl HealthRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn add_listener(&self, listener: Arc<dyn PanicListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn is_healthy(&self) -> bool {
        !self.panicked.load(Ordering::Acquire)
    }

    pub fn state(&self) -> HealthState {
        match self.cause() {
            Some(cause) => HealthState::Panicked(cause),
            None => HealthState::Healthy,
        }
    }

    pub fn cause(&self) -> Option<Arc<Error>> {
        if self.is_healthy() {
            return None;
        }
        self.cause.lock().clone()
    }

    /// Fails with an "already panicked" error chained to the recorded cause.
    pub fn assert_healthy(&self) -> Result<()> {
        match self.cause() {
            None => Ok(()),
            Some(cause) => Err(Error::Panicked { cause }),
        }
    }

    /// Records `cause` as the reason for panicking, unless a cause is already recorded.
    ///
    /// Concurrent panics collapse to a single recorded cause; the recorded one is returned.
    pub fn panic(&self, cause: Arc<Error>) -> Arc<Error> {
        let recorded = {
            let mut slot = self.cause.lock();
            if let Some(existing) = slot.as_ref() {
                return existing.clone();
            }
            *slot = Some(cause.clone());
            self.panicked.store(true, Ordering::Release);
            cause
        };

        error!("database panic: {}", describe(&recorded));
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener.on_panic(&recorded);
        }
        recorded
    }

    /// Back to Healthy. Only for an explicit restart of the owning component.
    pub fn reset(&self) {
        let mut slot = self.cause.lock();
        *slot = None;
        self.panicked.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for HealthRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthRegister")
            .field("state", &self.state())
            .finish()
    }
}

fn describe(err: &Error) -> String {
    let root = err.root_cause();
    if std::ptr::eq(root, err) {
        err.to_string()
    } else {
        format!("{} (root cause: {})", err, root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct CountingListener(AtomicUsize);

    impl PanicListener for CountingListener {
        fn on_panic(&self, _cause: &Error) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_starts_healthy() {
        let health = HealthRegister::new();
        assert!(health.is_healthy());
        assert!(health.assert_healthy().is_ok());
        assert!(matches!(health.state(), HealthState::Healthy));
    }

    #[test]
    fn test_panic_is_sticky_and_chains_cause() {
        let health = HealthRegister::new();
        health.panic(Arc::new(Error::OutOfMemory("force buffer".to_string())));

        let err = health.assert_healthy().unwrap_err();
        assert!(err.is_panic());
        assert!(err.is_out_of_memory());
        assert!(!health.is_healthy());
    }

    #[test]
    fn test_concurrent_panics_record_one_cause() {
        let health = HealthRegister::shared();
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        health.add_listener(listener.clone());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let health = health.clone();
                thread::spawn(move || health.panic(Arc::new(Error::Consistency(format!("t{}", i)))))
            })
            .collect();
        let recorded: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let first = health.cause().unwrap();
        assert!(recorded.iter().all(|c| Arc::ptr_eq(c, &first)));
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_returns_to_healthy() {
        let health = HealthRegister::new();
        health.panic(Arc::new(Error::Consistency("gap".to_string())));
        health.reset();
        assert!(health.is_healthy());
        assert!(health.cause().is_none());
    }
}
