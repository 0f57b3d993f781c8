use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::Waker;

use parking_lot::Mutex;

/// A readiness latch the scheduler checks before running an operator.
///
/// An operator holding work that must not proceed (for example while a
/// background spill drains its state) blocks the dependency, and releases
/// it once the work may continue. Wakers registered while blocked are woken
/// when the dependency becomes ready.
pub struct Dependency {
    name: &'static str,
    ready: AtomicBool,
    watchers: Mutex<Vec<Waker>>,
}

impl Dependency {
    pub fn new_ready(name: &'static str) -> Self {
        Dependency {
            name,
            ready: AtomicBool::new(true),
            watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn new_blocked(name: &'static str) -> Self {
        Dependency {
            name,
            ready: AtomicBool::new(false),
            watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Mark the dependency not ready. Callers waiting after this point park
    /// until `set_ready`.
    pub fn block(&self) {
        self.ready.store(false, Ordering::Release);
    }

    /// Mark the dependency ready and wake all registered watchers.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
        let watchers = {
            let mut watchers = self.watchers.lock();
            std::mem::take(&mut *watchers)
        };
        for waker in watchers {
            waker.wake();
        }
    }

    /// Register a waker to be woken when the dependency becomes ready.
    ///
    /// If the dependency became ready concurrently with registration, the
    /// waker is woken immediately instead of being left parked.
    pub fn watch(&self, waker: &Waker) {
        self.watchers.lock().push(waker.clone());
        if self.is_ready() {
            let watchers = {
                let mut watchers = self.watchers.lock();
                std::mem::take(&mut *watchers)
            };
            for waker in watchers {
                waker.wake();
            }
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("name", &self.name)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}
