//! Observer lists.
//!
//! Append-only; observers run synchronously in registration order. Lists
//! are shared (`Arc`) between the controller, which registers observers,
//! and the bridges, whose deferred work invokes them on the loop thread.

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::error;

/// `A` may be unsized, e.g. `CallbackList<str>` for `Fn(&str)` observers.
pub struct CallbackList<A: ?Sized> {
    observers: Mutex<Vec<Box<dyn Fn(&A) + Send>>>,
}

impl<A: ?Sized> CallbackList<A> {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, observer: impl Fn(&A) + Send + 'static) {
        self.lock().push(Box::new(observer));
    }

    /// Invoke every observer with `arg`.
    ///
    /// The list lock is held while observers run, so an observer must not
    /// register further observers on the same list.
    pub fn call(&self, arg: &A) {
        for observer in self.lock().iter() {
            observer(arg);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// A panicking observer poisons the lock; the list itself stays valid.
    fn lock(&self) -> MutexGuard<'_, Vec<Box<dyn Fn(&A) + Send>>> {
        self.observers.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            error!("Callbacks: an observer panicked, continuing with the remaining list");
            self.observers.clear_poison();
            poisoned.into_inner()
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A: ?Sized> Default for CallbackList<A> {
    fn default() -> Self {
        Self::new()
    }
}
