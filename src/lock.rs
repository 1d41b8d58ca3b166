/// Lock handle accepted by `Arena::periodic_activity`.
///
/// The caller may already hold the lock when it calls in, or may not.
/// The arena only takes it on the rare path where a retune is due, so a
/// caller can invoke `periodic_activity` on every operation and pay for
/// the lock about once per adjustment interval.
use parking_lot::{Mutex, MutexGuard};

pub trait LockHandle {
    fn owns_lock(&self) -> bool;

    /// Acquire the lock. Must only be called when `owns_lock()` is false.
    fn lock(&mut self);
}

/// A possibly-held guard over a `parking_lot::Mutex`.
pub struct UniqueLock<'a, T> {
    mutex: &'a Mutex<T>,
    guard: Option<MutexGuard<'a, T>>,
}

impl<'a, T> UniqueLock<'a, T> {
    /// Acquire `mutex` now.
    pub fn new(mutex: &'a Mutex<T>) -> Self {
        Self {
            mutex,
            guard: Some(mutex.lock()),
        }
    }

    /// Wrap `mutex` without acquiring it.
    pub fn deferred(mutex: &'a Mutex<T>) -> Self {
        Self { mutex, guard: None }
    }

    pub fn guard(&self) -> Option<&T> {
        self.guard.as_deref()
    }

    pub fn guard_mut(&mut self) -> Option<&mut T> {
        self.guard.as_deref_mut()
    }

    pub fn unlock(&mut self) {
        self.guard = None;
    }
}

impl<T> LockHandle for UniqueLock<'_, T> {
    #[inline]
    fn owns_lock(&self) -> bool {
        self.guard.is_some()
    }

    fn lock(&mut self) {
        debug_assert!(self.guard.is_none(), "lock already held");
        self.guard = Some(self.mutex.lock());
    }
}
