//! Locks guarding access to the flash
//!
//! [`AdmissionLock`] is the recursive mutex every submitter passes through;
//! a thread may re-enter it while it already holds it. [`SpinLock`] is the
//! non-sleeping, counted lock guarding direct transport access. A
//! [`FlashLock`](crate::FlashLock) takes it while holding admission, and
//! only the thread that first took it may take it again. The low-level
//! path only ever tries it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// Recursive mutex admitting one thread at a time
pub type AdmissionLock = ReentrantMutex<()>;

/// Held admission; released on drop
///
/// Not `Send`: the admission belongs to the thread that took it.
pub type AdmissionGuard<'a> = ReentrantMutexGuard<'a, ()>;

/// Counted test-and-set lock
///
/// Zero means free. Taking it never sleeps: [`SpinLock::try_lock`] fails
/// immediately and [`SpinLock::lock`] spins.
#[derive(Debug, Default)]
pub struct SpinLock {
    count: AtomicUsize,
}

/// Held spin lock level; released on drop
#[must_use = "the spin lock is released when the guard is dropped"]
pub struct SpinLockGuard<'a> {
    lock: &'a SpinLock,
}

impl SpinLock {
    /// Create an unlocked spin lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock if it is free
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_>> {
        self.count
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }

    /// Spin until the lock is free, then take it
    pub fn lock(&self) -> SpinLockGuard<'_> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            std::hint::spin_loop();
            thread::yield_now();
        }
    }

    /// Take one more level of a lock the caller already holds
    pub(crate) fn relock(&self) -> SpinLockGuard<'_> {
        let previous = self.count.fetch_add(1, Ordering::Acquire);
        debug_assert!(previous > 0, "relock of a free spin lock");
        SpinLockGuard { lock: self }
    }

    /// Whether any level is held
    pub fn is_locked(&self) -> bool {
        self.count.load(Ordering::Acquire) > 0
    }
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.count.fetch_sub(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_admission_is_recursive() {
        let lock = AdmissionLock::new(());
        let outer = lock.lock();
        let inner = lock.lock();
        assert!(lock.is_owned_by_current_thread());
        drop(inner);
        assert!(lock.is_owned_by_current_thread());
        drop(outer);
        assert!(!lock.is_owned_by_current_thread());
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_admission_try_lock_from_other_thread() {
        let lock = Arc::new(AdmissionLock::new(()));
        let guard = lock.lock();

        let other = Arc::clone(&lock);
        let taken = thread::spawn(move || other.try_lock().is_some())
            .join()
            .unwrap();
        assert!(!taken);

        drop(guard);
        let other = Arc::clone(&lock);
        let taken = thread::spawn(move || other.try_lock().is_some())
            .join()
            .unwrap();
        assert!(taken);
    }

    #[test]
    fn test_admission_blocks_other_thread() {
        let lock = Arc::new(AdmissionLock::new(()));
        let counter = Arc::new(Mutex::new(Vec::new()));
        let guard = lock.lock();

        let handle = {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                let _guard = lock.lock();
                counter.lock().unwrap().push("other");
            })
        };

        thread::sleep(std::time::Duration::from_millis(20));
        counter.lock().unwrap().push("owner");
        drop(guard);
        handle.join().unwrap();

        assert_eq!(*counter.lock().unwrap(), vec!["owner", "other"]);
    }

    #[test]
    fn test_spin_lock_counts() {
        let lock = SpinLock::new();
        let first = lock.try_lock().unwrap();
        assert!(lock.try_lock().is_none());

        let second = lock.relock();
        drop(first);
        assert!(lock.is_locked());
        drop(second);
        assert!(!lock.is_locked());
        assert!(lock.try_lock().is_some());
    }
}
