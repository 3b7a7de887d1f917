//! Scheduling priority hook
//!
//! The dispatcher runs each request at the priority of the thread that
//! submitted it, then drops back to its own baseline. How a priority maps
//! onto the platform scheduler is up to the [`Scheduler`] implementation;
//! [`ThreadPriorities`] only keeps a per-thread value.

use std::cell::Cell;

/// Scheduling priority, higher is more urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub u32);

/// Reads and changes the calling thread's priority
pub trait Scheduler: Send + Sync {
    /// Priority of the calling thread
    fn current_priority(&self) -> Priority;

    /// Change the priority of the calling thread
    fn set_current_priority(&self, priority: Priority);
}

thread_local! {
    static CURRENT: Cell<Priority> = const { Cell::new(Priority(0)) };
}

/// Default scheduler: a thread-local priority value with no OS effect
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPriorities;

impl Scheduler for ThreadPriorities {
    fn current_priority(&self) -> Priority {
        CURRENT.with(Cell::get)
    }

    fn set_current_priority(&self, priority: Priority) {
        CURRENT.with(|p| p.set(priority));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_is_per_thread() {
        let scheduler = ThreadPriorities;
        scheduler.set_current_priority(Priority(9));

        let other = std::thread::spawn(move || scheduler.current_priority())
            .join()
            .unwrap();

        assert_eq!(other, Priority(0));
        assert_eq!(scheduler.current_priority(), Priority(9));
    }
}
