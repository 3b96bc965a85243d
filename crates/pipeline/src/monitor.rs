//! The engine's single lock.
//!
//! One mutex guards all shared mutable state (wait-sets, pool bookkeeping,
//! session flags) and one condition variable carries every wake-up. Pool,
//! wait-set, and session logic never own a lock of their own; they are
//! plain data mutated through a guard obtained here.

use parking_lot::{Condvar, Mutex, MutexGuard};

pub struct Monitor<T> {
    state: Mutex<T>,
    cond: Condvar,
}

impl<T> Monitor<T> {
    pub fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            cond: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock()
    }

    /// Block until `ready` holds. `ready` is evaluated under the lock, so a
    /// notification sent after the state change cannot be missed.
    pub fn wait_until<F>(&self, guard: &mut MutexGuard<'_, T>, mut ready: F)
    where
        F: FnMut(&mut T) -> bool,
    {
        while !ready(&mut **guard) {
            self.cond.wait(guard);
        }
    }

    /// Whether any thread currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    pub fn notify_one(&self) {
        self.cond.notify_one();
    }

    pub fn notify_all(&self) {
        self.cond.notify_all();
    }
}

impl<T> std::fmt::Debug for Monitor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("locked", &self.state.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_until_returns_immediately_when_ready() {
        let monitor = Monitor::new(3u32);
        let mut guard = monitor.lock();
        monitor.wait_until(&mut guard, |n| *n == 3);
        assert_eq!(*guard, 3);
    }

    #[test]
    fn wait_until_wakes_on_notify() {
        let monitor = Arc::new(Monitor::new(false));
        let setter = Arc::clone(&monitor);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            *setter.lock() = true;
            setter.notify_one();
        });

        let mut guard = monitor.lock();
        monitor.wait_until(&mut guard, |flag| *flag);
        assert!(*guard);
        drop(guard);
        handle.join().unwrap();
    }

    #[test]
    fn spurious_notify_does_not_release_waiter() {
        let monitor = Arc::new(Monitor::new(0u32));
        let bumper = Arc::clone(&monitor);
        let handle = thread::spawn(move || {
            for _ in 0..3 {
                thread::sleep(Duration::from_millis(5));
                *bumper.lock() += 1;
                bumper.notify_all();
            }
        });

        let mut guard = monitor.lock();
        monitor.wait_until(&mut guard, |n| *n >= 3);
        assert_eq!(*guard, 3);
        drop(guard);
        handle.join().unwrap();
    }
}
