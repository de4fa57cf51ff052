//! The append-buffer lock: shared / exclusive / upgrade-in-place.
//!
//! `parking_lot::RwLock` only supports a single concurrent *upgradable*
//! reader, which cannot express "any of several concurrent appenders may
//! individually upgrade to exclusive when it hits a buffer boundary". This
//! is a count-of-shared + writer-waiting-flag + condvar primitive instead.
//!
//! Writer-preferring: once any exclusive acquirer (including an in-place
//! upgrade) starts waiting, no *new* shared acquisition is granted until it
//! has run, so flushers and scrollers are never starved by a steady stream
//! of new appenders.

use parking_lot::{Condvar, Mutex};

struct LockState {
    shared_count: u32,
    writer_active: bool,
    writer_waiting_count: u32,
}

/// The append-buffer's shared/exclusive/upgradable lock.
pub struct AppendBufferLock {
    state: Mutex<LockState>,
    cv: Condvar,
}

impl AppendBufferLock {
    pub fn new() -> AppendBufferLock {
        AppendBufferLock {
            state: Mutex::new(LockState {
                shared_count: 0,
                writer_active: false,
                writer_waiting_count: 0,
            }),
            cv: Condvar::new(),
        }
    }

    /// Acquire a shared (appender) hold. Blocks while an exclusive holder is
    /// active or waiting.
    pub fn acquire_shared(&self) -> SharedGuard<'_> {
        let mut state = self.state.lock();
        while state.writer_active || state.writer_waiting_count > 0 {
            self.cv.wait(&mut state);
        }
        state.shared_count += 1;
        SharedGuard { lock: self }
    }

    /// Acquire the exclusive (flush / truncate) hold. Blocks until every
    /// current shared holder has released.
    pub fn acquire_exclusive(&self) -> ExclusiveGuard<'_> {
        let mut state = self.state.lock();
        state.writer_waiting_count += 1;
        while state.writer_active || state.shared_count > 0 {
            self.cv.wait(&mut state);
        }
        state.writer_waiting_count -= 1;
        state.writer_active = true;
        ExclusiveGuard { lock: self }
    }
}

impl Default for AppendBufferLock {
    fn default() -> Self {
        AppendBufferLock::new()
    }
}

/// A held shared (appender) reference.
pub struct SharedGuard<'a> {
    lock: &'a AppendBufferLock,
}

impl<'a> SharedGuard<'a> {
    /// Upgrade this shared hold to exclusive in place, blocking until every
    /// *other* shared holder has released. Used when an appender's stream
    /// reaches the buffer boundary and must scroll.
    pub fn upgrade(self) -> ExclusiveGuard<'a> {
        let lock = self.lock;
        std::mem::forget(self);

        let mut state = lock.state.lock();
        state.writer_waiting_count += 1;
        state.shared_count -= 1;
        while state.writer_active || state.shared_count > 0 {
            lock.cv.wait(&mut state);
        }
        state.writer_waiting_count -= 1;
        state.writer_active = true;
        ExclusiveGuard { lock }
    }
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.shared_count -= 1;
        self.lock.cv.notify_all();
    }
}

/// A held exclusive (flush / truncate / scrolling-appender) reference.
pub struct ExclusiveGuard<'a> {
    lock: &'a AppendBufferLock,
}

impl<'a> ExclusiveGuard<'a> {
    /// Downgrade back to a shared hold in place and wake other waiters.
    /// Used once a scrolling appender's `scroll()` call completes.
    pub fn downgrade(self) -> SharedGuard<'a> {
        let lock = self.lock;
        std::mem::forget(self);

        let mut state = lock.state.lock();
        state.writer_active = false;
        state.shared_count += 1;
        lock.cv.notify_all();
        SharedGuard { lock }
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.writer_active = false;
        self.lock.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn multiple_shared_holders_coexist() {
        let lock = AppendBufferLock::new();
        let a = lock.acquire_shared();
        let b = lock.acquire_shared();
        drop(a);
        drop(b);
    }

    #[test]
    fn exclusive_excludes_shared() {
        let lock = Arc::new(AppendBufferLock::new());
        let concurrent = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            let concurrent = Arc::clone(&concurrent);
            let max_seen = Arc::clone(&max_seen);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    let _g = lock.acquire_shared();
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_micros(50));
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }
        {
            let lock = Arc::clone(&lock);
            let concurrent = Arc::clone(&concurrent);
            handles.push(thread::spawn(move || {
                for _ in 0..10 {
                    let _g = lock.acquire_exclusive();
                    assert_eq!(concurrent.load(Ordering::SeqCst), 0);
                    thread::sleep(Duration::from_micros(50));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn upgrade_then_downgrade_round_trips() {
        let lock = AppendBufferLock::new();
        let shared = lock.acquire_shared();
        let exclusive = shared.upgrade();
        let shared_again = exclusive.downgrade();
        drop(shared_again);
    }

    #[test]
    fn upgrade_waits_for_other_shared_holders() {
        let lock = Arc::new(AppendBufferLock::new());
        let other_released = Arc::new(AtomicU32::new(0));

        let a = lock.acquire_shared();
        let b = lock.acquire_shared();

        let lock2 = Arc::clone(&lock);
        let flag = Arc::clone(&other_released);
        let upgrader = thread::spawn(move || {
            let exclusive = lock2.acquire_exclusive();
            assert_eq!(flag.load(Ordering::SeqCst), 1);
            drop(exclusive);
        });

        thread::sleep(Duration::from_millis(20));
        drop(a);
        other_released.store(1, Ordering::SeqCst);
        drop(b);

        upgrader.join().unwrap();
    }
}
