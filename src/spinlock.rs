//! A busy-waiting spinlock.

use crate::atomic::{Acquire, Atomic32, Relaxed, Release};
use crate::code::Code;
use crate::hint;

/// A spinlock for synchronizing access to shared resources.
///
/// Acquisition busy-waits with a pause hint between attempts; the thread is
/// never suspended. Suitable only for critical sections that are short and
/// never block.
///
/// This mechanism is intra-process only and cannot be shared between
/// processes.
#[derive(Debug, Default)]
pub struct SpinLock {
    lock: Atomic32,
}

impl SpinLock {
    /// Creates a new, unlocked spinlock.
    pub const fn new() -> SpinLock {
        SpinLock {
            lock: Atomic32::zero(),
        }
    }

    /// Locks the spinlock, busy-waiting until it is acquired.
    pub fn lock(&self) {
        let mut expected = 0;
        while !self.lock.compare_exchange(&mut expected, 1, Acquire, Relaxed) {
            expected = 0;
            hint::pause();
        }
    }

    /// Attempts to lock the spinlock without spinning.
    ///
    /// # Errors
    /// - [`Code::THREAD_INFO_BUSY`]: the spinlock is held by another thread.
    pub fn try_lock(&self) -> Result<(), Code> {
        let mut expected = 0;
        if self.lock.compare_exchange(&mut expected, 1, Acquire, Relaxed) {
            Ok(())
        } else {
            Err(Code::THREAD_INFO_BUSY)
        }
    }

    /// Unlocks the spinlock.
    pub fn unlock(&self) {
        self.lock.store(0, Release);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn try_lock_reports_busy() {
        let lock = SpinLock::new();
        lock.lock();
        assert_eq!(lock.try_lock(), Err(Code::THREAD_INFO_BUSY));
        lock.unlock();
        assert_eq!(lock.try_lock(), Ok(()));
        lock.unlock();
    }

    #[test]
    fn excludes_concurrent_writers() {
        use crate::atomic::{Atomic64, Relaxed};
        use std::sync::Arc;

        let lock = Arc::new(SpinLock::new());
        let counter = Arc::new(Atomic64::zero());
        const THREADS: usize = 4;
        const ROUNDS: u64 = 50_000;

        let threads = (0..THREADS)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        lock.lock();
                        let value = counter.load(Relaxed);
                        counter.store(value + 1, Relaxed);
                        lock.unlock();
                    }
                })
            })
            .collect::<Vec<_>>();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(counter.load(Relaxed), THREADS as u64 * ROUNDS);
    }
}
