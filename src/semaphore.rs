//! A bounded counting semaphore.

use crate::atomic::{AcqRel, Atomic32, Relaxed};
use crate::code::Code;
use crate::futex;

/// A counting semaphore.
///
/// A semaphore maintains a non-negative count representing the number of
/// available resources, bounded by a maximum fixed at construction. Threads
/// may decrement the count by waiting on the semaphore, or increment it by
/// signaling.
///
/// Semaphores do not have ownership semantics: any thread may signal, and the
/// thread that signals need not be the one that previously waited.
///
/// This mechanism is intra-process only and cannot be shared between
/// processes.
///
/// # Warning
/// Semaphores do not provide mutual exclusion guarantees. Using a semaphore
/// as a mutex is discouraged; use a lock like [`Mutex`](crate::Mutex),
/// [`Qutex`](crate::Qutex) or [`RwLock`](crate::RwLock) instead.
#[derive(Debug)]
pub struct Semaphore {
    maximum: u32,
    count: Atomic32,
}

impl Semaphore {
    /// Creates a semaphore with the given maximum and initial count.
    ///
    /// The maximum is immutable after construction. An initial count above
    /// the maximum is clamped to it.
    pub const fn new(maximum: u32, initial: u32) -> Semaphore {
        Semaphore {
            maximum,
            count: Atomic32::new(if initial > maximum { maximum } else { initial }),
        }
    }

    /// Returns the maximum count.
    pub fn maximum(&self) -> u32 {
        self.maximum
    }

    /// Decrements the count, blocking while it is zero.
    ///
    /// # Errors
    /// - The wait errors of the futex layer.
    pub fn wait(&self) -> Result<(), Code> {
        loop {
            let mut current = self.count.load(Relaxed);
            while current > 0 {
                let desired = current - 1;
                if self
                    .count
                    .compare_exchange_weak(&mut current, desired, AcqRel, Relaxed)
                {
                    return Ok(());
                }
            }
            futex::wait(&self.count, 0)?;
        }
    }

    /// Attempts to decrement the count without blocking.
    ///
    /// Makes a single attempt.
    ///
    /// # Errors
    /// - [`Code::THREAD_INFO_BUSY`]: the count is zero, or another thread raced
    ///   this attempt.
    pub fn try_wait(&self) -> Result<(), Code> {
        let mut current = self.count.load(Relaxed);
        if current == 0 {
            return Err(Code::THREAD_INFO_BUSY);
        }
        let desired = current - 1;
        if self
            .count
            .compare_exchange(&mut current, desired, AcqRel, Relaxed)
        {
            Ok(())
        } else {
            Err(Code::THREAD_INFO_BUSY)
        }
    }

    /// Increments the count and wakes a waiting thread, if any.
    ///
    /// # Errors
    /// - [`Code::ERROR_OVERFLOW`]: the count is at its maximum; the semaphore
    ///   is unchanged.
    /// - The wake errors of the futex layer.
    pub fn signal(&self) -> Result<(), Code> {
        let mut current = self.count.load(Relaxed);
        loop {
            if current >= self.maximum {
                return Err(Code::ERROR_OVERFLOW);
            }
            let desired = current + 1;
            if self
                .count
                .compare_exchange_weak(&mut current, desired, AcqRel, Relaxed)
            {
                break;
            }
        }
        // Only a zero-to-one transition can have left threads asleep.
        if current == 0 {
            return futex::wake_next(&self.count);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sequential_signal_wait_is_a_no_op_on_count() {
        let semaphore = Semaphore::new(4, 2);
        semaphore.signal().unwrap();
        semaphore.wait().unwrap();
        assert_eq!(semaphore.count.load(Relaxed), 2);
    }

    #[test]
    fn signal_at_maximum_overflows() {
        let semaphore = Semaphore::new(1, 1);
        assert_eq!(semaphore.signal(), Err(Code::ERROR_OVERFLOW));
        assert_eq!(semaphore.count.load(Relaxed), 1);
    }

    #[test]
    fn try_wait_on_empty_reports_busy() {
        let semaphore = Semaphore::new(2, 0);
        assert_eq!(semaphore.try_wait(), Err(Code::THREAD_INFO_BUSY));
        semaphore.signal().unwrap();
        assert_eq!(semaphore.try_wait(), Ok(()));
    }

    #[test]
    fn initial_count_clamps_to_maximum() {
        let semaphore = Semaphore::new(3, 10);
        assert_eq!(semaphore.count.load(Relaxed), 3);
    }

    #[test]
    fn waiters_are_woken_by_signals() {
        use std::sync::Arc;

        let semaphore = Arc::new(Semaphore::new(16, 0));
        const THREADS: usize = 8;

        let waiters = (0..THREADS)
            .map(|_| {
                let semaphore = Arc::clone(&semaphore);
                std::thread::spawn(move || semaphore.wait().unwrap())
            })
            .collect::<Vec<_>>();
        // Every signal makes exactly one wait succeed.
        for _ in 0..THREADS {
            semaphore.signal().unwrap();
        }
        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(semaphore.count.load(Relaxed), 0);
    }
}
