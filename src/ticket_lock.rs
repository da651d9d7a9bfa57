//! A FIFO ticket lock.

use crate::atomic::{Acquire, Atomic32, Relaxed, Release};
use crate::code::Code;
use crate::hint;

/// A ticket lock for synchronizing access to shared resources in a fair,
/// FIFO manner.
///
/// Acquisition takes a ticket and busy-waits (with a pause hint) until the
/// serving counter reaches it; the thread is never suspended. Threads are
/// served strictly in ticket order.
///
/// This mechanism is intra-process only and cannot be shared between
/// processes.
#[derive(Debug, Default)]
pub struct TicketLock {
    next: Atomic32,
    current: Atomic32,
}

impl TicketLock {
    /// Creates a new, unlocked ticket lock.
    pub const fn new() -> TicketLock {
        TicketLock {
            next: Atomic32::zero(),
            current: Atomic32::zero(),
        }
    }

    /// Locks the ticket lock, busy-waiting until the caller's ticket is
    /// served.
    pub fn lock(&self) {
        let ticket = self.next.fetch_add(1, Relaxed);
        while self.current.load(Acquire) != ticket {
            hint::pause();
        }
    }

    /// Attempts to lock the ticket lock without waiting.
    ///
    /// Succeeds only if no other thread holds a ticket.
    ///
    /// # Errors
    /// - [`Code::THREAD_INFO_BUSY`]: the queue is not empty.
    pub fn try_lock(&self) -> Result<(), Code> {
        let mut ticket = self.next.load(Relaxed);
        let serving = self.current.load(Acquire);

        if ticket != serving {
            return Err(Code::THREAD_INFO_BUSY);
        }

        let next_ticket = ticket.wrapping_add(1);
        if self
            .next
            .compare_exchange(&mut ticket, next_ticket, Acquire, Relaxed)
        {
            Ok(())
        } else {
            Err(Code::THREAD_INFO_BUSY)
        }
    }

    /// Unlocks the ticket lock, serving the next ticket.
    pub fn unlock(&self) {
        self.current.fetch_add(1, Release);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn try_lock_reports_busy() {
        let lock = TicketLock::new();
        lock.lock();
        assert_eq!(lock.try_lock(), Err(Code::THREAD_INFO_BUSY));
        lock.unlock();
        assert_eq!(lock.try_lock(), Ok(()));
        lock.unlock();
    }

    #[test]
    fn tickets_wrap_around() {
        let lock = TicketLock::new();
        lock.next.store(u32::max_value(), Relaxed);
        lock.current.store(u32::max_value(), Relaxed);
        lock.lock();
        lock.unlock();
        assert_eq!(lock.try_lock(), Ok(()));
        lock.unlock();
    }

    #[test]
    fn excludes_concurrent_writers() {
        use crate::atomic::{Atomic64, Relaxed};
        use std::sync::Arc;

        let lock = Arc::new(TicketLock::new());
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
