//! Condition variables.
//!
//! Condition variables allow threads to wait for arbitrary conditions to
//! become true while releasing an associated [`Mutex`](crate::Mutex). A
//! waiting thread atomically releases the mutex and suspends execution until
//! it is signaled, then re-acquires the mutex before returning; see
//! [`Mutex::wait`](crate::Mutex::wait).
//!
//! Condition variables do not carry state. A signal or broadcast has no
//! effect if no threads are waiting at the time it is issued.
//!
//! All waits may experience spurious wakeups. Callers must always re-check
//! the associated condition predicate after waking.
//!
//! This mechanism is intra-process only and cannot be shared between
//! processes.

use crate::atomic::{Atomic32, Release};
use crate::code::Code;
use crate::futex;
use crate::tid::{self, ThreadId};

/// A condition variable.
///
/// The only state is a generation counter; signaling increments it, waiters
/// sample it before releasing their mutex and sleep on it. The counter
/// wrapping around is harmless: a waiter that observes a stale generation
/// simply returns and re-checks its predicate.
#[derive(Debug, Default)]
pub struct Condition {
    pub(crate) generation: Atomic32,
}

impl Condition {
    /// Creates a new condition variable.
    pub const fn new() -> Condition {
        Condition {
            generation: Atomic32::zero(),
        }
    }

    /// Wakes one thread waiting on the condition variable.
    ///
    /// If multiple threads are waiting, only one is guaranteed to be woken.
    ///
    /// # Errors
    /// - [`Code::ERROR_FORBIDDEN`] if the calling thread is unmanaged.
    /// - The wake errors of the futex layer.
    pub fn signal(&self) -> Result<(), Code> {
        if tid::is_self(ThreadId::NONE) {
            return Err(Code::ERROR_FORBIDDEN);
        }
        self.generation.fetch_add(1, Release);
        futex::wake_next(&self.generation)
    }

    /// Wakes all threads waiting on the condition variable.
    ///
    /// # Errors
    /// - [`Code::ERROR_FORBIDDEN`] if the calling thread is unmanaged.
    /// - The wake errors of the futex layer.
    pub fn broadcast(&self) -> Result<(), Code> {
        if tid::is_self(ThreadId::NONE) {
            return Err(Code::ERROR_FORBIDDEN);
        }
        self.generation.fetch_add(1, Release);
        futex::wake_all(&self.generation)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::atomic::Relaxed;
    use crate::tid;

    #[test]
    fn signal_without_waiters_is_harmless() {
        let worker = std::thread::spawn(|| {
            tid::assign_worker(40).unwrap();
            let condition = Condition::new();
            condition.signal().unwrap();
            condition.broadcast().unwrap();
            assert_eq!(condition.generation.load(Relaxed), 2);
            tid::clear();
        });
        worker.join().unwrap();
    }

    #[test]
    fn unmanaged_threads_may_not_signal() {
        let condition = Condition::new();
        assert_eq!(condition.signal(), Err(Code::ERROR_FORBIDDEN));
        assert_eq!(condition.broadcast(), Err(Code::ERROR_FORBIDDEN));
    }
}
