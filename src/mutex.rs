//! A non-recursive futex-based mutex.

use crate::atomic::{AcqRel, Acquire, Atomic32, Atomic64, Release};
use crate::code::Code;
use crate::condition::Condition;
use crate::futex;
use crate::tid::{self, ThreadId};
use crate::time;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

// TODO: Implement eventual fairness. If a thread has consecutively held a
// lock for more than 1 ms, the next transition must be fair.

/// A non-recursive mutex.
///
/// Ensures that only one thread can hold the lock at a time. Recursive
/// locking is not allowed; attempts to re-lock from the owning thread return
/// a deadlock error. Only managed threads (those holding a
/// [`ThreadId`](crate::ThreadId)) may use a mutex.
///
/// The lock remembers its owner: if `state` is not unlocked, `owner` holds
/// the identity of the unique thread permitted to unlock it.
///
/// # Warning
/// Closing a thread while it owns a mutex leaves the mutex in an undefined
/// state.
///
/// This mechanism is intra-process only and cannot be shared between
/// processes.
#[derive(Debug, Default)]
pub struct Mutex {
    owner: Atomic64,
    state: Atomic32,
}

impl Mutex {
    /// Creates a new, unlocked mutex.
    pub const fn new() -> Mutex {
        Mutex {
            owner: Atomic64::zero(),
            state: Atomic32::zero(),
        }
    }

    /// Locks the mutex, blocking the calling thread if necessary.
    ///
    /// # Errors
    /// - [`Code::ERROR_FORBIDDEN`]: the calling thread is unmanaged.
    /// - [`Code::THREAD_ERROR_DEADLOCK`]: the calling thread already owns the
    ///   mutex.
    /// - The wait errors of the futex layer.
    pub fn lock(&self) -> Result<(), Code> {
        if tid::is_self(ThreadId::NONE) {
            return Err(Code::ERROR_FORBIDDEN);
        }

        // Fast path where the lock isn't held.
        let mut expected = UNLOCKED;
        if self.state.compare_exchange(&mut expected, LOCKED, AcqRel, Acquire) {
            self.owner.store(tid::self_id().raw(), Release);
            return Ok(());
        }

        // Detect re-entrant deadlocks.
        if tid::is_self(ThreadId::from_raw(self.owner.load(Acquire))) {
            return Err(Code::THREAD_ERROR_DEADLOCK);
        }

        loop {
            let mut expected = LOCKED;
            let exchanged = self
                .state
                .compare_exchange(&mut expected, CONTENDED, AcqRel, Acquire);

            if exchanged || expected == CONTENDED {
                futex::wait(&self.state, CONTENDED)?;
            }

            // Acquire with CONTENDED, not LOCKED: the caller may be one of
            // several waiters, and the contended hint must survive so that
            // unlock keeps waking the rest.
            let mut expected = UNLOCKED;
            if self
                .state
                .compare_exchange(&mut expected, CONTENDED, AcqRel, Acquire)
            {
                break;
            }
        }

        self.owner.store(tid::self_id().raw(), Release);
        Ok(())
    }

    /// Locks the mutex, blocking up to the given timeout.
    ///
    /// The timeout is capped at [`time::max_timeout`] and the remaining
    /// budget is recomputed after every wakeup.
    ///
    /// # Errors
    /// - [`Code::THREAD_INFO_TIMEOUT`]: the lock could not be acquired within the
    ///   timeout; the mutex is unchanged.
    /// - The errors of [`lock`](Mutex::lock).
    pub fn timedlock(&self, nanoseconds: u64) -> Result<(), Code> {
        if tid::is_self(ThreadId::NONE) {
            return Err(Code::ERROR_FORBIDDEN);
        }

        let mut expected = UNLOCKED;
        if self.state.compare_exchange(&mut expected, LOCKED, AcqRel, Acquire) {
            self.owner.store(tid::self_id().raw(), Release);
            return Ok(());
        }

        if tid::is_self(ThreadId::from_raw(self.owner.load(Acquire))) {
            return Err(Code::THREAD_ERROR_DEADLOCK);
        }

        let nanoseconds = time::clamp_timeout(nanoseconds);
        let start = time::nanoseconds();
        let mut remaining = nanoseconds;

        loop {
            let mut expected = LOCKED;
            let exchanged = self
                .state
                .compare_exchange(&mut expected, CONTENDED, AcqRel, Acquire);

            if exchanged || expected == CONTENDED {
                futex::timedwait(&self.state, CONTENDED, remaining)?;

                // Adjust the remaining budget.
                let now = time::nanoseconds();
                if now - start >= nanoseconds {
                    return Err(Code::THREAD_INFO_TIMEOUT);
                }
                remaining = nanoseconds - (now - start);
            }

            let mut expected = UNLOCKED;
            if self
                .state
                .compare_exchange(&mut expected, CONTENDED, AcqRel, Acquire)
            {
                break;
            }
        }

        self.owner.store(tid::self_id().raw(), Release);
        Ok(())
    }

    /// Attempts to lock the mutex without blocking.
    ///
    /// # Errors
    /// - [`Code::THREAD_INFO_BUSY`]: the mutex is already locked.
    /// - [`Code::ERROR_FORBIDDEN`]: the calling thread is unmanaged.
    pub fn try_lock(&self) -> Result<(), Code> {
        if tid::is_self(ThreadId::NONE) {
            return Err(Code::ERROR_FORBIDDEN);
        }

        let mut expected = UNLOCKED;
        if self.state.compare_exchange(&mut expected, LOCKED, AcqRel, Acquire) {
            self.owner.store(tid::self_id().raw(), Release);
            return Ok(());
        }

        Err(Code::THREAD_INFO_BUSY)
    }

    /// Unlocks a previously locked mutex.
    ///
    /// # Errors
    /// - [`Code::ERROR_FORBIDDEN`]: the mutex is not owned by the calling
    ///   thread.
    /// - The wake errors of the futex layer.
    pub fn unlock(&self) -> Result<(), Code> {
        // An unmanaged thread is never an owner, but its identity of zero
        // would match the owner field of an unlocked mutex.
        if tid::is_self(ThreadId::NONE) {
            return Err(Code::ERROR_FORBIDDEN);
        }

        // Only the owner is ever allowed to mutate the owner field.
        let mut expected = tid::self_id().raw();
        if !self
            .owner
            .compare_exchange(&mut expected, ThreadId::NONE.raw(), AcqRel, Acquire)
        {
            return Err(Code::ERROR_FORBIDDEN);
        }

        let old_state = self.state.exchange(UNLOCKED, Release);
        if old_state == CONTENDED {
            return futex::wake_next(&self.state);
        }

        Ok(())
    }

    /// Waits on a condition variable while holding the mutex.
    ///
    /// The calling thread must hold the mutex. The mutex is released while
    /// waiting and re-acquired before returning; any wait error is surfaced
    /// only after the re-lock has been attempted.
    ///
    /// Spurious wakeups are possible; always re-check the associated
    /// predicate.
    ///
    /// # Errors
    /// - [`Code::ERROR_FORBIDDEN`]: the calling thread is unmanaged, or does
    ///   not own the mutex.
    /// - Any error of [`unlock`](Mutex::unlock), [`lock`](Mutex::lock) or the
    ///   futex wait.
    pub fn wait(&self, condition: &Condition) -> Result<(), Code> {
        use crate::atomic::Relaxed;

        if tid::is_self(ThreadId::NONE) {
            return Err(Code::ERROR_FORBIDDEN);
        }

        // Sample the generation before releasing the mutex; a signal between
        // the unlock and the wait changes the generation, and the wait then
        // returns immediately instead of losing the wakeup.
        let expected = condition.generation.load(Relaxed);

        self.unlock()?;
        let wait_result = futex::wait(&condition.generation, expected);
        self.lock()?;

        wait_result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::atomic::Relaxed;
    use crate::tid;

    fn with_identity(index: u32, f: impl FnOnce()) {
        tid::assign_worker(index).unwrap();
        f();
        tid::clear();
    }

    #[test]
    fn lock_unlock_round_trip() {
        let worker = std::thread::spawn(|| {
            with_identity(12, || {
                let mutex = Mutex::new();
                mutex.lock().unwrap();
                assert_eq!(mutex.owner.load(Relaxed), tid::self_id().raw());
                assert_eq!(mutex.state.load(Relaxed), LOCKED);
                mutex.unlock().unwrap();
                assert_eq!(mutex.owner.load(Relaxed), 0);
                assert_eq!(mutex.state.load(Relaxed), UNLOCKED);
            });
        });
        worker.join().unwrap();
    }

    #[test]
    fn relock_is_a_deadlock_error() {
        let worker = std::thread::spawn(|| {
            with_identity(13, || {
                let mutex = Mutex::new();
                mutex.lock().unwrap();
                assert_eq!(mutex.lock(), Err(Code::THREAD_ERROR_DEADLOCK));
                assert_eq!(mutex.timedlock(1000), Err(Code::THREAD_ERROR_DEADLOCK));
                mutex.unlock().unwrap();
            });
        });
        worker.join().unwrap();
    }

    #[test]
    fn try_lock_reports_busy() {
        static MUTEX: Mutex = Mutex::new();
        let holder = std::thread::spawn(|| {
            with_identity(14, || {
                MUTEX.lock().unwrap();
                let prober = std::thread::spawn(|| {
                    with_identity(15, || {
                        assert_eq!(MUTEX.try_lock(), Err(Code::THREAD_INFO_BUSY));
                        // A non-owner may not unlock.
                        assert_eq!(MUTEX.unlock(), Err(Code::ERROR_FORBIDDEN));
                    });
                });
                prober.join().unwrap();
                MUTEX.unlock().unwrap();
            });
        });
        holder.join().unwrap();
    }

    #[test]
    fn timedlock_expires_under_contention() {
        static MUTEX: Mutex = Mutex::new();
        let holder = std::thread::spawn(|| {
            with_identity(16, || {
                MUTEX.lock().unwrap();
                let waiter = std::thread::spawn(|| {
                    with_identity(17, || {
                        let r = MUTEX.timedlock(5 * crate::time::NSEC_PER_MSEC);
                        assert_eq!(r, Err(Code::THREAD_INFO_TIMEOUT));
                    });
                });
                waiter.join().unwrap();
                MUTEX.unlock().unwrap();
            });
        });
        holder.join().unwrap();
    }

    #[test]
    fn unmanaged_threads_are_rejected() {
        let mutex = Mutex::new();
        assert_eq!(mutex.lock(), Err(Code::ERROR_FORBIDDEN));
        assert_eq!(mutex.try_lock(), Err(Code::ERROR_FORBIDDEN));
        assert_eq!(mutex.unlock(), Err(Code::ERROR_FORBIDDEN));
    }
}
