//! One-time initialization.
//!
//! [`Once`] ensures that a function is executed exactly once across all
//! threads, with reentrancy detection. [`OnceUnchecked`] is the same
//! protocol with the deadlock and futex-error checks omitted, intended for
//! internal performance-critical paths where the caller has verified its
//! inputs.

use core::cell::Cell;

use crate::atomic::{AcqRel, Acquire, Atomic32, Release};
use crate::code::Code;
use crate::futex;

const INIT: u32 = 0;
const RUNNING: u32 = 1;
const DONE: u32 = 2;

thread_local! {
    // Address of the `Once` this thread is currently running the function
    // of, for reentrancy detection.
    static ACTIVE: Cell<usize> = Cell::new(0);
}

/// A one-time initialization primitive.
///
/// Ensures that a function is executed exactly once, even in the presence of
/// multiple threads. Useful for initializing global or shared resources.
/// Once the function has executed, subsequent calls return immediately.
///
/// This mechanism is intra-process only and cannot be shared between
/// processes.
#[derive(Debug, Default)]
pub struct Once {
    state: Atomic32,
}

impl Once {
    /// Creates a new `Once` in the initial state.
    pub const fn new() -> Once {
        Once {
            state: Atomic32::zero(),
        }
    }

    /// Executes `f` exactly once across all threads.
    ///
    /// The winning thread runs the function; every other caller blocks until
    /// it completes, then returns. Calls after completion are no-ops.
    ///
    /// # Errors
    /// - [`Code::THREAD_ERROR_DEADLOCK`]: `f` itself invoked this `Once`.
    /// - The wait errors of the futex layer.
    pub fn call(&self, f: fn()) -> Result<(), Code> {
        let self_addr = self as *const Once as usize;
        loop {
            let mut expected = INIT;
            if self
                .state
                .compare_exchange(&mut expected, RUNNING, AcqRel, Acquire)
            {
                ACTIVE.with(|active| active.set(self_addr));
                f();
                ACTIVE.with(|active| active.set(0));
                self.state.store(DONE, Release);
                futex::wake_all(&self.state)?;
                return Ok(());
            }
            match expected {
                DONE => return Ok(()),
                RUNNING => {
                    // The function recursing into its own once never
                    // completes; report it instead of sleeping forever.
                    if ACTIVE.with(|active| active.get()) == self_addr {
                        return Err(Code::THREAD_ERROR_DEADLOCK);
                    }
                    futex::wait(&self.state, RUNNING)?;
                }
                _ => return Err(Code::ERROR_STATE),
            }
        }
    }

    /// True if the function has run to completion.
    pub fn is_done(&self) -> bool {
        self.state.load(Acquire) == DONE
    }
}

/// An unchecked one-time initialization primitive.
///
/// The same protocol as [`Once`], with the reentrancy detection and
/// futex-error checks omitted: losers loop until the winner finishes, no
/// matter what. Only use this when the caller can guarantee correctness of
/// parameters and usage; prefer [`Once`] for general use.
#[derive(Debug, Default)]
pub struct OnceUnchecked {
    state: Atomic32,
}

impl OnceUnchecked {
    /// Creates a new `OnceUnchecked` in the initial state.
    pub const fn new() -> OnceUnchecked {
        OnceUnchecked {
            state: Atomic32::zero(),
        }
    }

    /// Executes `f` exactly once across all threads.
    pub fn call(&self, f: fn()) {
        loop {
            let mut expected = INIT;
            if self
                .state
                .compare_exchange(&mut expected, RUNNING, AcqRel, Acquire)
            {
                f();
                self.state.store(DONE, Release);
                let _ = futex::wake_all(&self.state);
                return;
            }
            match expected {
                DONE => return,
                _ => {
                    let _ = futex::wait(&self.state, RUNNING);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::atomic::{Atomic64, Relaxed};

    #[test]
    fn runs_exactly_once() {
        static ONCE: Once = Once::new();
        static CALLS: Atomic64 = Atomic64::zero();

        fn bump() {
            CALLS.fetch_add(1, AcqRel);
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        let threads = (0..16)
            .map(|_| std::thread::spawn(|| ONCE.call(bump).unwrap()))
            .collect::<Vec<_>>();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(CALLS.load(Relaxed), 1);
        assert!(ONCE.is_done());
    }

    #[test]
    fn reentry_is_a_deadlock_error() {
        static ONCE: Once = Once::new();
        static RESULT: Atomic64 = Atomic64::zero();

        fn recurse() {
            let code = ONCE.call(recurse).unwrap_err();
            RESULT.store(code.raw() as u64, Relaxed);
        }

        ONCE.call(recurse).unwrap();
        assert_eq!(
            RESULT.load(Relaxed) as i32,
            Code::THREAD_ERROR_DEADLOCK.raw()
        );
    }

    #[test]
    fn unchecked_runs_exactly_once() {
        static ONCE: OnceUnchecked = OnceUnchecked::new();
        static CALLS: Atomic64 = Atomic64::zero();

        fn bump() {
            CALLS.fetch_add(1, AcqRel);
        }

        let threads = (0..8)
            .map(|_| std::thread::spawn(|| ONCE.call(bump)))
            .collect::<Vec<_>>();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(CALLS.load(Relaxed), 1);
    }
}
