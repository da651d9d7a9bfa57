//! Compare-and-sleep on a 32-bit atomic cell.
//!
//! A futex has no state beyond the value of its cell. [`wait`] atomically
//! compares the cell to an expected value and suspends the caller while they
//! match; [`wake`] and friends wake suspended threads. Spurious wakeups are
//! permitted on every platform, so callers must re-check their predicate
//! after any return.
//!
//! Wake order is unspecified and fairness is not guaranteed at this layer;
//! the primitives built on top provide their own ordering where they promise
//! it.
//
// Note on futexes: the kernel maintains a queue of threads waiting on the
// address of the atomic integer. The cell must stay process-private; all
// backends use the private-queue variant of their syscall where one exists.

use crate::atomic::Atomic32;
use crate::code::Code;
use crate::time;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod linux;
        use self::linux as imp;
    } else if #[cfg(any(target_os = "macos", target_os = "ios"))] {
        mod darwin;
        use self::darwin as imp;
    } else if #[cfg(target_os = "freebsd")] {
        mod freebsd;
        use self::freebsd as imp;
    } else if #[cfg(windows)] {
        mod windows;
        use self::windows as imp;
    } else {
        compile_error!("no futex backend for this platform");
    }
}

/// Reason the operating system provided for waking up a thread. Because of
/// the limited guarantees of some platforms, this is mostly useful to detect
/// a timeout; everything else collapses into "re-check the cell".
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WakeupReason {
    /// Thread did not get parked, because the expected value did not match.
    /// Not all operating systems report this case.
    NoMatch,
    /// Thread got woken up because its timeout expired.
    TimedOut,
    /// Thread got woken up because of an interrupt.
    Interrupt,
    /// Thread may have been woken up by a `wake` call, but it may also have
    /// been for other reasons.
    Unknown,
}

/// Waits on `futex` until its value changes.
///
/// Atomically compares the cell with `expected`; if they are equal the
/// calling thread may be suspended until another thread wakes the cell. If
/// the value differs, returns immediately.
///
/// The caller must always re-check the cell after this returns, as spurious
/// wakeups are possible.
///
/// # Errors
/// - [`Code::ERROR_FORBIDDEN`]: the cell's address cannot be accessed.
/// - [`Code::ERROR_INVALID`]: invalid address or parameters.
/// - [`Code::ERROR_OS`]: other OS-level failure.
pub fn wait(futex: &Atomic32, expected: u32) -> Result<(), Code> {
    imp::wait(futex, expected, None).map(|_| ())
}

/// Waits on `futex` until its value changes or the timeout expires.
///
/// As [`wait`], with a relative timeout in nanoseconds. Timeouts are capped
/// at [`time::max_timeout`]. A timeout of zero returns immediately with
/// [`Code::THREAD_INFO_TIMEOUT`] when the value still matches.
///
/// # Errors
/// - [`Code::THREAD_INFO_TIMEOUT`]: the wait timed out.
/// - The errors of [`wait`].
pub fn timedwait(futex: &Atomic32, expected: u32, nanoseconds: u64) -> Result<(), Code> {
    let timeout = time::to_timeout(nanoseconds);
    match imp::wait(futex, expected, Some(timeout))? {
        WakeupReason::TimedOut => Err(Code::THREAD_INFO_TIMEOUT),
        _ => Ok(()),
    }
}

/// Wakes up to `count` threads waiting on `futex`.
///
/// The cell's value is not modified. Waking threads does not guarantee
/// immediate execution, and no ordering or fairness is provided.
///
/// On Windows a count greater than one wakes all waiters; the native API has
/// no wake-n operation.
pub fn wake(futex: &Atomic32, count: u32) -> Result<(), Code> {
    imp::wake(futex, count).map(|_| ())
}

/// Wakes a single thread waiting on `futex`.
///
/// Equivalent to [`wake`] with a count of one.
pub fn wake_next(futex: &Atomic32) -> Result<(), Code> {
    imp::wake(futex, 1).map(|_| ())
}

/// Wakes all threads waiting on `futex`.
pub fn wake_all(futex: &Atomic32) -> Result<(), Code> {
    imp::wake(futex, u32::max_value()).map(|_| ())
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering::{Relaxed, Release};
    use std::thread::spawn;

    use super::*;
    use crate::atomic::Atomic32;

    #[test]
    // This test will hang if it does not check the cell value.
    fn wait_checks_value() {
        let futex = Atomic32::new(0);
        wait(&futex, 1).unwrap();
    }

    #[test]
    // Panics if it is able to observe changes made by another thread while it
    // should be waiting. May fail on a spurious wakeup.
    fn wait_and_wake() {
        const PREPARING: u32 = 0;
        const PARKED: u32 = 1;
        const UNPARKED: u32 = 2;
        static FUTEX: Atomic32 = Atomic32::zero();
        static OTHER: Atomic32 = Atomic32::zero();

        let waker = spawn(|| {
            while FUTEX.load(Relaxed) == PREPARING {}
            for i in 1..1001 {
                OTHER.store(i, Relaxed);
            }
            FUTEX.store(UNPARKED, Release);
            wake_all(&FUTEX).unwrap();
        });

        FUTEX.store(PARKED, Relaxed);
        while FUTEX.load(Relaxed) == PARKED {
            wait(&FUTEX, PARKED).unwrap();
        }
        assert_eq!(FUTEX.load(Relaxed), UNPARKED);
        assert_eq!(OTHER.load(Relaxed), 1000);
        waker.join().unwrap();
    }

    #[test]
    // This test will hang if it does not wake from a timeout.
    fn wakes_from_timeout() {
        let futex = Atomic32::new(0);
        let result = timedwait(&futex, 0, 10 * crate::time::NSEC_PER_MSEC);
        assert_eq!(result, Err(Code::THREAD_INFO_TIMEOUT));
    }

    #[test]
    fn zero_timeout_reports_timeout() {
        let futex = Atomic32::new(3);
        assert_eq!(timedwait(&futex, 3, 0), Err(Code::THREAD_INFO_TIMEOUT));
        // A non-matching value returns without a timeout code.
        assert_eq!(timedwait(&futex, 4, 0), Ok(()));
    }
}
