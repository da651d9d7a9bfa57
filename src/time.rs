//! Process-relative monotonic clock.
//!
//! All blocking primitives in this crate measure timeouts against this clock.
//! [`init`] establishes the reference instant (approximately the time the
//! runtime was initialized); [`nanoseconds`] returns the elapsed nanoseconds
//! since that reference and is non-decreasing across all threads. Timeouts
//! above [`MAX_TIMEOUT`] are clamped silently.

use core::time::Duration;

use crate::atomic::{AcqRel, Acquire, Atomic32, Atomic64, Release};
use crate::code::Code;

pub const NSEC_PER_SEC: u64 = 1_000_000_000;
pub const NSEC_PER_MSEC: u64 = 1_000_000;

/// Maximum blocking timeout in nanoseconds: one hour.
pub const MAX_TIMEOUT: u64 = 3600 * NSEC_PER_SEC;

const UNINITIALIZED: u32 = 0;
const INITIALIZING: u32 = 1;
const INITIALIZED: u32 = 2;

static STATE: Atomic32 = Atomic32::zero();
static REFERENCE: Atomic64 = Atomic64::zero();

/// Establishes the reference instant for [`nanoseconds`].
///
/// # Errors
/// - [`Code::FATAL_TIMER`] if no sufficiently monotonic OS clock is
///   available.
/// - [`Code::ERROR_INIT`] if the timer was already initialized.
pub fn init() -> Result<(), Code> {
    let mut expected = UNINITIALIZED;
    if !STATE.compare_exchange(&mut expected, INITIALIZING, AcqRel, Acquire) {
        return Err(Code::ERROR_INIT);
    }
    match raw_monotonic() {
        Some(now) => {
            REFERENCE.store(now, Release);
            STATE.store(INITIALIZED, Release);
            Ok(())
        }
        None => {
            STATE.store(UNINITIALIZED, Release);
            Err(Code::FATAL_TIMER)
        }
    }
}

/// Returns the elapsed nanoseconds since the reference instant.
///
/// Non-decreasing across all threads. Before [`init`] the reference is the
/// clock's own epoch (boot on most platforms); the value is still monotonic,
/// just not process-relative.
pub fn nanoseconds() -> u64 {
    // A failing monotonic read after a successful init does not happen on the
    // supported platforms.
    let now = raw_monotonic().unwrap_or(0);
    now.saturating_sub(REFERENCE.load(Acquire))
}

/// Returns the maximum allowed timeout for wait functions in nanoseconds.
pub fn max_timeout() -> u64 {
    MAX_TIMEOUT
}

/// Returns the elapsed time between two timestamps in seconds.
///
/// Negative if `time_end < time_start`.
pub fn delta(time_start: u64, time_end: u64) -> f64 {
    let delta = time_end.wrapping_sub(time_start) as i64;
    delta as f64 / 1e9
}

/// Clamps a timeout to [`MAX_TIMEOUT`].
pub(crate) fn clamp_timeout(nanoseconds: u64) -> u64 {
    if nanoseconds > MAX_TIMEOUT {
        MAX_TIMEOUT
    } else {
        nanoseconds
    }
}

/// Converts a clamped timeout to the `Duration` handed to the futex
/// backends, which turn it into the native representation (`timespec`,
/// microseconds or milliseconds).
pub(crate) fn to_timeout(nanoseconds: u64) -> Duration {
    Duration::from_nanos(clamp_timeout(nanoseconds))
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        fn raw_monotonic() -> Option<u64> {
            let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
            let r = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
            if r != 0 {
                return None;
            }
            Some(ts.tv_sec as u64 * NSEC_PER_SEC + ts.tv_nsec as u64)
        }
    } else if #[cfg(windows)] {
        use winapi::um::profileapi::{QueryPerformanceCounter, QueryPerformanceFrequency};
        use winapi::um::winnt::LARGE_INTEGER;

        fn raw_monotonic() -> Option<u64> {
            unsafe {
                let mut frequency: LARGE_INTEGER = core::mem::zeroed();
                let mut counter: LARGE_INTEGER = core::mem::zeroed();
                if QueryPerformanceFrequency(&mut frequency) == 0 {
                    return None;
                }
                if QueryPerformanceCounter(&mut counter) == 0 {
                    return None;
                }
                let frequency = *frequency.QuadPart() as u128;
                let counter = *counter.QuadPart() as u128;
                if frequency == 0 {
                    return None;
                }
                Some((counter * NSEC_PER_SEC as u128 / frequency) as u64)
            }
        }
    }
}
