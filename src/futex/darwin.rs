//! Use the undocumented `ulock_wait` and `ulock_wake` syscalls that are
//! available since MacOS 10.12 Sierra (Darwin 16.0).

use core::time::Duration;

use crate::atomic::Atomic32;
use crate::code::Code;
use crate::futex::WakeupReason;
use crate::utils::errno;

pub(super) fn wait(
    futex: &Atomic32,
    expected: u32,
    timeout: Option<Duration>,
) -> Result<WakeupReason, Code> {
    let ptr = futex.as_mut_ptr() as *mut libc::c_void;
    let timeout_us = convert_timeout_us(timeout);
    let r = unsafe { ulock_wait(UL_COMPARE_AND_WAIT, ptr, expected as u64, timeout_us) };
    if r >= 0 {
        // r is the number of threads waiting.
        Ok(WakeupReason::Unknown)
    } else if r == -1 {
        match errno() {
            libc::EINTR => Ok(WakeupReason::Interrupt),
            libc::ETIMEDOUT if timeout_us != 0 => Ok(WakeupReason::TimedOut),
            libc::EFAULT => Err(Code::ERROR_FORBIDDEN),
            libc::EINVAL => Err(Code::ERROR_INVALID),
            e => {
                debug_assert!(false, "Unexpected errno of ulock_wait syscall: {}", e);
                Err(Code::ERROR_OS)
            }
        }
    } else {
        debug_assert!(false, "Unexpected return value of ulock_wait syscall: {}", r);
        Err(Code::ERROR_OS)
    }
}

pub(super) fn wake(futex: &Atomic32, count: u32) -> Result<usize, Code> {
    let ptr = futex.as_mut_ptr() as *mut libc::c_void;
    if count > 1 {
        // `ulock_wake` has no wake-n operation, only wake-one and wake-all.
        let r = unsafe { ulock_wake(UL_COMPARE_AND_WAIT | ULF_WAKE_ALL, ptr, 0) };
        // The return value -1 with ENOENT means there were no threads
        // waiting. Libdispatch considers it a success, so lets do the same.
        if r == 0 || (r == -1 && errno() == libc::ENOENT) {
            return Ok(0); // `ulock_wake` does not report the number of woken threads.
        }
        debug_assert!(false, "Unexpected return value of ulock_wake syscall: {}", r);
        return Err(Code::ERROR_OS);
    }
    for woken in 0..count as usize {
        let r = unsafe { ulock_wake(UL_COMPARE_AND_WAIT, ptr, 0) };
        if r == -1 && errno() == libc::ENOENT {
            return Ok(woken); // No more threads waiting.
        }
        if r < 0 {
            debug_assert!(false, "Unexpected return value of ulock_wake syscall: {}", r);
            return Err(Code::ERROR_OS);
        }
    }
    Ok(count as usize)
}

const UL_COMPARE_AND_WAIT: u32 = 1;
const ULF_WAKE_ALL: u32 = 0x100;
#[allow(non_upper_case_globals)]
const SYS_ulock_wait: libc::c_int = 515;
#[allow(non_upper_case_globals)]
const SYS_ulock_wake: libc::c_int = 516;

// Only 32 bits of `addr` and `value` are used for comparison.
// `timeout` is specified in microseconds, with 0 for infinite.
unsafe fn ulock_wait(
    operation: u32,
    addr: *mut libc::c_void,
    value: u64,
    timeout: u32,
) -> libc::c_int {
    libc::syscall(SYS_ulock_wait, operation, addr, value, timeout)
}

// Operation must be the same as the one used for `ulock_wait`
// (`UL_COMPARE_AND_WAIT`), combined with a flag: 0 to wake one thread,
// `ULF_WAKE_ALL` to wake all waiters.
unsafe fn ulock_wake(operation: u32, addr: *mut libc::c_void, wake_value: u64) -> libc::c_int {
    libc::syscall(SYS_ulock_wake, operation, addr, wake_value)
}

// Timeout in microseconds, round nanosecond values up to microseconds.
fn convert_timeout_us(timeout: Option<Duration>) -> u32 {
    match timeout {
        None => 0,
        Some(duration) => duration
            .as_secs()
            .checked_mul(1_000_000)
            .and_then(|x| x.checked_add((duration.subsec_nanos() as u64 + 999) / 1000))
            .map(|us| {
                if us > u32::max_value() as u64 {
                    0
                } else if us == 0 {
                    // 0 means infinite here; a zero relative timeout still
                    // has to expire.
                    1
                } else {
                    us as u32
                }
            })
            .unwrap_or(0),
    }
}
