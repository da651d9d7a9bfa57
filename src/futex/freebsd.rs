use core::cmp;
use core::mem;
use core::ptr;
use core::time::Duration;

use crate::atomic::Atomic32;
use crate::code::Code;
use crate::futex::WakeupReason;
use crate::utils::errno;

// FreeBSD can take and compare a `usize` value when used with the
// `UMTX_OP_WAIT` and `UMTX_OP_WAKE` operations. But we want to be good
// citizens and use `UMTX_OP_WAIT_UINT_PRIVATE` and `UMTX_OP_WAKE_PRIVATE`,
// which allow the kernel to maintain a process-private queue of waiting
// threads. This has the nice side effect that it operates on 32 bits, which
// makes it similar to futex implementations on other platforms.

pub(super) fn wait(
    futex: &Atomic32,
    expected: u32,
    timeout: Option<Duration>,
) -> Result<WakeupReason, Code> {
    let ptr = futex.as_mut_ptr() as *mut libc::c_void;
    let mut ts = convert_timeout(timeout);
    let ts_size = ts
        .as_ref()
        .map(|_| mem::size_of::<umtx_time>())
        .unwrap_or(0);
    let ts_ptr = ts
        .as_mut()
        .map(|ts_ref| ts_ref as *mut umtx_time as *mut libc::c_void)
        .unwrap_or(ptr::null_mut());
    let r = unsafe {
        umtx_op(
            ptr,
            UMTX_OP_WAIT_UINT_PRIVATE,
            expected as libc::c_long,
            ts_size as *mut libc::c_void,
            ts_ptr,
        )
    };
    match r {
        0 => Ok(WakeupReason::Unknown), // Can be NoMatch, WokenUp and Spurious
        -1 => match errno() {
            libc::EINTR => Ok(WakeupReason::Interrupt),
            libc::ETIMEDOUT if ts.is_some() => Ok(WakeupReason::TimedOut),
            libc::EFAULT => Err(Code::ERROR_FORBIDDEN),
            libc::EINVAL => Err(Code::ERROR_INVALID),
            e => {
                debug_assert!(false, "Unexpected errno of umtx_op syscall: {}", e);
                Err(Code::ERROR_OS)
            }
        },
        r => {
            debug_assert!(false, "Unexpected return value of umtx_op syscall: {}", r);
            Err(Code::ERROR_OS)
        }
    }
}

pub(super) fn wake(futex: &Atomic32, count: u32) -> Result<usize, Code> {
    let ptr = futex.as_mut_ptr() as *mut libc::c_void;
    let wake_count = cmp::min(count, i32::max_value() as u32) as libc::c_long;
    let r = unsafe {
        umtx_op(
            ptr,
            UMTX_OP_WAKE_PRIVATE,
            wake_count,
            ptr::null_mut(),
            ptr::null_mut(),
        )
    };
    match r {
        r if r >= 0 => Ok(r as usize),
        _ => match errno() {
            libc::EFAULT => Err(Code::ERROR_FORBIDDEN),
            libc::EINVAL => Err(Code::ERROR_INVALID),
            e => {
                debug_assert!(false, "Unexpected errno of umtx_op syscall: {}", e);
                Err(Code::ERROR_OS)
            }
        },
    }
}

const SYS__UMTX_OP: i32 = 454;
const UMTX_OP_WAIT_UINT_PRIVATE: libc::c_int = 15;
const UMTX_OP_WAKE_PRIVATE: libc::c_int = 16;

unsafe fn umtx_op(
    obj: *mut libc::c_void,
    op: libc::c_int,
    val: libc::c_long,
    uaddr: *mut libc::c_void,
    uaddr2: *mut libc::c_void, // *mut timespec or *mut umtx_time
) -> libc::c_int {
    libc::syscall(SYS__UMTX_OP, obj, op, val, uaddr, uaddr2)
}

// There is an old and a new way to use timeouts with umtx-wait. The old way
// was to pass a `libc::timespec` pointer in `uaddr2`, and leave `uaddr` NULL.
// Since 2012 we can pass a pointer to an `umtx_time` struct in `uaddr2`, and
// pass the size of that struct in `uaddr` (casted as if it is a pointer) to
// indicate we use the new interface.
//
// Since FreeBSD 10.0 it must be used in order to keep using CLOCK_MONOTONIC
// instead of the new default CLOCK_REALTIME.
#[repr(C)]
struct umtx_time {
    timeout: libc::timespec,
    flags: i32, // UMTX_ABSTIME would make the timeout absolute
    clockid: i32,
}

fn convert_timeout(timeout: Option<Duration>) -> Option<umtx_time> {
    match timeout {
        Some(duration) => {
            if duration.as_secs() > libc::time_t::max_value() as u64 {
                return None;
            }
            Some(umtx_time {
                timeout: libc::timespec {
                    tv_sec: duration.as_secs() as libc::time_t,
                    tv_nsec: duration.subsec_nanos() as libc::c_long,
                },
                flags: 0,
                clockid: libc::CLOCK_MONOTONIC,
            })
        }
        None => None,
    }
}
