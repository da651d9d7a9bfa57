use core::cmp;
use core::ptr;
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
    let ptr = futex.as_mut_ptr() as *mut i32;
    let ts = convert_timeout(timeout);
    let ts_ptr = ts
        .as_ref()
        .map(|ts_ref| ts_ref as *const _)
        .unwrap_or(ptr::null());
    let r = unsafe {
        syscall_futex(
            ptr,
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected as i32,
            ts_ptr,
            ptr::null_mut(),
            0,
        )
    };
    match r {
        0 => Ok(WakeupReason::Unknown),
        -1 => match errno() {
            libc::EAGAIN => Ok(WakeupReason::NoMatch),
            libc::EINTR => Ok(WakeupReason::Interrupt),
            libc::ETIMEDOUT if ts.is_some() => Ok(WakeupReason::TimedOut),
            libc::EFAULT => Err(Code::ERROR_FORBIDDEN),
            libc::EINVAL => Err(Code::ERROR_INVALID),
            e => {
                debug_assert!(false, "Unexpected errno of futex_wait syscall: {}", e);
                Err(Code::ERROR_OS)
            }
        },
        r => {
            debug_assert!(false, "Unexpected return value of futex_wait syscall: {}", r);
            Err(Code::ERROR_OS)
        }
    }
}

pub(super) fn wake(futex: &Atomic32, count: u32) -> Result<usize, Code> {
    let ptr = futex.as_mut_ptr() as *mut i32;
    let wake_count = cmp::min(count, i32::max_value() as u32) as i32;
    let r = unsafe {
        syscall_futex(
            ptr,
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            wake_count,
            ptr::null(),
            ptr::null_mut(),
            0,
        )
    };
    match r {
        r if r >= 0 => Ok(r as usize),
        _ => match errno() {
            libc::EFAULT => Err(Code::ERROR_FORBIDDEN),
            libc::EINVAL => Err(Code::ERROR_INVALID),
            e => {
                debug_assert!(false, "Unexpected errno of futex_wake syscall: {}", e);
                Err(Code::ERROR_OS)
            }
        },
    }
}

unsafe fn syscall_futex(
    uaddr: *mut libc::c_int,
    futex_op: libc::c_int,
    val: libc::c_int,
    timeout: *const libc::timespec,
    uaddr2: *mut libc::c_void,
    val3: libc::c_int,
) -> libc::c_long {
    libc::syscall(libc::SYS_futex, uaddr, futex_op, val, timeout, uaddr2, val3)
}

// x32 Linux uses a non-standard type for tv_nsec in timespec.
// See https://sourceware.org/bugzilla/show_bug.cgi?id=16437
#[cfg(all(target_arch = "x86_64", target_pointer_width = "32"))]
#[allow(non_camel_case_types)]
type tv_nsec_t = i64;
#[cfg(not(all(target_arch = "x86_64", target_pointer_width = "32")))]
#[allow(non_camel_case_types)]
type tv_nsec_t = libc::c_long;

fn convert_timeout(timeout: Option<Duration>) -> Option<libc::timespec> {
    match timeout {
        Some(duration) => {
            if duration.as_secs() > libc::time_t::max_value() as u64 {
                return None;
            }
            Some(libc::timespec {
                tv_sec: duration.as_secs() as libc::time_t,
                tv_nsec: duration.subsec_nanos() as tv_nsec_t,
            })
        }
        None => None,
    }
}
