#![allow(non_snake_case)]

use core::mem;
use core::time::Duration;

use winapi::shared::minwindef::{DWORD, TRUE};
use winapi::shared::winerror::ERROR_TIMEOUT;
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::synchapi::{WaitOnAddress, WakeByAddressAll, WakeByAddressSingle};
use winapi::um::winbase::INFINITE;
use winapi::um::winnt::PVOID;

use crate::atomic::Atomic32;
use crate::code::Code;
use crate::futex::WakeupReason;

pub(super) fn wait(
    futex: &Atomic32,
    expected: u32,
    timeout: Option<Duration>,
) -> Result<WakeupReason, Code> {
    let address = futex.as_mut_ptr() as PVOID;
    let compare_address = &expected as *const u32 as PVOID;
    let ms = convert_timeout_ms(timeout);
    let r = unsafe { WaitOnAddress(address, compare_address, mem::size_of::<u32>(), ms) };
    if r == TRUE {
        Ok(WakeupReason::Unknown) // Can be any reason except TimedOut
    } else {
        match unsafe { GetLastError() } {
            ERROR_TIMEOUT if ms != INFINITE => Ok(WakeupReason::TimedOut),
            e => {
                debug_assert!(false, "Unexpected error of WaitOnAddress call: {}", e);
                Err(Code::ERROR_OS)
            }
        }
    }
}

pub(super) fn wake(futex: &Atomic32, count: u32) -> Result<usize, Code> {
    let address = futex.as_mut_ptr() as PVOID;
    // There is no wake-n operation; a count above one wakes every waiter.
    unsafe {
        if count > 1 {
            WakeByAddressAll(address);
        } else if count == 1 {
            WakeByAddressSingle(address);
        }
    }
    Ok(0) // The wake calls do not report the number of woken threads.
}

// Timeout in milliseconds, round nanosecond values up to milliseconds.
fn convert_timeout_ms(timeout: Option<Duration>) -> DWORD {
    match timeout {
        None => INFINITE,
        Some(duration) => duration
            .as_secs()
            .checked_mul(1000)
            .and_then(|x| x.checked_add((duration.subsec_nanos() as u64 + 999_999) / 1_000_000))
            .map(|ms| {
                if ms >= INFINITE as u64 {
                    INFINITE - 1
                } else {
                    ms as DWORD
                }
            })
            .unwrap_or(INFINITE - 1),
    }
}
