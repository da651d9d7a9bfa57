//! Native thread operations.
//!
//! Creation, joining and detaching of OS threads, plus the best-effort
//! application of name, affinity and priority by the thread itself. Failures
//! of the best-effort calls are logged, never returned.

use core::ffi::c_void;

use crate::code::Code;
use crate::pool::Priority;
use crate::tid;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use core::mem;
        use core::ptr;

        extern "C" fn entry(argument: *mut libc::c_void) -> *mut libc::c_void {
            let result = crate::pool::thread_main(argument as *mut c_void);
            result as isize as *mut libc::c_void
        }

        pub(super) fn create(context: *mut c_void) -> Result<usize, Code> {
            let mut handle: libc::pthread_t = unsafe { mem::zeroed() };
            let r = unsafe {
                libc::pthread_create(
                    &mut handle,
                    ptr::null(),
                    entry,
                    context as *mut libc::c_void,
                )
            };
            if r != 0 {
                return Err(Code::THREAD_ERROR_OS_CREATE);
            }
            Ok(handle as usize)
        }

        pub(super) fn join(handle: usize) -> Result<(), Code> {
            let r = unsafe { libc::pthread_join(handle as libc::pthread_t, ptr::null_mut()) };
            if r != 0 {
                return Err(Code::THREAD_ERROR_OS_JOIN);
            }
            Ok(())
        }

        pub(super) fn detach(handle: usize) -> Result<(), Code> {
            let r = unsafe { libc::pthread_detach(handle as libc::pthread_t) };
            if r != 0 {
                return Err(Code::THREAD_ERROR_OS_DETACH);
            }
            Ok(())
        }

        #[cfg(any(target_os = "linux", target_os = "android"))]
        fn set_native_name(name: *const libc::c_char) -> i32 {
            unsafe { libc::pthread_setname_np(libc::pthread_self(), name) }
        }

        #[cfg(any(target_os = "macos", target_os = "ios"))]
        fn set_native_name(name: *const libc::c_char) -> i32 {
            unsafe { libc::pthread_setname_np(name) }
        }

        #[cfg(target_os = "freebsd")]
        fn set_native_name(name: *const libc::c_char) -> i32 {
            unsafe { libc::pthread_set_name_np(libc::pthread_self(), name) };
            0
        }

        pub(super) fn apply_name(name: &[u8]) {
            if name[0] == 0 {
                return;
            }
            log::debug!(
                target: "foreman::pool",
                "[{:016X}] setting name", tid::self_id().raw()
            );
            if set_native_name(name.as_ptr() as *const libc::c_char) != 0 {
                log::debug!(
                    target: "foreman::pool",
                    "[{:016X}] could not set name", tid::self_id().raw()
                );
            }
        }

        #[cfg(target_os = "linux")]
        fn set_native_affinity(affinity: u64) -> i32 {
            unsafe {
                let mut set: libc::cpu_set_t = mem::zeroed();
                libc::CPU_ZERO(&mut set);
                for cpu in 0..64 {
                    if affinity & (1u64 << cpu) != 0 {
                        libc::CPU_SET(cpu, &mut set);
                    }
                }
                libc::pthread_setaffinity_np(
                    libc::pthread_self(),
                    mem::size_of::<libc::cpu_set_t>(),
                    &set,
                )
            }
        }

        // No thread affinity analogue elsewhere.
        #[cfg(not(target_os = "linux"))]
        fn set_native_affinity(_affinity: u64) -> i32 {
            0
        }

        pub(super) fn apply_affinity(affinity: u64) {
            if affinity == 0 {
                return;
            }
            log::debug!(
                target: "foreman::pool",
                "[{:016X}] setting affinity to {:#X}", tid::self_id().raw(), affinity
            );
            if set_native_affinity(affinity) != 0 {
                log::debug!(
                    target: "foreman::pool",
                    "[{:016X}] could not set affinity", tid::self_id().raw()
                );
            }
        }

        #[cfg(target_os = "linux")]
        fn set_native_priority(priority: Priority) -> i32 {
            let policy = match priority {
                Priority::Low => libc::SCHED_BATCH,
                Priority::Default | Priority::High => libc::SCHED_OTHER,
            };
            let param = libc::sched_param { sched_priority: 0 };
            unsafe { libc::pthread_setschedparam(libc::pthread_self(), policy, &param) }
        }

        // No portable priority analogue elsewhere.
        #[cfg(not(target_os = "linux"))]
        fn set_native_priority(_priority: Priority) -> i32 {
            0
        }

        pub(super) fn apply_priority(priority: Priority) {
            if priority == Priority::Default {
                return;
            }
            log::debug!(
                target: "foreman::pool",
                "[{:016X}] setting priority to {:?}", tid::self_id().raw(), priority
            );
            if set_native_priority(priority) != 0 {
                log::debug!(
                    target: "foreman::pool",
                    "[{:016X}] could not set priority to {:?}",
                    tid::self_id().raw(),
                    priority
                );
            }
        }

        pub(super) fn sleep_ms(milliseconds: u64) {
            let duration = libc::timespec {
                tv_sec: (milliseconds / 1000) as libc::time_t,
                tv_nsec: ((milliseconds % 1000) * 1_000_000) as libc::c_long,
            };
            unsafe {
                libc::nanosleep(&duration, ptr::null_mut());
            }
        }

        pub(super) fn yield_now() {
            unsafe {
                libc::sched_yield();
            }
        }
    } else if #[cfg(windows)] {
        use core::mem;
        use core::ptr;

        use winapi::shared::basetsd::DWORD_PTR;
        use winapi::shared::minwindef::{DWORD, FALSE};
        use winapi::um::handleapi::CloseHandle;
        use winapi::um::libloaderapi::{GetModuleHandleA, GetProcAddress};
        use winapi::um::processthreadsapi::{
            CreateThread, GetCurrentThread, GetExitCodeThread, SetThreadPriority, SwitchToThread,
        };
        use winapi::um::synchapi::{Sleep, WaitForSingleObject};
        use winapi::um::winbase::{
            SetThreadAffinityMask, INFINITE, THREAD_PRIORITY_BELOW_NORMAL, THREAD_PRIORITY_HIGHEST,
            THREAD_PRIORITY_NORMAL, WAIT_OBJECT_0,
        };
        use winapi::um::winnt::{HANDLE, HRESULT, LPCSTR, PCWSTR};

        unsafe extern "system" fn entry(argument: *mut winapi::ctypes::c_void) -> DWORD {
            crate::pool::thread_main(argument as *mut c_void) as DWORD
        }

        pub(super) fn create(context: *mut c_void) -> Result<usize, Code> {
            let handle = unsafe {
                CreateThread(
                    ptr::null_mut(),
                    0,
                    Some(entry),
                    context as *mut winapi::ctypes::c_void,
                    0,
                    ptr::null_mut(),
                )
            };
            if handle.is_null() {
                return Err(Code::THREAD_ERROR_OS_CREATE);
            }
            Ok(handle as usize)
        }

        pub(super) fn join(handle: usize) -> Result<(), Code> {
            let handle = handle as HANDLE;
            let mut exit_code: DWORD = 0;
            let joined = unsafe {
                WaitForSingleObject(handle, INFINITE) == WAIT_OBJECT_0
                    && GetExitCodeThread(handle, &mut exit_code) != FALSE
            };
            if !joined {
                return Err(Code::THREAD_ERROR_OS_JOIN);
            }
            // Even if this fails, the thread has been joined.
            unsafe {
                CloseHandle(handle);
            }
            Ok(())
        }

        pub(super) fn detach(handle: usize) -> Result<(), Code> {
            if unsafe { CloseHandle(handle as HANDLE) } == FALSE {
                return Err(Code::THREAD_ERROR_OS_DETACH);
            }
            Ok(())
        }

        type SetThreadDescriptionFn =
            unsafe extern "system" fn(HANDLE, PCWSTR) -> HRESULT;

        pub(super) fn apply_name(name: &[u8]) {
            if name[0] == 0 {
                return;
            }
            log::debug!(
                target: "foreman::pool",
                "[{:016X}] setting name", tid::self_id().raw()
            );
            // `SetThreadDescription` only exists since Windows 10 1607; look
            // it up dynamically.
            let set_description = unsafe {
                let module = GetModuleHandleA(b"kernel32.dll\0".as_ptr() as LPCSTR);
                if module.is_null() {
                    return;
                }
                let address =
                    GetProcAddress(module, b"SetThreadDescription\0".as_ptr() as LPCSTR);
                if address.is_null() {
                    return;
                }
                mem::transmute::<_, SetThreadDescriptionFn>(address)
            };
            let mut wide = [0u16; crate::THREAD_NAME_SIZE];
            for (i, &byte) in name.iter().take(wide.len() - 1).enumerate() {
                if byte == 0 {
                    break;
                }
                wide[i] = byte as u16;
            }
            unsafe {
                set_description(GetCurrentThread(), wide.as_ptr());
            }
        }

        pub(super) fn apply_affinity(affinity: u64) {
            if affinity == 0 {
                return;
            }
            log::debug!(
                target: "foreman::pool",
                "[{:016X}] setting affinity to {:#X}", tid::self_id().raw(), affinity
            );
            unsafe {
                SetThreadAffinityMask(GetCurrentThread(), affinity as DWORD_PTR);
            }
        }

        pub(super) fn apply_priority(priority: Priority) {
            if priority == Priority::Default {
                return;
            }
            log::debug!(
                target: "foreman::pool",
                "[{:016X}] setting priority to {:?}", tid::self_id().raw(), priority
            );
            let level = match priority {
                Priority::Low => THREAD_PRIORITY_BELOW_NORMAL,
                Priority::Default => THREAD_PRIORITY_NORMAL,
                Priority::High => THREAD_PRIORITY_HIGHEST,
            };
            let r = unsafe { SetThreadPriority(GetCurrentThread(), level as i32) };
            if r == FALSE {
                log::debug!(
                    target: "foreman::pool",
                    "[{:016X}] could not set priority to {:?}",
                    tid::self_id().raw(),
                    priority
                );
            }
        }

        pub(super) fn sleep_ms(milliseconds: u64) {
            unsafe {
                Sleep(milliseconds as DWORD);
            }
        }

        pub(super) fn yield_now() {
            unsafe {
                SwitchToThread();
            }
        }
    }
}
