#![allow(unused)]

// Copied from `libstd/sys/unix/os.rs`.
#[cfg(unix)]
extern "C" {
    #[cfg_attr(
        any(target_os = "linux", target_os = "android"),
        link_name = "__errno_location"
    )]
    #[cfg_attr(
        any(target_os = "macos", target_os = "ios", target_os = "freebsd"),
        link_name = "__error"
    )]
    fn errno_location() -> *mut libc::c_int;
}

#[cfg(unix)]
pub(crate) fn errno() -> i32 {
    unsafe { (*errno_location()) as i32 }
}
