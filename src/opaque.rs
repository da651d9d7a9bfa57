//! Opaque storage sizes for natively-backed primitives.
//!
//! [`Barrier`](crate::Barrier) and [`RwLock`](crate::RwLock) wrap a native OS
//! primitive inside a fixed, word-aligned buffer so that their size and
//! layout are part of this crate's stable surface rather than the platform
//! headers'. The buffers are sized per ABI from the table below and checked
//! against the real native types with compile-time assertions; a target
//! whose native primitive outgrows its buffer refuses to build instead of
//! truncating.

const WORD: usize = core::mem::size_of::<usize>();

cfg_if::cfg_if! {
    if #[cfg(all(target_os = "linux", target_env = "gnu", target_pointer_width = "64"))] {
        pub(crate) const BARRIER_SIZE: usize = 32;
        pub(crate) const RWLOCK_SIZE: usize = 56;
    } else if #[cfg(all(target_os = "linux", target_env = "gnu", target_pointer_width = "32"))] {
        pub(crate) const BARRIER_SIZE: usize = 20;
        pub(crate) const RWLOCK_SIZE: usize = 48;
    } else if #[cfg(all(target_os = "linux", target_env = "musl", target_pointer_width = "64"))] {
        pub(crate) const BARRIER_SIZE: usize = 32;
        pub(crate) const RWLOCK_SIZE: usize = 56;
    } else if #[cfg(all(target_os = "linux", target_env = "musl", target_pointer_width = "32"))] {
        pub(crate) const BARRIER_SIZE: usize = 20;
        pub(crate) const RWLOCK_SIZE: usize = 32;
    } else if #[cfg(all(target_os = "freebsd", target_pointer_width = "64"))] {
        // Pointer-sized handles; generously oversized like the glibc layout.
        pub(crate) const BARRIER_SIZE: usize = 20;
        pub(crate) const RWLOCK_SIZE: usize = 16;
    } else if #[cfg(all(target_os = "freebsd", target_pointer_width = "32"))] {
        pub(crate) const BARRIER_SIZE: usize = 20;
        pub(crate) const RWLOCK_SIZE: usize = 16;
    } else if #[cfg(all(any(target_os = "macos", target_os = "ios"), target_pointer_width = "64"))] {
        pub(crate) const BARRIER_SIZE: usize = 24;
        pub(crate) const RWLOCK_SIZE: usize = 200;
    } else if #[cfg(all(any(target_os = "macos", target_os = "ios"), target_pointer_width = "32"))] {
        pub(crate) const BARRIER_SIZE: usize = 24;
        pub(crate) const RWLOCK_SIZE: usize = 184;
    } else if #[cfg(all(windows, target_pointer_width = "64"))] {
        pub(crate) const BARRIER_SIZE: usize = 32;
        pub(crate) const RWLOCK_SIZE: usize = 8;
    } else if #[cfg(all(windows, target_pointer_width = "32"))] {
        pub(crate) const BARRIER_SIZE: usize = 20;
        pub(crate) const RWLOCK_SIZE: usize = 4;
    } else {
        compile_error!("no opaque-size table entry for this ABI");
    }
}

/// Rounds a byte size up to whole words, the storage granule.
pub(crate) const fn words(size: usize) -> usize {
    (size + WORD - 1) / WORD
}
