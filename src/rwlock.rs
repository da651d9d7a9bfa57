//! A read-write lock.

use core::cell::UnsafeCell;

use crate::code::Code;
use crate::opaque::{words, RWLOCK_SIZE};

const RWLOCK_WORDS: usize = words(RWLOCK_SIZE);

type Storage = [usize; RWLOCK_WORDS];

/// A read-write lock for synchronizing access to shared resources.
///
/// Supports many concurrent readers xor one writer. A pending writer blocks
/// new readers, so writers are not starved.
///
/// The native primitive lives inside a fixed word-aligned buffer sized per
/// platform ABI; the storage is boxed so the primitive never moves after
/// initialization.
///
/// This mechanism is intra-process only and cannot be shared between
/// processes.
pub struct RwLock {
    storage: Box<UnsafeCell<Storage>>,
}

unsafe impl Send for RwLock {}
unsafe impl Sync for RwLock {}

impl core::fmt::Debug for RwLock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.pad("RwLock { .. }")
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use static_assertions::const_assert;

        const_assert!(
            core::mem::size_of::<Storage>() >= core::mem::size_of::<libc::pthread_rwlock_t>()
        );
        const_assert!(
            core::mem::align_of::<Storage>() >= core::mem::align_of::<libc::pthread_rwlock_t>()
        );

        fn map_lock_error(r: i32) -> Code {
            match r {
                libc::EDEADLK => Code::THREAD_ERROR_DEADLOCK,
                libc::EAGAIN => Code::ERROR_OVERFLOW,
                libc::EPERM => Code::ERROR_FORBIDDEN,
                _ => Code::ERROR_OS,
            }
        }

        impl RwLock {
            fn native(&self) -> *mut libc::pthread_rwlock_t {
                self.storage.get() as *mut libc::pthread_rwlock_t
            }

            /// Creates a new, unlocked read-write lock.
            ///
            /// # Errors
            /// - [`Code::ERROR_OS`]: the native primitive could not be
            ///   initialized.
            pub fn new() -> Result<RwLock, Code> {
                let lock = RwLock {
                    storage: Box::new(UnsafeCell::new([0; RWLOCK_WORDS])),
                };
                let r = unsafe { rwlock_init(lock.native()) };
                if r != 0 {
                    return Err(Code::ERROR_OS);
                }
                Ok(lock)
            }

            /// Acquires a read (shared) lock, blocking while a writer holds
            /// or awaits the lock.
            pub fn read_lock(&self) -> Result<(), Code> {
                let r = unsafe { libc::pthread_rwlock_rdlock(self.native()) };
                if r == 0 {
                    Ok(())
                } else {
                    Err(map_lock_error(r))
                }
            }

            /// Attempts to acquire a read (shared) lock without blocking.
            ///
            /// # Errors
            /// - [`Code::THREAD_INFO_BUSY`]: a writer holds or awaits the lock.
            pub fn read_trylock(&self) -> Result<(), Code> {
                let r = unsafe { libc::pthread_rwlock_tryrdlock(self.native()) };
                match r {
                    0 => Ok(()),
                    libc::EBUSY => Err(Code::THREAD_INFO_BUSY),
                    _ => Err(map_lock_error(r)),
                }
            }

            /// Releases a read (shared) lock.
            pub fn read_unlock(&self) -> Result<(), Code> {
                let r = unsafe { libc::pthread_rwlock_unlock(self.native()) };
                if r == 0 {
                    Ok(())
                } else {
                    Err(map_lock_error(r))
                }
            }

            /// Acquires the write (exclusive) lock, blocking while any other
            /// thread holds the lock.
            pub fn write_lock(&self) -> Result<(), Code> {
                let r = unsafe { libc::pthread_rwlock_wrlock(self.native()) };
                if r == 0 {
                    Ok(())
                } else {
                    Err(map_lock_error(r))
                }
            }

            /// Attempts to acquire the write (exclusive) lock without
            /// blocking.
            ///
            /// # Errors
            /// - [`Code::THREAD_INFO_BUSY`]: the lock is held.
            pub fn write_trylock(&self) -> Result<(), Code> {
                let r = unsafe { libc::pthread_rwlock_trywrlock(self.native()) };
                match r {
                    0 => Ok(()),
                    libc::EBUSY => Err(Code::THREAD_INFO_BUSY),
                    _ => Err(map_lock_error(r)),
                }
            }

            /// Releases the write (exclusive) lock.
            pub fn write_unlock(&self) -> Result<(), Code> {
                let r = unsafe { libc::pthread_rwlock_unlock(self.native()) };
                if r == 0 {
                    Ok(())
                } else {
                    Err(map_lock_error(r))
                }
            }
        }

        impl Drop for RwLock {
            fn drop(&mut self) {
                unsafe {
                    libc::pthread_rwlock_destroy(self.native());
                }
            }
        }

        cfg_if::cfg_if! {
            if #[cfg(all(target_os = "linux", target_env = "gnu"))] {
                // Prefer writers so readers cannot starve them; glibc
                // defaults to reader preference.
                //
                // Not exposed by the `libc` crate for glibc targets; value
                // matches glibc's bits/pthreadtypes.h.
                const PTHREAD_RWLOCK_PREFER_WRITER_NONRECURSIVE_NP: libc::c_int = 2;

                unsafe fn rwlock_init(lock: *mut libc::pthread_rwlock_t) -> i32 {
                    let mut attr: libc::pthread_rwlockattr_t = core::mem::zeroed();
                    let mut r = libc::pthread_rwlockattr_init(&mut attr);
                    if r != 0 {
                        return r;
                    }
                    libc::pthread_rwlockattr_setkind_np(
                        &mut attr,
                        PTHREAD_RWLOCK_PREFER_WRITER_NONRECURSIVE_NP,
                    );
                    r = libc::pthread_rwlock_init(lock, &attr);
                    libc::pthread_rwlockattr_destroy(&mut attr);
                    r
                }
            } else {
                unsafe fn rwlock_init(lock: *mut libc::pthread_rwlock_t) -> i32 {
                    libc::pthread_rwlock_init(lock, core::ptr::null())
                }
            }
        }
    } else if #[cfg(windows)] {
        use static_assertions::const_assert;

        use winapi::um::synchapi::{
            AcquireSRWLockExclusive, AcquireSRWLockShared, InitializeSRWLock,
            ReleaseSRWLockExclusive, ReleaseSRWLockShared, TryAcquireSRWLockExclusive,
            TryAcquireSRWLockShared,
        };
        use winapi::um::winnt::SRWLOCK;

        const_assert!(core::mem::size_of::<Storage>() >= core::mem::size_of::<SRWLOCK>());
        const_assert!(core::mem::align_of::<Storage>() >= core::mem::align_of::<SRWLOCK>());

        impl RwLock {
            fn native(&self) -> *mut SRWLOCK {
                self.storage.get() as *mut SRWLOCK
            }

            /// Creates a new, unlocked read-write lock.
            pub fn new() -> Result<RwLock, Code> {
                let lock = RwLock {
                    storage: Box::new(UnsafeCell::new([0; RWLOCK_WORDS])),
                };
                unsafe {
                    InitializeSRWLock(lock.native());
                }
                Ok(lock)
            }

            /// Acquires a read (shared) lock, blocking while a writer holds
            /// or awaits the lock.
            pub fn read_lock(&self) -> Result<(), Code> {
                unsafe {
                    AcquireSRWLockShared(self.native());
                }
                Ok(())
            }

            /// Attempts to acquire a read (shared) lock without blocking.
            pub fn read_trylock(&self) -> Result<(), Code> {
                if unsafe { TryAcquireSRWLockShared(self.native()) } != 0 {
                    Ok(())
                } else {
                    Err(Code::THREAD_INFO_BUSY)
                }
            }

            /// Releases a read (shared) lock.
            pub fn read_unlock(&self) -> Result<(), Code> {
                unsafe {
                    ReleaseSRWLockShared(self.native());
                }
                Ok(())
            }

            /// Acquires the write (exclusive) lock, blocking while any other
            /// thread holds the lock.
            pub fn write_lock(&self) -> Result<(), Code> {
                unsafe {
                    AcquireSRWLockExclusive(self.native());
                }
                Ok(())
            }

            /// Attempts to acquire the write (exclusive) lock without
            /// blocking.
            pub fn write_trylock(&self) -> Result<(), Code> {
                if unsafe { TryAcquireSRWLockExclusive(self.native()) } != 0 {
                    Ok(())
                } else {
                    Err(Code::THREAD_INFO_BUSY)
                }
            }

            /// Releases the write (exclusive) lock.
            pub fn write_unlock(&self) -> Result<(), Code> {
                unsafe {
                    ReleaseSRWLockExclusive(self.native());
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn readers_share_writers_exclude() {
        let lock = RwLock::new().unwrap();

        lock.read_lock().unwrap();
        lock.read_trylock().unwrap();
        assert_eq!(lock.write_trylock(), Err(Code::THREAD_INFO_BUSY));
        lock.read_unlock().unwrap();
        lock.read_unlock().unwrap();

        lock.write_lock().unwrap();
        assert_eq!(lock.read_trylock(), Err(Code::THREAD_INFO_BUSY));
        assert_eq!(lock.write_trylock(), Err(Code::THREAD_INFO_BUSY));
        lock.write_unlock().unwrap();
    }

    #[test]
    fn writer_sees_all_reader_writes() {
        use crate::atomic::{Atomic64, Relaxed};
        use std::sync::Arc;

        const WRITERS: usize = 2;
        const READERS: usize = 4;
        const ROUNDS: u64 = 20_000;

        let lock = Arc::new(RwLock::new().unwrap());
        let counter = Arc::new(Atomic64::zero());

        let mut threads = Vec::new();
        for _ in 0..WRITERS {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            threads.push(std::thread::spawn(move || {
                for _ in 0..ROUNDS {
                    lock.write_lock().unwrap();
                    let value = counter.load(Relaxed);
                    counter.store(value + 1, Relaxed);
                    lock.write_unlock().unwrap();
                }
            }));
        }
        for _ in 0..READERS {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            threads.push(std::thread::spawn(move || {
                let mut last = 0;
                for _ in 0..ROUNDS {
                    lock.read_lock().unwrap();
                    let value = counter.load(Relaxed);
                    lock.read_unlock().unwrap();
                    // The counter only moves forward.
                    assert!(value >= last);
                    last = value;
                }
            }));
        }
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(counter.load(Relaxed), WRITERS as u64 * ROUNDS);
    }
}
