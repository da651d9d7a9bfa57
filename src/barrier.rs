//! A thread barrier.

use core::cell::UnsafeCell;

use crate::code::Code;
use crate::opaque::{words, BARRIER_SIZE};

const BARRIER_WORDS: usize = words(BARRIER_SIZE);

type Storage = [usize; BARRIER_WORDS];

/// A thread barrier.
///
/// Synchronizes a group of threads, making them wait until all participants
/// have reached the barrier point before any of them proceed. The barrier
/// re-arms automatically, so the same instance can be used for successive
/// cycles.
///
/// The native primitive lives inside a fixed word-aligned buffer sized per
/// platform ABI; the storage is boxed so the primitive never moves after
/// initialization.
///
/// This mechanism is intra-process only and cannot be shared between
/// processes.
pub struct Barrier {
    storage: Box<UnsafeCell<Storage>>,
}

unsafe impl Send for Barrier {}
unsafe impl Sync for Barrier {}

impl core::fmt::Debug for Barrier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.pad("Barrier { .. }")
    }
}

cfg_if::cfg_if! {
    if #[cfg(all(unix, not(any(target_os = "macos", target_os = "ios"))))] {
        use static_assertions::const_assert;

        const_assert!(
            core::mem::size_of::<Storage>() >= core::mem::size_of::<libc::pthread_barrier_t>()
        );
        const_assert!(
            core::mem::align_of::<Storage>() >= core::mem::align_of::<libc::pthread_barrier_t>()
        );

        impl Barrier {
            fn native(&self) -> *mut libc::pthread_barrier_t {
                self.storage.get() as *mut libc::pthread_barrier_t
            }

            /// Creates a barrier for `count` participating threads.
            ///
            /// # Errors
            /// - [`Code::ERROR_INVALID`]: `count` is zero.
            /// - [`Code::ERROR_OS`]: the native primitive could not be
            ///   initialized.
            pub fn new(count: u32) -> Result<Barrier, Code> {
                if count == 0 {
                    return Err(Code::ERROR_INVALID);
                }
                let barrier = Barrier {
                    storage: Box::new(UnsafeCell::new([0; BARRIER_WORDS])),
                };
                let r = unsafe {
                    libc::pthread_barrier_init(barrier.native(), core::ptr::null(), count)
                };
                if r != 0 {
                    return Err(Code::ERROR_OS);
                }
                Ok(barrier)
            }

            /// Blocks until all participants have called `wait`, then
            /// releases them together and re-arms.
            ///
            /// # Errors
            /// - [`Code::ERROR_OS`]: the native wait failed.
            pub fn wait(&self) -> Result<(), Code> {
                let r = unsafe { libc::pthread_barrier_wait(self.native()) };
                if r == 0 || r == libc::PTHREAD_BARRIER_SERIAL_THREAD {
                    Ok(())
                } else {
                    Err(Code::ERROR_OS)
                }
            }
        }

        impl Drop for Barrier {
            fn drop(&mut self) {
                unsafe {
                    libc::pthread_barrier_destroy(self.native());
                }
            }
        }
    } else if #[cfg(any(target_os = "macos", target_os = "ios"))] {
        // Darwin has no pthread barrier; the same opaque storage holds a
        // futex-based barrier instead.
        use static_assertions::const_assert;

        use crate::atomic::{AcqRel, Acquire, Atomic32, Relaxed, Release};
        use crate::futex;

        struct FutexBarrier {
            count: u32,
            waiting: Atomic32,
            generation: Atomic32,
        }

        const_assert!(core::mem::size_of::<Storage>() >= core::mem::size_of::<FutexBarrier>());
        const_assert!(core::mem::align_of::<Storage>() >= core::mem::align_of::<FutexBarrier>());

        impl Barrier {
            fn native(&self) -> *mut FutexBarrier {
                self.storage.get() as *mut FutexBarrier
            }

            /// Creates a barrier for `count` participating threads.
            ///
            /// # Errors
            /// - [`Code::ERROR_INVALID`]: `count` is zero.
            pub fn new(count: u32) -> Result<Barrier, Code> {
                if count == 0 {
                    return Err(Code::ERROR_INVALID);
                }
                let barrier = Barrier {
                    storage: Box::new(UnsafeCell::new([0; BARRIER_WORDS])),
                };
                unsafe {
                    barrier.native().write(FutexBarrier {
                        count,
                        waiting: Atomic32::zero(),
                        generation: Atomic32::zero(),
                    });
                }
                Ok(barrier)
            }

            /// Blocks until all participants have called `wait`, then
            /// releases them together and re-arms.
            pub fn wait(&self) -> Result<(), Code> {
                let barrier = unsafe { &*self.native() };
                let generation = barrier.generation.load(Acquire);
                let arrived = barrier.waiting.add_and_fetch(1, AcqRel);
                if arrived == barrier.count {
                    // Last participant: re-arm and release the cycle.
                    barrier.waiting.store(0, Relaxed);
                    barrier.generation.fetch_add(1, Release);
                    futex::wake_all(&barrier.generation)?;
                    return Ok(());
                }
                while barrier.generation.load(Acquire) == generation {
                    futex::wait(&barrier.generation, generation)?;
                }
                Ok(())
            }
        }
    } else if #[cfg(windows)] {
        use static_assertions::const_assert;

        use winapi::shared::minwindef::FALSE;
        use winapi::um::synchapi::{
            DeleteSynchronizationBarrier, EnterSynchronizationBarrier,
            InitializeSynchronizationBarrier,
        };
        use winapi::um::winnt::SYNCHRONIZATION_BARRIER;

        const_assert!(
            core::mem::size_of::<Storage>() >= core::mem::size_of::<SYNCHRONIZATION_BARRIER>()
        );
        const_assert!(
            core::mem::align_of::<Storage>() >= core::mem::align_of::<SYNCHRONIZATION_BARRIER>()
        );

        impl Barrier {
            fn native(&self) -> *mut SYNCHRONIZATION_BARRIER {
                self.storage.get() as *mut SYNCHRONIZATION_BARRIER
            }

            /// Creates a barrier for `count` participating threads.
            ///
            /// # Errors
            /// - [`Code::ERROR_INVALID`]: `count` is zero.
            /// - [`Code::ERROR_OS`]: the native primitive could not be
            ///   initialized.
            pub fn new(count: u32) -> Result<Barrier, Code> {
                if count == 0 {
                    return Err(Code::ERROR_INVALID);
                }
                let barrier = Barrier {
                    storage: Box::new(UnsafeCell::new([0; BARRIER_WORDS])),
                };
                let r = unsafe {
                    InitializeSynchronizationBarrier(barrier.native(), count as i32, 0)
                };
                if r == FALSE {
                    return Err(Code::ERROR_OS);
                }
                Ok(barrier)
            }

            /// Blocks until all participants have called `wait`, then
            /// releases them together and re-arms.
            pub fn wait(&self) -> Result<(), Code> {
                unsafe {
                    EnterSynchronizationBarrier(self.native(), 0);
                }
                Ok(())
            }
        }

        impl Drop for Barrier {
            fn drop(&mut self) {
                unsafe {
                    DeleteSynchronizationBarrier(self.native());
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zero_count_is_invalid() {
        assert!(Barrier::new(0).is_err());
    }

    #[test]
    fn single_participant_returns_immediately() {
        let barrier = Barrier::new(1).unwrap();
        barrier.wait().unwrap();
        barrier.wait().unwrap();
    }

    #[test]
    fn releases_all_participants_together() {
        use crate::atomic::{AcqRel, Atomic64, Relaxed};
        use std::sync::Arc;

        const THREADS: u32 = 4;
        const CYCLES: usize = 100;

        let barrier = Arc::new(Barrier::new(THREADS).unwrap());
        let arrivals = Arc::new(Atomic64::zero());

        let threads = (0..THREADS)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let arrivals = Arc::clone(&arrivals);
                std::thread::spawn(move || {
                    for cycle in 1..=CYCLES as u64 {
                        arrivals.fetch_add(1, AcqRel);
                        barrier.wait().unwrap();
                        // Everyone from this cycle has arrived by now.
                        assert!(arrivals.load(Relaxed) >= cycle * THREADS as u64);
                    }
                })
            })
            .collect::<Vec<_>>();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(arrivals.load(Relaxed), CYCLES as u64 * THREADS as u64);
    }
}
