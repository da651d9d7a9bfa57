//! Typed atomic cells.
//!
//! These wrappers provide the small, uniform surface the rest of the crate is
//! written against: five cell shapes (`u32`, `u64`, `int`, pointer-sized,
//! boolean), each a single naturally-aligned word with a zero-value
//! initializer, plus the explicit memory-ordering parameter on every
//! operation.
//!
//! Compared to `core::sync::atomic` the differences are cosmetic but
//! deliberate:
//!
//! - `compare_exchange` takes `&mut expected`, writes the observed value back
//!   on failure, and returns a plain `bool`, so retry loops read the same as
//!   the lock protocols they implement.
//! - Every fetch-op has an `*_and_fetch` twin returning the post-operation
//!   value.
//! - `fetch_nand` is provided for the integer shapes (`nand(a, b)` is
//!   `!(a & b)`).
//!
//! The allowed orderings per operation follow the standard memory model:
//! loads may not be `Release`/`AcqRel`, stores may not be
//! `Acquire`/`AcqRel`, and the failure ordering of a compare-exchange may not
//! be `Release`/`AcqRel`. Violations panic, as they do in
//! `core::sync::atomic`.

use core::sync::atomic::{
    AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering,
};

pub use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release, SeqCst};

macro_rules! atomic_cell {
    ($(#[$attr:meta])* $name:ident, $inner:ty, $int:ty) => {
        $(#[$attr])*
        #[repr(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Creates a cell holding `value`.
            pub const fn new(value: $int) -> $name {
                $name(<$inner>::new(value))
            }

            /// Creates a zero-valued cell; the static initializer.
            pub const fn zero() -> $name {
                $name::new(0)
            }

            /// True if operations on this cell compile to lock-free
            /// instructions on the current target.
            pub const fn is_lock_free() -> bool {
                // All supported architectures (x86, x86-64, arm, aarch64,
                // riscv) provide lock-free words at these widths.
                true
            }

            pub fn load(&self, order: Ordering) -> $int {
                self.0.load(order)
            }

            pub fn store(&self, value: $int, order: Ordering) {
                self.0.store(value, order)
            }

            pub fn exchange(&self, value: $int, order: Ordering) -> $int {
                self.0.swap(value, order)
            }

            /// Atomically compares the cell to `*expected` and, if equal,
            /// replaces it with `desired`. On failure the observed value is
            /// written back into `expected`.
            pub fn compare_exchange(
                &self,
                expected: &mut $int,
                desired: $int,
                success: Ordering,
                failure: Ordering,
            ) -> bool {
                match self.0.compare_exchange(*expected, desired, success, failure) {
                    Ok(_) => true,
                    Err(observed) => {
                        *expected = observed;
                        false
                    }
                }
            }

            /// As [`compare_exchange`](Self::compare_exchange), but may fail
            /// spuriously; intended for retry loops.
            pub fn compare_exchange_weak(
                &self,
                expected: &mut $int,
                desired: $int,
                success: Ordering,
                failure: Ordering,
            ) -> bool {
                match self.0.compare_exchange_weak(*expected, desired, success, failure) {
                    Ok(_) => true,
                    Err(observed) => {
                        *expected = observed;
                        false
                    }
                }
            }

            pub fn fetch_add(&self, value: $int, order: Ordering) -> $int {
                self.0.fetch_add(value, order)
            }

            pub fn fetch_sub(&self, value: $int, order: Ordering) -> $int {
                self.0.fetch_sub(value, order)
            }

            pub fn fetch_and(&self, value: $int, order: Ordering) -> $int {
                self.0.fetch_and(value, order)
            }

            pub fn fetch_or(&self, value: $int, order: Ordering) -> $int {
                self.0.fetch_or(value, order)
            }

            pub fn fetch_xor(&self, value: $int, order: Ordering) -> $int {
                self.0.fetch_xor(value, order)
            }

            pub fn fetch_nand(&self, value: $int, order: Ordering) -> $int {
                self.0.fetch_nand(value, order)
            }

            /// Adds `value` and returns the post-operation value.
            pub fn add_and_fetch(&self, value: $int, order: Ordering) -> $int {
                self.0.fetch_add(value, order).wrapping_add(value)
            }

            /// Subtracts `value` and returns the post-operation value.
            pub fn sub_and_fetch(&self, value: $int, order: Ordering) -> $int {
                self.0.fetch_sub(value, order).wrapping_sub(value)
            }

            /// ANDs `value` and returns the post-operation value.
            pub fn and_and_fetch(&self, value: $int, order: Ordering) -> $int {
                self.0.fetch_and(value, order) & value
            }

            /// ORs `value` and returns the post-operation value.
            pub fn or_and_fetch(&self, value: $int, order: Ordering) -> $int {
                self.0.fetch_or(value, order) | value
            }

            /// XORs `value` and returns the post-operation value.
            pub fn xor_and_fetch(&self, value: $int, order: Ordering) -> $int {
                self.0.fetch_xor(value, order) ^ value
            }

            /// NANDs `value` and returns the post-operation value.
            pub fn nand_and_fetch(&self, value: $int, order: Ordering) -> $int {
                !(self.0.fetch_nand(value, order) & value)
            }

            /// Raw pointer to the underlying word, for handing to the OS.
            #[allow(dead_code)]
            pub(crate) fn as_mut_ptr(&self) -> *mut $int {
                &self.0 as *const $inner as *mut $int
            }
        }

        impl Default for $name {
            fn default() -> $name {
                $name::zero()
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.debug_tuple(stringify!($name))
                    .field(&self.0.load(Relaxed))
                    .finish()
            }
        }
    };
}

atomic_cell! {
    /// Atomic 32-bit unsigned cell. The futex shape.
    Atomic32, AtomicU32, u32
}

atomic_cell! {
    /// Atomic 64-bit unsigned cell.
    Atomic64, AtomicU64, u64
}

atomic_cell! {
    /// Atomic signed-int cell.
    AtomicInt, AtomicI32, i32
}

atomic_cell! {
    /// Atomic pointer-sized unsigned cell.
    AtomicWord, AtomicUsize, usize
}

/// Atomic boolean cell.
#[repr(transparent)]
pub struct AtomicFlag(AtomicBool);

impl AtomicFlag {
    /// Creates a flag holding `value`.
    pub const fn new(value: bool) -> AtomicFlag {
        AtomicFlag(AtomicBool::new(value))
    }

    /// Creates a cleared flag; the static initializer.
    pub const fn zero() -> AtomicFlag {
        AtomicFlag::new(false)
    }

    /// True if operations on this cell compile to lock-free instructions on
    /// the current target.
    pub const fn is_lock_free() -> bool {
        true
    }

    pub fn load(&self, order: Ordering) -> bool {
        self.0.load(order)
    }

    pub fn store(&self, value: bool, order: Ordering) {
        self.0.store(value, order)
    }

    pub fn exchange(&self, value: bool, order: Ordering) -> bool {
        self.0.swap(value, order)
    }

    /// Sets the flag and returns the previous value.
    pub fn test_and_set(&self, order: Ordering) -> bool {
        self.0.swap(true, order)
    }

    /// Clears the flag.
    pub fn clear(&self, order: Ordering) {
        self.0.store(false, order)
    }
}

impl Default for AtomicFlag {
    fn default() -> AtomicFlag {
        AtomicFlag::zero()
    }
}

impl core::fmt::Debug for AtomicFlag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("AtomicFlag").field(&self.0.load(Relaxed)).finish()
    }
}

/// A memory fence with the given ordering.
#[inline]
pub fn thread_fence(order: Ordering) {
    core::sync::atomic::fence(order)
}

/// A compiler-only fence: restricts reordering by the compiler, emits no
/// hardware instruction.
#[inline]
pub fn signal_fence(order: Ordering) {
    core::sync::atomic::compiler_fence(order)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zero_initializers() {
        assert_eq!(Atomic32::zero().load(Relaxed), 0);
        assert_eq!(Atomic64::zero().load(Relaxed), 0);
        assert_eq!(AtomicInt::zero().load(Relaxed), 0);
        assert_eq!(AtomicWord::zero().load(Relaxed), 0);
        assert!(!AtomicFlag::zero().load(Relaxed));
    }

    #[test]
    fn compare_exchange_updates_expected() {
        let cell = Atomic32::new(7);
        let mut expected = 3;
        assert!(!cell.compare_exchange(&mut expected, 9, AcqRel, Acquire));
        assert_eq!(expected, 7);
        assert!(cell.compare_exchange(&mut expected, 9, AcqRel, Acquire));
        assert_eq!(cell.load(Relaxed), 9);
    }

    #[test]
    fn nand_semantics() {
        let cell = Atomic32::new(0b1100);
        assert_eq!(cell.fetch_nand(0b1010, AcqRel), 0b1100);
        assert_eq!(cell.load(Relaxed), !0b1000);

        let cell = Atomic32::new(0b1100);
        assert_eq!(cell.nand_and_fetch(0b1010, AcqRel), !0b1000);
    }

    #[test]
    fn and_fetch_variants_return_post_value() {
        let cell = Atomic64::new(10);
        assert_eq!(cell.add_and_fetch(5, AcqRel), 15);
        assert_eq!(cell.sub_and_fetch(3, AcqRel), 12);
        let cell = Atomic32::new(0b0110);
        assert_eq!(cell.or_and_fetch(0b0001, AcqRel), 0b0111);
        assert_eq!(cell.and_and_fetch(0b0011, AcqRel), 0b0011);
        assert_eq!(cell.xor_and_fetch(0b0010, AcqRel), 0b0001);
    }

    #[test]
    fn flag_test_and_set() {
        let flag = AtomicFlag::zero();
        assert!(!flag.test_and_set(AcqRel));
        assert!(flag.test_and_set(AcqRel));
        flag.clear(Release);
        assert!(!flag.load(Acquire));
    }

    #[test]
    fn wrapping_counters() {
        let cell = Atomic32::new(u32::max_value());
        assert_eq!(cell.add_and_fetch(1, AcqRel), 0);
    }
}
