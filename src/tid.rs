//! Thread identities.
//!
//! Every managed thread holds a [`ThreadId`]: a 64-bit value with exactly one
//! bit set. Bit 0 is the main thread, bits `1..=UNIQUE_THREAD_MAX` are the
//! unique threads, and the following `WORKER_THREAD_MAX` bits are the worker
//! threads. [`ThreadIdSet`] is a plain bitmask over these identities.
//!
//! A single global atomic bitset tracks which identities are assigned; at all
//! times it equals the disjoint union of the identities held by live managed
//! threads. Assignment and clearing go through atomic fetch-or / fetch-and
//! only.

use core::cell::Cell;
use core::fmt;

use crate::atomic::{Acquire, Atomic64, Release};
use crate::code::Code;
use crate::{UNIQUE_THREAD_MAX, WORKER_THREAD_MAX};

const fn bit_range_mask(min: u32, max: u32) -> u64 {
    ((1u64 << (max - min + 1)) - 1) << min
}

const UNIQUE_INDEX_MIN: u32 = 1;
const UNIQUE_INDEX_MAX: u32 = UNIQUE_THREAD_MAX as u32;
const WORKER_INDEX_MIN: u32 = UNIQUE_THREAD_MAX as u32 + 1;
const WORKER_INDEX_MAX: u32 = (UNIQUE_THREAD_MAX + WORKER_THREAD_MAX) as u32;
const UNIQUE_MASK: u64 = bit_range_mask(UNIQUE_INDEX_MIN, UNIQUE_INDEX_MAX);
const WORKER_MASK: u64 = bit_range_mask(WORKER_INDEX_MIN, WORKER_INDEX_MAX);
const MANAGED_MASK: u64 = ThreadId::MAIN.0 | UNIQUE_MASK | WORKER_MASK;

static ASSIGNED: Atomic64 = Atomic64::zero();

thread_local! {
    static SELF: Cell<u64> = Cell::new(ThreadId::NONE.0);
}

/// A single-thread identifier: zero or exactly one bit set.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// No thread assigned.
    pub const NONE: ThreadId = ThreadId(0);
    /// The main thread.
    pub const MAIN: ThreadId = ThreadId(1);

    /// Generates a unique-thread identity from a zero-based index, or
    /// [`ThreadId::NONE`] if the index is out of range.
    pub const fn unique(index: u32) -> ThreadId {
        if index >= UNIQUE_THREAD_MAX as u32 {
            return ThreadId::NONE;
        }
        ThreadId(1 << (UNIQUE_INDEX_MIN + index))
    }

    /// Generates a worker-thread identity from a zero-based index, or
    /// [`ThreadId::NONE`] if the index is out of range.
    pub const fn worker(index: u32) -> ThreadId {
        if index >= WORKER_THREAD_MAX as u32 {
            return ThreadId::NONE;
        }
        ThreadId(1 << (WORKER_INDEX_MIN + index))
    }

    pub(crate) const fn from_raw(raw: u64) -> ThreadId {
        ThreadId(raw)
    }

    /// Returns the raw bit representation.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// True if this identity is the main thread.
    pub fn is_main(self) -> bool {
        self == ThreadId::MAIN
    }

    /// True if this identity names a unique thread.
    pub fn is_unique(self) -> bool {
        // A well-formed identity has exactly one bit set:
        // `t & (t - 1)` clears the least significant set bit.
        (self.0 & UNIQUE_MASK) != 0 && self.0 & (self.0.wrapping_sub(1)) == 0
    }

    /// True if this identity names a worker thread.
    pub fn is_worker(self) -> bool {
        (self.0 & WORKER_MASK) != 0 && self.0 & (self.0.wrapping_sub(1)) == 0
    }

    /// True if this identity names a managed thread (main, unique or worker).
    pub fn is_managed(self) -> bool {
        (self.0 & MANAGED_MASK) != 0 && self.0 & (self.0.wrapping_sub(1)) == 0
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({:#018X})", self.0)
    }
}

/// A set of thread identities (bitmask).
///
/// The set helpers operate only on well-formed single-bit identities;
/// malformed inputs are silently ignored.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadIdSet(u64);

impl ThreadIdSet {
    /// The empty set.
    pub const EMPTY: ThreadIdSet = ThreadIdSet(0);

    /// Returns the raw bit representation.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns the set with a managed identity added.
    pub fn add(self, t: ThreadId) -> ThreadIdSet {
        if t.is_managed() {
            ThreadIdSet(self.0 | t.0)
        } else {
            self
        }
    }

    /// Returns the set with a managed identity removed.
    pub fn remove(self, t: ThreadId) -> ThreadIdSet {
        if t.is_managed() {
            ThreadIdSet(self.0 & !t.0)
        } else {
            self
        }
    }

    /// Returns the union of two sets.
    pub fn union(self, other: ThreadIdSet) -> ThreadIdSet {
        ThreadIdSet(self.0 | other.0)
    }

    /// True if the set contains the given identity.
    pub fn contains(self, t: ThreadId) -> bool {
        t.is_managed() && (self.0 & t.0) != 0
    }

    /// True if the two sets share any identity.
    pub fn intersects(self, other: ThreadIdSet) -> bool {
        self.0 & other.0 != 0
    }

    /// True if the set contains only managed identities.
    pub fn is_managed(self) -> bool {
        self.0 & !MANAGED_MASK == 0
    }

    /// True if the set contains no managed identity.
    pub fn is_empty(self) -> bool {
        self.0 & MANAGED_MASK == 0
    }

    /// True if the set contains the calling thread's identity.
    pub fn contains_self(self) -> bool {
        self.contains(self_id())
    }
}

impl fmt::Debug for ThreadIdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadIdSet({:#018X})", self.0)
    }
}

/// Returns the calling thread's identity, or [`ThreadId::NONE`] if
/// unassigned.
pub fn self_id() -> ThreadId {
    ThreadId(SELF.with(|s| s.get()))
}

/// True if the given identity matches the calling thread's.
pub fn is_self(t: ThreadId) -> bool {
    self_id() == t
}

/// True if the identity is currently assigned to some thread.
pub fn is_assigned(t: ThreadId) -> bool {
    let assigned = ASSIGNED.load(Acquire);
    (t.0 & assigned) != 0 && t.0 & (t.0.wrapping_sub(1)) == 0
}

fn assign_checked(t: ThreadId) -> Result<(), Code> {
    if self_id() != ThreadId::NONE {
        return Err(Code::ERROR_INIT);
    }
    let previous = ASSIGNED.fetch_or(t.0, Release);
    // If a collision is detected, the bit was already set for another thread.
    // Clearing it would artificially indicate that it is not held by that
    // other thread, so we do not revert.
    if t.0 & previous != 0 {
        return Err(Code::ERROR_STATE);
    }
    SELF.with(|s| s.set(t.0));
    Ok(())
}

/// Assigns an identity to the calling thread.
///
/// # Errors
/// - [`Code::ERROR_INVALID`] if `t` is [`ThreadId::NONE`].
/// - [`Code::ERROR_INIT`] if the calling thread already holds an identity.
/// - [`Code::ERROR_STATE`] if the identity is held by another thread; the
///   calling thread's identity is left unchanged.
pub fn assign(t: ThreadId) -> Result<(), Code> {
    if t == ThreadId::NONE {
        return Err(Code::ERROR_INVALID);
    }
    assign_checked(t)
}

/// Assigns the main-thread identity to the calling thread.
pub fn assign_main() -> Result<(), Code> {
    assign_checked(ThreadId::MAIN)
}

/// Assigns a unique-thread identity to the calling thread.
pub fn assign_unique(index: u32) -> Result<(), Code> {
    assign(ThreadId::unique(index))
}

/// Assigns a worker-thread identity to the calling thread.
pub fn assign_worker(index: u32) -> Result<(), Code> {
    assign(ThreadId::worker(index))
}

/// Clears the calling thread's identity.
pub fn clear() {
    let self_bits = SELF.with(|s| s.get());
    ASSIGNED.fetch_and(!self_bits, Release);
    SELF.with(|s| s.set(ThreadId::NONE.0));
}
