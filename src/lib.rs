//! `foreman` manages a fixed crew of threads — one main thread, a set of
//! long-running "unique" threads and a batch of homogeneous "worker"
//! threads — and provides the synchronization primitives they coordinate
//! with, built from scratch on a futex abstraction and a small set of typed
//! atomic cells.
//!
//! The crate is meant to be embedded in larger systems (engines, servers)
//! that need deterministic, auditable concurrency behavior and a stable
//! identity for every managed thread:
//!
//! - every managed thread holds a unique bit in a 64-bit identity set
//!   ([`tid`]);
//! - every pool slot carries a generation counter, so stale thread handles
//!   are detected instead of aliasing a recycled slot ([`pool`]);
//! - every fallible operation reports a packed 32-bit [`Code`] and nothing
//!   is thrown ([`code`]);
//! - all blocking goes through one futex layer with one timeout discipline
//!   ([`futex`], [`time`]).
//!
//! The primitive family: [`Mutex`], [`Qutex`] (a strictly FIFO queue lock),
//! [`Condition`], [`Semaphore`], [`Once`]/[`OnceUnchecked`], [`Barrier`],
//! [`RwLock`], [`SpinLock`] and [`TicketLock`].
//!
//! Call [`init`] once from the thread that is to become the main thread
//! before using the pool:
//!
//! ```no_run
//! foreman::init().unwrap();
//!
//! fn hello(_argument: *mut core::ffi::c_void) -> i32 {
//!     log::info!("hello from {}", foreman::pool::name());
//!     0
//! }
//!
//! foreman::pool::spawn_unique(0, hello, core::ptr::null_mut(), Some("greeter")).unwrap();
//! foreman::pool::collect_unique(0).unwrap();
//! ```
//!
//! None of the primitives are async-signal-safe. Nothing here can be shared
//! across processes.

pub mod atomic;
pub mod code;
pub mod futex;
pub mod hint;
pub mod pool;
pub mod tid;
pub mod time;

mod barrier;
mod condition;
mod mutex;
mod once;
mod opaque;
mod qutex;
mod rwlock;
mod semaphore;
mod spinlock;
mod ticket_lock;
mod utils;

pub use crate::barrier::Barrier;
pub use crate::code::Code;
pub use crate::condition::Condition;
pub use crate::mutex::Mutex;
pub use crate::once::{Once, OnceUnchecked};
pub use crate::pool::{Handle, Priority, ThreadFunction, ThreadState};
pub use crate::qutex::Qutex;
pub use crate::rwlock::RwLock;
pub use crate::semaphore::Semaphore;
pub use crate::spinlock::SpinLock;
pub use crate::ticket_lock::TicketLock;
pub use crate::tid::{ThreadId, ThreadIdSet};

/// Maximum number of unique threads.
pub const UNIQUE_THREAD_MAX: usize = 15;

/// Maximum number of worker threads.
pub const WORKER_THREAD_MAX: usize = 48;

/// Maximum thread name size in bytes, terminator included.
pub const THREAD_NAME_SIZE: usize = 16;

// One identity bit per managed thread, main included.
static_assertions::const_assert!(1 + UNIQUE_THREAD_MAX + WORKER_THREAD_MAX <= 64);

/// Initializes the runtime on the calling thread.
///
/// Establishes the monotonic clock's reference instant and assigns the
/// main-thread identity to the caller, which becomes the only thread allowed
/// to drive the [`pool`].
///
/// # Errors
/// - [`Code::FATAL_TIMER`]: no sufficiently monotonic OS clock exists.
/// - [`Code::ERROR_INIT`]: the runtime is already initialized, or the caller
///   already holds an identity.
/// - [`Code::ERROR_STATE`]: another thread is already the main thread.
pub fn init() -> Result<(), Code> {
    time::init()?;
    tid::assign_main()
}
