//! The managed thread pool.
//!
//! A fixed array of thread slots in three disjoint partitions: the main slot
//! (index 0, occupied by the thread that called [`init`](crate::init)), the
//! unique slots, and the worker slots. Unique threads implement a single
//! long-running function each; worker threads are a homogeneous batch that
//! all run the same function with the same argument.
//!
//! Every slot carries a single 64-bit meta word packing `{state, generation}`
//! so one compare-exchange observes and transitions both together; the
//! generation increments whenever a slot returns to `UNUSED`, which makes
//! stale [`Handle`]s detectable without hazard pointers.
//!
//! State progression within one generation:
//!
//! ```text
//! UNUSED -spawn-> RESERVED -> STARTING -entry-> RUNNING -return-> FINISHED -collect-> UNUSED'
//!                                               RUNNING -detach-> DETACHED -exit----> UNUSED'
//! ```
//!
//! All spawn, collect, detach and query operations are callable from the
//! main thread only.

use core::cell::UnsafeCell;
use core::ffi::c_void;

use crate::atomic::{AcqRel, Acquire, Atomic64, AtomicInt, AtomicWord, Relaxed, Release};
use crate::code::Code;
use crate::hint;
use crate::tid::{self, ThreadId};
use crate::{THREAD_NAME_SIZE, UNIQUE_THREAD_MAX, WORKER_THREAD_MAX};

mod os;

/// Total number of pool slots: main + unique + worker.
pub const THREAD_MAX: usize = 1 + UNIQUE_THREAD_MAX + WORKER_THREAD_MAX;

/// Function executed by a managed thread. The returned code is recorded in
/// the thread's slot and queryable through [`code_unique`]/[`code_worker`].
pub type ThreadFunction = fn(*mut c_void) -> i32;

/// Scheduling hint for a managed thread, applied best-effort by the thread
/// itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    Low,
    Default,
    High,
}

/// Observable state of a pool slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    /// Query was made from a non-main thread or with an out-of-range id.
    Invalid,
    /// The slot is free.
    Unused,
    /// The slot is chosen but its thread has not been created yet.
    Reserved,
    /// The native thread exists but has not entered its function.
    Starting,
    /// The thread is executing its function.
    Running,
    /// The function returned; the slot awaits collection.
    Finished,
    /// Collection has been waived; the thread recycles the slot itself.
    Detached,
    /// A collector has committed to joining the thread.
    Joining,
    /// The thread never started; the slot's code holds the spawn failure.
    Incomplete,
}

impl ThreadState {
    fn from_meta(value: u32) -> ThreadState {
        match value {
            0 => ThreadState::Unused,
            1 => ThreadState::Reserved,
            2 => ThreadState::Starting,
            3 => ThreadState::Running,
            4 => ThreadState::Finished,
            5 => ThreadState::Detached,
            6 => ThreadState::Joining,
            7 => ThreadState::Incomplete,
            _ => ThreadState::Invalid,
        }
    }

    fn as_meta(self) -> u32 {
        match self {
            ThreadState::Unused => 0,
            ThreadState::Reserved => 1,
            ThreadState::Starting => 2,
            ThreadState::Running => 3,
            ThreadState::Finished => 4,
            ThreadState::Detached => 5,
            ThreadState::Joining => 6,
            ThreadState::Incomplete => 7,
            ThreadState::Invalid => u32::max_value(),
        }
    }

    /// Returns the state's name, as used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            ThreadState::Unused => "UNUSED",
            ThreadState::Reserved => "RESERVED",
            ThreadState::Starting => "STARTING",
            ThreadState::Running => "RUNNING",
            ThreadState::Finished => "FINISHED",
            ThreadState::Detached => "DETACHED",
            ThreadState::Joining => "JOINING",
            ThreadState::Incomplete => "INCOMPLETE",
            ThreadState::Invalid => "INVALID",
        }
    }
}

/// An opaque 64-bit thread handle packing `{generation, slot index}`.
///
/// A handle stays valid until its slot is recycled; afterwards every
/// operation using it reports [`Code::THREAD_ERROR_HANDLE_CLOSED`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Handle(u64);

impl Handle {
    fn new(index: u32, generation: u32) -> Handle {
        Handle((generation as u64) << 32 | index as u64)
    }

    /// Reconstructs a handle from its packed representation.
    pub const fn from_raw(raw: u64) -> Handle {
        Handle(raw)
    }

    /// Returns the packed representation.
    pub const fn raw(self) -> u64 {
        self.0
    }

    fn index(self) -> u32 {
        self.0 as u32
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

fn meta_state(meta: u64) -> u32 {
    (meta >> 32) as u32
}

fn meta_generation(meta: u64) -> u32 {
    meta as u32
}

fn meta_pack(state: ThreadState, generation: u32) -> u64 {
    (state.as_meta() as u64) << 32 | generation as u64
}

// Field discipline: the UnsafeCell fields are written by the spawner only
// while it holds the slot in RESERVED, and read/cleared by the slot's own
// thread. Creation of the native thread orders the spawner's writes before
// the entry function's reads.
struct Context {
    name: UnsafeCell<[u8; THREAD_NAME_SIZE]>,
    function: UnsafeCell<Option<ThreadFunction>>,
    argument: UnsafeCell<*mut c_void>,
    affinity: UnsafeCell<u64>,
    priority: UnsafeCell<Priority>,
    handle: AtomicWord,
    code: AtomicInt,
    meta: Atomic64,
}

unsafe impl Sync for Context {}

impl Context {
    const NEW: Context = Context {
        name: UnsafeCell::new([0; THREAD_NAME_SIZE]),
        function: UnsafeCell::new(None),
        argument: UnsafeCell::new(core::ptr::null_mut()),
        affinity: UnsafeCell::new(0),
        priority: UnsafeCell::new(Priority::Default),
        handle: AtomicWord::zero(),
        code: AtomicInt::zero(),
        meta: Atomic64::zero(),
    };
}

static POOL: [Context; THREAD_MAX] = [Context::NEW; THREAD_MAX];

fn unique_index(id: u32) -> usize {
    1 + id as usize
}

fn worker_index(id: u32) -> usize {
    1 + UNIQUE_THREAD_MAX + id as usize
}

// Slot indices coincide with identity bit positions: main is bit 0, unique
// ids follow, then worker ids.
fn slot_tid(index: usize) -> ThreadId {
    if index == 0 {
        ThreadId::MAIN
    } else if index <= UNIQUE_THREAD_MAX {
        ThreadId::unique((index - 1) as u32)
    } else {
        ThreadId::worker((index - 1 - UNIQUE_THREAD_MAX) as u32)
    }
}

fn context_index(context: &Context) -> usize {
    (context as *const Context as usize - POOL.as_ptr() as usize)
        / core::mem::size_of::<Context>()
}

fn require_main() -> Result<(), Code> {
    if tid::is_self(ThreadId::MAIN) {
        Ok(())
    } else {
        Err(Code::ERROR_FORBIDDEN)
    }
}

/// Returns the maximum number of unique threads.
pub fn unique_max() -> u32 {
    UNIQUE_THREAD_MAX as u32
}

/// Returns the maximum number of worker threads.
pub fn worker_max() -> u32 {
    WORKER_THREAD_MAX as u32
}

// Entry point of every managed thread; `context` points into `POOL`.
pub(crate) fn thread_main(context: *mut c_void) -> i32 {
    let context: &Context = unsafe { &*(context as *const Context) };
    let index = context_index(context);
    let generation = meta_generation(context.meta.load(Acquire));

    if let Err(code) = tid::assign(slot_tid(index)) {
        log::warn!(
            target: "foreman::pool",
            "slot {} could not assign its identity: {}", index, code
        );
    }
    log::debug!(
        target: "foreman::pool",
        "[{:016X}] thread entry", tid::self_id().raw()
    );

    let (function, argument) = unsafe {
        os::apply_name(&*context.name.get());
        os::apply_affinity(*context.affinity.get());
        os::apply_priority(*context.priority.get());
        (*context.function.get(), *context.argument.get())
    };

    context
        .meta
        .store(meta_pack(ThreadState::Running, generation), Release);

    let result = match function {
        Some(function) => function(argument),
        None => 0,
    };
    context.code.store(result, Release);

    // Clear the slot's inputs before any state the spawner can observe.
    unsafe {
        *context.name.get() = [0; THREAD_NAME_SIZE];
        *context.function.get() = None;
        *context.argument.get() = core::ptr::null_mut();
        *context.affinity.get() = 0;
        *context.priority.get() = Priority::Default;
    }

    // If still in the default running state, await collection.
    let mut expected = meta_pack(ThreadState::Running, generation);
    if context.meta.compare_exchange(
        &mut expected,
        meta_pack(ThreadState::Finished, generation),
        AcqRel,
        Acquire,
    ) {
        log::debug!(
            target: "foreman::pool",
            "[{:016X}] set state from RUNNING to FINISHED", tid::self_id().raw()
        );
    } else {
        log::debug!(
            target: "foreman::pool",
            "[{:016X}] state is {}, skipping transition to FINISHED",
            tid::self_id().raw(),
            ThreadState::from_meta(meta_state(expected)).name()
        );
    }

    // A concurrent detach makes cleanup this thread's job.
    let mut expected = meta_pack(ThreadState::Detached, generation);
    if context.meta.compare_exchange(
        &mut expected,
        meta_pack(ThreadState::Unused, generation.wrapping_add(1)),
        AcqRel,
        Acquire,
    ) {
        log::debug!(
            target: "foreman::pool",
            "[{:016X}] set state from DETACHED to UNUSED, incremented generation",
            tid::self_id().raw()
        );
    }

    tid::clear();
    result
}

fn spawn_into(
    context: &'static Context,
    function: ThreadFunction,
    argument: *mut c_void,
    name: Option<&str>,
) -> Result<Handle, Code> {
    // Reserve the slot, observing state and generation together.
    let mut meta = context.meta.load(Acquire);
    loop {
        if ThreadState::from_meta(meta_state(meta)) != ThreadState::Unused {
            return Err(Code::ERROR_STATE);
        }
        let reserved = meta_pack(ThreadState::Reserved, meta_generation(meta));
        if context.meta.compare_exchange(&mut meta, reserved, AcqRel, Acquire) {
            break;
        }
        hint::pause();
    }
    let generation = meta_generation(meta);
    log::debug!(
        target: "foreman::pool",
        "[{:016X}] reserved slot {} at generation {}",
        tid::self_id().raw(),
        context_index(context),
        generation
    );

    unsafe {
        let buffer = &mut *context.name.get();
        *buffer = [0; THREAD_NAME_SIZE];
        if let Some(name) = name {
            // Truncated to the buffer size, terminator included.
            let bytes = name.as_bytes();
            let length = bytes.len().min(THREAD_NAME_SIZE - 1);
            buffer[..length].copy_from_slice(&bytes[..length]);
        }
        *context.function.get() = Some(function);
        *context.argument.get() = argument;
        *context.affinity.get() = 0;
        *context.priority.get() = Priority::Default;
    }
    context.code.store(0, Relaxed);
    context
        .meta
        .store(meta_pack(ThreadState::Starting, generation), Release);

    match os::create(context as *const Context as *mut c_void) {
        Ok(handle) => {
            context.handle.store(handle, Release);
            log::debug!(
                target: "foreman::pool",
                "[{:016X}] created thread in slot {}",
                tid::self_id().raw(),
                context_index(context)
            );
            Ok(Handle::new(context_index(context) as u32, generation))
        }
        Err(code) => {
            // Reset the slot: state UNUSED, generation unchanged.
            context
                .meta
                .store(meta_pack(ThreadState::Unused, generation), Release);
            log::debug!(
                target: "foreman::pool",
                "[{:016X}] OS could not create thread for slot {}",
                tid::self_id().raw(),
                context_index(context)
            );
            Err(code)
        }
    }
}

/// Spawns a unique thread on the given id.
///
/// Unique threads implement a single function on a single thread; persistent
/// subsystems like rendering, audio and networking belong here.
///
/// `name` is applied to the native thread for debugging, truncated to
/// [`THREAD_NAME_SIZE`]` - 1` bytes.
///
/// # Errors
/// - [`Code::ERROR_FORBIDDEN`]: not called from the main thread.
/// - [`Code::ERROR_INVALID`]: `id` is not below [`unique_max`].
/// - [`Code::ERROR_STATE`]: the slot is occupied.
/// - [`Code::THREAD_ERROR_OS_CREATE`]: the OS could not create the thread.
pub fn spawn_unique(
    id: u32,
    function: ThreadFunction,
    argument: *mut c_void,
    name: Option<&str>,
) -> Result<Handle, Code> {
    require_main()?;
    if id >= UNIQUE_THREAD_MAX as u32 {
        return Err(Code::ERROR_INVALID);
    }
    spawn_into(&POOL[unique_index(id)], function, argument, name)
}

/// Spawns a batch of worker threads.
///
/// All workers invoke the same function and receive the same argument. Only
/// one batch can be active at a time.
///
/// # Errors
/// - [`Code::ERROR_FORBIDDEN`]: not called from the main thread.
/// - [`Code::ERROR_INVALID`]: `count` exceeds [`worker_max`].
/// - [`Code::ERROR_STATE`]: a previous batch has not been collected.
/// - [`Code::WARN_INCOMPLETE`]: some workers failed to spawn. Failed slots
///   are marked [`ThreadState::Incomplete`] with the failure code in their
///   code field; successful threads still run.
pub fn spawn_worker(count: u32, function: ThreadFunction, argument: *mut c_void) -> Result<(), Code> {
    require_main()?;
    if count > WORKER_THREAD_MAX as u32 {
        return Err(Code::ERROR_INVALID);
    }
    for id in 0..WORKER_THREAD_MAX as u32 {
        let meta = POOL[worker_index(id)].meta.load(Acquire);
        if ThreadState::from_meta(meta_state(meta)) != ThreadState::Unused {
            return Err(Code::ERROR_STATE);
        }
    }

    let mut incomplete = false;
    for id in 0..count {
        let context = &POOL[worker_index(id)];
        if let Err(code) = spawn_into(context, function, argument, None) {
            let generation = meta_generation(context.meta.load(Acquire));
            context.code.store(code.raw(), Release);
            context
                .meta
                .store(meta_pack(ThreadState::Incomplete, generation), Release);
            incomplete = true;
        }
    }

    if incomplete {
        Err(Code::WARN_INCOMPLETE)
    } else {
        Ok(())
    }
}

fn collect_slot(context: &Context) -> Result<(), Code> {
    loop {
        let mut meta = context.meta.load(Acquire);
        let state = ThreadState::from_meta(meta_state(meta));
        let generation = meta_generation(meta);
        match state {
            ThreadState::Reserved | ThreadState::Starting => {
                // Wait until the thread is initialized to join it.
                hint::pause();
            }
            ThreadState::Running | ThreadState::Finished => {
                if !context.meta.compare_exchange(
                    &mut meta,
                    meta_pack(ThreadState::Joining, generation),
                    AcqRel,
                    Acquire,
                ) {
                    continue;
                }
                log::debug!(
                    target: "foreman::pool",
                    "[{:016X}] joining slot {}",
                    tid::self_id().raw(),
                    context_index(context)
                );
                let handle = context.handle.load(Acquire);
                os::join(handle)?;
                context.meta.store(
                    meta_pack(ThreadState::Unused, generation.wrapping_add(1)),
                    Release,
                );
                log::debug!(
                    target: "foreman::pool",
                    "[{:016X}] closed slot {}",
                    tid::self_id().raw(),
                    context_index(context)
                );
                return Ok(());
            }
            ThreadState::Incomplete => {
                // Never started; only the slot needs recycling.
                if !context.meta.compare_exchange(
                    &mut meta,
                    meta_pack(ThreadState::Unused, generation.wrapping_add(1)),
                    AcqRel,
                    Acquire,
                ) {
                    continue;
                }
                return Ok(());
            }
            ThreadState::Detached => return Err(Code::THREAD_ERROR_HANDLE_DETACHED),
            // Unused or a concurrent collector: nothing to collect.
            _ => return Err(Code::ERROR_STATE),
        }
    }
}

/// Collects the unique thread on the given id.
///
/// Waits for the thread to finish, joins it, and recycles the slot with its
/// generation incremented. Afterwards the id can be used to spawn a new
/// thread.
///
/// # Errors
/// - [`Code::ERROR_FORBIDDEN`]: not called from the main thread.
/// - [`Code::ERROR_INVALID`]: `id` is not below [`unique_max`].
/// - [`Code::ERROR_STATE`]: the slot is unused or already being collected;
///   collecting twice is an error, not undefined behavior.
/// - [`Code::THREAD_ERROR_HANDLE_DETACHED`]: the thread was detached.
/// - [`Code::THREAD_ERROR_OS_JOIN`]: the OS join failed.
pub fn collect_unique(id: u32) -> Result<(), Code> {
    require_main()?;
    if id >= UNIQUE_THREAD_MAX as u32 {
        return Err(Code::ERROR_INVALID);
    }
    collect_slot(&POOL[unique_index(id)])
}

/// Collects all worker threads.
///
/// Joins every active worker slot and recycles it; slots whose spawn failed
/// are reset. After collection a new batch can be spawned. Returns the first
/// failure encountered while still collecting the rest.
///
/// # Errors
/// - [`Code::ERROR_FORBIDDEN`]: not called from the main thread.
/// - The per-slot errors of [`collect_unique`].
pub fn collect_worker() -> Result<(), Code> {
    require_main()?;
    let mut result = Ok(());
    for id in 0..WORKER_THREAD_MAX as u32 {
        let context = &POOL[worker_index(id)];
        let meta = context.meta.load(Acquire);
        if ThreadState::from_meta(meta_state(meta)) == ThreadState::Unused {
            continue;
        }
        let slot_result = collect_slot(context);
        if result.is_ok() {
            result = slot_result;
        }
    }
    result
}

/// Waives collection of the unique thread on the given id.
///
/// A running thread recycles its own slot when it finishes; a finished one
/// is recycled immediately.
///
/// # Errors
/// - [`Code::ERROR_FORBIDDEN`]: not called from the main thread.
/// - [`Code::ERROR_INVALID`]: `id` is not below [`unique_max`].
/// - [`Code::ERROR_STATE`]: the slot is unused or being collected.
/// - [`Code::THREAD_ERROR_HANDLE_DETACHED`]: the thread is already detached.
/// - [`Code::THREAD_ERROR_OS_DETACH`]: the OS detach failed.
pub fn detach_unique(id: u32) -> Result<(), Code> {
    require_main()?;
    if id >= UNIQUE_THREAD_MAX as u32 {
        return Err(Code::ERROR_INVALID);
    }
    let context = &POOL[unique_index(id)];
    loop {
        let mut meta = context.meta.load(Acquire);
        let state = ThreadState::from_meta(meta_state(meta));
        let generation = meta_generation(meta);
        match state {
            ThreadState::Reserved | ThreadState::Starting => {
                // Wait until the thread is initialized to detach it.
                hint::pause();
            }
            ThreadState::Running | ThreadState::Finished => {
                let finished = state == ThreadState::Finished;
                if !context.meta.compare_exchange(
                    &mut meta,
                    meta_pack(ThreadState::Detached, generation),
                    AcqRel,
                    Acquire,
                ) {
                    continue;
                }
                let handle = context.handle.load(Acquire);
                os::detach(handle)?;
                if finished {
                    // The thread is gone; recycle the slot here.
                    context.meta.store(
                        meta_pack(ThreadState::Unused, generation.wrapping_add(1)),
                        Release,
                    );
                }
                log::debug!(
                    target: "foreman::pool",
                    "[{:016X}] detached slot {}",
                    tid::self_id().raw(),
                    context_index(context)
                );
                return Ok(());
            }
            ThreadState::Detached => return Err(Code::THREAD_ERROR_HANDLE_DETACHED),
            _ => return Err(Code::ERROR_STATE),
        }
    }
}

/// Returns the state of the unique thread on the given id.
///
/// Returns [`ThreadState::Invalid`] from non-main callers or for ids not
/// below [`unique_max`].
pub fn state_unique(id: u32) -> ThreadState {
    if !tid::is_self(ThreadId::MAIN) || id >= UNIQUE_THREAD_MAX as u32 {
        return ThreadState::Invalid;
    }
    let meta = POOL[unique_index(id)].meta.load(Acquire);
    ThreadState::from_meta(meta_state(meta))
}

/// Returns the recorded code of the unique thread on the given id.
///
/// Zero unless the thread has finished or its spawn was incomplete. Returns
/// zero from non-main callers.
pub fn code_unique(id: u32) -> i32 {
    if !tid::is_self(ThreadId::MAIN) || id >= UNIQUE_THREAD_MAX as u32 {
        return 0;
    }
    let context = &POOL[unique_index(id)];
    match ThreadState::from_meta(meta_state(context.meta.load(Acquire))) {
        ThreadState::Finished | ThreadState::Incomplete => context.code.load(Acquire),
        _ => 0,
    }
}

/// Returns the state of the worker thread on the given id.
///
/// Returns [`ThreadState::Invalid`] from non-main callers or for ids not
/// below [`worker_max`].
pub fn state_worker(id: u32) -> ThreadState {
    if !tid::is_self(ThreadId::MAIN) || id >= WORKER_THREAD_MAX as u32 {
        return ThreadState::Invalid;
    }
    let meta = POOL[worker_index(id)].meta.load(Acquire);
    ThreadState::from_meta(meta_state(meta))
}

/// Returns the recorded code of the worker thread on the given id.
///
/// Zero unless the thread has finished or its spawn was incomplete. Returns
/// zero from non-main callers.
pub fn code_worker(id: u32) -> i32 {
    if !tid::is_self(ThreadId::MAIN) || id >= WORKER_THREAD_MAX as u32 {
        return 0;
    }
    let context = &POOL[worker_index(id)];
    match ThreadState::from_meta(meta_state(context.meta.load(Acquire))) {
        ThreadState::Finished | ThreadState::Incomplete => context.code.load(Acquire),
        _ => 0,
    }
}

/// Checks a handle against its slot and returns the slot's current state.
///
/// # Errors
/// - [`Code::THREAD_ERROR_HANDLE_INVALID`]: the index is out of range, or the
///   handle refers to a "future" generation and has been tampered with.
/// - [`Code::THREAD_ERROR_HANDLE_CLOSED`]: the slot has been recycled since the
///   handle was issued.
pub fn handle_state(handle: Handle) -> Result<ThreadState, Code> {
    let index = handle.index() as usize;
    if index == 0 || index >= THREAD_MAX {
        return Err(Code::THREAD_ERROR_HANDLE_INVALID);
    }
    let meta = POOL[index].meta.load(Acquire);
    let generation = meta_generation(meta);
    if generation > handle.generation() {
        return Err(Code::THREAD_ERROR_HANDLE_CLOSED);
    }
    if generation < handle.generation() {
        return Err(Code::THREAD_ERROR_HANDLE_INVALID);
    }
    Ok(ThreadState::from_meta(meta_state(meta)))
}

/// Returns the calling thread's slot name, or `"unmanaged"` for threads not
/// created through the pool.
pub fn name() -> String {
    let id = tid::self_id();
    if !id.is_managed() {
        return String::from("unmanaged");
    }
    let index = id.raw().trailing_zeros() as usize;
    // Reading our own slot: the only other writer finished before this
    // thread started.
    let buffer = unsafe { &*POOL[index].name.get() };
    let length = buffer.iter().position(|&byte| byte == 0).unwrap_or(buffer.len());
    String::from_utf8_lossy(&buffer[..length]).into_owned()
}

/// Suspends the calling thread for at least `milliseconds`.
pub fn sleep_ms(milliseconds: u64) {
    os::sleep_ms(milliseconds)
}

/// Yields the remainder of the calling thread's time slice.
pub fn yield_now() {
    os::yield_now()
}
