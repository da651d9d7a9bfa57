//! Spin-wait hint.

/// Signals to the processor that the caller is inside a busy-wait loop.
///
/// Emits `pause` on x86 and `yield` on arm. Does not suspend the thread and
/// does not interact with the scheduler.
#[inline(always)]
pub fn pause() {
    core::hint::spin_loop();
}
