//! Thread-pool lifecycle scenarios.
//!
//! The pool is driven by whichever thread holds the main identity, so the
//! scenarios run sequentially inside a single test function.

use core::ffi::c_void;
use std::thread;
use std::time::Duration;

use foreman::{pool, Code, ThreadState};

fn id_plus_100(argument: *mut c_void) -> i32 {
    argument as usize as i32 + 100
}

fn return_seven(_argument: *mut c_void) -> i32 {
    7
}

fn nap_briefly(_argument: *mut c_void) -> i32 {
    pool::sleep_ms(50);
    0
}

fn wait_for_state(id: u32, wanted: ThreadState) {
    for _ in 0..1000 {
        if pool::state_unique(id) == wanted {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!(
        "unique thread {} never reached {:?}, stuck at {:?}",
        id,
        wanted,
        pool::state_unique(id)
    );
}

fn wait_for_worker_state(id: u32, wanted: ThreadState) {
    for _ in 0..1000 {
        if pool::state_worker(id) == wanted {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!(
        "worker thread {} never reached {:?}, stuck at {:?}",
        id,
        wanted,
        pool::state_worker(id)
    );
}

#[test]
fn pool_lifecycle() {
    foreman::init().unwrap();

    unique_threads_run_and_collect();
    stale_handles_are_rejected();
    worker_batches_run_and_collect();
    detached_threads_recycle_their_slot();
    pool_calls_are_main_thread_only();
    double_collect_is_a_state_error();
}

fn unique_threads_run_and_collect() {
    let mut handles = Vec::new();
    for id in 0..3u32 {
        let handle = pool::spawn_unique(
            id,
            id_plus_100,
            id as usize as *mut c_void,
            Some("lifecycle"),
        )
        .unwrap();
        handles.push(handle);

        // Immediately after a successful spawn the slot is somewhere past
        // reservation, never unused.
        let state = pool::state_unique(id);
        assert!(
            state == ThreadState::Starting
                || state == ThreadState::Running
                || state == ThreadState::Finished,
            "unexpected post-spawn state {:?}",
            state
        );
    }

    for id in 0..3u32 {
        wait_for_state(id, ThreadState::Finished);
        assert_eq!(pool::code_unique(id), id as i32 + 100);
        assert_eq!(
            pool::handle_state(handles[id as usize]),
            Ok(ThreadState::Finished)
        );
        pool::collect_unique(id).unwrap();
        assert_eq!(pool::state_unique(id), ThreadState::Unused);
        // The code resets with the slot.
        assert_eq!(pool::code_unique(id), 0);
    }
}

fn stale_handles_are_rejected() {
    let old = pool::spawn_unique(0, return_seven, core::ptr::null_mut(), None).unwrap();
    wait_for_state(0, ThreadState::Finished);
    pool::collect_unique(0).unwrap();

    // The slot recycled: the old handle is closed, a fresh one works.
    assert_eq!(pool::handle_state(old), Err(Code::THREAD_ERROR_HANDLE_CLOSED));

    let fresh = pool::spawn_unique(0, return_seven, core::ptr::null_mut(), None).unwrap();
    assert_ne!(old, fresh);
    assert!(pool::handle_state(fresh).is_ok());
    wait_for_state(0, ThreadState::Finished);
    pool::collect_unique(0).unwrap();
    assert_eq!(pool::handle_state(fresh), Err(Code::THREAD_ERROR_HANDLE_CLOSED));

    // A handle from a generation the slot has not reached is tampered-with.
    let future = pool::Handle::from_raw(fresh.raw() + (2u64 << 32));
    assert_eq!(pool::handle_state(future), Err(Code::THREAD_ERROR_HANDLE_INVALID));
}

fn worker_batches_run_and_collect() {
    const COUNT: u32 = 4;

    pool::spawn_worker(COUNT, return_seven, core::ptr::null_mut()).unwrap();

    // A second batch while one is active is refused.
    assert_eq!(
        pool::spawn_worker(1, return_seven, core::ptr::null_mut()),
        Err(Code::ERROR_STATE)
    );

    for id in 0..COUNT {
        wait_for_worker_state(id, ThreadState::Finished);
        assert_eq!(pool::code_worker(id), 7);
    }
    // Slots beyond the batch stayed unused.
    assert_eq!(pool::state_worker(COUNT), ThreadState::Unused);

    pool::collect_worker().unwrap();
    for id in 0..COUNT {
        assert_eq!(pool::state_worker(id), ThreadState::Unused);
        assert_eq!(pool::code_worker(id), 0);
    }

    // The pool accepts a fresh batch afterwards.
    pool::spawn_worker(2, return_seven, core::ptr::null_mut()).unwrap();
    pool::collect_worker().unwrap();

    // An oversized batch is rejected outright.
    assert_eq!(
        pool::spawn_worker(pool::worker_max() + 1, return_seven, core::ptr::null_mut()),
        Err(Code::ERROR_INVALID)
    );
}

fn detached_threads_recycle_their_slot() {
    pool::spawn_unique(1, nap_briefly, core::ptr::null_mut(), Some("detached")).unwrap();
    pool::detach_unique(1).unwrap();

    // Collecting a detached thread is refused while the slot lasts.
    let collect = pool::collect_unique(1);
    assert!(
        collect == Err(Code::THREAD_ERROR_HANDLE_DETACHED) || collect == Err(Code::ERROR_STATE),
        "unexpected collect outcome {:?}",
        collect
    );

    // The thread recycles the slot on its own.
    wait_for_state(1, ThreadState::Unused);
    pool::spawn_unique(1, return_seven, core::ptr::null_mut(), None).unwrap();
    wait_for_state(1, ThreadState::Finished);
    pool::collect_unique(1).unwrap();
}

fn pool_calls_are_main_thread_only() {
    let outsider = thread::spawn(|| {
        assert_eq!(
            pool::spawn_unique(2, return_seven, core::ptr::null_mut(), None).unwrap_err(),
            Code::ERROR_FORBIDDEN
        );
        assert_eq!(
            pool::spawn_worker(1, return_seven, core::ptr::null_mut()),
            Err(Code::ERROR_FORBIDDEN)
        );
        assert_eq!(pool::collect_unique(2), Err(Code::ERROR_FORBIDDEN));
        assert_eq!(pool::collect_worker(), Err(Code::ERROR_FORBIDDEN));
        assert_eq!(pool::detach_unique(2), Err(Code::ERROR_FORBIDDEN));
        assert_eq!(pool::state_unique(2), ThreadState::Invalid);
        assert_eq!(pool::state_worker(0), ThreadState::Invalid);
        assert_eq!(pool::code_unique(2), 0);
        assert_eq!(pool::code_worker(0), 0);
        assert_eq!(pool::name(), "unmanaged");
    });
    outsider.join().unwrap();
}

fn double_collect_is_a_state_error() {
    pool::spawn_unique(2, return_seven, core::ptr::null_mut(), None).unwrap();
    wait_for_state(2, ThreadState::Finished);
    pool::collect_unique(2).unwrap();
    assert_eq!(pool::collect_unique(2), Err(Code::ERROR_STATE));

    // Out-of-range ids are invalid, not state errors.
    assert_eq!(
        pool::collect_unique(pool::unique_max()),
        Err(Code::ERROR_INVALID)
    );
}
