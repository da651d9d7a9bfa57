//! Spawns the full crew once: a named unique thread plus a worker batch, all
//! hammering one shared counter through a mutex.
//!
//! Run with `cargo run --example crew`.

use core::ffi::c_void;

use foreman::atomic::{Atomic64, Relaxed};
use foreman::{pool, Mutex, ThreadState};

static MUTEX: Mutex = Mutex::new();
static COUNTER: Atomic64 = Atomic64::zero();

const ROUNDS: u64 = 100_000;
const WORKERS: u32 = 4;

fn count(_argument: *mut c_void) -> i32 {
    println!("[{}] starting", pool::name());
    for _ in 0..ROUNDS {
        MUTEX.lock().unwrap();
        let value = COUNTER.load(Relaxed);
        COUNTER.store(value + 1, Relaxed);
        MUTEX.unlock().unwrap();
    }
    0
}

fn main() {
    foreman::init().unwrap();

    pool::spawn_unique(0, count, core::ptr::null_mut(), Some("counter")).unwrap();
    pool::spawn_worker(WORKERS, count, core::ptr::null_mut()).unwrap();

    pool::collect_unique(0).unwrap();
    pool::collect_worker().unwrap();

    assert_eq!(pool::state_unique(0), ThreadState::Unused);
    let expected = (1 + WORKERS as u64) * ROUNDS;
    println!("counted {} (expected {})", COUNTER.load(Relaxed), expected);
    assert_eq!(COUNTER.load(Relaxed), expected);
}
