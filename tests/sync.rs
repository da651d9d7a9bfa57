//! Cross-thread scenarios for the synchronization primitives.
//!
//! Threads that use identity-checked primitives assign themselves worker
//! identities; every test uses its own disjoint identity range so the tests
//! can run in parallel.

use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Mutex as StdMutex;
use std::thread;
use std::time::Duration;

use foreman::atomic::Atomic64;
use foreman::{tid, Code, Condition, Mutex, Qutex};

#[test]
fn mutex_counter_under_contention() {
    static MUTEX: Mutex = Mutex::new();
    static COUNTER: Atomic64 = Atomic64::zero();
    const THREADS: u32 = 4;
    const ROUNDS: u64 = 100_000;

    let threads = (0..THREADS)
        .map(|i| {
            thread::spawn(move || {
                tid::assign_worker(i).unwrap();
                for _ in 0..ROUNDS {
                    MUTEX.lock().unwrap();
                    // The unsynchronized pair is exactly what the lock must
                    // make safe.
                    let value = COUNTER.load(Relaxed);
                    COUNTER.store(value + 1, Relaxed);
                    MUTEX.unlock().unwrap();
                }
                tid::clear();
            })
        })
        .collect::<Vec<_>>();
    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(COUNTER.load(Relaxed), THREADS as u64 * ROUNDS);
}

#[test]
fn condition_does_not_lose_wakeups() {
    static MUTEX: Mutex = Mutex::new();
    static CONDITION: Condition = Condition::new();
    static READY: AtomicBool = AtomicBool::new(false);

    let producer = thread::spawn(|| {
        tid::assign_worker(8).unwrap();
        MUTEX.lock().unwrap();
        READY.store(true, Relaxed);
        CONDITION.signal().unwrap();
        MUTEX.unlock().unwrap();
        tid::clear();
    });

    let consumer = thread::spawn(|| {
        tid::assign_worker(9).unwrap();
        MUTEX.lock().unwrap();
        while !READY.load(Relaxed) {
            MUTEX.wait(&CONDITION).unwrap();
        }
        assert!(READY.load(Relaxed));
        MUTEX.unlock().unwrap();
        tid::clear();
    });

    producer.join().unwrap();
    consumer.join().unwrap();
}

#[test]
fn condition_broadcast_releases_every_waiter() {
    static MUTEX: Mutex = Mutex::new();
    static CONDITION: Condition = Condition::new();
    static GO: AtomicBool = AtomicBool::new(false);
    const WAITERS: u32 = 4;

    let waiters = (0..WAITERS)
        .map(|i| {
            thread::spawn(move || {
                tid::assign_worker(20 + i).unwrap();
                MUTEX.lock().unwrap();
                while !GO.load(Relaxed) {
                    MUTEX.wait(&CONDITION).unwrap();
                }
                MUTEX.unlock().unwrap();
                tid::clear();
            })
        })
        .collect::<Vec<_>>();

    // Let the waiters reach the wait before broadcasting.
    thread::sleep(Duration::from_millis(50));

    let announcer = thread::spawn(|| {
        tid::assign_worker(24).unwrap();
        MUTEX.lock().unwrap();
        GO.store(true, Relaxed);
        CONDITION.broadcast().unwrap();
        MUTEX.unlock().unwrap();
        tid::clear();
    });
    announcer.join().unwrap();

    for waiter in waiters {
        waiter.join().unwrap();
    }
}

#[test]
fn mutex_wait_reacquires_before_returning() {
    static MUTEX: Mutex = Mutex::new();
    static CONDITION: Condition = Condition::new();
    static STAGE: AtomicUsize = AtomicUsize::new(0);

    let waiter = thread::spawn(|| {
        tid::assign_worker(30).unwrap();
        MUTEX.lock().unwrap();
        while STAGE.load(Relaxed) == 0 {
            MUTEX.wait(&CONDITION).unwrap();
        }
        // Holding the mutex again: nobody can take it now, ourselves
        // included.
        assert_eq!(MUTEX.try_lock(), Err(Code::THREAD_INFO_BUSY));
        MUTEX.unlock().unwrap();
        tid::clear();
    });

    let signaler = thread::spawn(|| {
        tid::assign_worker(31).unwrap();
        loop {
            MUTEX.lock().unwrap();
            STAGE.store(1, Relaxed);
            CONDITION.signal().unwrap();
            MUTEX.unlock().unwrap();
            if STAGE.load(Relaxed) == 1 {
                break;
            }
        }
        tid::clear();
    });

    waiter.join().unwrap();
    signaler.join().unwrap();
}

#[test]
fn qutex_protects_a_plain_collection() {
    static QUTEX: Qutex = Qutex::new();
    const THREADS: usize = 4;
    const ROUNDS: usize = 5_000;

    // The queue lock guards a non-atomic structure; corruption or a lost
    // element would be visible in the final count.
    static LOG: StdMutex<Vec<usize>> = StdMutex::new(Vec::new());

    let threads = (0..THREADS)
        .map(|i| {
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    QUTEX.lock().unwrap();
                    LOG.lock().unwrap().push(i);
                    QUTEX.unlock().unwrap();
                }
            })
        })
        .collect::<Vec<_>>();
    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(LOG.lock().unwrap().len(), THREADS * ROUNDS);
}
