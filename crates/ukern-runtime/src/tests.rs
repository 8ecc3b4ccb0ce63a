//! Scheduler scenario tests
//!
//! Each test builds its own scheduler with deadlock abort off, so a test
//! that leaves fibers blocked forever is torn down by `shutdown` instead of
//! killing the test binary.

use crate::*;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub(crate) fn test_scheduler(cores: usize) -> Scheduler {
    let config = SchedulerConfig::new()
        .num_cores(cores)
        .max_fibers(256)
        .default_stack_size(128 * 1024)
        .deadlock_abort(false)
        .join_poll_interval(Duration::from_micros(200))
        .park_timeout(Duration::from_millis(5));
    let sched = Scheduler::new(config).unwrap();
    sched.start().unwrap();
    sched
}

/// Create a Suspended fiber running `f` with a handle to its scheduler
pub(crate) fn create<F>(sched: &Scheduler, name: &str, priority: i32, f: F) -> FiberHandle
where
    F: FnOnce(Scheduler) + Send + 'static,
{
    let s = sched.clone();
    sched
        .create_thread(name, move || f(s), 0, priority, None)
        .unwrap()
}

/// Create and start a fiber
pub(crate) fn spawn<F>(sched: &Scheduler, name: &str, priority: i32, f: F) -> FiberHandle
where
    F: FnOnce(Scheduler) + Send + 'static,
{
    let h = create(sched, name, priority, f);
    sched.start_thread(h).unwrap();
    h
}

/// Acquire a lock cell for the calling fiber, retrying on a stale owner
pub(crate) fn lock(sched: &Scheduler, cell: &AtomicU32) {
    let me = sched.current_handle();
    loop {
        let owner = FiberHandle::lock_owner(cell.load(Ordering::Acquire));
        match sched.arbitrate_lock(owner, cell, me.as_u32()) {
            Ok(()) => return,
            Err(SchedError::InvalidState) => continue,
            Err(e) => panic!("arbitrate_lock failed: {}", e),
        }
    }
}

/// Poll `cond` from a host thread
pub(crate) fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[test]
fn test_fiber_runs_and_handle_dies() {
    let sched = test_scheduler(2);
    let ran = Arc::new(AtomicBool::new(false));

    let r = Arc::clone(&ran);
    let h = spawn(&sched, "worker", 0, move |_| r.store(true, Ordering::SeqCst));
    sched.join_thread(h).unwrap();

    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(sched.thread_state(h), Err(SchedError::InvalidHandle));
    assert_eq!(sched.start_thread(h), Err(SchedError::InvalidHandle));
    assert_eq!(sched.live_fibers(), 0);
    sched.shutdown();
}

#[test]
fn test_exit_thread_runs_destructors() {
    struct SetOnDrop(Arc<AtomicBool>);
    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    let sched = test_scheduler(1);
    let dropped = Arc::new(AtomicBool::new(false));
    let after_exit = Arc::new(AtomicBool::new(false));

    let (d, a) = (Arc::clone(&dropped), Arc::clone(&after_exit));
    let h = spawn(&sched, "exiter", 0, move |_| {
        let _guard = SetOnDrop(d);
        let exit = true;
        if exit {
            Scheduler::exit_thread();
        }
        a.store(true, Ordering::SeqCst);
    });
    sched.join_thread(h).unwrap();

    assert!(dropped.load(Ordering::SeqCst));
    assert!(!after_exit.load(Ordering::SeqCst));
    sched.shutdown();
}

#[test]
#[should_panic(expected = "not called from a fiber")]
fn test_exit_thread_outside_fiber_panics() {
    Scheduler::exit_thread();
}

#[test]
fn test_unmappable_stack_is_reported() {
    let sched = test_scheduler(1);
    assert_eq!(
        sched.create_thread("huge", || {}, usize::MAX, 0, None),
        Err(SchedError::StackAllocFailed)
    );
    assert_eq!(sched.live_fibers(), 0);

    // The reserved slot was handed back
    let h = spawn(&sched, "fits", 0, |_| {});
    sched.join_thread(h).unwrap();
    sched.shutdown();
}

#[test]
fn test_panicking_fiber_is_reaped() {
    let sched = test_scheduler(1);
    let h = spawn(&sched, "panicker", 0, |_| panic!("boom"));
    sched.join_thread(h).unwrap();

    // The core keeps dispatching afterwards
    let ran = Arc::new(AtomicBool::new(false));
    let r = Arc::clone(&ran);
    let h = spawn(&sched, "after", 0, move |_| r.store(true, Ordering::SeqCst));
    sched.join_thread(h).unwrap();
    assert!(ran.load(Ordering::SeqCst));
    sched.shutdown();
}

#[test]
fn test_create_thread_validation() {
    let sched = test_scheduler(2);

    assert_eq!(
        sched.create_thread("p", || {}, 0, 3, None),
        Err(SchedError::InvalidPriority)
    );
    assert_eq!(
        sched.create_thread("c", || {}, 0, 0, Some(5)),
        Err(SchedError::InvalidCoreId)
    );
    assert_eq!(
        sched.create_thread("s", || {}, 1024, 0, None),
        Err(SchedError::InvalidStackSize)
    );

    let h = sched.create_thread("ok", || {}, 0, -2, Some(1)).unwrap();
    assert_eq!(sched.thread_state(h), Ok(FiberState::Suspended));
    assert_eq!(sched.priority_of(h), Ok(Priority::Low));
    assert_eq!(sched.thread_name(h).as_deref(), Ok("ok"));

    sched.start_thread(h).unwrap();
    assert_eq!(sched.start_thread(h), Err(SchedError::InvalidState));
    sched.join_thread(h).unwrap();
    sched.shutdown();
}

#[test]
fn test_setters_report_unchanged() {
    let sched = test_scheduler(2);
    let h = create(&sched, "idle", 0, |_| {});

    assert_eq!(sched.set_priority(h, 0), Ok(Change::Unchanged));
    assert_eq!(sched.set_priority(h, 2), Ok(Change::Applied));
    assert_eq!(sched.priority_of(h), Ok(Priority::High));
    assert_eq!(sched.set_priority(h, -3), Err(SchedError::InvalidPriority));

    assert_eq!(sched.set_core_mask(h, CoreMask::first_n(2)), Ok(Change::Unchanged));
    assert_eq!(sched.set_core_mask(h, CoreMask::single(1)), Ok(Change::Applied));
    assert_eq!(sched.set_core_mask(h, CoreMask::EMPTY), Err(SchedError::InvalidCoreId));
    assert_eq!(sched.set_core_mask(h, CoreMask::single(7)), Err(SchedError::InvalidCoreId));

    // New fibers start out Suspended; raising them starts them
    assert_eq!(sched.activity_of(h), Ok(ActivityLevel::Suspended));
    assert_eq!(sched.set_activity(h, ActivityLevel::Suspended), Ok(Change::Unchanged));
    assert_eq!(sched.set_activity(h, ActivityLevel::Schedulable), Ok(Change::Applied));
    sched.join_thread(h).unwrap();

    sched.shutdown();
    assert_eq!(sched.set_priority(h, 1), Err(SchedError::InvalidHandle));
    assert_eq!(sched.live_fibers(), 0);
}

#[test]
fn test_suspended_activity_holds_fiber() {
    let sched = test_scheduler(1);
    let ticks = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let (t, st) = (Arc::clone(&ticks), Arc::clone(&stop));
    let h = create(&sched, "held", 0, move |s| {
        while !st.load(Ordering::SeqCst) {
            t.fetch_add(1, Ordering::SeqCst);
            s.yield_now().unwrap();
        }
    });

    // Created but not raised: never dispatched
    thread::sleep(Duration::from_millis(30));
    assert_eq!(ticks.load(Ordering::SeqCst), 0);
    assert_eq!(sched.thread_state(h), Ok(FiberState::Suspended));

    assert_eq!(sched.set_activity(h, ActivityLevel::Schedulable), Ok(Change::Applied));
    assert!(wait_until(Duration::from_secs(5), || ticks.load(Ordering::SeqCst) > 10));
    assert_eq!(sched.start_thread(h), Err(SchedError::InvalidState));

    // Lowered while running: parked at its next yield
    sched.set_activity(h, ActivityLevel::Suspended).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        sched.thread_state(h) == Ok(FiberState::Scheduled)
    }));
    let held_at = ticks.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(ticks.load(Ordering::SeqCst), held_at);

    stop.store(true, Ordering::SeqCst);
    sched.set_activity(h, ActivityLevel::Schedulable).unwrap();
    sched.join_thread(h).unwrap();
    sched.shutdown();
}

#[test]
fn test_fibers_share_worker_thread() {
    let sched = test_scheduler(1);
    let threads = Arc::new(Mutex::new(HashSet::new()));

    let handles: Vec<_> = (0..200)
        .map(|i| {
            let t = Arc::clone(&threads);
            spawn(&sched, &format!("f{}", i), 0, move |s| {
                t.lock().unwrap().insert(thread::current().id());
                s.yield_now().unwrap();
                t.lock().unwrap().insert(thread::current().id());
            })
        })
        .collect();
    for h in handles {
        sched.join_thread(h).unwrap();
    }

    let threads = threads.lock().unwrap();
    assert_eq!(threads.len(), 1);
    assert!(!threads.contains(&thread::current().id()));
    sched.shutdown();
}

#[test]
fn test_identity_survives_migration() {
    let sched = test_scheduler(2);
    let mismatches = Arc::new(AtomicUsize::new(0));
    let workers = Arc::new(Mutex::new(HashSet::new()));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let (m, w) = (Arc::clone(&mismatches), Arc::clone(&workers));
            spawn(&sched, &format!("m{}", i), 0, move |s| {
                let me = s.current_handle();
                for _ in 0..200 {
                    s.yield_now().unwrap();
                    w.lock().unwrap().insert(thread::current().id());
                    if s.current_handle() != me || tls::current_handle() != me {
                        m.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();
    for h in handles {
        sched.join_thread(h).unwrap();
    }

    assert_eq!(mismatches.load(Ordering::SeqCst), 0);
    assert!(workers.lock().unwrap().len() <= 2);
    sched.shutdown();
}

#[test]
fn test_blocking_outside_fiber() {
    let sched = test_scheduler(1);
    let cell = AtomicU32::new(0);

    assert_eq!(sched.sleep(MAX_TIME), Err(SchedError::NotAFiber));
    assert_eq!(sched.yield_now(), Err(SchedError::NotAFiber));
    assert_eq!(
        sched.wait_for_address_if_equal(&cell, 0, MAX_TIME),
        Err(SchedError::NotAFiber)
    );
    assert_eq!(sched.arbitrate_unlock(&cell), Err(SchedError::NotAFiber));
    assert_eq!(sched.current_handle(), FiberHandle::NONE);

    // A free lock is taken without needing a fiber
    sched.arbitrate_lock(FiberHandle::NONE, &cell, 0x55).unwrap();
    assert_eq!(cell.load(Ordering::SeqCst), 0x55);
    sched.shutdown();
}

#[test]
fn test_priority_precedence_single_core() {
    let sched = test_scheduler(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    let mk = |name: &'static str, prio: i32| {
        let order = Arc::clone(&order);
        create(&sched, name, prio, move |s| {
            for _ in 0..5 {
                order.lock().unwrap().push(name);
                s.yield_now().unwrap();
            }
        })
    };
    let low = mk("low", -1);
    let high = mk("high", 1);

    // Start both from one fiber so neither runs before the other is queued
    let starter = spawn(&sched, "starter", 2, move |s| {
        s.start_thread(low).unwrap();
        s.start_thread(high).unwrap();
    });

    sched.join_thread(starter).unwrap();
    sched.join_thread(high).unwrap();
    sched.join_thread(low).unwrap();

    let order = order.lock().unwrap().clone();
    assert_eq!(order, [["high"; 5], ["low"; 5]].concat());
    sched.shutdown();
}

#[test]
fn test_mutual_exclusion_fifo_handoff() {
    let sched = test_scheduler(1);
    let cell = Arc::new(AtomicU32::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));
    let in_section = Arc::new(AtomicBool::new(false));

    let waiters: Vec<FiberHandle> = (0..3)
        .map(|i| {
            let (cell, order, busy) = (Arc::clone(&cell), Arc::clone(&order), Arc::clone(&in_section));
            create(&sched, "waiter", 0, move |s| {
                lock(&s, &cell);
                assert!(!busy.swap(true, Ordering::SeqCst));
                order.lock().unwrap().push(i);
                s.yield_now().unwrap();
                busy.store(false, Ordering::SeqCst);
                s.arbitrate_unlock(&cell).unwrap();
            })
        })
        .collect();

    let c = Arc::clone(&cell);
    let ws = waiters.clone();
    let owner = spawn(&sched, "owner", 1, move |s| {
        lock(&s, &c);
        for &w in &ws {
            s.start_thread(w).unwrap();
        }
        // Let every waiter queue up behind us, in start order
        s.sleep(deadline_after(Duration::from_millis(20))).unwrap();
        assert_ne!(c.load(Ordering::SeqCst) & WAITERS_BIT, 0);
        s.arbitrate_unlock(&c).unwrap();
    });

    sched.join_thread(owner).unwrap();
    for w in waiters {
        sched.join_thread(w).unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(cell.load(Ordering::SeqCst), 0);
    sched.shutdown();
}

#[test]
fn test_lock_handoff_to_high_priority_waiter() {
    let sched = test_scheduler(1);
    let x = Arc::new(AtomicU32::new(0));
    let log = Arc::new(Mutex::new(Vec::new()));

    let (bx, blog) = (Arc::clone(&x), Arc::clone(&log));
    let b = create(&sched, "B", 2, move |s| {
        let a = FiberHandle::lock_owner(bx.load(Ordering::SeqCst));
        let me = s.current_handle().as_u32();
        let result = s.arbitrate_lock(a, &bx, me);
        blog.lock().unwrap().push(format!("B locked {:?}", result));
        s.arbitrate_unlock(&bx).unwrap();
    });

    let (ax, alog) = (Arc::clone(&x), Arc::clone(&log));
    let a = spawn(&sched, "A", 0, move |s| {
        let me = s.current_handle();
        s.arbitrate_lock(FiberHandle::NONE, &ax, me.as_u32()).unwrap();
        alog.lock().unwrap().push("A locked".to_string());

        s.start_thread(b).unwrap();
        s.yield_now().unwrap();
        assert_eq!(s.thread_state(b), Ok(FiberState::Waiting));

        alog.lock().unwrap().push("A unlocking".to_string());
        s.arbitrate_unlock(&ax).unwrap();
        s.yield_now().unwrap();
        alog.lock().unwrap().push("A done".to_string());
    });

    sched.join_thread(a).unwrap();
    sched.join_thread(b).unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["A locked", "A unlocking", "B locked Ok(())", "A done"]
    );
    assert_eq!(x.load(Ordering::SeqCst), 0);
    sched.shutdown();
}

#[test]
fn test_lock_counter_across_cores() {
    const FIBERS: usize = 8;
    const ROUNDS: u32 = 100;

    let sched = test_scheduler(4);
    let cell = Arc::new(AtomicU32::new(0));
    let counter = Arc::new(AtomicU32::new(0));

    let handles: Vec<FiberHandle> = (0..FIBERS)
        .map(|_| {
            let (cell, counter) = (Arc::clone(&cell), Arc::clone(&counter));
            spawn(&sched, "adder", 0, move |s| {
                for _ in 0..ROUNDS {
                    lock(&s, &cell);
                    let v = counter.load(Ordering::Relaxed);
                    s.yield_now().unwrap();
                    counter.store(v + 1, Ordering::Relaxed);
                    s.arbitrate_unlock(&cell).unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        sched.join_thread(h).unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), FIBERS as u32 * ROUNDS);
    assert_eq!(cell.load(Ordering::SeqCst), 0);
    sched.shutdown();
}

#[test]
fn test_timeout_not_before_deadline() {
    let sched = test_scheduler(2);
    let cell = Arc::new(AtomicU32::new(0));
    let outcome = Arc::new(Mutex::new(None));

    let (c, o) = (Arc::clone(&cell), Arc::clone(&outcome));
    let h = spawn(&sched, "timed", 0, move |s| {
        let deadline = deadline_after(Duration::from_millis(30));
        let result = s.wait_for_address_if_equal(&c, 0, deadline);
        *o.lock().unwrap() = Some((result, now() >= deadline));
    });
    sched.join_thread(h).unwrap();

    assert_eq!(*outcome.lock().unwrap(), Some((Err(SchedError::Timeout), true)));
    sched.shutdown();
}

#[test]
fn test_zero_timeout_never_blocks() {
    let sched = test_scheduler(1);
    let results = Arc::new(Mutex::new(Vec::new()));

    let r = Arc::clone(&results);
    let h = spawn(&sched, "poller", 0, move |s| {
        let five = AtomicU32::new(5);
        let three = AtomicU32::new(3);
        let mut r = r.lock().unwrap();
        r.push(s.wait_for_address_if_equal(&five, 5, 0));
        r.push(s.wait_for_address_if_equal(&three, 5, 0));
        r.push(s.wait_for_address_if_less_than(&three, 5, 0, true));
        r.push(s.sleep(0));
    });
    sched.join_thread(h).unwrap();

    assert_eq!(
        *results.lock().unwrap(),
        vec![Err(SchedError::Timeout), Ok(()), Err(SchedError::Timeout), Ok(())]
    );
    sched.shutdown();
}

#[test]
fn test_sleep_and_join_from_fiber() {
    let sched = test_scheduler(2);
    let woke_at = Arc::new(AtomicUsize::new(0));

    let w = Arc::clone(&woke_at);
    let sleeper = spawn(&sched, "sleeper", 0, move |s| {
        let deadline = deadline_after(Duration::from_millis(15));
        s.sleep(deadline).unwrap();
        w.store((now() >= deadline) as usize + 1, Ordering::SeqCst);
    });

    let joined = Arc::new(AtomicBool::new(false));
    let j = Arc::clone(&joined);
    let joiner = spawn(&sched, "joiner", 0, move |s| {
        assert_eq!(s.join_thread(s.current_handle()), Err(SchedError::InvalidState));
        s.join_thread(sleeper).unwrap();
        j.store(true, Ordering::SeqCst);
    });

    sched.join_thread(joiner).unwrap();
    assert!(joined.load(Ordering::SeqCst));
    assert_eq!(woke_at.load(Ordering::SeqCst), 2);
    sched.shutdown();
}

#[test]
fn test_shutdown_cancels_blocked_fibers() {
    struct SleepOnDrop {
        sched: Scheduler,
        result: Arc<Mutex<Option<SchedResult<()>>>>,
    }
    impl Drop for SleepOnDrop {
        fn drop(&mut self) {
            *self.result.lock().unwrap() = Some(self.sched.sleep(MAX_TIME));
        }
    }

    let sched = test_scheduler(2);
    let cell = Arc::new(AtomicU32::new(0));
    let drop_result = Arc::new(Mutex::new(None));

    let (c, dr) = (Arc::clone(&cell), Arc::clone(&drop_result));
    let h = spawn(&sched, "stuck", 0, move |s| {
        let _guard = SleepOnDrop {
            sched: s.clone(),
            result: dr,
        };
        let _ = s.wait_for_address_if_equal(&c, 0, MAX_TIME);
    });
    let never_started = create(&sched, "never", 0, |_| {});

    assert!(wait_until(Duration::from_secs(5), || {
        sched.thread_state(h) == Ok(FiberState::Waiting)
    }));

    sched.shutdown();
    sched.shutdown();

    assert_eq!(*drop_result.lock().unwrap(), Some(Err(SchedError::Terminated)));
    assert_eq!(sched.thread_state(h), Err(SchedError::InvalidHandle));
    assert_eq!(sched.thread_state(never_started), Err(SchedError::InvalidHandle));
    assert_eq!(
        sched.create_thread("late", || {}, 0, 0, None),
        Err(SchedError::Terminated)
    );
    assert!(sched.is_shutting_down());
}

#[test]
fn test_current_scheduler_from_fiber() {
    let sched = test_scheduler(1);
    let seen = Arc::new(Mutex::new(None));

    let s2 = Arc::clone(&seen);
    let h = spawn(&sched, "named", 0, move |s| {
        let cur = Scheduler::current().unwrap();
        let me = cur.current_handle();
        *s2.lock().unwrap() = Some((me, cur.thread_name(me), s.thread_state(me)));
    });
    sched.join_thread(h).unwrap();

    let (me, name, state) = seen.lock().unwrap().take().unwrap();
    assert_eq!(me, h);
    assert_eq!(name.as_deref(), Ok("named"));
    assert_eq!(state, Ok(FiberState::Running));
    assert!(Scheduler::current().is_none());
    sched.shutdown();
}
