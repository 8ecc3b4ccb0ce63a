//! Basic ukern example
//!
//! Runs fibers at different priorities, passes work through a mutex and
//! condition variable, and gates a group of fibers on an address wait.
//!
//! # Environment Variables
//!
//! - `UKERN_FLUSH_EPRINT=1` - Flush debug output immediately (useful for crash debugging)
//! - `UKERN_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `UKERN_CORE_MASK=0b11` - Cores to dispatch on

use ukern::sync::{KCondvar, KMutex};
use ukern::{kdebug, kinfo, spawn, spawn_with_priority, yield_now};
use ukern::{Kernel, SchedulerConfig, MAX_TIME};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// UKERN_LOG_LEVEL=debug UKERN_FLUSH_EPRINT=1 cargo run -p ukern-basic
fn main() {
    println!("=== ukern Basic Example ===\n");

    let config = SchedulerConfig::default();
    config.print();

    let kernel = match Kernel::new(config) {
        Ok(k) => k,
        Err(e) => {
            eprintln!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = kernel.block_on(|sched| {
        kinfo!("Spawning fibers...");

        // Priorities: the High fiber finishes its loop before the Low one starts
        let mut handles = Vec::new();
        for (name, prio) in [("low", -2), ("normal", 0), ("high", 2)] {
            let h = spawn_with_priority(
                move || {
                    for j in 0..3 {
                        kdebug!("[{}] iteration {}", name, j);
                        yield_now().ok();
                    }
                },
                prio,
            )
            .expect("spawn");
            println!("Spawned {} priority fiber (handle={})", name, h);
            handles.push(h);
        }

        // Producer/consumer over KMutex + KCondvar
        let channel = Arc::new((KMutex::new(VecDeque::new()), KCondvar::new()));
        let consumer_channel = Arc::clone(&channel);
        let consumer = spawn(move || {
            let (queue, ready) = &*consumer_channel;
            let mut sum = 0u64;
            let mut q = queue.lock().expect("lock");
            loop {
                match q.pop_front() {
                    Some(None) => break,
                    Some(Some(v)) => sum += v,
                    None => q = ready.wait(q).expect("wait"),
                }
            }
            println!("Consumer summed {}", sum);
        })
        .expect("spawn");
        handles.push(consumer);

        let (queue, ready) = &*channel;
        for v in 1..=10u64 {
            queue.lock().expect("lock").push_back(Some(v));
            ready.notify_one().expect("notify");
        }
        queue.lock().expect("lock").push_back(None);
        ready.notify_one().expect("notify");

        // A gate: fibers block until the cell leaves 0
        let gate = Arc::new(AtomicU32::new(0));
        for i in 0..3 {
            let gate = Arc::clone(&gate);
            let h = spawn(move || {
                let sched = ukern::Scheduler::current().expect("in fiber");
                sched.wait_for_address_if_equal(&gate, 0, MAX_TIME).expect("wait");
                kdebug!("[gate {}] passed", i);
            })
            .expect("spawn");
            handles.push(h);
        }
        yield_now().ok();
        sched
            .wake_by_address_increment_equal(&gate, 0, -1)
            .expect("open gate");

        for h in &handles {
            sched.join_thread(*h).expect("join");
        }
        handles.len()
    });

    match result {
        Ok(n) => kinfo!("{} fiber(s) completed", n),
        Err(e) => kinfo!("main fiber failed: {}", e),
    }

    println!("\n=== Example Complete ===");
}
