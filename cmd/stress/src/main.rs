//! Stress test - many fibers contending on one lock and one key
//!
//! Every fiber is backed by an OS thread, so counts in the hundreds are
//! already a heavy load.
//!
//! Usage: `stress [fibers] [rounds]`

use ukern::sync::{KCondvar, KMutex};
use ukern::{spawn, yield_now, Kernel, SchedulerConfig};
use std::sync::Arc;
use std::time::Instant;

fn main() {
    println!("=== ukern Stress Test ===\n");

    let mut args = std::env::args().skip(1);
    let num_fibers: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(200);
    let rounds: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(100);

    println!("Spawning {} fibers x {} rounds...", num_fibers, rounds);

    let config = SchedulerConfig::default()
        .max_fibers(num_fibers + 16)
        .default_stack_size(64 * 1024);

    let kernel = Kernel::new(config).expect("config");

    let result = kernel.block_on(move |sched| {
        let start = Instant::now();
        let state = Arc::new((KMutex::new((0u64, 0usize)), KCondvar::new()));

        let mut handles = Vec::with_capacity(num_fibers);
        for i in 0..num_fibers {
            let state = Arc::clone(&state);
            let h = spawn(move || {
                let (lock, all_done) = &*state;
                for _ in 0..rounds {
                    let mut g = lock.lock().expect("lock");
                    g.0 += 1;
                    drop(g);
                    yield_now().ok();
                }

                // Barrier: the last fiber wakes the rest
                let mut g = lock.lock().expect("lock");
                g.1 += 1;
                if g.1 == num_fibers {
                    all_done.notify_all().expect("notify");
                } else {
                    while g.1 < num_fibers {
                        g = all_done.wait(g).expect("wait");
                    }
                }
            })
            .expect("spawn");
            handles.push(h);

            // Progress indicator
            if (i + 1) % 100 == 0 {
                print!("\rSpawned: {}/{}", i + 1, num_fibers);
            }
        }

        let spawn_time = start.elapsed();
        println!("\n\nSpawn time: {:?}", spawn_time);

        let run_start = Instant::now();
        for h in handles {
            sched.join_thread(h).expect("join");
        }
        let run_time = run_start.elapsed();

        let (lock, _) = &*state;
        let total = lock.lock().expect("lock").0;
        (total, spawn_time, run_time)
    });

    let (total, spawn_time, run_time) = match result {
        Ok(r) => r,
        Err(e) => {
            eprintln!("stress run failed: {}", e);
            std::process::exit(1);
        }
    };

    let expected = num_fibers as u64 * rounds;
    println!("\n=== Results ===");
    println!("Fibers:          {}", num_fibers);
    println!("Increments:      {} (expected {})", total, expected);
    println!("Spawn time:      {:?}", spawn_time);
    println!("Run time:        {:?}", run_time);
    println!("Lock handoffs/s: {:.0}", total as f64 / run_time.as_secs_f64());

    if total != expected {
        eprintln!("MISMATCH");
        std::process::exit(1);
    }
    println!("\n=== Stress Test Complete ===");
}
