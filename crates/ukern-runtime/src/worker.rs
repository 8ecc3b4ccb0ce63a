//! Worker thread management
//!
//! One OS thread per core in the scheduler's mask, each running that core's
//! dispatch loop. Workers are optionally pinned to the OS CPU with the same
//! number.

use crate::dispatch;
use crate::scheduler::Shared;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use ukern_core::{kdebug, kwarn};

/// Pool of worker threads
pub struct WorkerPool {
    /// (core id, join handle) per worker
    handles: Vec<(usize, JoinHandle<()>)>,
}

impl WorkerPool {
    pub(crate) fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    /// Start the dispatch loop for `core`
    pub(crate) fn spawn_core(&mut self, shared: &Arc<Shared>, core: usize) -> io::Result<()> {
        let shared = Arc::clone(shared);
        let pin = shared.config.pin_workers;
        let handle = thread::Builder::new()
            .name(format!("ukern-core-{}", core))
            .spawn(move || {
                if pin {
                    pin_to_cpu(core);
                }
                dispatch::core_main(shared, core);
            })?;
        self.handles.push((core, handle));
        Ok(())
    }

    /// Wait for all workers to finish
    ///
    /// Workers only return once the scheduler is shutting down.
    pub fn join(self) {
        for (core, handle) in self.handles {
            if handle.join().is_err() {
                kwarn!("worker for core {} panicked", core);
            }
        }
    }

    /// Get number of workers
    #[inline]
    pub fn num_workers(&self) -> usize {
        self.handles.len()
    }
}

/// Pin the calling thread to `cpu`; failure is logged and ignored
#[cfg(target_os = "linux")]
fn pin_to_cpu(cpu: usize) {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    let result = set
        .set(cpu)
        .and_then(|()| sched_setaffinity(Pid::from_raw(0), &set));
    match result {
        Ok(()) => kdebug!("pinned to cpu {}", cpu),
        Err(e) => kwarn!("could not pin to cpu {}: {}", cpu, e),
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_cpu(cpu: usize) {
    kwarn!("cpu pinning not supported on this platform (cpu {})", cpu);
}
