// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Poll-mode workers and the pause barrier.
//!
//! One worker is pinned per CPU. The barrier is a pair of flags: a global
//! `request_pause` written by the control plane and a per-worker `paused`
//! acknowledgement. Workers busy-spin while parked; they never block in
//! the kernel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;
use pkt::PacketBufferMut;
use tracing::{info, warn};

use crate::dispatch::{run_module_task, WorkerCtx};
use crate::engine::EngineShared;
use crate::WorkerId;

/// Per-worker shared flags and counters.
#[derive(Debug, Default)]
pub(crate) struct WorkerCtl {
    /// Set by the worker when it parks at the barrier; cleared by the
    /// control plane to release it.
    pub(crate) paused: AtomicBool,
    /// One-way shutdown signal.
    pub(crate) stop: AtomicBool,
    /// Batches emitted on inactive ogates, in packets.
    pub(crate) silent_drops: AtomicU64,
}

impl WorkerCtl {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

/// The barrier state shared by the control plane and all workers.
#[derive(Debug)]
pub(crate) struct WorkerSet {
    pub(crate) request_pause: AtomicBool,
    pub(crate) ctls: Vec<Arc<WorkerCtl>>,
}

impl WorkerSet {
    pub(crate) fn new(num_workers: usize) -> Self {
        Self {
            request_pause: AtomicBool::new(false),
            ctls: (0..num_workers).map(|_| Arc::new(WorkerCtl::new())).collect(),
        }
    }
}

fn pin_to_cpu(wid: WorkerId) {
    let cpus = std::thread::available_parallelism().map_or(1, usize::from);
    let mut set = CpuSet::new();
    if set.set(wid % cpus).is_err() {
        warn!(worker = wid, "cpu {} not representable, not pinning", wid % cpus);
        return;
    }
    if let Err(e) = sched_setaffinity(Pid::from_raw(0), &set) {
        warn!(worker = wid, "failed to pin to cpu {}: {e}", wid % cpus);
    }
}

/// The worker loop: park when asked, sweep `init_worker` hooks for modules
/// added since the last observation, then run one rotation of the schedule.
pub(crate) fn worker_main<Buf: PacketBufferMut>(shared: Arc<EngineShared<Buf>>, wid: WorkerId) {
    pin_to_cpu(wid);
    let ctl = Arc::clone(&shared.workers.ctls[wid]);
    let mut wctx = WorkerCtx::new(wid, Arc::clone(&shared.pool), Arc::clone(&ctl));
    let mut seen_epoch = 0u64;

    info!(worker = wid, "worker started");
    loop {
        if ctl.stop.load(Ordering::Acquire) {
            break;
        }
        if shared.workers.request_pause.load(Ordering::Acquire) {
            ctl.paused.store(true, Ordering::Release);
            while ctl.paused.load(Ordering::Acquire) {
                if ctl.stop.load(Ordering::Acquire) {
                    info!(worker = wid, "worker stopped at barrier");
                    return;
                }
                std::hint::spin_loop();
            }
        }

        // SAFETY: the control plane mutates the graph only while every
        // worker is parked in the spin above. Between two pause checks the
        // graph is stable, and this reference never outlives the iteration.
        let graph = unsafe { shared.graph.shared() };

        if graph.epoch() != seen_epoch {
            for m in graph.modules_newer_than(seen_epoch) {
                if m.class().caps.init_worker {
                    m.op.init_worker(wid);
                }
            }
            seen_epoch = graph.epoch();
        }

        for &tref in graph.schedule(wid) {
            run_module_task(graph, &mut wctx, tref);
        }
    }
    info!(worker = wid, "worker stopped");
}
