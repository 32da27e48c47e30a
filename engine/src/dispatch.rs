// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Batch traversal through the gate graph.
//!
//! A task produces `(batch, ogate)`; [`GateCtx::emit`] then walks the graph
//! depth first, calling each downstream operator through the ogate's cached
//! target handle. A batch emitted on an inactive ogate is a silent drop:
//! counted per worker and returned to the pool. Cycle avoidance is the
//! graph author's responsibility.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use pkt::{PacketBatch, PacketBufferMut, PacketPool};

use crate::gate::GateIdx;
use crate::graph::{Graph, ModuleId};
use crate::tap;
use crate::task::TaskRef;
use crate::trace;
use crate::worker::WorkerCtl;
use crate::WorkerId;

/// Per-worker dataplane state threaded through every dispatch.
pub(crate) struct WorkerCtx<Buf: PacketBufferMut> {
    pub(crate) wid: WorkerId,
    pub(crate) pool: Arc<dyn PacketPool<Buf>>,
    pub(crate) ctl: Arc<WorkerCtl>,
}

impl<Buf: PacketBufferMut> WorkerCtx<Buf> {
    pub(crate) fn new(wid: WorkerId, pool: Arc<dyn PacketPool<Buf>>, ctl: Arc<WorkerCtl>) -> Self {
        Self { wid, pool, ctl }
    }

    /// Silent drop: count the batch and give its buffers back.
    pub(crate) fn deadend(&mut self, mut batch: PacketBatch<Buf>) {
        self.ctl
            .silent_drops
            .fetch_add(batch.cnt() as u64, Ordering::Relaxed);
        self.pool.free_bulk(&mut batch);
    }
}

/// Dispatch context handed to `process_batch`. `emit` continues the
/// traversal on one of the current module's ogates.
pub struct GateCtx<'g, 'w, Buf: PacketBufferMut> {
    pub(crate) graph: &'g Graph<Buf>,
    pub(crate) wctx: &'w mut WorkerCtx<Buf>,
    pub(crate) module: ModuleId,
}

impl<Buf: PacketBufferMut> GateCtx<'_, '_, Buf> {
    /// The worker running this dispatch.
    #[must_use]
    pub fn wid(&self) -> WorkerId {
        self.wctx.wid
    }

    /// Return a batch to the pool without counting it as a drop. This is
    /// what terminal operators (sinks) do with consumed packets.
    pub fn free(&mut self, mut batch: PacketBatch<Buf>) {
        self.wctx.pool.free_bulk(&mut batch);
    }

    /// Send `batch` out of the current module on `ogate`. An inactive gate
    /// silently drops the whole batch.
    pub fn emit(&mut self, ogate: GateIdx, mut batch: PacketBatch<Buf>) {
        if batch.is_empty() {
            return;
        }
        let graph = self.graph;

        let Some(og) = graph.module(self.module).and_then(|m| m.ogates().get(ogate)) else {
            self.wctx.deadend(batch);
            return;
        };
        if og.tap.is_enabled() {
            tap::dump_batch(&og.tap, &mut batch);
        }

        let (q, igate_idx) = og.peer();
        let Some(next) = graph.module(q) else {
            // cannot happen while the gate invariants hold
            self.wctx.deadend(batch);
            return;
        };

        trace::before_call(next.name(), batch.cnt());
        next.op.process_batch(
            &mut GateCtx {
                graph,
                wctx: &mut *self.wctx,
                module: q,
            },
            igate_idx,
            batch,
        );
        trace::after_call();
    }
}

/// Context handed to `run_task`: enough to mint fresh batches.
pub struct TaskCtx<'w, Buf: PacketBufferMut> {
    pub(crate) wctx: &'w mut WorkerCtx<Buf>,
}

impl<Buf: PacketBufferMut> TaskCtx<'_, Buf> {
    #[must_use]
    pub fn wid(&self) -> WorkerId {
        self.wctx.wid
    }

    /// Allocate one zero-filled buffer of `len` frame bytes.
    #[must_use]
    pub fn allocate(&self, len: usize) -> Option<Buf> {
        self.wctx.pool.allocate(len)
    }

    /// Allocate up to `n` buffers of `len` bytes; stops early if the pool
    /// runs dry.
    #[must_use]
    pub fn alloc_batch(&self, n: usize, len: usize) -> PacketBatch<Buf> {
        let mut batch = PacketBatch::new();
        for _ in 0..n {
            let Some(pkt) = self.wctx.pool.allocate(len) else {
                break;
            };
            if batch.push(pkt).is_err() {
                break;
            }
        }
        batch
    }

    /// Return a batch to the pool.
    pub fn free(&mut self, mut batch: PacketBatch<Buf>) {
        self.wctx.pool.free_bulk(&mut batch);
    }
}

/// Run one task invocation and fully traverse whatever it emits.
pub(crate) fn run_module_task<Buf: PacketBufferMut>(
    graph: &Graph<Buf>,
    wctx: &mut WorkerCtx<Buf>,
    tref: TaskRef,
) {
    let Some(m) = graph.module(tref.module) else {
        return;
    };
    let Some(arg) = m.task_arg(tref.tid) else {
        return;
    };

    trace::start(wctx.wid, m.name(), "TASK");
    let mut worked = false;
    let produced = m.op.run_task(&mut TaskCtx { wctx: &mut *wctx }, arg);
    if let Some((batch, ogate)) = produced {
        worked = !batch.is_empty();
        GateCtx {
            graph,
            wctx: &mut *wctx,
            module: tref.module,
        }
        .emit(ogate, batch);
    }
    trace::end(worked);
}
