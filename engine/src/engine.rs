// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The engine facade: owns the graph cell and the workers, and exposes the
//! control-plane surface the RPC layer would call.
//!
//! [`Engine`] is the single control-plane handle. Mutating operations take
//! `&mut self` and run with every worker parked; if the engine is running
//! they pause and resume around the mutation, so callers may also hold an
//! explicit [`Engine::pause_all`] across a batch of changes.

use std::cell::UnsafeCell;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use pkt::{PacketBufferMut, PacketPool};
use tracing::info;

use crate::error::EngineError;
use crate::gate::GateIdx;
use crate::graph::{Graph, ModuleId};
use crate::mclass::{InitArg, ModuleClass};
use crate::tap;
use crate::task::{TaskId, TaskRef};
use crate::worker::{worker_main, WorkerSet};
use crate::WorkerId;

/// Shared cell holding the module graph.
///
/// Workers take shared references between pause checks; the control plane
/// takes the exclusive reference only while every worker is parked. That
/// protocol, not a lock, is what makes the `Sync` impl sound.
pub(crate) struct GraphCell<Buf: PacketBufferMut>(UnsafeCell<Graph<Buf>>);

// SAFETY: all aliasing is coordinated by the pause barrier; see the struct
// docs and the call sites of `shared`/`exclusive`.
unsafe impl<Buf: PacketBufferMut> Sync for GraphCell<Buf> {}

impl<Buf: PacketBufferMut> GraphCell<Buf> {
    fn new(graph: Graph<Buf>) -> Self {
        Self(UnsafeCell::new(graph))
    }

    /// # Safety
    ///
    /// The caller must not hold the returned reference across a point where
    /// the control plane could mutate (for workers: across a pause check).
    pub(crate) unsafe fn shared(&self) -> &Graph<Buf> {
        unsafe { &*self.0.get() }
    }

    /// # Safety
    ///
    /// Every worker must be parked at the barrier, and the caller must be
    /// the only control-plane thread.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn exclusive(&self) -> &mut Graph<Buf> {
        unsafe { &mut *self.0.get() }
    }
}

/// State shared between the control handle and all workers.
pub(crate) struct EngineShared<Buf: PacketBufferMut> {
    pub(crate) graph: GraphCell<Buf>,
    pub(crate) workers: WorkerSet,
    pub(crate) pool: Arc<dyn PacketPool<Buf>>,
}

/// The control-plane handle to a running engine.
pub struct Engine<Buf: PacketBufferMut> {
    shared: Arc<EngineShared<Buf>>,
    handles: Vec<JoinHandle<()>>,
    paused: bool,
}

impl<Buf: PacketBufferMut> Engine<Buf> {
    /// Bring up the engine with `num_workers` pinned poll loops (at least
    /// one). Workers start immediately, spinning over an empty graph.
    pub fn start(
        pool: Arc<dyn PacketPool<Buf>>,
        num_workers: usize,
    ) -> Result<Self, EngineError> {
        let num_workers = num_workers.max(1);
        let shared = Arc::new(EngineShared {
            graph: GraphCell::new(Graph::new(num_workers)),
            workers: WorkerSet::new(num_workers),
            pool,
        });

        let mut handles = Vec::with_capacity(num_workers);
        for wid in 0..num_workers {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("worker-{wid}"))
                .spawn(move || worker_main(shared, wid))
                .map_err(|_| EngineError::OutOfMemory)?;
            handles.push(handle);
        }
        info!(workers = num_workers, "engine started");
        Ok(Self {
            shared,
            handles,
            paused: false,
        })
    }

    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.shared.workers.ctls.len()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Park every worker at the barrier. Returns once all have acknowledged.
    pub fn pause_all(&mut self) {
        if self.paused {
            return;
        }
        self.shared.workers.request_pause.store(true, Ordering::Release);
        for ctl in &self.shared.workers.ctls {
            while !ctl.paused.load(Ordering::Acquire) {
                std::hint::spin_loop();
            }
        }
        self.paused = true;
    }

    /// Release every parked worker.
    pub fn resume_all(&mut self) {
        if !self.paused {
            return;
        }
        // drop the request before releasing anyone, so a fast worker cannot
        // loop around and re-park against a stale request
        self.shared.workers.request_pause.store(false, Ordering::Release);
        for ctl in &self.shared.workers.ctls {
            ctl.paused.store(false, Ordering::Release);
        }
        self.paused = false;
    }

    /// Run a graph mutation with every worker parked, preserving the
    /// caller's pause state.
    fn with_graph<R>(&mut self, f: impl FnOnce(&mut Graph<Buf>) -> R) -> R {
        let was_running = !self.paused;
        if was_running {
            self.pause_all();
        }
        // SAFETY: every worker is parked at the barrier and `&mut self`
        // makes this the only control-plane caller.
        let result = f(unsafe { self.shared.graph.exclusive() });
        if was_running {
            self.resume_all();
        }
        result
    }

    /// Read-only access to the graph.
    fn read_graph<R>(&self, f: impl FnOnce(&Graph<Buf>) -> R) -> R {
        // SAFETY: mutation only happens through `&mut self` methods of this
        // handle; a shared borrow of self keeps those out, and workers only
        // ever read.
        f(unsafe { self.shared.graph.shared() })
    }

    fn resolve(graph: &Graph<Buf>, name: &str) -> Result<ModuleId, EngineError> {
        graph
            .find_module(name)
            .ok_or_else(|| EngineError::NotFound(name.to_owned()))
    }

    /// Make an operator class available for `module_create`.
    pub fn register_class(&mut self, class: ModuleClass<Buf>) -> Result<(), EngineError> {
        self.with_graph(|g| g.register_class(class))
    }

    /// Create a module; returns its (possibly derived) name.
    pub fn module_create(
        &mut self,
        class: &str,
        name: Option<&str>,
        arg: &InitArg,
    ) -> Result<String, EngineError> {
        self.with_graph(|g| {
            let id = g.create_module(name, class, arg)?;
            let m = g
                .module(id)
                .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
            Ok(m.name().to_owned())
        })
    }

    pub fn module_destroy(&mut self, name: &str) -> Result<(), EngineError> {
        self.with_graph(|g| {
            let id = Self::resolve(g, name)?;
            g.destroy_module(id)
        })
    }

    pub fn connect(
        &mut self,
        src: &str,
        ogate: GateIdx,
        dst: &str,
        igate: GateIdx,
    ) -> Result<(), EngineError> {
        self.with_graph(|g| {
            let p = Self::resolve(g, src)?;
            let q = Self::resolve(g, dst)?;
            g.connect(p, ogate, q, igate)
        })
    }

    pub fn disconnect(&mut self, src: &str, ogate: GateIdx) -> Result<(), EngineError> {
        self.with_graph(|g| {
            let p = Self::resolve(g, src)?;
            g.disconnect(p, ogate)
        })
    }

    /// Install a task on a module.
    pub fn register_task(&mut self, name: &str, arg: InitArg) -> Result<TaskId, EngineError> {
        self.with_graph(|g| {
            let id = Self::resolve(g, name)?;
            g.register_task(id, arg).ok_or_else(|| {
                EngineError::InvalidArgument(format!(
                    "cannot register a task on '{name}' (class capability or free slots)"
                ))
            })
        })
    }

    /// Number of tasks installed on a module.
    pub fn num_module_tasks(&self, name: &str) -> Result<usize, EngineError> {
        self.read_graph(|g| {
            let id = Self::resolve(g, name)?;
            let m = g
                .module(id)
                .ok_or_else(|| EngineError::NotFound(name.to_owned()))?;
            Ok(m.num_tasks())
        })
    }

    /// Put a module's task on a worker's rotation.
    pub fn attach_task(
        &mut self,
        name: &str,
        tid: TaskId,
        wid: WorkerId,
    ) -> Result<(), EngineError> {
        self.with_graph(|g| {
            let module = Self::resolve(g, name)?;
            g.attach_task(wid, TaskRef { module, tid })
        })
    }

    /// Mirror packets crossing `name[ogate]` into the fifo at `path` as a
    /// pcap stream. The gate must be connected.
    pub fn tcpdump_enable(
        &mut self,
        name: &str,
        ogate: GateIdx,
        path: &Path,
    ) -> Result<(), EngineError> {
        self.with_graph(|g| {
            let id = Self::resolve(g, name)?;
            let m = g
                .module(id)
                .ok_or_else(|| EngineError::NotFound(name.to_owned()))?;
            let og = m.ogates().get(ogate).ok_or_else(|| {
                EngineError::InvalidArgument(format!("ogate {ogate} of '{name}' is not connected"))
            })?;
            let fd = tap::open_fifo(path)?;
            og.tap.enable(fd);
            Ok(())
        })
    }

    pub fn tcpdump_disable(&mut self, name: &str, ogate: GateIdx) -> Result<(), EngineError> {
        self.with_graph(|g| {
            let id = Self::resolve(g, name)?;
            let m = g
                .module(id)
                .ok_or_else(|| EngineError::NotFound(name.to_owned()))?;
            let og = m.ogates().get(ogate).ok_or_else(|| {
                EngineError::InvalidArgument(format!("ogate {ogate} of '{name}' is not connected"))
            })?;
            og.tap.disable()
        })
    }

    /// Query a module's operator (summaries, counters). Runs under the
    /// pause barrier so the operator sees quiescent state.
    pub fn module_query(&mut self, name: &str, arg: &InitArg) -> Result<InitArg, EngineError> {
        self.with_graph(|g| {
            let id = Self::resolve(g, name)?;
            let m = g
                .module(id)
                .ok_or_else(|| EngineError::NotFound(name.to_owned()))?;
            m.op.query(arg)
        })
    }

    /// Module names, windowed, in stable order.
    #[must_use]
    pub fn list_modules(&self, offset: usize, max: usize) -> Vec<String> {
        self.read_graph(|g| g.list_modules(offset, max))
    }

    /// Total packets silently dropped on inactive ogates, across workers.
    #[must_use]
    pub fn silent_drops(&self) -> u64 {
        self.shared
            .workers
            .ctls
            .iter()
            .map(|ctl| ctl.silent_drops.load(Ordering::Relaxed))
            .sum()
    }

    /// Per-worker silent-drop counters.
    #[must_use]
    pub fn worker_silent_drops(&self) -> Vec<u64> {
        self.shared
            .workers
            .ctls
            .iter()
            .map(|ctl| ctl.silent_drops.load(Ordering::Relaxed))
            .collect()
    }

    /// The pool packets are allocated from and freed to.
    #[must_use]
    pub fn pool(&self) -> &Arc<dyn PacketPool<Buf>> {
        &self.shared.pool
    }

    /// Structural audit of the graph invariants (tests and debugging).
    pub fn audit(&self) -> Result<(), String> {
        self.read_graph(Graph::audit)
    }

    /// Tear the engine down: park every worker, then stop and join them.
    pub fn shutdown(mut self) {
        self.stop_workers();
    }

    fn stop_workers(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        // teardown only happens with all workers at the barrier
        self.pause_all();
        for ctl in &self.shared.workers.ctls {
            ctl.stop.store(true, Ordering::Release);
        }
        self.shared.workers.request_pause.store(false, Ordering::Release);
        for ctl in &self.shared.workers.ctls {
            ctl.paused.store(false, Ordering::Release);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        self.paused = false;
        info!("engine stopped");
    }
}

impl<Buf: PacketBufferMut> Drop for Engine<Buf> {
    fn drop(&mut self) {
        self.stop_workers();
    }
}
