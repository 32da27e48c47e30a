// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The module graph: arena, namespace, connection protocol, task registry.
//!
//! Everything here executes on the control plane while workers are parked;
//! none of it is called from the packet path except through shared
//! references handed out by the engine's graph cell.

use std::fmt;
use std::sync::Arc;

use pkt::PacketBufferMut;
use tracing::debug;

use crate::error::EngineError;
use crate::gate::{GateIdx, Igate, Ogate};
use crate::mclass::{InitArg, ModuleClass};
use crate::module::{snakeify, Module, ModuleName};
use crate::namespace::{Namespace, NsType};
use crate::task::{Task, TaskId, TaskRef};
use crate::{WorkerId, MAX_GATES};

/// Stable handle to a module slot in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub(crate) u32);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module #{}", self.0)
    }
}

/// Handle to a registered class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ClassId(u32);

/// What a namespace entry points at.
#[derive(Debug, Clone, Copy)]
pub(crate) enum NsHandle {
    Module(ModuleId),
    Class(ClassId),
}

/// The module graph plus per-worker task schedules.
#[derive(Debug)]
pub struct Graph<Buf: PacketBufferMut> {
    ns: Namespace<NsHandle>,
    classes: Vec<Arc<ModuleClass<Buf>>>,
    modules: Vec<Option<Box<Module<Buf>>>>,
    free_slots: Vec<u32>,
    /// Bumped on every module registration; never reused, unlike arena slots.
    epoch: u64,
    schedules: Vec<Vec<TaskRef>>,
}

impl<Buf: PacketBufferMut> Graph<Buf> {
    #[must_use]
    pub fn new(num_workers: usize) -> Self {
        Self {
            ns: Namespace::new(),
            classes: Vec::new(),
            modules: Vec::new(),
            free_slots: Vec::new(),
            epoch: 0,
            schedules: vec![Vec::new(); num_workers],
        }
    }

    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.schedules.len()
    }

    /// Make a class available under its display name.
    pub fn register_class(&mut self, class: ModuleClass<Buf>) -> Result<(), EngineError> {
        if self.ns.contains(class.name) {
            return Err(EngineError::NameConflict(class.name.to_owned()));
        }
        #[allow(clippy::cast_possible_truncation)]
        let cid = ClassId(self.classes.len() as u32);
        let name = class.name;
        self.classes.push(Arc::new(class));
        self.ns.insert(NsType::Class, name, NsHandle::Class(cid))
    }

    /// Look up a registered class by display name.
    #[must_use]
    pub fn class(&self, name: &str) -> Option<Arc<ModuleClass<Buf>>> {
        match self.ns.lookup(NsType::Class, name)? {
            NsHandle::Class(cid) => self.classes.get(cid.0 as usize).cloned(),
            NsHandle::Module(_) => None,
        }
    }

    /// Resolve a module name.
    #[must_use]
    pub fn find_module(&self, name: &str) -> Option<ModuleId> {
        match self.ns.lookup(NsType::Module, name)? {
            NsHandle::Module(id) => Some(id),
            NsHandle::Class(_) => None,
        }
    }

    #[must_use]
    pub fn module(&self, id: ModuleId) -> Option<&Module<Buf>> {
        self.modules.get(id.0 as usize)?.as_deref()
    }

    pub(crate) fn module_mut(&mut self, id: ModuleId) -> Option<&mut Module<Buf>> {
        self.modules.get_mut(id.0 as usize)?.as_deref_mut()
    }

    fn mod_ref(&self, id: ModuleId) -> Result<&Module<Buf>, EngineError> {
        self.module(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    fn mod_mut(&mut self, id: ModuleId) -> Result<&mut Module<Buf>, EngineError> {
        self.module_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    /// All live modules, in arena order.
    pub fn modules(&self) -> impl Iterator<Item = &Module<Buf>> {
        self.modules.iter().filter_map(|slot| slot.as_deref())
    }

    /// Modules registered after `epoch`. Workers sweep this after a resume
    /// to run `init_worker` hooks exactly once per module they observe.
    pub fn modules_newer_than(&self, epoch: u64) -> impl Iterator<Item = &Module<Buf>> {
        self.modules().filter(move |m| m.epoch > epoch)
    }

    /// Current registration epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn derive_default_name(&self, class: &ModuleClass<Buf>) -> ModuleName {
        let stem = class
            .def_module_name
            .map_or_else(|| snakeify(class.name), str::to_owned);
        for i in 0u32.. {
            let candidate = ModuleName::new(&format!("{stem}{i}"));
            if !self.ns.contains(candidate.as_str()) {
                return candidate;
            }
        }
        unreachable!("u32 name suffixes exhausted")
    }

    /// Create a module of class `class_name`. A missing `name` derives one
    /// from the class (`foo_bar_baz0`, `foo_bar_baz1`, ...).
    pub fn create_module(
        &mut self,
        name: Option<&str>,
        class_name: &str,
        arg: &InitArg,
    ) -> Result<ModuleId, EngineError> {
        let class = self
            .class(class_name)
            .ok_or_else(|| EngineError::NotFound(class_name.to_owned()))?;

        let mname = match name {
            Some(n) => {
                if self.ns.contains(n) {
                    return Err(EngineError::NameConflict(n.to_owned()));
                }
                ModuleName::new(n)
            }
            None => self.derive_default_name(&class),
        };

        let op = (class.init)(arg)?;

        let slot = self.free_slots.pop().unwrap_or_else(|| {
            self.modules.push(None);
            #[allow(clippy::cast_possible_truncation)]
            let s = (self.modules.len() - 1) as u32;
            s
        });
        let id = ModuleId(slot);

        if let Err(e) = self
            .ns
            .insert(NsType::Module, mname.as_str(), NsHandle::Module(id))
        {
            self.free_slots.push(slot);
            return Err(e);
        }

        self.epoch += 1;
        let module = Box::new(Module::new(mname, class, op, self.epoch));
        debug!(module = module.name(), "created module");
        self.modules[slot as usize] = Some(module);
        Ok(id)
    }

    /// Destroy a module: deinit, detach every upstream edge, then every
    /// downstream edge, drop its tasks, and release the name. The ordering
    /// keeps the gate invariants true at every intermediate step.
    pub fn destroy_module(&mut self, id: ModuleId) -> Result<(), EngineError> {
        self.mod_ref(id)?.op.deinit();

        // upstream edges point at us; tear each down from its owner side
        let upstream: Vec<(ModuleId, GateIdx)> = self
            .mod_ref(id)?
            .igates
            .iter_active()
            .flat_map(|(_, ig)| ig.upstream.iter().copied())
            .collect();
        for (pid, ogidx) in upstream {
            self.disconnect(pid, ogidx)?;
        }

        let ogidxs: Vec<GateIdx> = self
            .mod_ref(id)?
            .ogates
            .iter_active()
            .map(|(i, _)| i)
            .collect();
        for i in ogidxs {
            self.disconnect(id, i)?;
        }

        for sched in &mut self.schedules {
            sched.retain(|t| t.module != id);
        }

        let module = self.modules[id.0 as usize]
            .take()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        self.ns.remove(module.name());
        self.free_slots.push(id.0);
        debug!(module = module.name(), "destroyed module");
        Ok(())
    }

    /// Establish the edge `p[ogate_idx] -> q[igate_idx]`.
    pub fn connect(
        &mut self,
        p: ModuleId,
        ogate_idx: GateIdx,
        q: ModuleId,
        igate_idx: GateIdx,
    ) -> Result<(), EngineError> {
        {
            let pm = self.mod_ref(p)?;
            let qm = self.mod_ref(q)?;
            if !qm.class.caps.process_batch {
                return Err(EngineError::InvalidArgument(format!(
                    "class {} cannot receive batches",
                    qm.class.name
                )));
            }
            if ogate_idx >= pm.class.num_ogates || ogate_idx >= MAX_GATES {
                return Err(EngineError::InvalidArgument(format!(
                    "ogate {ogate_idx} out of range for class {}",
                    pm.class.name
                )));
            }
            if igate_idx >= qm.class.num_igates || igate_idx >= MAX_GATES {
                return Err(EngineError::InvalidArgument(format!(
                    "igate {igate_idx} out of range for class {}",
                    qm.class.name
                )));
            }
        }

        {
            let pm = self.mod_mut(p)?;
            pm.ogates.ensure(ogate_idx)?;
            if pm.ogates.is_active(ogate_idx) {
                return Err(EngineError::Busy);
            }
        }

        {
            let qm = self.mod_mut(q)?;
            qm.igates.ensure(igate_idx)?;
            if !qm.igates.is_active(igate_idx) {
                qm.igates.set(igate_idx, Igate::default());
            }
            qm.igates
                .get_mut(igate_idx)
                .unwrap_or_else(|| unreachable!())
                .upstream
                .push((p, ogate_idx));
        }

        self.mod_mut(p)?.ogates.set(ogate_idx, Ogate::new(q, igate_idx));
        Ok(())
    }

    /// Tear down the edge leaving `p[ogate_idx]`. Disconnecting an inactive
    /// ogate is a no-op success. The peer igate is freed when its last
    /// upstream goes away.
    pub fn disconnect(&mut self, p: ModuleId, ogate_idx: GateIdx) -> Result<(), EngineError> {
        if ogate_idx >= self.mod_ref(p)?.class.num_ogates {
            return Err(EngineError::InvalidArgument(format!(
                "ogate {ogate_idx} out of range"
            )));
        }

        let Some(ogate) = self.mod_mut(p)?.ogates.clear(ogate_idx) else {
            return Ok(());
        };
        let (q, igate_idx) = ogate.peer();

        if let Some(qm) = self.module_mut(q) {
            let empty = match qm.igates.get_mut(igate_idx) {
                Some(ig) => {
                    ig.upstream.retain(|&e| e != (p, ogate_idx));
                    ig.upstream.is_empty()
                }
                None => false,
            };
            if empty {
                qm.igates.clear(igate_idx);
            }
        }
        Ok(())
    }

    /// Install a task on `id`. `None` mirrors the wire surface's invalid
    /// task id: class lacks `run_task`, module unknown, or no free slot.
    pub fn register_task(&mut self, id: ModuleId, arg: InitArg) -> Option<TaskId> {
        let m = self.module_mut(id)?;
        if !m.class.caps.run_task {
            return None;
        }
        let tid = m.free_task_slot()?;
        m.tasks[tid] = Some(Task::new(arg));
        Some(tid)
    }

    /// Occupied task slots of a module.
    pub fn tasks(&self, id: ModuleId) -> impl Iterator<Item = TaskRef> + '_ {
        self.module(id)
            .into_iter()
            .flat_map(move |m| {
                m.tasks
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.is_some())
                    .map(move |(tid, _)| TaskRef { module: id, tid })
            })
    }

    /// Put a task on a worker's rotation.
    pub fn attach_task(&mut self, wid: WorkerId, tref: TaskRef) -> Result<(), EngineError> {
        if self
            .mod_ref(tref.module)?
            .task_arg(tref.tid)
            .is_none()
        {
            return Err(EngineError::NotFound(format!(
                "task {} on {}",
                tref.tid, tref.module
            )));
        }
        let sched = self
            .schedules
            .get_mut(wid)
            .ok_or_else(|| EngineError::InvalidArgument(format!("worker {wid} out of range")))?;
        if sched.contains(&tref) {
            return Err(EngineError::Busy);
        }
        sched.push(tref);
        Ok(())
    }

    /// The tasks worker `wid` rotates through.
    #[must_use]
    pub fn schedule(&self, wid: WorkerId) -> &[TaskRef] {
        self.schedules.get(wid).map_or(&[], Vec::as_slice)
    }

    /// Module names in stable (insertion) order, windowed for the wire surface.
    #[must_use]
    pub fn list_modules(&self, offset: usize, max: usize) -> Vec<String> {
        self.ns
            .iter(NsType::Module)
            .skip(offset)
            .take(max)
            .map(|(name, _)| name.to_owned())
            .collect()
    }

    /// Full structural audit of the gate invariants. Control-path only;
    /// tests call it after every mutation sequence.
    pub fn audit(&self) -> Result<(), String> {
        for (slot, m) in self.modules.iter().enumerate() {
            let Some(m) = m.as_deref() else { continue };
            #[allow(clippy::cast_possible_truncation)]
            let mid = ModuleId(slot as u32);

            for (i, og) in m.ogates.iter_active() {
                let (q, igidx) = og.peer();
                let Some(qm) = self.module(q) else {
                    return Err(format!("{}[{i}] points at a dead module", m.name()));
                };
                let Some(ig) = qm.igates.get(igidx) else {
                    return Err(format!(
                        "{}[{i}] points at inactive igate {}[{igidx}]",
                        m.name(),
                        qm.name()
                    ));
                };
                let refs = ig.upstream.iter().filter(|&&e| e == (mid, i)).count();
                if refs != 1 {
                    return Err(format!(
                        "{}[{i}] appears {refs} times on {}[{igidx}] upstream list",
                        m.name(),
                        qm.name()
                    ));
                }
            }

            for (j, ig) in m.igates.iter_active() {
                if ig.upstream.is_empty() {
                    return Err(format!("{}[{j}] igate active with no upstream", m.name()));
                }
                let mut seen = ig.upstream.clone();
                seen.sort_unstable_by_key(|&(id, gi)| (id.0, gi));
                seen.dedup();
                if seen.len() != ig.upstream.len() {
                    return Err(format!("{}[{j}] has duplicate upstream entries", m.name()));
                }
                for &(pid, ogidx) in &ig.upstream {
                    let ok = self
                        .module(pid)
                        .and_then(|pm| pm.ogates.get(ogidx))
                        .is_some_and(|og| og.peer() == (mid, j));
                    if !ok {
                        return Err(format!(
                            "{}[{j}] upstream entry ({pid}, {ogidx}) is stale",
                            m.name()
                        ));
                    }
                }
            }

            if self.find_module(m.name()) != Some(mid) {
                return Err(format!("namespace does not resolve '{}'", m.name()));
            }
        }
        Ok(())
    }
}
