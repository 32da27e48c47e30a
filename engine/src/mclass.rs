// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Module classes and the operator contract.

use core::fmt;

use pkt::{PacketBatch, PacketBufferMut};

use crate::dispatch::{GateCtx, TaskCtx};
use crate::error::EngineError;
use crate::gate::GateIdx;
use crate::WorkerId;

/// Opaque argument blob passed to class `init` hooks and task invocations.
pub type InitArg = serde_json::Value;

/// The hooks a class actually implements. The engine validates against
/// these rather than probing the trait object: a class without
/// `process_batch` can never be a downstream, a class without `run_task`
/// can never own tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassCaps {
    pub process_batch: bool,
    pub run_task: bool,
    pub init_worker: bool,
}

/// Constructor type for operator instances.
pub type InitFn<Buf> =
    Box<dyn Fn(&InitArg) -> Result<Box<dyn Operator<Buf>>, EngineError> + Send + Sync>;

/// Immutable descriptor shared by all instances of an operator kind.
pub struct ModuleClass<Buf: PacketBufferMut> {
    /// Display name, CamelCase by convention.
    pub name: &'static str,
    /// Stem for derived instance names; defaults to the snake_cased display name.
    pub def_module_name: Option<&'static str>,
    /// Ceiling on input gate indices for this kind.
    pub num_igates: GateIdx,
    /// Ceiling on output gate indices for this kind.
    pub num_ogates: GateIdx,
    pub caps: ClassCaps,
    /// Builds the per-instance operator from the caller's argument blob.
    pub init: InitFn<Buf>,
}

impl<Buf: PacketBufferMut> fmt::Debug for ModuleClass<Buf> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleClass")
            .field("name", &self.name)
            .field("num_igates", &self.num_igates)
            .field("num_ogates", &self.num_ogates)
            .field("caps", &self.caps)
            .finish_non_exhaustive()
    }
}

/// The per-instance side of the module-class contract.
///
/// Hooks take `&self`: a module may be reached from several workers at
/// once, and any mutable state it keeps is its own to synchronize
/// (counters as atomics, queues as concurrent queues).
pub trait Operator<Buf: PacketBufferMut>: Send + Sync {
    /// Handle a batch arriving on `igate`. Emit onward with
    /// [`GateCtx::emit`]; anything not emitted must be freed through the
    /// context. Only called on classes whose caps declare it.
    fn process_batch(&self, ctx: &mut GateCtx<'_, '_, Buf>, igate: GateIdx, batch: PacketBatch<Buf>) {
        let _ = igate;
        // a class that declares no process_batch capability never gets
        // here; swallow defensively rather than leak
        ctx.free(batch);
    }

    /// Produce a batch for one scheduler slot, along with the ogate it
    /// leaves on. `None` means nothing to do this round.
    fn run_task(
        &self,
        ctx: &mut TaskCtx<'_, Buf>,
        arg: &InitArg,
    ) -> Option<(PacketBatch<Buf>, GateIdx)> {
        let _ = (ctx, arg);
        None
    }

    /// Called once per worker, before that worker first dispatches through
    /// this module.
    fn init_worker(&self, wid: WorkerId) {
        let _ = wid;
    }

    /// Reverse of the class `init` hook; runs first during module destruction.
    fn deinit(&self) {}

    /// Out-of-band state queries from the control plane (summaries,
    /// counters). Runs under the pause barrier.
    fn query(&self, arg: &InitArg) -> Result<InitArg, EngineError> {
        let _ = arg;
        Err(EngineError::InvalidArgument(
            "class does not support queries".to_owned(),
        ))
    }
}
