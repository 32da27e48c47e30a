// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The dataplane engine kernel.
//!
//! Packet operators ("modules") are wired into a directed graph and driven
//! by pinned poll-mode workers. The control plane mutates the graph only
//! while every worker is parked at the pause barrier, so the per-packet
//! path runs without locks. See `engine::Engine` for the control surface
//! and `mclass::Operator` for the contract operators implement.

#![deny(clippy::all)]
#![warn(unsafe_op_in_unsafe_fn)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gate;
pub mod graph;
pub mod mclass;
pub mod module;
pub mod namespace;
pub mod sample;
pub mod tap;
pub mod task;
mod trace;
mod worker;

pub use dispatch::{GateCtx, TaskCtx};
pub use engine::Engine;
pub use error::EngineError;
pub use gate::GateIdx;
pub use graph::{Graph, ModuleId};
pub use mclass::{ClassCaps, InitArg, ModuleClass, Operator};
pub use task::{Task, TaskId, TaskRef};

/// Identifies a dataplane worker (one pinned OS thread each).
pub type WorkerId = usize;

/// Upper bound on the byte length of a module name.
pub const MODULE_NAME_LEN: usize = 128;

/// Hard ceiling on gate indices, regardless of what a class declares.
pub const MAX_GATES: GateIdx = 8192;

/// Number of task slots on every module.
pub const MAX_TASKS_PER_MODULE: usize = 32;
