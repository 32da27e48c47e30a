// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Module instances: named nodes of the processing graph.

use std::fmt;
use std::sync::Arc;

use pkt::PacketBufferMut;

use crate::gate::{GateArray, Igate, Ogate};
use crate::mclass::{InitArg, ModuleClass, Operator};
use crate::task::{Task, TaskId};
use crate::{MAX_TASKS_PER_MODULE, MODULE_NAME_LEN};

/// A module name, bounded at `MODULE_NAME_LEN` bytes. Longer caller-supplied
/// names are truncated (on a char boundary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleName(String);

impl ModuleName {
    #[must_use]
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(MODULE_NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        Self(name[..end].to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ModuleName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Convert a CamelCase class name into the snake_case stem used for derived
/// instance names: an underscore at every lowercase-to-uppercase boundary,
/// then everything lowercased.
#[must_use]
pub fn snakeify(class_name: &str) -> String {
    let mut out = String::with_capacity(class_name.len() + 4);
    let mut prev_lower = false;
    for c in class_name.chars() {
        if prev_lower && c.is_uppercase() {
            out.push('_');
        }
        prev_lower = c.is_lowercase();
        for lc in c.to_lowercase() {
            out.push(lc);
        }
    }
    out
}

/// A node in the processing graph.
pub struct Module<Buf: PacketBufferMut> {
    pub(crate) name: ModuleName,
    pub(crate) class: Arc<ModuleClass<Buf>>,
    pub(crate) op: Box<dyn Operator<Buf>>,
    pub(crate) tasks: [Option<Task>; MAX_TASKS_PER_MODULE],
    pub(crate) igates: GateArray<Igate>,
    pub(crate) ogates: GateArray<Ogate>,
    /// Registration sequence number; workers use it to find modules added
    /// since their last pause.
    pub(crate) epoch: u64,
}

impl<Buf: PacketBufferMut> Module<Buf> {
    pub(crate) fn new(
        name: ModuleName,
        class: Arc<ModuleClass<Buf>>,
        op: Box<dyn Operator<Buf>>,
        epoch: u64,
    ) -> Self {
        Self {
            name,
            class,
            op,
            tasks: std::array::from_fn(|_| None),
            igates: GateArray::new(),
            ogates: GateArray::new(),
            epoch,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    #[must_use]
    pub fn class(&self) -> &ModuleClass<Buf> {
        &self.class
    }

    #[must_use]
    pub fn igates(&self) -> &GateArray<Igate> {
        &self.igates
    }

    #[must_use]
    pub fn ogates(&self) -> &GateArray<Ogate> {
        &self.ogates
    }

    /// Number of occupied task slots.
    #[must_use]
    pub fn num_tasks(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_some()).count()
    }

    /// The task in slot `tid`, if occupied.
    #[must_use]
    pub fn task(&self, tid: TaskId) -> Option<&Task> {
        self.tasks.get(tid)?.as_ref()
    }

    /// Slot index of `task` within this module: a linear scan matching by
    /// identity, not by value.
    #[must_use]
    pub fn task_to_tid(&self, task: &Task) -> Option<TaskId> {
        self.tasks
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|t| std::ptr::eq(t, task)))
    }

    /// First free task slot, if any.
    pub(crate) fn free_task_slot(&self) -> Option<TaskId> {
        self.tasks.iter().position(Option::is_none)
    }

    pub(crate) fn task_arg(&self, tid: TaskId) -> Option<&InitArg> {
        self.tasks.get(tid)?.as_ref().map(|t| &t.arg)
    }
}

impl<Buf: PacketBufferMut> fmt::Debug for Module<Buf> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("class", &self.class.name)
            .field("tasks", &self.num_tasks())
            .field("igates", &self.igates.num_active())
            .field("ogates", &self.ogates.num_active())
            .finish_non_exhaustive()
    }
}
