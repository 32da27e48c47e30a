// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Errors surfaced by the control-plane surface.
//!
//! The dataplane itself never errors; it drops.

use nix::errno::Errno;

/// Error kinds returned by graph and engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A module or class with this name already exists.
    #[error("name '{0}' already exists")]
    NameConflict(String),

    /// An allocation limit was hit (gate arrays past `MAX_GATES`, exhausted
    /// packet pool on the control path).
    #[error("out of memory")]
    OutOfMemory,

    /// Bad gate index, wrong class capability, malformed argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The ogate is already connected.
    #[error("output gate already connected")]
    Busy,

    /// Unknown module, class, or inactive gate where an active one is required.
    #[error("'{0}' not found")]
    NotFound(String),

    /// A class `init` hook rejected its argument. Code and message are
    /// whatever the class chose to report.
    #[error("class init failed ({code}): {msg}")]
    InitFailed { code: i32, msg: String },
}

impl EngineError {
    /// Helper for classes rejecting their init argument.
    pub fn init(code: i32, msg: impl Into<String>) -> Self {
        EngineError::InitFailed {
            code,
            msg: msg.into(),
        }
    }

    /// The negative errno this error travels as on the wire surface.
    #[must_use]
    pub fn errno(&self) -> i32 {
        let e = match self {
            EngineError::NameConflict(_) => Errno::EEXIST,
            EngineError::OutOfMemory => Errno::ENOMEM,
            EngineError::InvalidArgument(_) => Errno::EINVAL,
            EngineError::Busy => Errno::EBUSY,
            EngineError::NotFound(_) => Errno::ENOENT,
            EngineError::InitFailed { code, .. } => return -code.abs(),
        };
        -(e as i32)
    }
}
