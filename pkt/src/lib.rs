// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet buffer contracts and batch primitives for the dataplane.
//!
//! The engine never touches NIC memory directly; it only relies on the
//! traits in this crate. Real drivers supply their own buffer and pool
//! types; [`HeapBuffer`] and [`HeapPool`] back tests and the demo binary.

#![deny(clippy::all)]
#![allow(clippy::missing_errors_doc)]

pub mod batch;
pub mod buffer;
pub mod heap;
pub mod pool;

pub use batch::{MAX_PKT_BURST, PacketBatch};
pub use buffer::{Headroom, NotEnoughHeadRoom, PacketBuffer, PacketBufferMut, Prepend, TrimFromStart};
pub use heap::HeapBuffer;
pub use pool::{HeapPool, PacketPool};
