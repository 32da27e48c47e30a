// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The allocator contract the engine frees packets through.

use core::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::batch::PacketBatch;
use crate::buffer::PacketBufferMut;
use crate::heap::HeapBuffer;

/// A source and sink of packet buffers, shared by every worker.
///
/// Implementations must tolerate concurrent calls from all workers plus the
/// control plane.
pub trait PacketPool<Buf: PacketBufferMut>: Send + Sync + Debug {
    /// Provide a zero-filled buffer of `len` frame bytes, or `None` when the
    /// pool is exhausted.
    fn allocate(&self, len: usize) -> Option<Buf>;

    /// Return a single buffer to the pool.
    fn free(&self, pkt: Buf);

    /// Return every packet of a batch to the pool.
    fn free_bulk(&self, batch: &mut PacketBatch<Buf>) {
        for pkt in batch.drain() {
            self.free(pkt);
        }
    }

    /// Number of buffers currently out of the pool. Used by operators for
    /// occupancy reporting and by tests for leak checks.
    fn outstanding(&self) -> usize;
}

/// Heap allocator with outstanding-buffer accounting.
#[derive(Debug, Default)]
pub struct HeapPool {
    outstanding: AtomicUsize,
}

impl HeapPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PacketPool<HeapBuffer> for HeapPool {
    fn allocate(&self, len: usize) -> Option<HeapBuffer> {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Some(HeapBuffer::with_len(len))
    }

    fn free(&self, pkt: HeapBuffer) {
        drop(pkt);
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
    }

    fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}
