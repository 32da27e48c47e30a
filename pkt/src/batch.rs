// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Bounded packet batches, the unit of work on the dataplane.

use crate::buffer::PacketBufferMut;

/// Maximum number of packets processed as one batch.
pub const MAX_PKT_BURST: usize = 32;

/// A counted vector of packet buffers, capped at [`MAX_PKT_BURST`].
///
/// Batches move through the module graph by value; whoever ends up holding
/// one is responsible for returning its buffers to the pool.
#[derive(Debug)]
pub struct PacketBatch<Buf: PacketBufferMut> {
    pkts: Vec<Buf>,
}

impl<Buf: PacketBufferMut> PacketBatch<Buf> {
    /// An empty batch with capacity for a full burst.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pkts: Vec::with_capacity(MAX_PKT_BURST),
        }
    }

    /// Number of packets in the batch.
    #[must_use]
    pub fn cnt(&self) -> usize {
        self.pkts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pkts.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.pkts.len() >= MAX_PKT_BURST
    }

    /// Append a packet. A full batch rejects the push and hands the buffer
    /// back, in the style of a bounded queue.
    pub fn push(&mut self, pkt: Buf) -> Result<(), Buf> {
        if self.is_full() {
            return Err(pkt);
        }
        self.pkts.push(pkt);
        Ok(())
    }

    /// Remove and return all packets, leaving the batch empty.
    pub fn drain(&mut self) -> impl Iterator<Item = Buf> + '_ {
        self.pkts.drain(..)
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Buf> {
        self.pkts.iter()
    }

    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, Buf> {
        self.pkts.iter_mut()
    }
}

impl<Buf: PacketBufferMut> Default for PacketBatch<Buf> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Buf: PacketBufferMut> FromIterator<Buf> for PacketBatch<Buf> {
    /// Collect up to a burst of packets; the caller must not feed more than
    /// [`MAX_PKT_BURST`] items.
    fn from_iter<I: IntoIterator<Item = Buf>>(iter: I) -> Self {
        let mut batch = Self::new();
        for pkt in iter {
            if batch.push(pkt).is_err() {
                break;
            }
        }
        batch
    }
}

impl<'a, Buf: PacketBufferMut> IntoIterator for &'a PacketBatch<Buf> {
    type Item = &'a Buf;
    type IntoIter = core::slice::Iter<'a, Buf>;

    fn into_iter(self) -> Self::IntoIter {
        self.pkts.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapBuffer;

    #[test]
    fn push_caps_at_burst_size() {
        let mut batch = PacketBatch::new();
        for _ in 0..MAX_PKT_BURST {
            batch.push(HeapBuffer::with_len(60)).unwrap();
        }
        assert!(batch.is_full());
        assert!(batch.push(HeapBuffer::with_len(60)).is_err());
        assert_eq!(batch.cnt(), MAX_PKT_BURST);
    }

    #[test]
    fn drain_empties_the_batch() {
        let mut batch: PacketBatch<HeapBuffer> =
            (0..4).map(|_| HeapBuffer::with_len(60)).collect();
        assert_eq!(batch.cnt(), 4);
        assert_eq!(batch.drain().count(), 4);
        assert!(batch.is_empty());
    }
}
