// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Capability traits for packet buffers.

use core::fmt::Debug;
use std::error::Error;

/// Super trait for the read side of a packet buffer. `as_ref()` yields the
/// frame data currently owned by the buffer (headroom excluded).
pub trait PacketBuffer: AsRef<[u8]> + Headroom + Debug + 'static {}
impl<T> PacketBuffer for T where T: AsRef<[u8]> + Headroom + Debug + 'static {}

/// Super trait for buffers the dataplane may rewrite in place, grow at the
/// front, or shrink at the front.
pub trait PacketBufferMut:
    PacketBuffer + AsMut<[u8]> + Prepend + TrimFromStart + Send
{
}
impl<T> PacketBufferMut for T where T: PacketBuffer + AsMut<[u8]> + Prepend + TrimFromStart + Send {}

/// Trait representing the ability to get the unused headroom in a packet buffer.
pub trait Headroom {
    /// Get the (unused) headroom in a packet buffer.
    fn headroom(&self) -> u16;
}

/// Trait representing the ability to prepend data to a packet buffer.
pub trait Prepend {
    /// Error which may occur when attempting to prepend data to the buffer.
    type Error: Debug + Error;
    /// Claim `len` bytes of headroom and return a slice starting at the new
    /// front of the buffer. Existing contents are not altered.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the buffer has less than `len` bytes of
    /// headroom available.
    fn prepend(&mut self, len: u16) -> Result<&mut [u8], Self::Error>;
}

/// Trait representing the ability to trim data from the start of a packet buffer.
pub trait TrimFromStart {
    /// Error which may occur when attempting to trim data from the start of the buffer.
    type Error: Debug;
    /// Remove `len` bytes from the front of the buffer and return a slice
    /// starting at the new front.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the buffer holds fewer than `len` bytes.
    fn trim_from_start(&mut self, len: u16) -> Result<&mut [u8], Self::Error>;
}

/// Error indicating that there is not enough headroom in a memory buffer for
/// the requested operation.
#[non_exhaustive]
#[repr(transparent)]
#[derive(Debug, thiserror::Error)]
#[error("Not enough head room in memory buffer")]
pub struct NotEnoughHeadRoom;

/// Error indicating that the buffer is not long enough to perform the
/// requested operation.
#[non_exhaustive]
#[repr(transparent)]
#[derive(Debug, thiserror::Error)]
#[error("MemoryBuffer not long enough to remove required number of bytes")]
pub struct MemoryBufferNotLongEnough;
