// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-ogate pcap taps.
//!
//! A tap mirrors every packet crossing its ogate into a fifo as a pcap
//! stream. Writes are non-blocking; a reader that goes away (`EPIPE`)
//! silently disables the tap, any other write error just ends the tap pass
//! for the current batch.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use nix::errno::Errno;
use nix::fcntl::{fcntl, open, FcntlArg, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::write;
use pkt::{PacketBatch, PacketBufferMut};
use tracing::debug;

use crate::error::EngineError;

pub(crate) const PCAP_MAGIC_NUMBER: u32 = 0xa1b2_c3d4;
pub(crate) const PCAP_VERSION_MAJOR: u16 = 2;
pub(crate) const PCAP_VERSION_MINOR: u16 = 4;
pub(crate) const PCAP_THISZONE: i32 = 0;
pub(crate) const PCAP_SIGFIGS: u32 = 0;
pub(crate) const PCAP_SNAPLEN: u32 = 65535;
/// LINKTYPE_ETHERNET
pub(crate) const PCAP_NETWORK: u32 = 1;

const PCAP_FILE_HDR_LEN: usize = 24;
const PCAP_REC_HDR_LEN: u16 = 16;

/// Tap state carried on every ogate. The enabled flag is the only thing the
/// hot path looks at; the fd mutex is touched only while the tap is on.
#[derive(Debug, Default)]
pub struct Tap {
    enabled: AtomicBool,
    fd: Mutex<Option<OwnedFd>>,
}

impl Tap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Arm the tap with an already-prepared fifo fd. Control path, under
    /// the pause barrier.
    pub(crate) fn enable(&self, fd: OwnedFd) {
        let mut guard = self.fd.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(fd);
        self.enabled.store(true, Ordering::Release);
    }

    /// Disarm the tap, closing the fifo.
    pub(crate) fn disable(&self) -> Result<(), EngineError> {
        if !self.is_enabled() {
            return Err(EngineError::InvalidArgument(
                "tap is not enabled on this gate".to_owned(),
            ));
        }
        self.enabled.store(false, Ordering::Release);
        let mut guard = self.fd.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = None;
        Ok(())
    }
}

fn errno_to_engine(path: &Path, e: Errno) -> EngineError {
    match e {
        Errno::ENOENT | Errno::ENXIO => EngineError::NotFound(path.display().to_string()),
        other => EngineError::InvalidArgument(format!(
            "cannot open fifo {}: {other}",
            path.display()
        )),
    }
}

/// Open the tap fifo for writing, non-blocking, and emit the pcap file
/// header.
pub(crate) fn open_fifo(path: &Path) -> Result<OwnedFd, EngineError> {
    let raw = open(path, OFlag::O_WRONLY | OFlag::O_NONBLOCK, Mode::empty())
        .map_err(|e| errno_to_engine(path, e))?;
    // SAFETY: freshly opened fd, owned here on
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    // belt and braces: some kernels used to ignore O_NONBLOCK in open()
    let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL).map_err(|e| errno_to_engine(path, e))?;
    fcntl(
        fd.as_raw_fd(),
        FcntlArg::F_SETFL(OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK),
    )
    .map_err(|e| errno_to_engine(path, e))?;

    write_file_header(&fd).map_err(|e| errno_to_engine(path, e))?;
    Ok(fd)
}

pub(crate) fn write_file_header(fd: &OwnedFd) -> Result<(), Errno> {
    let mut hdr = [0u8; PCAP_FILE_HDR_LEN];
    hdr[0..4].copy_from_slice(&PCAP_MAGIC_NUMBER.to_le_bytes());
    hdr[4..6].copy_from_slice(&PCAP_VERSION_MAJOR.to_le_bytes());
    hdr[6..8].copy_from_slice(&PCAP_VERSION_MINOR.to_le_bytes());
    hdr[8..12].copy_from_slice(&PCAP_THISZONE.to_le_bytes());
    hdr[12..16].copy_from_slice(&PCAP_SIGFIGS.to_le_bytes());
    hdr[16..20].copy_from_slice(&PCAP_SNAPLEN.to_le_bytes());
    hdr[20..24].copy_from_slice(&PCAP_NETWORK.to_le_bytes());
    write(fd, &hdr)?;
    Ok(())
}

/// Mirror a batch into the tap fifo. Every packet gets a pcap record header
/// prepended for the write and trimmed right back off.
pub(crate) fn dump_batch<Buf: PacketBufferMut>(tap: &Tap, batch: &mut PacketBatch<Buf>) {
    let mut guard = tap.fd.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let mut reader_gone = false;

    {
        let Some(fd) = guard.as_ref() else {
            return;
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        #[allow(clippy::cast_possible_truncation)]
        let ts_sec = now.as_secs() as u32;
        let ts_usec = now.subsec_micros();

        for pkt in batch.iter_mut() {
            let len = pkt.as_ref().len();
            // snaplen violations are rejected, not truncated
            debug_assert!(len < PCAP_SNAPLEN as usize);
            if len >= PCAP_SNAPLEN as usize {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            let orig_len = len as u32;

            let Ok(front) = pkt.prepend(PCAP_REC_HDR_LEN) else {
                continue;
            };
            front[0..4].copy_from_slice(&ts_sec.to_le_bytes());
            front[4..8].copy_from_slice(&ts_usec.to_le_bytes());
            front[8..12].copy_from_slice(&orig_len.to_le_bytes());
            front[12..16].copy_from_slice(&orig_len.to_le_bytes());

            let res = write(fd, pkt.as_ref());
            let _ = pkt.trim_from_start(PCAP_REC_HDR_LEN);

            match res {
                Ok(_) => {}
                Err(Errno::EPIPE) => {
                    debug!("pcap reader went away, stopping dump");
                    reader_gone = true;
                    break;
                }
                Err(e) => {
                    debug!("pcap write failed ({e}), skipping rest of batch");
                    break;
                }
            }
        }
    }

    if reader_gone {
        *guard = None;
        tap.enabled.store(false, Ordering::Release);
    }
}
