// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Sample operator classes.
//!
//! Enough to wire demo and test graphs: a packet source, a sink, a
//! timestamp/measure pair for latency, and a queue port pair that moves
//! batches between two halves of a graph (possibly on different workers).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crossbeam_queue::ArrayQueue;
use pkt::{PacketBatch, PacketBufferMut, MAX_PKT_BURST};
use serde_json::json;

use crate::dispatch::{GateCtx, TaskCtx};
use crate::error::EngineError;
use crate::gate::GateIdx;
use crate::mclass::{ClassCaps, InitArg, ModuleClass, Operator};

/// Nanoseconds since the first call; monotonic and comparable across
/// workers within one process.
fn mono_ns() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    #[allow(clippy::cast_possible_truncation)]
    let ns = START.get_or_init(Instant::now).elapsed().as_nanos() as u64;
    ns
}

const MIN_PKT_SIZE: u64 = 8;
const MAX_PKT_SIZE: u64 = 9000;

struct Source {
    pkt_size: usize,
    burst: usize,
}

impl<Buf: PacketBufferMut> Operator<Buf> for Source {
    fn run_task(
        &self,
        ctx: &mut TaskCtx<'_, Buf>,
        _arg: &InitArg,
    ) -> Option<(PacketBatch<Buf>, GateIdx)> {
        let batch = ctx.alloc_batch(self.burst, self.pkt_size);
        if batch.is_empty() {
            return None;
        }
        Some((batch, 0))
    }
}

/// Infinite packet generator. Args: `pkt_size` (default 60), `burst`
/// (default a full batch).
#[must_use]
pub fn source_class<Buf: PacketBufferMut>() -> ModuleClass<Buf> {
    ModuleClass {
        name: "Source",
        def_module_name: None,
        num_igates: 0,
        num_ogates: 1,
        caps: ClassCaps {
            run_task: true,
            ..Default::default()
        },
        init: Box::new(|arg| {
            let pkt_size = arg.get("pkt_size").and_then(InitArg::as_u64).unwrap_or(60);
            if !(MIN_PKT_SIZE..=MAX_PKT_SIZE).contains(&pkt_size) {
                return Err(EngineError::init(
                    22,
                    format!("pkt_size must be in [{MIN_PKT_SIZE}, {MAX_PKT_SIZE}], got {pkt_size}"),
                ));
            }
            let burst = arg
                .get("burst")
                .and_then(InitArg::as_u64)
                .unwrap_or(MAX_PKT_BURST as u64)
                .min(MAX_PKT_BURST as u64);
            Ok(Box::new(Source {
                pkt_size: pkt_size as usize,
                burst: burst as usize,
            }))
        }),
    }
}

struct Sink {
    packets: AtomicU64,
}

impl<Buf: PacketBufferMut> Operator<Buf> for Sink {
    fn process_batch(
        &self,
        ctx: &mut GateCtx<'_, '_, Buf>,
        _igate: GateIdx,
        batch: PacketBatch<Buf>,
    ) {
        self.packets.fetch_add(batch.cnt() as u64, Ordering::Relaxed);
        ctx.free(batch);
    }

    fn query(&self, _arg: &InitArg) -> Result<InitArg, EngineError> {
        Ok(json!({ "packets": self.packets.load(Ordering::Relaxed) }))
    }
}

/// Consumes and frees everything it receives.
#[must_use]
pub fn sink_class<Buf: PacketBufferMut>() -> ModuleClass<Buf> {
    ModuleClass {
        name: "Sink",
        def_module_name: None,
        num_igates: 1,
        num_ogates: 0,
        caps: ClassCaps {
            process_batch: true,
            ..Default::default()
        },
        init: Box::new(|_| {
            Ok(Box::new(Sink {
                packets: AtomicU64::new(0),
            }))
        }),
    }
}

struct Timestamp;

impl<Buf: PacketBufferMut> Operator<Buf> for Timestamp {
    fn process_batch(
        &self,
        ctx: &mut GateCtx<'_, '_, Buf>,
        _igate: GateIdx,
        mut batch: PacketBatch<Buf>,
    ) {
        let now = mono_ns();
        for pkt in batch.iter_mut() {
            let data = pkt.as_mut();
            if data.len() >= 8 {
                data[..8].copy_from_slice(&now.to_le_bytes());
            }
        }
        ctx.emit(0, batch);
    }
}

/// Stamps the head of every payload with the current time.
#[must_use]
pub fn timestamp_class<Buf: PacketBufferMut>() -> ModuleClass<Buf> {
    ModuleClass {
        name: "Timestamp",
        def_module_name: None,
        num_igates: 1,
        num_ogates: 1,
        caps: ClassCaps {
            process_batch: true,
            ..Default::default()
        },
        init: Box::new(|_| Ok(Box::new(Timestamp))),
    }
}

struct Measure {
    packets: AtomicU64,
    total_latency_ns: AtomicU64,
}

impl<Buf: PacketBufferMut> Operator<Buf> for Measure {
    fn process_batch(
        &self,
        ctx: &mut GateCtx<'_, '_, Buf>,
        _igate: GateIdx,
        batch: PacketBatch<Buf>,
    ) {
        let now = mono_ns();
        let mut packets = 0u64;
        let mut latency = 0u64;
        for pkt in &batch {
            let data = pkt.as_ref();
            if data.len() >= 8 {
                let mut stamp = [0u8; 8];
                stamp.copy_from_slice(&data[..8]);
                latency += now.saturating_sub(u64::from_le_bytes(stamp));
                packets += 1;
            }
        }
        self.packets.fetch_add(packets, Ordering::Relaxed);
        self.total_latency_ns.fetch_add(latency, Ordering::Relaxed);
        ctx.emit(0, batch);
    }

    fn query(&self, _arg: &InitArg) -> Result<InitArg, EngineError> {
        Ok(json!({
            "packets": self.packets.load(Ordering::Relaxed),
            "total_latency_ns": self.total_latency_ns.load(Ordering::Relaxed),
        }))
    }
}

/// Accumulates per-packet latency against [`timestamp_class`] stamps.
/// Query it for `{packets, total_latency_ns}`.
#[must_use]
pub fn measure_class<Buf: PacketBufferMut>() -> ModuleClass<Buf> {
    ModuleClass {
        name: "Measure",
        def_module_name: None,
        num_igates: 1,
        num_ogates: 1,
        caps: ClassCaps {
            process_batch: true,
            ..Default::default()
        },
        init: Box::new(|_| {
            Ok(Box::new(Measure {
                packets: AtomicU64::new(0),
                total_latency_ns: AtomicU64::new(0),
            }))
        }),
    }
}

struct QueueOut<Buf> {
    queue: Arc<ArrayQueue<Buf>>,
    dropped: AtomicU64,
}

impl<Buf: PacketBufferMut> Operator<Buf> for QueueOut<Buf> {
    fn process_batch(
        &self,
        ctx: &mut GateCtx<'_, '_, Buf>,
        _igate: GateIdx,
        mut batch: PacketBatch<Buf>,
    ) {
        let mut overflow = PacketBatch::new();
        for pkt in batch.drain() {
            if let Err(pkt) = self.queue.push(pkt) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                let _ = overflow.push(pkt);
            }
        }
        if !overflow.is_empty() {
            ctx.free(overflow);
        }
    }

    fn query(&self, _arg: &InitArg) -> Result<InitArg, EngineError> {
        Ok(json!({
            "queued": self.queue.len(),
            "dropped": self.dropped.load(Ordering::Relaxed),
        }))
    }
}

struct QueueInc<Buf> {
    queue: Arc<ArrayQueue<Buf>>,
    burst: usize,
}

impl<Buf: PacketBufferMut> Operator<Buf> for QueueInc<Buf> {
    fn run_task(
        &self,
        _ctx: &mut TaskCtx<'_, Buf>,
        _arg: &InitArg,
    ) -> Option<(PacketBatch<Buf>, GateIdx)> {
        let mut batch = PacketBatch::new();
        for _ in 0..self.burst {
            let Some(pkt) = self.queue.pop() else {
                break;
            };
            if batch.push(pkt).is_err() {
                break;
            }
        }
        if batch.is_empty() {
            return None;
        }
        Some((batch, 0))
    }
}

/// A loopback port: an out class that parks packets on a shared queue and
/// an inc class whose task replays them into its half of the graph. Both
/// halves may run on different workers; the queue is the handoff.
#[must_use]
pub fn queue_port_classes<Buf: PacketBufferMut>(
    out_name: &'static str,
    inc_name: &'static str,
    capacity: usize,
) -> (ModuleClass<Buf>, ModuleClass<Buf>) {
    let queue: Arc<ArrayQueue<Buf>> = Arc::new(ArrayQueue::new(capacity.max(1)));

    let out_queue = Arc::clone(&queue);
    let out = ModuleClass {
        name: out_name,
        def_module_name: None,
        num_igates: 1,
        num_ogates: 0,
        caps: ClassCaps {
            process_batch: true,
            ..Default::default()
        },
        init: Box::new(move |_| {
            Ok(Box::new(QueueOut {
                queue: Arc::clone(&out_queue),
                dropped: AtomicU64::new(0),
            }))
        }),
    };

    let inc = ModuleClass {
        name: inc_name,
        def_module_name: None,
        num_igates: 0,
        num_ogates: 1,
        caps: ClassCaps {
            run_task: true,
            ..Default::default()
        },
        init: Box::new(move |arg| {
            let burst = arg
                .get("burst")
                .and_then(InitArg::as_u64)
                .unwrap_or(MAX_PKT_BURST as u64)
                .min(MAX_PKT_BURST as u64) as usize;
            Ok(Box::new(QueueInc {
                queue: Arc::clone(&queue),
                burst,
            }))
        }),
    };

    (out, inc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::task::TaskRef;
    use pkt::{HeapBuffer, HeapPool, PacketPool};

    #[test]
    fn source_rejects_bad_pkt_size() {
        let class = source_class::<HeapBuffer>();
        let err = (class.init)(&json!({ "pkt_size": 4 })).map(|_| ()).unwrap_err();
        assert!(matches!(err, EngineError::InitFailed { code: 22, .. }));
    }

    #[test]
    fn latency_chain_measures_every_packet() {
        let pool = Arc::new(HeapPool::new());
        let mut g: Graph<HeapBuffer> = Graph::new(1);

        g.register_class(source_class()).unwrap();
        g.register_class(timestamp_class()).unwrap();
        g.register_class(measure_class()).unwrap();
        g.register_class(sink_class()).unwrap();
        let (out, inc) = queue_port_classes("PortOut", "PortInc", 1024);
        g.register_class(out).unwrap();
        g.register_class(inc).unwrap();

        let src = g
            .create_module(None, "Source", &json!({ "pkt_size": 60 }))
            .unwrap();
        let ts = g.create_module(None, "Timestamp", &InitArg::Null).unwrap();
        let pout = g.create_module(None, "PortOut", &InitArg::Null).unwrap();
        let pinc = g.create_module(None, "PortInc", &InitArg::Null).unwrap();
        let meas = g.create_module(None, "Measure", &InitArg::Null).unwrap();
        let sink = g.create_module(None, "Sink", &InitArg::Null).unwrap();

        g.connect(src, 0, ts, 0).unwrap();
        g.connect(ts, 0, pout, 0).unwrap();
        g.connect(pinc, 0, meas, 0).unwrap();
        g.connect(meas, 0, sink, 0).unwrap();
        let src_tid = g.register_task(src, InitArg::Null).unwrap();
        let inc_tid = g.register_task(pinc, InitArg::Null).unwrap();
        g.audit().unwrap();

        let ctl = Arc::new(crate::worker::WorkerCtl::new());
        let dyn_pool: Arc<dyn PacketPool<HeapBuffer>> = pool.clone();
        let mut wctx = crate::dispatch::WorkerCtx::new(0, dyn_pool, ctl);

        crate::dispatch::run_module_task(&g, &mut wctx, TaskRef { module: src, tid: src_tid });
        crate::dispatch::run_module_task(&g, &mut wctx, TaskRef { module: pinc, tid: inc_tid });

        let summary = g.module(meas).unwrap().op.query(&InitArg::Null).unwrap();
        assert_eq!(summary["packets"].as_u64().unwrap(), MAX_PKT_BURST as u64);
        // stamps are monotonic, so the accumulated latency is sane
        assert!(summary["total_latency_ns"].as_u64().is_some());

        let sunk = g.module(sink).unwrap().op.query(&InitArg::Null).unwrap();
        assert_eq!(sunk["packets"].as_u64().unwrap(), MAX_PKT_BURST as u64);
        // every buffer went back to the pool
        assert_eq!(pool.outstanding(), 0);
    }
}
