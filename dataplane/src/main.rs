// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The dataplane daemon: bring up the engine, optionally wire the demo
//! graph, and report counters until SIGINT.

use std::sync::Arc;
use std::time::Duration;

use args::{CmdArgs, Parser};
use engine::sample::{
    measure_class, queue_port_classes, sink_class, source_class, timestamp_class,
};
use engine::{Engine, EngineError, InitArg};
use pkt::{HeapBuffer, HeapPool, PacketPool};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_logging(args: &CmdArgs) {
    let filter = args
        .tracing()
        .map_or_else(|| EnvFilter::new("info"), EnvFilter::new);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
    info!(
        " ━━━━━━ Starting dataplane (Version = {}) ━━━━━━",
        option_env!("VERSION").unwrap_or("dev")
    );
}

/// Source -> Timestamp -> PortOut | PortInc -> Measure -> Sink, with the
/// two halves on different workers when more than one is available.
fn build_demo_graph(engine: &mut Engine<HeapBuffer>) -> Result<String, EngineError> {
    engine.pause_all();
    engine.register_class(source_class())?;
    engine.register_class(timestamp_class())?;
    engine.register_class(measure_class())?;
    engine.register_class(sink_class())?;
    let (out, inc) = queue_port_classes("PortOut", "PortInc", 4096);
    engine.register_class(out)?;
    engine.register_class(inc)?;

    let src = engine.module_create("Source", None, &json!({ "pkt_size": 64 }))?;
    let ts = engine.module_create("Timestamp", None, &InitArg::Null)?;
    let pout = engine.module_create("PortOut", None, &InitArg::Null)?;
    let pinc = engine.module_create("PortInc", None, &InitArg::Null)?;
    let meas = engine.module_create("Measure", None, &InitArg::Null)?;
    let sink = engine.module_create("Sink", None, &InitArg::Null)?;

    engine.connect(&src, 0, &ts, 0)?;
    engine.connect(&ts, 0, &pout, 0)?;
    engine.connect(&pinc, 0, &meas, 0)?;
    engine.connect(&meas, 0, &sink, 0)?;

    let src_tid = engine.register_task(&src, InitArg::Null)?;
    let inc_tid = engine.register_task(&pinc, InitArg::Null)?;
    engine.attach_task(&src, src_tid, 0)?;
    engine.attach_task(&pinc, inc_tid, engine.num_workers().saturating_sub(1))?;
    engine.resume_all();

    info!(
        modules = ?engine.list_modules(0, 16),
        "demo graph is up"
    );
    Ok(meas)
}

fn report(engine: &mut Engine<HeapBuffer>, measure: Option<&str>) {
    let drops = engine.silent_drops();
    match measure {
        Some(name) => match engine.module_query(name, &InitArg::Null) {
            Ok(summary) => {
                let packets = summary["packets"].as_u64().unwrap_or(0);
                let total_ns = summary["total_latency_ns"].as_u64().unwrap_or(0);
                let avg_ns = if packets == 0 { 0 } else { total_ns / packets };
                info!(packets, avg_latency_ns = avg_ns, silent_drops = drops, "measure");
            }
            Err(e) => error!("measure query failed: {e}"),
        },
        None => info!(silent_drops = drops, "idle graph"),
    }
}

fn main() {
    let args = CmdArgs::parse();
    init_logging(&args);

    let pool = Arc::new(HeapPool::new());
    let dyn_pool: Arc<dyn PacketPool<HeapBuffer>> = pool.clone();
    let mut engine = match Engine::start(dyn_pool, args.num_workers()) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to start engine: {e}");
            std::process::exit(-1);
        }
    };

    let measure = if args.demo() {
        match build_demo_graph(&mut engine) {
            Ok(name) => Some(name),
            Err(e) => {
                error!("Failed to build demo graph: {e}");
                std::process::exit(-1);
            }
        }
    } else {
        None
    };

    let (stop_tx, stop_rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .expect("failed to set SIGINT handler");

    let interval = Duration::from_millis(args.report_interval_ms().max(10));
    loop {
        match stop_rx.recv_timeout(interval) {
            Ok(()) => break,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                report(&mut engine, measure.as_deref());
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("Shutting down dataplane");
    engine.shutdown();
    info!(outstanding_buffers = pool.outstanding(), "bye");
}
