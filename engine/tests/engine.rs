// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! End-to-end engine scenarios with live workers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use engine::sample::{
    measure_class, queue_port_classes, sink_class, source_class, timestamp_class,
};
use engine::{ClassCaps, Engine, EngineError, InitArg, ModuleClass, Operator};
use pkt::{HeapBuffer, HeapPool, PacketPool};
use serde_json::json;

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(true)
        .try_init();
}

fn start_engine(num_workers: usize) -> (Engine<HeapBuffer>, Arc<HeapPool>) {
    let pool = Arc::new(HeapPool::new());
    let dyn_pool: Arc<dyn PacketPool<HeapBuffer>> = pool.clone();
    let engine = Engine::start(dyn_pool, num_workers).expect("engine start");
    (engine, pool)
}

/// A do-nothing receiver that counts `init_worker` invocations.
fn probe_class(inits: &Arc<AtomicUsize>) -> ModuleClass<HeapBuffer> {
    struct Probe {
        inits: Arc<AtomicUsize>,
    }
    impl Operator<HeapBuffer> for Probe {
        fn init_worker(&self, _wid: usize) {
            self.inits.fetch_add(1, Ordering::SeqCst);
        }
    }
    let inits = inits.clone();
    ModuleClass {
        name: "Probe",
        def_module_name: None,
        num_igates: 0,
        num_ogates: 0,
        caps: ClassCaps {
            init_worker: true,
            ..Default::default()
        },
        init: Box::new(move |_| Ok(Box::new(Probe { inits: inits.clone() }))),
    }
}

#[test]
fn init_worker_runs_exactly_once_per_worker() {
    init_test_tracing();
    let (mut engine, _pool) = start_engine(2);
    let inits = Arc::new(AtomicUsize::new(0));

    engine.pause_all();
    engine.register_class(probe_class(&inits)).unwrap();
    engine.module_create("Probe", Some("probe0"), &InitArg::Null).unwrap();
    engine.resume_all();

    // both workers must observe the new module before their next dispatch
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while inits.load(Ordering::SeqCst) < 2 {
        assert!(std::time::Instant::now() < deadline, "init_worker never ran");
        std::thread::sleep(Duration::from_millis(10));
    }
    // and never again
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(inits.load(Ordering::SeqCst), 2);

    // a later module triggers a fresh sweep, again once per worker
    engine.module_create("Probe", Some("probe1"), &InitArg::Null).unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while inits.load(Ordering::SeqCst) < 4 {
        assert!(std::time::Instant::now() < deadline, "second sweep never ran");
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(inits.load(Ordering::SeqCst), 4);

    engine.shutdown();
}

#[test]
fn unconnected_source_counts_silent_drops() {
    init_test_tracing();
    let (mut engine, pool) = start_engine(1);

    engine.pause_all();
    engine.register_class(source_class()).unwrap();
    let src = engine
        .module_create("Source", None, &json!({ "pkt_size": 60 }))
        .unwrap();
    let tid = engine.register_task(&src, InitArg::Null).unwrap();
    engine.attach_task(&src, tid, 0).unwrap();
    assert_eq!(engine.num_module_tasks(&src).unwrap(), 1);
    engine.resume_all();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while engine.silent_drops() == 0 {
        assert!(std::time::Instant::now() < deadline, "no drops recorded");
        std::thread::sleep(Duration::from_millis(10));
    }

    engine.pause_all();
    let drops = engine.silent_drops();
    assert!(drops > 0);
    assert_eq!(engine.worker_silent_drops().len(), 1);
    // every dropped batch went back to the pool
    assert_eq!(pool.outstanding(), 0);
    engine.shutdown();
}

#[test]
fn latency_chain_across_two_workers() {
    init_test_tracing();
    let (mut engine, pool) = start_engine(2);

    engine.pause_all();
    engine.register_class(source_class()).unwrap();
    engine.register_class(timestamp_class()).unwrap();
    engine.register_class(measure_class()).unwrap();
    engine.register_class(sink_class()).unwrap();
    let (out, inc) = queue_port_classes("PortOut", "PortInc", 4096);
    engine.register_class(out).unwrap();
    engine.register_class(inc).unwrap();

    let src = engine
        .module_create("Source", None, &json!({ "pkt_size": 64 }))
        .unwrap();
    let ts = engine.module_create("Timestamp", None, &InitArg::Null).unwrap();
    let pout = engine.module_create("PortOut", None, &InitArg::Null).unwrap();
    let pinc = engine.module_create("PortInc", None, &InitArg::Null).unwrap();
    let meas = engine.module_create("Measure", None, &InitArg::Null).unwrap();
    let sink = engine.module_create("Sink", None, &InitArg::Null).unwrap();

    engine.connect(&src, 0, &ts, 0).unwrap();
    engine.connect(&ts, 0, &pout, 0).unwrap();
    engine.connect(&pinc, 0, &meas, 0).unwrap();
    engine.connect(&meas, 0, &sink, 0).unwrap();

    let src_tid = engine.register_task(&src, InitArg::Null).unwrap();
    let inc_tid = engine.register_task(&pinc, InitArg::Null).unwrap();
    engine.attach_task(&src, src_tid, 0).unwrap();
    engine.attach_task(&pinc, inc_tid, 1).unwrap();
    engine.audit().unwrap();
    engine.resume_all();

    std::thread::sleep(Duration::from_millis(400));
    engine.pause_all();

    let summary = engine.module_query(&meas, &InitArg::Null).unwrap();
    let packets = summary["packets"].as_u64().unwrap();
    let total_ns = summary["total_latency_ns"].as_u64().unwrap();
    assert!(packets > 0, "no packets crossed the port");
    // per-packet latency through an in-process queue must be far below a
    // second; zero is fine (sub-tick hops)
    assert!(total_ns / packets < 1_000_000_000);

    engine.audit().unwrap();

    // with the workers quiescent, the only buffers off the pool are the
    // ones parked inside the loopback queue
    let port = engine.module_query(&pout, &InitArg::Null).unwrap();
    let queued = port["queued"].as_u64().unwrap();
    assert_eq!(pool.outstanding() as u64, queued);

    engine.shutdown();
}

#[test]
fn connect_churn_under_live_workers_stays_sound() {
    init_test_tracing();
    let (mut engine, _pool) = start_engine(1);

    engine.register_class(source_class()).unwrap();
    engine.register_class(sink_class()).unwrap();
    let a = engine.module_create("Source", Some("a"), &InitArg::Null).unwrap();
    let b = engine.module_create("Sink", Some("b"), &InitArg::Null).unwrap();

    // every iteration pauses and resumes the worker around the mutation
    for _ in 0..200 {
        engine.connect(&a, 0, &b, 0).unwrap();
        engine.disconnect(&a, 0).unwrap();
    }
    engine.audit().unwrap();

    // bulk churn under one explicit pause
    engine.pause_all();
    for _ in 0..10_000 {
        engine.connect(&a, 0, &b, 0).unwrap();
        engine.disconnect(&a, 0).unwrap();
    }
    engine.audit().unwrap();
    engine.resume_all();
    engine.shutdown();
}

#[test]
fn destroy_and_recreate_under_live_workers() {
    init_test_tracing();
    let (mut engine, _pool) = start_engine(1);

    engine.register_class(source_class()).unwrap();
    engine.register_class(sink_class()).unwrap();

    let a = engine.module_create("Source", Some("a"), &InitArg::Null).unwrap();
    let b = engine.module_create("Sink", Some("b"), &InitArg::Null).unwrap();
    engine.connect(&a, 0, &b, 0).unwrap();

    engine.module_destroy(&b).unwrap();
    engine.audit().unwrap();
    assert_eq!(engine.list_modules(0, 16), vec!["a".to_owned()]);

    // same name is free again
    let b2 = engine.module_create("Sink", Some("b"), &InitArg::Null).unwrap();
    assert_eq!(b2, "b");
    assert!(matches!(
        engine.module_create("Sink", Some("b"), &InitArg::Null),
        Err(EngineError::NameConflict(_))
    ));
    engine.shutdown();
}

#[test]
fn wire_surface_error_codes() {
    init_test_tracing();
    let (mut engine, _pool) = start_engine(1);

    engine.register_class(source_class()).unwrap();
    engine.register_class(sink_class()).unwrap();
    let a = engine.module_create("Source", Some("a"), &InitArg::Null).unwrap();
    let b = engine.module_create("Sink", Some("b"), &InitArg::Null).unwrap();

    let err = engine.connect("nope", 0, &b, 0).unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert!(matches!(
        engine.num_module_tasks("nope"),
        Err(EngineError::NotFound(_))
    ));
    assert_eq!(engine.num_module_tasks(&a).unwrap(), 0);

    // a source cannot be a downstream: no process_batch capability
    let err = engine.connect(&b, 0, &a, 0).unwrap_err();
    assert_eq!(err.errno(), -(nix::errno::Errno::EINVAL as i32));

    engine.connect(&a, 0, &b, 0).unwrap();
    let err = engine.connect(&a, 0, &b, 0).unwrap_err();
    assert_eq!(err.errno(), -(nix::errno::Errno::EBUSY as i32));

    // disconnect is idempotent on the wire too
    engine.disconnect(&a, 0).unwrap();
    engine.disconnect(&a, 0).unwrap();

    // class init errors carry their own code
    let err = engine
        .module_create("Source", None, &json!({ "pkt_size": 2 }))
        .unwrap_err();
    assert!(matches!(err, EngineError::InitFailed { .. }));
    engine.shutdown();
}

#[test]
fn tap_disables_itself_when_the_reader_goes_away() {
    init_test_tracing();
    let (mut engine, _pool) = start_engine(1);

    engine.pause_all();
    engine.register_class(source_class()).unwrap();
    engine.register_class(sink_class()).unwrap();
    let src = engine.module_create("Source", None, &InitArg::Null).unwrap();
    let snk = engine.module_create("Sink", None, &InitArg::Null).unwrap();
    engine.connect(&src, 0, &snk, 0).unwrap();
    let tid = engine.register_task(&src, InitArg::Null).unwrap();
    engine.attach_task(&src, tid, 0).unwrap();

    // a fifo with a reader we control
    let fifo = fifo_path("tap-epipe");
    nix::unistd::mkfifo(&fifo, nix::sys::stat::Mode::from_bits_truncate(0o600)).unwrap();
    let reader = nix::fcntl::open(
        &fifo,
        nix::fcntl::OFlag::O_RDONLY | nix::fcntl::OFlag::O_NONBLOCK,
        nix::sys::stat::Mode::empty(),
    )
    .unwrap();

    // tap on an unconnected gate is rejected
    assert!(engine.tcpdump_enable(&src, 1, &fifo).is_err());
    engine.tcpdump_enable(&src, 0, &fifo).unwrap();

    // reader goes away before any packet is dumped
    nix::unistd::close(reader).unwrap();
    engine.resume_all();

    // the first dumped batch hits EPIPE and disarms the tap
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        std::thread::sleep(Duration::from_millis(20));
        match engine.tcpdump_disable(&src, 0) {
            Err(_) => break, // already disabled by the worker
            Ok(()) => {
                // dump had not run yet; re-arm and retry
                assert!(std::time::Instant::now() < deadline, "tap never tripped");
                let reader = nix::fcntl::open(
                    &fifo,
                    nix::fcntl::OFlag::O_RDONLY | nix::fcntl::OFlag::O_NONBLOCK,
                    nix::sys::stat::Mode::empty(),
                )
                .unwrap();
                engine.tcpdump_enable(&src, 0, &fifo).unwrap();
                nix::unistd::close(reader).unwrap();
            }
        }
    }

    engine.shutdown();
    let _ = std::fs::remove_file(&fifo);
}

fn fifo_path(tag: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("dp-test-{}-{}", std::process::id(), tag));
    p
}
