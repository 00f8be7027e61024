//! Thread orchestration (spec §5): named threads sharing a process-wide
//! shutdown flag, communicating over `channellib` queues, with the
//! estimator/tracker/detector state behind a single `frame_mutex`-style
//! lock (spec §5's shared-state table collapses to one lock here since
//! `Pipeline` already serializes tracker, estimator and detector access).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use swarmvio_swarm::{parse_lcm_uri, run_recv_loop, SwarmMessage, SwarmTransport};
use swarmvio_types::{ImuSample, LoopEdge, SwarmVioConfig, VisualImageDescArray};

use crate::ingest::ImageFrame;
use crate::pipeline::Pipeline;

/// Handles for a running agent. Dropping `image_tx`/`imu_tx` lets the
/// ingestion threads drain and exit; [`AppHandles::join`] additionally
/// raises the shutdown flag for the rest (spec §5 "Cancellation").
pub struct AppHandles {
    pub image_tx: channellib::Sender<ImageFrame>,
    pub imu_tx: channellib::Sender<ImuSample>,
    shutdown: Arc<AtomicBool>,
    threads: Vec<std::thread::JoinHandle<()>>,
    runtime: tokio::runtime::Runtime,
}

impl AppHandles {
    /// Signals shutdown and waits for every thread to exit. Outstanding
    /// solves finish to completion; no mid-solve cancellation (spec §5).
    pub fn join(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        self.runtime.shutdown_timeout(Duration::from_secs(1));
    }
}

/// Spawns every named thread from spec §5 and wires them through a
/// shared [`Pipeline`].
pub fn spawn(config: SwarmVioConfig) -> eyre::Result<AppHandles> {
    let self_id = config.self_id;
    let (image_tx, image_rx) = channellib::unbounded::<ImageFrame>();
    let (imu_tx, imu_rx) = channellib::unbounded::<ImuSample>();
    let (desc_tx, desc_rx) = channellib::unbounded::<VisualImageDescArray>();
    let (edge_tx, edge_rx) = channellib::unbounded::<LoopEdge>();
    let (remote_desc_tx, remote_desc_rx) = channellib::unbounded::<VisualImageDescArray>();
    let (remote_edge_tx, remote_edge_rx) = channellib::unbounded::<LoopEdge>();

    let pipeline = Arc::new(Mutex::new(Pipeline::new(config.clone(), desc_tx, edge_tx)));
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut threads = Vec::new();

    // Image ingestion thread.
    {
        let pipeline = pipeline.clone();
        let shutdown = shutdown.clone();
        threads.push(
            std::thread::Builder::new()
                .name("swarmvio-image".into())
                .spawn(move || {
                    let _span = tracing::info_span!("agent", self_id).entered();
                    while !shutdown.load(Ordering::Relaxed) {
                        match image_rx.recv_timeout(Duration::from_millis(1)) {
                            Ok(frame) => {
                                pipeline.lock().process_image_frame(frame);
                            }
                            Err(e) if e.is_timeout() => continue,
                            Err(_) => break,
                        }
                    }
                })
                .expect("spawn image ingestion thread"),
        );
    }

    // IMU ingestion thread.
    {
        let pipeline = pipeline.clone();
        let shutdown = shutdown.clone();
        threads.push(
            std::thread::Builder::new()
                .name("swarmvio-imu".into())
                .spawn(move || {
                    let _span = tracing::info_span!("agent", self_id).entered();
                    while !shutdown.load(Ordering::Relaxed) {
                        match imu_rx.recv_timeout(Duration::from_millis(1)) {
                            Ok(sample) => pipeline.lock().process_imu_sample(sample),
                            Err(e) if e.is_timeout() => continue,
                            Err(_) => break,
                        }
                    }
                })
                .expect("spawn IMU ingestion thread"),
        );
    }

    // Loop-detection thread: dispatches remote descriptors the network
    // thread received, and ticks the matched-frame waiter pool (spec §9's
    // bounded waiter pool stands in for "Matched-frame wait threads").
    {
        let pipeline = pipeline.clone();
        let shutdown = shutdown.clone();
        threads.push(
            std::thread::Builder::new()
                .name("swarmvio-loopdet".into())
                .spawn(move || {
                    let _span = tracing::info_span!("agent", self_id).entered();
                    while !shutdown.load(Ordering::Relaxed) {
                        let mut did_work = false;
                        if let Ok(desc) = remote_desc_rx.try_recv() {
                            pipeline.lock().process_remote_descriptor(desc);
                            did_work = true;
                        }
                        // Remote loop edges feed an external pose-graph
                        // optimizer, out of scope here; draining keeps the
                        // channel from growing unbounded.
                        if remote_edge_rx.try_recv().is_ok() {
                            did_work = true;
                        }
                        pipeline.lock().expire_pending_matches();
                        if !did_work {
                            std::thread::sleep(Duration::from_millis(1));
                        }
                    }
                })
                .expect("spawn loop-detection thread"),
        );
    }

    // Network thread: a tokio runtime owning the multicast transport.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("swarmvio-net")
        .build()?;

    let addr = parse_lcm_uri(&config.network.lcm_uri)?;
    let transport = Arc::new(runtime.block_on(SwarmTransport::bind(addr))?);

    {
        let transport = transport.clone();
        let shutdown = shutdown.clone();
        let tick = Duration::from_millis(config.network.recv_msg_duration_ms);
        runtime.spawn(run_recv_loop(transport, tick, remote_desc_tx, remote_edge_tx, shutdown));
    }

    // Outgoing broadcast: plain OS threads blocking on the sync channels,
    // each driving one send through the tokio runtime's handle. Keeps the
    // async recv loop free of blocking channel waits.
    {
        let transport = transport.clone();
        let shutdown = shutdown.clone();
        let handle = runtime.handle().clone();
        threads.push(
            std::thread::Builder::new()
                .name("swarmvio-net-desc".into())
                .spawn(move || {
                    let _span = tracing::info_span!("agent", self_id).entered();
                    while !shutdown.load(Ordering::Relaxed) {
                        match desc_rx.recv_timeout(Duration::from_millis(5)) {
                            Ok(desc) => {
                                let _ = handle.block_on(transport.broadcast(&SwarmMessage::Desc(desc)));
                            }
                            Err(e) if e.is_timeout() => continue,
                            Err(_) => break,
                        }
                    }
                })
                .expect("spawn descriptor broadcast thread"),
        );
    }
    {
        let transport = transport.clone();
        let shutdown = shutdown.clone();
        let handle = runtime.handle().clone();
        threads.push(
            std::thread::Builder::new()
                .name("swarmvio-net-edge".into())
                .spawn(move || {
                    let _span = tracing::info_span!("agent", self_id).entered();
                    while !shutdown.load(Ordering::Relaxed) {
                        match edge_rx.recv_timeout(Duration::from_millis(5)) {
                            Ok(edge) => {
                                let _ = handle.block_on(transport.broadcast(&SwarmMessage::Edge(edge)));
                            }
                            Err(e) if e.is_timeout() => continue,
                            Err(_) => break,
                        }
                    }
                })
                .expect("spawn edge broadcast thread"),
        );
    }

    Ok(AppHandles {
        image_tx,
        imu_tx,
        shutdown,
        threads,
        runtime,
    })
}
