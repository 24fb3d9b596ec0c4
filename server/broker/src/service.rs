//! Service orchestrator: binds both transports, spawns the reader and
//! forwarder tasks, and runs the dispatch loop that classifies every ingress
//! frame and fans it out on the same-transport egress.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use zeromq::{PubSocket, SocketSend, ZmqMessage};

use tb_wire::{classify, encode_datagram, full_topic, Topic, Transport};

use crate::config::Config;
use crate::udp::{self, DgmManager};
use crate::zmq::{self, RelManager};

/// Depth of the shared ingress channel between reader tasks and the
/// dispatcher. Deep enough to ride out log I/O stalls, shallow enough that
/// shutdown never waits on a long backlog.
const INGRESS_QUEUE_DEPTH: usize = 1024;

/// How long shutdown waits for each task before detaching it.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// An in-flight telemetry frame. Created on ingress, consumed by the
/// dispatcher, never stored.
#[derive(Clone, Debug)]
pub struct TelemetryFrame {
    /// Index into the config UAV table, taken from the ingress socket's
    /// binding.
    pub source_uav: usize,
    pub source_transport: Transport,
    pub payload: Bytes,
}

/// Bind everything, run until the shutdown flag flips, then stop every task
/// and drop the sockets in reverse binding order.
pub async fn run(cfg: Config, shutdown: watch::Receiver<bool>) -> Result<()> {
    // Reliable sockets bind first; a datagram bind failure unwinds them by
    // dropping the already-built manager.
    let rel = RelManager::bind(&cfg).await?;
    let dgm = DgmManager::bind(&cfg).await?;

    if let Some(port) = cfg.ui.dgm_command_port {
        warn!("udp_command_port {port} is reserved and will not be bound; no datagram command intake exists");
    }

    let names: Arc<Vec<String>> = Arc::new(cfg.uavs.iter().map(|u| u.name.clone()).collect());
    log_startup_summary(&cfg);

    let (events_tx, events_rx) = mpsc::channel(INGRESS_QUEUE_DEPTH);
    let RelManager {
        telemetry,
        commands,
        ui_commands,
        publisher,
    } = rel;
    let DgmManager {
        intakes,
        sender,
        camera_dest,
        mapping_dest,
    } = dgm;

    let mut tasks = Vec::new();
    tasks.extend(zmq::spawn_receivers(
        telemetry,
        Arc::clone(&names),
        events_tx.clone(),
        shutdown.clone(),
    ));
    tasks.extend(udp::spawn_receivers(
        intakes,
        Arc::clone(&names),
        events_tx.clone(),
        shutdown.clone(),
    ));
    tasks.push(zmq::spawn_forwarder(
        ui_commands,
        commands,
        Arc::clone(&names),
        shutdown.clone(),
    ));
    // the dispatcher must see a closed channel once every reader stops
    drop(events_tx);

    dispatch(
        publisher,
        sender,
        camera_dest,
        mapping_dest,
        &names,
        events_rx,
        shutdown,
    )
    .await;

    info!("shutdown started");
    for task in tasks {
        if timeout(SHUTDOWN_GRACE, task).await.is_err() {
            debug!("task did not stop within the grace period; detaching");
        }
    }
    info!("shutdown complete");
    Ok(())
}

/// The only task that touches the publisher and the datagram egress socket,
/// so neither needs a lock. Frames from one ingress socket arrive here in
/// arrival order and leave in the same order.
async fn dispatch(
    mut publisher: PubSocket,
    sender: UdpSocket,
    camera_dest: Option<SocketAddr>,
    mapping_dest: Option<SocketAddr>,
    names: &[String],
    mut events: mpsc::Receiver<TelemetryFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = events.recv() => match event {
                Some(frame) => {
                    forward(&mut publisher, &sender, camera_dest, mapping_dest, names, frame).await;
                }
                None => break,
            }
        }
    }
}

async fn forward(
    publisher: &mut PubSocket,
    sender: &UdpSocket,
    camera_dest: Option<SocketAddr>,
    mapping_dest: Option<SocketAddr>,
    names: &[String],
    frame: TelemetryFrame,
) {
    let uav = names[frame.source_uav].as_str();
    info!(
        "received from {}:{}: {}",
        frame.source_transport,
        uav,
        String::from_utf8_lossy(&frame.payload)
    );

    let topic = classify(&frame.payload);
    let full = full_topic(topic, uav);

    match frame.source_transport {
        Transport::Rel => {
            let mut message = ZmqMessage::from(full.clone());
            message.push_back(frame.payload.clone());
            match publisher.send(message).await {
                Ok(()) => info!("published [{full}] {} bytes", frame.payload.len()),
                Err(e) => warn!("dropping frame for [{full}]: publish failed: {e}"),
            }
        }
        Transport::Dgm => {
            let dest = match topic {
                Topic::Camera => camera_dest,
                Topic::Mapping => mapping_dest,
                // no UI listens for unknown-topic datagrams
                Topic::Unknown => None,
            };
            let Some(dest) = dest else {
                debug!("dropping frame for [{full}]: no datagram listener");
                return;
            };
            let packet = encode_datagram(&full, &frame.payload);
            match sender.send_to(&packet, dest).await {
                Ok(_) => info!("published [{full}] {} bytes to {dest}", frame.payload.len()),
                Err(e) => warn!("dropping frame for [{full}]: send failed: {e}"),
            }
        }
    }
}

fn log_startup_summary(cfg: &Config) {
    let mut rel_ports = vec![cfg.ui.rel_publish_port, cfg.ui.rel_command_port];
    let mut dgm_ports = Vec::new();
    for uav in &cfg.uavs {
        rel_ports.extend(uav.rel_telemetry_port);
        rel_ports.push(uav.rel_command_port);
        dgm_ports.extend(uav.dgm_telemetry_port);
    }
    dgm_ports.extend(cfg.ui.dgm_camera_port);
    dgm_ports.extend(cfg.ui.dgm_mapping_port);
    info!(
        "service started: {} UAVs, rel ports {:?}, dgm ports {:?}",
        cfg.uavs.len(),
        rel_ports,
        dgm_ports
    );
}
