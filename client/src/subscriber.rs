//! Telemetry subscription. Two modes, matching the broker's two egress
//! paths: a queue-transport SUB socket with transport-layer topic filtering,
//! or a bound UDP listener on one of the UI datagram ports.

use std::time::SystemTime;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use zeromq::{Socket, SocketRecv, SubSocket};

use tb_wire::{decode_datagram, split_topic, Topic, Transport, MAX_DATAGRAM};

const UPDATE_QUEUE_DEPTH: usize = 1024;

/// One received telemetry frame, decoded to the client vocabulary.
#[derive(Clone, Debug)]
pub struct TelemetryUpdate {
    pub uav: String,
    pub topic: Topic,
    pub full_topic: String,
    pub payload: Bytes,
    pub transport: Transport,
    pub received_at: SystemTime,
}

/// Handle over a background reader task. Updates arrive on an internal
/// bounded queue the caller drains with [`Subscriber::recv`]; dropping the
/// handle stops the reader.
pub struct Subscriber {
    updates: mpsc::Receiver<TelemetryUpdate>,
    stop: watch::Sender<bool>,
}

impl Subscriber {
    /// Subscribe over the queue transport. `prefixes` filter topics at the
    /// transport layer (`"camera_"`, `"mapping_UAV_2"`, ...); an empty list
    /// subscribes to everything.
    pub async fn connect_rel(host: &str, publish_port: u16, prefixes: &[&str]) -> Result<Subscriber> {
        let mut socket = SubSocket::new();
        let addr = format!("tcp://{host}:{publish_port}");
        socket
            .connect(&addr)
            .await
            .with_context(|| format!("connect subscriber to {addr}"))?;
        if prefixes.is_empty() {
            socket.subscribe("").await.context("subscribe to all topics")?;
        } else {
            for prefix in prefixes {
                socket
                    .subscribe(prefix)
                    .await
                    .with_context(|| format!("subscribe to {prefix}"))?;
            }
        }

        let (updates_tx, updates) = mpsc::channel(UPDATE_QUEUE_DEPTH);
        let (stop, stop_rx) = watch::channel(false);
        tokio::spawn(rel_reader(socket, updates_tx, stop_rx));
        Ok(Subscriber { updates, stop })
    }

    /// Listen on a UI datagram port (the camera or mapping stream port the
    /// broker sends to).
    pub async fn bind_dgm(port: u16) -> Result<Subscriber> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("bind datagram listener on port {port}"))?;

        let (updates_tx, updates) = mpsc::channel(UPDATE_QUEUE_DEPTH);
        let (stop, stop_rx) = watch::channel(false);
        tokio::spawn(dgm_reader(socket, updates_tx, stop_rx));
        Ok(Subscriber { updates, stop })
    }

    /// Next update, or `None` once the reader has stopped.
    pub async fn recv(&mut self) -> Option<TelemetryUpdate> {
        self.updates.recv().await
    }

    /// Stop the background reader. Dropping the subscriber does the same.
    pub fn close(&self) {
        let _ = self.stop.send(true);
    }
}

async fn rel_reader(
    mut socket: SubSocket,
    updates: mpsc::Sender<TelemetryUpdate>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            received = socket.recv() => match received {
                Ok(message) => {
                    let full = String::from_utf8_lossy(
                        message.get(0).map(AsRef::as_ref).unwrap_or_default(),
                    )
                    .into_owned();
                    let payload = message.get(1).cloned().unwrap_or_default();
                    let (topic, uav) = split_topic(&full);
                    let update = TelemetryUpdate {
                        uav: uav.to_owned(),
                        topic,
                        full_topic: full,
                        payload,
                        transport: Transport::Rel,
                        received_at: SystemTime::now(),
                    };
                    if updates.send(update).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("subscriber socket closed: {e}");
                    break;
                }
            }
        }
    }
}

async fn dgm_reader(
    socket: UdpSocket,
    updates: mpsc::Sender<TelemetryUpdate>,
    mut stop: watch::Receiver<bool>,
) {
    let mut buf = [0u8; MAX_DATAGRAM + 128];
    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, _sender)) => {
                    let (full, payload) = match decode_datagram(&buf[..len]) {
                        Ok(parts) => parts,
                        Err(e) => {
                            debug!("dropping malformed datagram: {e}");
                            continue;
                        }
                    };
                    let (topic, uav) = split_topic(full);
                    let update = TelemetryUpdate {
                        uav: uav.to_owned(),
                        topic,
                        full_topic: full.to_owned(),
                        payload: Bytes::copy_from_slice(payload),
                        transport: Transport::Dgm,
                        received_at: SystemTime::now(),
                    };
                    if updates.send(update).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("datagram listener closed: {e}");
                    break;
                }
            }
        }
    }
}
