//! Datagram side of the broker: per-UAV UDP telemetry intakes and the egress
//! path to the UI datagram listeners.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use tb_wire::{Transport, MAX_DATAGRAM};

use crate::config::Config;
use crate::service::TelemetryFrame;

pub struct DgmManager {
    /// Bound intakes tagged with the owning UAV's index; as on the queue
    /// transport, the binding is the source identity, not the datagram's
    /// sender address.
    pub intakes: Vec<(usize, UdpSocket)>,
    /// Single egress socket; the UI listeners own the destination ports.
    pub sender: UdpSocket,
    pub camera_dest: Option<SocketAddr>,
    pub mapping_dest: Option<SocketAddr>,
}

fn ui_dest(port: Option<u16>) -> Option<SocketAddr> {
    port.map(|p| SocketAddr::from((Ipv4Addr::LOCALHOST, p)))
}

impl DgmManager {
    /// Bind one UDP socket per UAV with datagram telemetry enabled, plus the
    /// egress socket. Any failure aborts startup.
    pub async fn bind(cfg: &Config) -> Result<DgmManager> {
        let mut intakes = Vec::new();
        for (index, uav) in cfg.uavs.iter().enumerate() {
            let Some(port) = uav.dgm_telemetry_port else {
                continue;
            };
            let addr = format!("{}:{port}", uav.ip);
            match UdpSocket::bind(&addr).await {
                Ok(socket) => {
                    info!("datagram intake for {} bound at {addr}", uav.name);
                    intakes.push((index, socket));
                }
                Err(e) => {
                    error!("failed to bind datagram intake for {} at {addr}: {e}", uav.name);
                    return Err(e)
                        .with_context(|| format!("bind datagram intake for {} at {addr}", uav.name));
                }
            }
        }

        let sender = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("bind datagram egress socket")?;

        Ok(DgmManager {
            intakes,
            sender,
            camera_dest: ui_dest(cfg.ui.dgm_camera_port),
            mapping_dest: ui_dest(cfg.ui.dgm_mapping_port),
        })
    }
}

/// One reader task per intake. Each completed read immediately re-arms; a
/// datagram larger than [`MAX_DATAGRAM`] never arrives in part.
pub fn spawn_receivers(
    intakes: Vec<(usize, UdpSocket)>,
    names: Arc<Vec<String>>,
    events: mpsc::Sender<TelemetryFrame>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    intakes
        .into_iter()
        .map(|(index, socket)| {
            let events = events.clone();
            let mut shutdown = shutdown.clone();
            let names = Arc::clone(&names);
            tokio::spawn(async move {
                let mut buf = [0u8; MAX_DATAGRAM];
                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        received = socket.recv_from(&mut buf) => match received {
                            Ok((len, _sender)) => {
                                let frame = TelemetryFrame {
                                    source_uav: index,
                                    source_transport: Transport::Dgm,
                                    payload: Bytes::copy_from_slice(&buf[..len]),
                                };
                                if events.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!("datagram intake for {} closed: {e}", names[index]);
                                break;
                            }
                        }
                    }
                }
            })
        })
        .collect()
}
