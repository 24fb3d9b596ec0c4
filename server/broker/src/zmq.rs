//! Queue-transport side of the broker: per-UAV telemetry intakes, per-UAV
//! command egress, the UI topic publisher and the UI command intake. The
//! broker is the passive endpoint for all four socket classes; UAVs and UIs
//! connect to it.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zeromq::{PubSocket, PullSocket, PushSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use tb_wire::{CommandFrame, Transport};

use crate::config::Config;
use crate::service::TelemetryFrame;

pub struct RelManager {
    /// Telemetry intakes tagged with the owning UAV's index in the config
    /// table. The binding is the source identity; payloads are never parsed
    /// to discover the sender.
    pub telemetry: Vec<(usize, PullSocket)>,
    /// Command egress sockets, parallel to the config table.
    pub commands: Vec<PushSocket>,
    pub ui_commands: PullSocket,
    pub publisher: PubSocket,
}

async fn bind_logged<S: Socket>(socket: &mut S, addr: &str, what: &str) -> Result<()> {
    match socket.bind(addr).await {
        Ok(endpoint) => {
            info!("{what} bound at {endpoint}");
            Ok(())
        }
        Err(e) => {
            error!("failed to bind {what} at {addr}: {e}");
            Err(e).with_context(|| format!("bind {what} at {addr}"))
        }
    }
}

impl RelManager {
    /// Bind every reliable socket. Any failure aborts startup; sockets bound
    /// so far unwind when the partially built manager drops.
    pub async fn bind(cfg: &Config) -> Result<RelManager> {
        let mut publisher = PubSocket::new();
        let addr = format!("tcp://0.0.0.0:{}", cfg.ui.rel_publish_port);
        bind_logged(&mut publisher, &addr, "UI publisher").await?;

        let mut ui_commands = PullSocket::new();
        let addr = format!("tcp://0.0.0.0:{}", cfg.ui.rel_command_port);
        bind_logged(&mut ui_commands, &addr, "UI command intake").await?;

        let mut telemetry = Vec::new();
        let mut commands = Vec::with_capacity(cfg.uavs.len());
        for (index, uav) in cfg.uavs.iter().enumerate() {
            if let Some(port) = uav.rel_telemetry_port {
                let mut socket = PullSocket::new();
                let addr = format!("tcp://0.0.0.0:{port}");
                let what = format!("telemetry intake for {}", uav.name);
                bind_logged(&mut socket, &addr, &what).await?;
                telemetry.push((index, socket));
            }

            let mut socket = PushSocket::new();
            let addr = format!("tcp://0.0.0.0:{}", uav.rel_command_port);
            let what = format!("command egress for {}", uav.name);
            bind_logged(&mut socket, &addr, &what).await?;
            commands.push(socket);
        }

        Ok(RelManager {
            telemetry,
            commands,
            ui_commands,
            publisher,
        })
    }
}

/// One reader task per telemetry intake, each feeding the shared ingress
/// channel. Per-socket arrival order is preserved: a socket has exactly one
/// reader, and the channel keeps per-sender FIFO order.
pub fn spawn_receivers(
    sockets: Vec<(usize, PullSocket)>,
    names: Arc<Vec<String>>,
    events: mpsc::Sender<TelemetryFrame>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    sockets
        .into_iter()
        .map(|(index, mut socket)| {
            let events = events.clone();
            let mut shutdown = shutdown.clone();
            let names = Arc::clone(&names);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        received = socket.recv() => match received {
                            Ok(message) => {
                                let payload = message.get(0).cloned().unwrap_or_default();
                                let frame = TelemetryFrame {
                                    source_uav: index,
                                    source_transport: Transport::Rel,
                                    payload,
                                };
                                if events.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!("telemetry intake for {} closed: {e}", names[index]);
                                break;
                            }
                        }
                    }
                }
            })
        })
        .collect()
}

/// Dedicated forwarder draining the UI command intake and pushing bodies on
/// the matching UAV command socket.
pub fn spawn_forwarder(
    mut ui_commands: PullSocket,
    mut commands: Vec<PushSocket>,
    names: Arc<Vec<String>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = ui_commands.recv() => match received {
                    Ok(message) => route_command(&message, &mut commands, &names).await,
                    Err(e) => {
                        debug!("UI command intake closed: {e}");
                        break;
                    }
                }
            }
        }
    })
}

async fn route_command(message: &ZmqMessage, commands: &mut [PushSocket], names: &[String]) {
    let raw = String::from_utf8_lossy(message.get(0).map(AsRef::as_ref).unwrap_or_default());
    let frame = CommandFrame::parse(&raw);
    info!("RECEIVED FROM UI [{}]: {}", frame.ui_tag, raw);
    if frame.legacy_fallback {
        debug!("command has no target prefix; using legacy fallback {}", frame.target_uav);
    }

    let Some(index) = names.iter().position(|name| *name == frame.target_uav) else {
        warn!("dropping command for unknown UAV {}: {}", frame.target_uav, frame.body);
        return;
    };
    info!(ui_tag = %frame.ui_tag, "FORWARDING TO {}: {}", frame.target_uav, frame.body);
    if let Err(e) = commands[index].send(ZmqMessage::from(frame.body.clone())).await {
        warn!("dropping command for {}: send failed: {e}", frame.target_uav);
    }
}
