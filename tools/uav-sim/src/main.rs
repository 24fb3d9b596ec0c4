use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tokio::net::UdpSocket;
use tokio::time::sleep;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;
use zeromq::{PullSocket, PushSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

/// Gap between the mapping and camera message of one pair.
const PAIR_GAP: Duration = Duration::from_millis(100);

#[derive(Parser, Debug, Clone)]
#[command(name = "tb-uav-sim", about = "Synthetic UAV telemetry generator")]
struct Args {
    /// UAV identity to simulate; must exist in the service config
    #[arg(long, default_value = "UAV_1")]
    name: String,

    /// Transport the telemetry stream uses
    #[arg(long, value_enum, default_value = "rel")]
    protocol: Proto,

    /// Service config path
    #[arg(long, env = "SERVICE_CONFIG", default_value = "service_config.json")]
    config: PathBuf,

    /// Telemetry pairs to send before exiting
    #[arg(long, default_value_t = 50)]
    iterations: u64,

    /// Gap between pairs in milliseconds; defaults to the per-UAV cadence
    #[arg(long)]
    interval_ms: Option<u64>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Proto {
    /// Queue transport (connects to the broker's telemetry intake)
    Rel,
    /// UDP datagrams (sends to the broker's datagram intake)
    Dgm,
}

fn disabled() -> i64 {
    -1
}

#[derive(Deserialize)]
struct RawFile {
    uavs: Vec<RawUav>,
}

#[derive(Deserialize)]
struct RawUav {
    name: String,
    ip: String,
    #[serde(alias = "telemetry_port")]
    tcp_telemetry_port: i64,
    #[serde(alias = "command_port")]
    tcp_command_port: i64,
    #[serde(default = "disabled")]
    udp_telemetry_port: i64,
}

/// UAVs pre-assign a code band per stream so the broker can classify from
/// the code alone.
fn code_bands(name: &str) -> (i64, i64) {
    match name {
        "UAV_2" => (3000, 4000),
        "UAV_3" => (5000, 6000),
        _ => (1000, 2000),
    }
}

/// Per-UAV cadence, to simulate varying workloads across the fleet.
fn default_interval(name: &str) -> u64 {
    match name {
        "UAV_2" => 750,
        "UAV_3" => 1000,
        _ => 500,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let args = Args::parse();

    let text = std::fs::read_to_string(&args.config)
        .with_context(|| format!("read service config {}", args.config.display()))?;
    let raw: RawFile = serde_json::from_str(&text)
        .with_context(|| format!("parse service config {}", args.config.display()))?;
    let Some(uav) = raw.uavs.into_iter().find(|u| u.name == args.name) else {
        bail!("UAV {:?} is not in {}", args.name, args.config.display());
    };

    tokio::select! {
        result = run(&args, &uav) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received; stopping");
        }
    }

    Ok(())
}

async fn run(args: &Args, uav: &RawUav) -> Result<()> {
    match args.protocol {
        Proto::Rel => run_rel(args, uav).await,
        Proto::Dgm => run_dgm(args, uav).await,
    }
}

async fn run_rel(args: &Args, uav: &RawUav) -> Result<()> {
    if uav.tcp_telemetry_port < 0 {
        bail!("{} has no queue-transport telemetry port configured", uav.name);
    }
    let mut push = PushSocket::new();
    let addr = format!("tcp://{}:{}", uav.ip, uav.tcp_telemetry_port);
    push.connect(&addr)
        .await
        .with_context(|| format!("connect telemetry push to {addr}"))?;
    info!("[{}] sending telemetry to {addr}", uav.name);

    // commands only exist on the queue transport
    let mut pull = PullSocket::new();
    let addr = format!("tcp://{}:{}", uav.ip, uav.tcp_command_port);
    pull.connect(&addr)
        .await
        .with_context(|| format!("connect command pull to {addr}"))?;
    let name = uav.name.clone();
    tokio::spawn(async move {
        loop {
            match pull.recv().await {
                Ok(message) => {
                    let command = String::from_utf8_lossy(
                        message.get(0).map(AsRef::as_ref).unwrap_or_default(),
                    )
                    .into_owned();
                    info!("[{name}] received command: {command}");
                }
                Err(e) => {
                    debug!("[{name}] command socket closed: {e}");
                    break;
                }
            }
        }
    });

    send_pairs(args, uav, TelemetrySender::Rel(&mut push)).await
}

async fn run_dgm(args: &Args, uav: &RawUav) -> Result<()> {
    if uav.udp_telemetry_port < 0 {
        bail!("{} has no datagram telemetry port configured", uav.name);
    }
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("bind datagram sender socket")?;
    let dest = format!("{}:{}", uav.ip, uav.udp_telemetry_port);
    info!("[{}] sending telemetry to {dest}", uav.name);

    send_pairs(args, uav, TelemetrySender::Dgm { socket: &socket, dest: &dest }).await
}

enum TelemetrySender<'a> {
    Rel(&'a mut PushSocket),
    Dgm { socket: &'a UdpSocket, dest: &'a str },
}

impl TelemetrySender<'_> {
    async fn send(&mut self, message: &str) -> Result<()> {
        match self {
            TelemetrySender::Rel(push) => {
                push.send(ZmqMessage::from(message.to_owned())).await?;
            }
            TelemetrySender::Dgm { socket, dest } => {
                socket.send_to(message.as_bytes(), &**dest).await?;
            }
        }
        Ok(())
    }
}

/// Alternate mapping/camera messages of the text form `"<name>  <code>"`,
/// pacing like a real vehicle: a short gap inside the pair, the per-UAV
/// cadence between pairs.
async fn send_pairs(args: &Args, uav: &RawUav, mut sender: TelemetrySender<'_>) -> Result<()> {
    let (mapping_base, camera_base) = code_bands(&uav.name);
    let interval = Duration::from_millis(
        args.interval_ms.unwrap_or_else(|| default_interval(&uav.name)),
    );

    for i in 0..args.iterations {
        let step = i as i64;
        let message = format!("{}  {}", uav.name, mapping_base + 1 + step);
        sender.send(&message).await.context("send mapping telemetry")?;
        info!("[{}] sent {message}", uav.name);
        sleep(PAIR_GAP).await;

        let message = format!("{}  {}", uav.name, camera_base + 1 + step);
        sender.send(&message).await.context("send camera telemetry")?;
        info!("[{}] sent {message}", uav.name);
        sleep(interval).await;
    }

    info!("[{}] telemetry run complete", uav.name);
    Ok(())
}
