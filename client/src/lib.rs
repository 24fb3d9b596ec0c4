//! UI-side client library for the telemetry broker: topic subscription over
//! the queue transport or the UI datagram listeners, plus command push to
//! named UAVs. UIs stay out of transport details; this crate owns them.

mod commander;
mod config;
mod subscriber;

pub use commander::Commander;
pub use config::ClientConfig;
pub use subscriber::{Subscriber, TelemetryUpdate};
pub use tb_wire::{Topic, Transport, UiTag};
