//! Client view of the shared service config: only the UI port table matters
//! here. The same JSON file the broker loads is accepted, legacy field names
//! included.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Host the broker runs on.
    pub host: String,
    pub rel_publish_port: u16,
    pub rel_command_port: u16,
    pub dgm_camera_port: Option<u16>,
    pub dgm_mapping_port: Option<u16>,
}

fn disabled() -> i64 {
    -1
}

#[derive(Deserialize)]
struct RawFile {
    ui_ports: RawUiPorts,
}

#[derive(Deserialize)]
struct RawUiPorts {
    #[serde(alias = "publish_port")]
    tcp_publish_port: u16,
    #[serde(alias = "command_port")]
    tcp_command_port: u16,
    #[serde(default = "disabled")]
    udp_camera_port: i64,
    #[serde(default = "disabled")]
    udp_mapping_port: i64,
}

fn optional(port: i64) -> Option<u16> {
    u16::try_from(port).ok().filter(|p| *p > 0)
}

impl ClientConfig {
    /// Read the UI ports out of a service config file.
    pub fn from_service_config(path: &Path, host: impl Into<String>) -> Result<ClientConfig> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read service config {}", path.display()))?;
        let raw: RawFile = serde_json::from_str(&text)
            .with_context(|| format!("parse service config {}", path.display()))?;
        Ok(ClientConfig {
            host: host.into(),
            rel_publish_port: raw.ui_ports.tcp_publish_port,
            rel_command_port: raw.ui_ports.tcp_command_port,
            dgm_camera_port: optional(raw.ui_ports.udp_camera_port),
            dgm_mapping_port: optional(raw.ui_ports.udp_mapping_port),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ui_ports_with_legacy_names() {
        let raw: RawFile = serde_json::from_str(
            r#"{
                "uavs": [],
                "ui_ports": { "publish_port": 5557, "command_port": 5558,
                              "udp_camera_port": 5570 }
            }"#,
        )
        .unwrap();
        assert_eq!(raw.ui_ports.tcp_publish_port, 5557);
        assert_eq!(raw.ui_ports.tcp_command_port, 5558);
        assert_eq!(optional(raw.ui_ports.udp_camera_port), Some(5570));
        assert_eq!(optional(raw.ui_ports.udp_mapping_port), None);
    }

    #[test]
    fn negative_udp_port_is_disabled() {
        assert_eq!(optional(-1), None);
        assert_eq!(optional(0), None);
        assert_eq!(optional(5571), Some(5571));
    }
}
