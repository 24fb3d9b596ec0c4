//! Static JSON configuration: the UAV table, the UI port table and the log
//! file location. Loaded once at startup; every later failure here is fatal.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "service_config.json";
const DEFAULT_LOG_FILE: &str = "telemetry_log.txt";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    NotFound(PathBuf),
    #[error("could not read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("UAV {0:?} is configured twice")]
    DuplicateName(String),
    #[error("port {0} is assigned to more than one socket")]
    DuplicatePort(u16),
    #[error("UAV {uav:?}: {field} {value} is not a valid port")]
    InvalidPort {
        uav: String,
        field: &'static str,
        value: i64,
    },
    #[error("ui_ports: {field} {value} is not a valid port")]
    InvalidUiPort { field: &'static str, value: i64 },
    #[error("UAV {0:?} has neither reliable nor datagram telemetry enabled")]
    NoTelemetry(String),
}

/// One configured vehicle. The broker binds; the UAV connects.
#[derive(Clone, Debug)]
pub struct UavEntry {
    pub name: String,
    pub ip: String,
    /// Queue-transport telemetry intake; `None` = disabled for this UAV.
    pub rel_telemetry_port: Option<u16>,
    /// Queue-transport command egress the UAV pulls from.
    pub rel_command_port: u16,
    /// UDP telemetry intake; `None` = disabled for this UAV.
    pub dgm_telemetry_port: Option<u16>,
}

/// UI-side ports. The broker binds the reliable pair and *sends to* the
/// datagram ports, which UI listeners own.
#[derive(Clone, Debug)]
pub struct UiPorts {
    pub rel_publish_port: u16,
    pub rel_command_port: u16,
    pub dgm_camera_port: Option<u16>,
    pub dgm_mapping_port: Option<u16>,
    /// Reserved. Never bound; configs that set it get a startup warning.
    pub dgm_command_port: Option<u16>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub uavs: Vec<UavEntry>,
    pub ui: UiPorts,
    pub log_file: PathBuf,
}

// Raw shapes as they appear in JSON. Ports stay signed here: -1 (or any
// negative) marks an optional transport as disabled, matching the existing
// fleet configs.

fn disabled() -> i64 {
    -1
}

#[derive(Deserialize)]
struct RawConfig {
    uavs: Vec<RawUav>,
    ui_ports: RawUiPorts,
    log_file: Option<PathBuf>,
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

#[derive(Deserialize)]
struct RawUiPorts {
    #[serde(alias = "publish_port")]
    tcp_publish_port: i64,
    #[serde(alias = "command_port")]
    tcp_command_port: i64,
    #[serde(default = "disabled")]
    udp_camera_port: i64,
    #[serde(default = "disabled")]
    udp_mapping_port: i64,
    #[serde(default = "disabled")]
    udp_command_port: i64,
}

fn optional_port(
    uav: &str,
    field: &'static str,
    value: i64,
) -> Result<Option<u16>, ConfigError> {
    match value {
        v if v < 0 => Ok(None),
        v @ 1..=65535 => Ok(Some(v as u16)),
        v => Err(ConfigError::InvalidPort {
            uav: uav.to_owned(),
            field,
            value: v,
        }),
    }
}

fn required_port(uav: &str, field: &'static str, value: i64) -> Result<u16, ConfigError> {
    optional_port(uav, field, value)?.ok_or(ConfigError::InvalidPort {
        uav: uav.to_owned(),
        field,
        value,
    })
}

fn ui_port(field: &'static str, value: i64) -> Result<Option<u16>, ConfigError> {
    match value {
        v if v < 0 => Ok(None),
        v @ 1..=65535 => Ok(Some(v as u16)),
        v => Err(ConfigError::InvalidUiPort { field, value: v }),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let raw: RawConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        Config::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Config, ConfigError> {
        let mut uavs = Vec::with_capacity(raw.uavs.len());
        for u in raw.uavs {
            let entry = UavEntry {
                rel_telemetry_port: optional_port(&u.name, "tcp_telemetry_port", u.tcp_telemetry_port)?,
                rel_command_port: required_port(&u.name, "tcp_command_port", u.tcp_command_port)?,
                dgm_telemetry_port: optional_port(&u.name, "udp_telemetry_port", u.udp_telemetry_port)?,
                name: u.name,
                ip: u.ip,
            };
            if entry.rel_telemetry_port.is_none() && entry.dgm_telemetry_port.is_none() {
                return Err(ConfigError::NoTelemetry(entry.name));
            }
            uavs.push(entry);
        }

        let ui = UiPorts {
            rel_publish_port: ui_port("tcp_publish_port", raw.ui_ports.tcp_publish_port)?
                .ok_or(ConfigError::InvalidUiPort {
                    field: "tcp_publish_port",
                    value: raw.ui_ports.tcp_publish_port,
                })?,
            rel_command_port: ui_port("tcp_command_port", raw.ui_ports.tcp_command_port)?
                .ok_or(ConfigError::InvalidUiPort {
                    field: "tcp_command_port",
                    value: raw.ui_ports.tcp_command_port,
                })?,
            dgm_camera_port: ui_port("udp_camera_port", raw.ui_ports.udp_camera_port)?,
            dgm_mapping_port: ui_port("udp_mapping_port", raw.ui_ports.udp_mapping_port)?,
            dgm_command_port: ui_port("udp_command_port", raw.ui_ports.udp_command_port)?,
        };

        let cfg = Config {
            uavs,
            ui,
            log_file: raw.log_file.unwrap_or_else(|| DEFAULT_LOG_FILE.into()),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for uav in &self.uavs {
            if !names.insert(uav.name.as_str()) {
                return Err(ConfigError::DuplicateName(uav.name.clone()));
            }
        }

        // every bound or advertised port must be unique across the file
        let mut ports = HashSet::new();
        let mut claim = |port: Option<u16>| -> Result<(), ConfigError> {
            if let Some(p) = port {
                if !ports.insert(p) {
                    return Err(ConfigError::DuplicatePort(p));
                }
            }
            Ok(())
        };
        for uav in &self.uavs {
            claim(uav.rel_telemetry_port)?;
            claim(Some(uav.rel_command_port))?;
            claim(uav.dgm_telemetry_port)?;
        }
        claim(Some(self.ui.rel_publish_port))?;
        claim(Some(self.ui.rel_command_port))?;
        claim(self.ui.dgm_camera_port)?;
        claim(self.ui.dgm_mapping_port)?;
        claim(self.ui.dgm_command_port)?;
        Ok(())
    }

    pub fn uav_index(&self, name: &str) -> Option<usize> {
        self.uavs.iter().position(|u| u.name == name)
    }
}

/// Resolve the config file location. An explicit path (CLI flag or the
/// `SERVICE_CONFIG` environment variable via clap) wins outright; otherwise
/// the working directory, the executable directory and its parent are
/// searched in that order.
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_owned());
        }
        return Err(ConfigError::NotFound(path.to_owned()));
    }

    let mut candidates = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_owned))
    {
        candidates.push(exe_dir.join(CONFIG_FILE_NAME));
        if let Some(parent) = exe_dir.parent() {
            candidates.push(parent.join(CONFIG_FILE_NAME));
        }
    }

    for candidate in candidates {
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(ConfigError::NotFound(CONFIG_FILE_NAME.into()))
}

/// Relative log paths land next to the executable so every deployment writes
/// its log in a predictable place regardless of the working directory.
pub fn resolve_log_path(log_file: &Path) -> PathBuf {
    if log_file.is_absolute() {
        return log_file.to_owned();
    }
    match std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_owned))
    {
        Some(exe_dir) => exe_dir.join(log_file),
        None => log_file.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Config, ConfigError> {
        let raw: RawConfig = serde_json::from_str(json).expect("fixture must be valid JSON");
        Config::from_raw(raw)
    }

    const FULL: &str = r#"{
        "uavs": [
            { "name": "UAV_1", "ip": "localhost",
              "tcp_telemetry_port": 5555, "tcp_command_port": 5559,
              "udp_telemetry_port": 5575 },
            { "name": "UAV_2", "ip": "localhost",
              "tcp_telemetry_port": 5565, "tcp_command_port": 5569,
              "udp_telemetry_port": 5576 }
        ],
        "ui_ports": {
            "tcp_publish_port": 5557, "tcp_command_port": 5558,
            "udp_camera_port": 5570, "udp_mapping_port": 5571,
            "udp_command_port": 5572
        },
        "log_file": "telemetry_log.txt"
    }"#;

    #[test]
    fn loads_full_config() {
        let cfg = parse(FULL).unwrap();
        assert_eq!(cfg.uavs.len(), 2);
        assert_eq!(cfg.uavs[0].name, "UAV_1");
        assert_eq!(cfg.uavs[0].rel_telemetry_port, Some(5555));
        assert_eq!(cfg.uavs[1].dgm_telemetry_port, Some(5576));
        assert_eq!(cfg.ui.rel_publish_port, 5557);
        assert_eq!(cfg.ui.dgm_command_port, Some(5572));
        assert_eq!(cfg.log_file, PathBuf::from("telemetry_log.txt"));
        assert_eq!(cfg.uav_index("UAV_2"), Some(1));
        assert_eq!(cfg.uav_index("UAV_99"), None);
    }

    #[test]
    fn accepts_legacy_field_names() {
        let cfg = parse(
            r#"{
                "uavs": [
                    { "name": "UAV_1", "ip": "localhost",
                      "telemetry_port": 5555, "command_port": 5559 }
                ],
                "ui_ports": { "publish_port": 5557, "command_port": 5558 }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.uavs[0].rel_telemetry_port, Some(5555));
        assert_eq!(cfg.uavs[0].rel_command_port, 5559);
        assert_eq!(cfg.ui.rel_publish_port, 5557);
        assert_eq!(cfg.ui.rel_command_port, 5558);
    }

    #[test]
    fn missing_udp_fields_disable_those_paths() {
        let cfg = parse(
            r#"{
                "uavs": [
                    { "name": "UAV_1", "ip": "localhost",
                      "tcp_telemetry_port": 5555, "tcp_command_port": 5559 }
                ],
                "ui_ports": { "tcp_publish_port": 5557, "tcp_command_port": 5558 }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.uavs[0].dgm_telemetry_port, None);
        assert_eq!(cfg.ui.dgm_camera_port, None);
        assert_eq!(cfg.ui.dgm_mapping_port, None);
        assert_eq!(cfg.ui.dgm_command_port, None);
    }

    #[test]
    fn negative_port_means_disabled() {
        let cfg = parse(
            r#"{
                "uavs": [
                    { "name": "UAV_1", "ip": "localhost",
                      "tcp_telemetry_port": -1, "tcp_command_port": 5559,
                      "udp_telemetry_port": 5575 }
                ],
                "ui_ports": { "tcp_publish_port": 5557, "tcp_command_port": 5558 }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.uavs[0].rel_telemetry_port, None);
        assert_eq!(cfg.uavs[0].dgm_telemetry_port, Some(5575));
    }

    #[test]
    fn uav_without_any_telemetry_is_rejected() {
        let err = parse(
            r#"{
                "uavs": [
                    { "name": "UAV_1", "ip": "localhost",
                      "tcp_telemetry_port": -1, "tcp_command_port": 5559 }
                ],
                "ui_ports": { "tcp_publish_port": 5557, "tcp_command_port": 5558 }
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NoTelemetry(name) if name == "UAV_1"));
    }

    #[test]
    fn duplicate_uav_name_is_rejected() {
        let err = parse(
            r#"{
                "uavs": [
                    { "name": "UAV_1", "ip": "localhost",
                      "tcp_telemetry_port": 5555, "tcp_command_port": 5559 },
                    { "name": "UAV_1", "ip": "localhost",
                      "tcp_telemetry_port": 5565, "tcp_command_port": 5569 }
                ],
                "ui_ports": { "tcp_publish_port": 5557, "tcp_command_port": 5558 }
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName(name) if name == "UAV_1"));
    }

    #[test]
    fn port_reuse_is_rejected() {
        let err = parse(
            r#"{
                "uavs": [
                    { "name": "UAV_1", "ip": "localhost",
                      "tcp_telemetry_port": 5555, "tcp_command_port": 5559 }
                ],
                "ui_ports": { "tcp_publish_port": 5555, "tcp_command_port": 5558 }
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePort(5555)));
    }

    #[test]
    fn missing_required_uav_field_is_a_parse_error() {
        let raw: Result<RawConfig, _> = serde_json::from_str(
            r#"{
                "uavs": [ { "name": "UAV_1", "ip": "localhost" } ],
                "ui_ports": { "tcp_publish_port": 5557, "tcp_command_port": 5558 }
            }"#,
        );
        assert!(raw.is_err());
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let err = parse(
            r#"{
                "uavs": [
                    { "name": "UAV_1", "ip": "localhost",
                      "tcp_telemetry_port": 70000, "tcp_command_port": 5559 }
                ],
                "ui_ports": { "tcp_publish_port": 5557, "tcp_command_port": 5558 }
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort { value: 70000, .. }));
    }

    #[test]
    fn missing_log_file_uses_default() {
        let cfg = parse(
            r#"{
                "uavs": [
                    { "name": "UAV_1", "ip": "localhost",
                      "tcp_telemetry_port": 5555, "tcp_command_port": 5559 }
                ],
                "ui_ports": { "tcp_publish_port": 5557, "tcp_command_port": 5558 }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.log_file, PathBuf::from(DEFAULT_LOG_FILE));
    }

    #[test]
    fn load_reads_a_file_and_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, FULL).unwrap();
        let resolved = resolve_path(Some(&path)).unwrap();
        assert_eq!(resolved, path);
        let cfg = Config::load(&resolved).unwrap();
        assert_eq!(cfg.uavs.len(), 2);
    }

    #[test]
    fn explicit_path_that_does_not_exist_is_an_error() {
        let err = resolve_path(Some(Path::new("/nonexistent/cfg.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
