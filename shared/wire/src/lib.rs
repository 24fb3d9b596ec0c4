//! Wire-level vocabulary shared by the broker, the UI client library and the
//! UAV simulator: topic classification, the UI command text format, and the
//! datagram framing used on the UDP egress path.

use std::fmt;

use thiserror::Error;

/// Target used when a UI command carries no `TARGET:` prefix. Kept so old UIs
/// that predate multi-UAV routing keep working.
pub const FALLBACK_UAV: &str = "UAV_1";

/// Marker a camera UI embeds in its command bodies.
pub const CAMERA_UI_TAG: &str = "[camera-ui]";
/// Marker a mapping UI embeds in its command bodies.
pub const MAPPING_UI_TAG: &str = "[mapping-ui]";

/// Largest datagram the broker will read off a UAV UDP socket.
pub const MAX_DATAGRAM: usize = 2048;

/// Transport a telemetry frame arrived (or left) on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Ordered queue transport (ZeroMQ push/pull and pub/sub).
    Rel,
    /// Best-effort datagram transport (UDP).
    Dgm,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Rel => f.write_str("REL"),
            Transport::Dgm => f.write_str("DGM"),
        }
    }
}

/// Stream classification derived from a telemetry payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    Mapping,
    Camera,
    Unknown,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Mapping => "mapping",
            Topic::Camera => "camera",
            Topic::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a telemetry payload by its trailing whitespace-delimited token.
///
/// UAVs pre-assign a decimal code band per (UAV, stream) pair, so the code
/// alone identifies the stream: odd thousands are mapping, even thousands are
/// camera, everything outside 1000..=6999 is unknown. Unparseable payloads
/// classify as unknown; they are not an error.
pub fn classify(payload: &[u8]) -> Topic {
    let token = match std::str::from_utf8(payload) {
        Ok(text) => text.split_ascii_whitespace().next_back(),
        Err(_) => None,
    };
    let code: i64 = match token.and_then(|t| t.parse().ok()) {
        Some(code) => code,
        None => return Topic::Unknown,
    };
    match code {
        1000..=1999 | 3000..=3999 | 5000..=5999 => Topic::Mapping,
        2000..=2999 | 4000..=4999 | 6000..=6999 => Topic::Camera,
        _ => Topic::Unknown,
    }
}

/// Routing key published to UIs: `"<topic>_<uav_name>"`.
pub fn full_topic(topic: Topic, uav: &str) -> String {
    format!("{}_{}", topic.as_str(), uav)
}

/// Split a full topic back into its stream and UAV name.
/// `"camera_UAV_1"` becomes `(Camera, "UAV_1")`.
pub fn split_topic(full: &str) -> (Topic, &str) {
    for topic in [Topic::Mapping, Topic::Camera, Topic::Unknown] {
        if let Some(uav) = full
            .strip_prefix(topic.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return (topic, uav);
        }
    }
    (Topic::Unknown, full)
}

/// Best-effort identity of the UI that issued a command, inferred from the
/// bracketed marker UIs embed in their command bodies. Logging only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiTag {
    Camera,
    Mapping,
    Unknown,
}

impl UiTag {
    fn detect(body: &str) -> UiTag {
        if body.contains(CAMERA_UI_TAG) {
            UiTag::Camera
        } else if body.contains(MAPPING_UI_TAG) {
            UiTag::Mapping
        } else {
            UiTag::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UiTag::Camera => "camera",
            UiTag::Mapping => "mapping",
            UiTag::Unknown => "unknown",
        }
    }
}

impl fmt::Display for UiTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A UI command after parsing, ready for routing to one UAV.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandFrame {
    /// UAV the command is addressed to.
    pub target_uav: String,
    /// Command body forwarded verbatim to the UAV.
    pub body: String,
    /// Originating UI, for log lines only.
    pub ui_tag: UiTag,
    /// True when the message had no `TARGET:` prefix and the legacy
    /// fallback target was substituted.
    pub legacy_fallback: bool,
}

impl CommandFrame {
    /// Parse a raw UI command. Splits on the first `:`; with no colon the
    /// whole message becomes the body and the target falls back to
    /// [`FALLBACK_UAV`].
    pub fn parse(raw: &str) -> CommandFrame {
        match raw.split_once(':') {
            Some((target, body)) => CommandFrame {
                target_uav: target.to_owned(),
                body: body.to_owned(),
                ui_tag: UiTag::detect(body),
                legacy_fallback: false,
            },
            None => CommandFrame {
                target_uav: FALLBACK_UAV.to_owned(),
                body: raw.to_owned(),
                ui_tag: UiTag::detect(raw),
                legacy_fallback: true,
            },
        }
    }

    /// Render the wire form a UI sends: `"TARGET:body"`.
    pub fn encode(target: &str, body: &str) -> String {
        format!("{target}:{body}")
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram has no topic separator")]
    MissingSeparator,
    #[error("datagram topic is not valid UTF-8")]
    BadTopic,
}

/// Encode the UDP egress form: `"<full_topic>|<payload>"`. The pipe is the
/// only place the broker writes topic information into a datagram body.
pub fn encode_datagram(full_topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(full_topic.len() + 1 + payload.len());
    buf.extend_from_slice(full_topic.as_bytes());
    buf.push(b'|');
    buf.extend_from_slice(payload);
    buf
}

/// Split a UI-bound datagram back into `(full_topic, payload)`.
pub fn decode_datagram(buf: &[u8]) -> Result<(&str, &[u8]), WireError> {
    let sep = buf
        .iter()
        .position(|&b| b == b'|')
        .ok_or(WireError::MissingSeparator)?;
    let topic = std::str::from_utf8(&buf[..sep]).map_err(|_| WireError::BadTopic)?;
    Ok((topic, &buf[sep + 1..]))
}
