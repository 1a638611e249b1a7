//! Line-delimited JSON frame protocol.
//!
//! Every frame is one JSON object on its own line, tagged by `type`.
//!
//! ```text
//! → {"type":"connect","client_id":"dev-1"}
//! ← {"type":"connack","accepted":true,"client_id":"dev-1"}
//! → {"type":"subscribe","filters":[{"filter":"sensors/+","qos":0}]}
//! ← {"type":"suback","reason_codes":[0]}
//! → {"type":"publish","topic":"sensors/a","payload":"21.5","qos":0}
//! ← {"type":"message","topic":"sensors/a","payload":"21.5","qos":0,"retain":false}
//! ← {"type":"puback","accepted":true}
//! → {"type":"disconnect"}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hooks::Subscription;

/// Reason code for a refused subscription filter.
pub const SUBSCRIBE_REFUSED: u8 = 0x80;

/// Highest QoS level the broker grants.
pub const MAX_QOS: u8 = 2;

fn default_clean() -> bool {
    true
}

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Connect {
        #[serde(default)]
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default = "default_clean")]
        clean: bool,
    },
    Subscribe {
        filters: Vec<Subscription>,
    },
    Unsubscribe {
        filters: Vec<String>,
    },
    Publish {
        topic: String,
        #[serde(default)]
        payload: String,
        #[serde(default)]
        qos: u8,
        #[serde(default)]
        retain: bool,
    },
    Ping,
    Disconnect,
}

/// Frames sent by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Connack {
        accepted: bool,
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Suback {
        reason_codes: Vec<u8>,
    },
    Unsuback,
    Message {
        topic: String,
        payload: String,
        qos: u8,
        retain: bool,
    },
    Puback {
        accepted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Pong,
    Error {
        message: String,
    },
}

/// Framing and decoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame exceeds {0} bytes")]
    FrameTooLarge(usize),

    #[error("unexpected {0} frame")]
    Unexpected(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decode one line (without its terminator) into a client frame.
pub fn decode(line: &str) -> Result<ClientFrame, ProtocolError> {
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Encode a frame as one newline-terminated line.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}
