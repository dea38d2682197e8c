//! JSON control messages exchanged as WebSocket text frames.
//!
//! Four shapes are recognized:
//!
//! ```text
//! {"type":"ping"}                 server -> client liveness probe
//! {"type":"pong","id":N}          client -> server liveness reply
//! {"id":N,"connected":true}       server -> all, participant joined
//! {"id":N,"disconnect":true}      server -> all, participant left or was evicted
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control message is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unrecognized control message shape")]
    UnknownShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Ping,
    Pong { id: u16 },
    Joined { id: u16 },
    Left { id: u16 },
}

impl ControlMessage {
    pub fn parse(text: &str) -> Result<Self, ControlError> {
        let wire: WireControl = serde_json::from_str(text)?;
        Self::try_from(wire)
    }

    pub fn to_json(&self) -> Result<String, ControlError> {
        Ok(serde_json::to_string(&WireControl::from(*self))?)
    }

    /// The participant the message is about, if any.
    pub fn id(&self) -> Option<u16> {
        match self {
            ControlMessage::Ping => None,
            ControlMessage::Pong { id }
            | ControlMessage::Joined { id }
            | ControlMessage::Left { id } => Some(*id),
        }
    }
}

/// Flat JSON form; field order matches the shapes in the module docs.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireControl {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    disconnect: Option<bool>,
}

impl TryFrom<WireControl> for ControlMessage {
    type Error = ControlError;

    fn try_from(wire: WireControl) -> Result<Self, Self::Error> {
        match (wire.kind.as_deref(), wire.id, wire.connected, wire.disconnect) {
            (Some("ping"), _, None, None) => Ok(ControlMessage::Ping),
            (Some("pong"), Some(id), None, None) => Ok(ControlMessage::Pong { id }),
            (None, Some(id), Some(true), None) => Ok(ControlMessage::Joined { id }),
            (None, Some(id), None, Some(true)) => Ok(ControlMessage::Left { id }),
            _ => Err(ControlError::UnknownShape),
        }
    }
}

impl From<ControlMessage> for WireControl {
    fn from(message: ControlMessage) -> Self {
        match message {
            ControlMessage::Ping => WireControl {
                kind: Some("ping".to_string()),
                ..WireControl::default()
            },
            ControlMessage::Pong { id } => WireControl {
                kind: Some("pong".to_string()),
                id: Some(id),
                ..WireControl::default()
            },
            ControlMessage::Joined { id } => WireControl {
                id: Some(id),
                connected: Some(true),
                ..WireControl::default()
            },
            ControlMessage::Left { id } => WireControl {
                id: Some(id),
                disconnect: Some(true),
                ..WireControl::default()
            },
        }
    }
}
