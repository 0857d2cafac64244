//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::RoomConfig;
use crate::room::state::{ConnectionId, InputCommand, PlayerRecord};

/// Messages sent from client to server, already validated
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMsg {
    /// Directional intent, queued for the next fixed update
    Input(InputCommand),
    /// Heading in degrees, applied immediately
    Rotation { angle: f64 },
    /// Liveness response
    Pong,
    /// Request for the room configuration snapshot
    FetchConfig,
}

impl ClientMsg {
    /// Decode and validate a text frame.
    ///
    /// Direction flags that are not JSON booleans read as `false`.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(fields) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let kind = fields
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;

        match kind {
            "input" => Ok(Self::Input(InputCommand {
                left: flag(&fields, "left"),
                right: flag(&fields, "right"),
                up: flag(&fields, "up"),
                down: flag(&fields, "down"),
            })),
            "rotation" => {
                let angle = fields
                    .get("angle")
                    .and_then(Value::as_f64)
                    .filter(|a| a.is_finite())
                    .ok_or(ProtocolError::InvalidField("angle"))?;
                Ok(Self::Rotation { angle })
            }
            "pong" => Ok(Self::Pong),
            "fetchConfig" => Ok(Self::FetchConfig),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

fn flag(fields: &Map<String, Value>, key: &str) -> bool {
    fields.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Sent once after the room accepts the join
    Welcome {
        connection_id: ConnectionId,
        room_id: String,
        server_time: u64,
    },

    /// Liveness probe; answer with `pong`
    Ping,

    /// Advisory: measured round trip exceeded the allowed ping
    MaxPingWarning {
        ping: u64,
    },

    /// Reply to `fetchConfig`
    Config {
        config: RoomConfig,
    },

    /// Committed room state (sent at the patch rate)
    State {
        elapsed_sim_time: f64,
        players: Vec<PlayerSnapshot>,
    },
}

/// Player state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSnapshot {
    pub connection_id: Uuid,
    pub name: String,
    pub skin: String,
    pub x: f32,
    pub y: f32,
    /// Heading in degrees
    pub heading: f32,
    /// Last measured round trip (ms)
    pub ping: u64,
}

impl From<&PlayerRecord> for PlayerSnapshot {
    fn from(p: &PlayerRecord) -> Self {
        Self {
            connection_id: p.connection_id,
            name: p.name.clone(),
            skin: p.skin.clone(),
            x: p.x,
            y: p.y,
            heading: p.heading,
            ping: p.ping,
        }
    }
}

/// Close codes surfaced to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveCode {
    /// Regular closure
    Normal,
    /// Connection dropped without a close frame; never sent by the server
    AbnormalClosure,
    /// Evicted for not answering pings in time
    MaxPingReached,
}

impl LeaveCode {
    pub fn as_u16(self) -> u16 {
        match self {
            LeaveCode::Normal => 1000,
            LeaveCode::AbnormalClosure => 1006,
            LeaveCode::MaxPingReached => 4001,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            LeaveCode::Normal => "room closed",
            LeaveCode::AbnormalClosure => "abnormal closure",
            LeaveCode::MaxPingReached => "max ping exceeded",
        }
    }
}

/// Errors decoding client frames
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message is not a JSON object")]
    NotAnObject,

    #[error("Message has no type")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid field: {0}")]
    InvalidField(&'static str),
}
