//! Home Assistant WebSocket API message types.
//!
//! The hub speaks JSON text frames. The handshake is
//! `auth_required` -> `auth` -> `auth_ok`/`auth_invalid`; afterwards every
//! client command carries a monotonically increasing `id` that the matching
//! `result` response echoes back.

use serde::{Deserialize, Serialize};

use crate::state::EntityState;

/// Commands sent to the hub
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Auth {
        access_token: String,
    },
    SubscribeEvents {
        id: u64,
        event_type: String,
    },
    GetStates {
        id: u64,
    },
}

/// Messages received from the hub
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        result: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<ResultError>,
    },
    Event {
        id: u64,
        event: EventPayload,
    },
    Pong {
        id: u64,
    },
    /// Message types this client does not use (e.g. server pings)
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventPayload {
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Payload of a `state_changed` event
#[derive(Debug, Clone, Deserialize)]
pub struct StateChangedData {
    pub entity_id: String,
    /// None when the entity was removed from the hub
    pub new_state: Option<EntityState>,
}

impl EventPayload {
    /// Parse the event as a state change, if it is one.
    ///
    /// Returns Ok(None) for event types this client does not consume.
    pub fn state_change(&self) -> Result<Option<StateChangedData>, serde_json::Error> {
        if self.event_type != "state_changed" {
            return Ok(None);
        }
        serde_json::from_value(self.data.clone()).map(Some)
    }
}
