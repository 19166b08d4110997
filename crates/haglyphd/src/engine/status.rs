//! Observable engine status, consumed by the local control API.

use serde::Serialize;
use tokio::sync::watch;

use crate::hub::ConnectionState;

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EngineState {
    Idle,
    Running,
    Reconnecting,
    Stopped,
}

/// Point-in-time status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub engine: EngineState,
    pub connection: ConnectionState,
    /// Unix timestamp of the last successful frame draw
    pub last_render: Option<u64>,
}

/// Cheap, cloneable view onto the engine's observable state. Reads never
/// touch the engine itself.
#[derive(Clone)]
pub struct StatusHandle {
    engine_rx: watch::Receiver<EngineState>,
    connection_rx: watch::Receiver<ConnectionState>,
    render_rx: watch::Receiver<Option<u64>>,
}

impl StatusHandle {
    pub(crate) fn new(
        engine_rx: watch::Receiver<EngineState>,
        connection_rx: watch::Receiver<ConnectionState>,
        render_rx: watch::Receiver<Option<u64>>,
    ) -> Self {
        Self {
            engine_rx,
            connection_rx,
            render_rx,
        }
    }

    pub fn snapshot(&self) -> Status {
        Status {
            engine: *self.engine_rx.borrow(),
            connection: *self.connection_rx.borrow(),
            last_render: *self.render_rx.borrow(),
        }
    }

    pub fn engine_state(&self) -> EngineState {
        *self.engine_rx.borrow()
    }
}
