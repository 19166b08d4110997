//! Hub connectivity: the persistent event subscription to Home Assistant.
//!
//! `HubClient` owns the connection lifecycle. The push protocol is exposed as
//! a restartable lazy sequence: `subscribe` hands back an [`EventStream`]
//! which ends only on `close` or an unrecoverable transport error, delivered
//! in-band as a final `Err`. Reconnection is uniformly "connect again, resync
//! from `get_states`, subscribe again" with no special first-connect path.

mod client;
pub mod protocol;
pub mod rest;

pub use client::Dial;
pub use client::HubError;
pub use client::HubSocket;
pub use client::WsDialer;

#[cfg(test)]
pub(crate) use client::mock;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Pattern;
use crate::state::EntityState;

use protocol::{Command, ServerMessage};

/// Connection lifecycle, owned exclusively by the hub client. Observers
/// (engine, status API) read transitions from a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribed,
    Degraded,
}

/// Malformed event payloads tolerated before the connection is torn down
const PROTOCOL_STRIKE_LIMIT: u32 = 5;

/// Capacity of the event channel between the socket reader and the engine.
/// Bounded so a stalled consumer applies backpressure to the reader.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Lazy sequence of entity state changes. Ends after a terminal `Err` or
/// once the client is closed.
pub struct EventStream {
    rx: mpsc::Receiver<Result<EntityState, HubError>>,
}

impl EventStream {
    pub async fn next(&mut self) -> Option<Result<EntityState, HubError>> {
        self.rx.recv().await
    }
}

/// Client for the hub's WebSocket API: authentication, state snapshots, and
/// the state-change event subscription.
pub struct HubClient {
    dialer: Box<dyn Dial>,
    endpoint: String,
    access_token: String,
    watched: Vec<Pattern>,
    socket: Option<Box<dyn HubSocket>>,
    reader: Option<JoinHandle<()>>,
    next_id: u64,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

impl HubClient {
    pub fn new(
        dialer: Box<dyn Dial>,
        endpoint: String,
        access_token: String,
        watched: Vec<Pattern>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            dialer,
            endpoint,
            access_token,
            watched,
            socket: None,
            reader: None,
            next_id: 0,
            state_tx: Arc::new(state_tx),
        }
    }

    /// Observable connection state
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Establish the transport and run the authentication handshake.
    ///
    /// Auth rejection is surfaced as [`HubError::Auth`] and is not retried
    /// here; the orchestrator decides what failures to retry.
    pub async fn connect(&mut self) -> Result<(), HubError> {
        self.abort_reader().await;
        self.socket = None;
        self.state_tx.send_replace(ConnectionState::Connecting);

        let mut socket = match self.dialer.dial(&self.endpoint).await {
            Ok(socket) => socket,
            Err(e) => {
                self.state_tx.send_replace(ConnectionState::Degraded);
                return Err(e);
            }
        };

        self.state_tx.send_replace(ConnectionState::Authenticating);
        match handshake(socket.as_mut(), &self.access_token).await {
            Ok(()) => {
                self.socket = Some(socket);
                Ok(())
            }
            Err(e) => {
                socket.close().await;
                let state = if e.is_auth() {
                    ConnectionState::Disconnected
                } else {
                    ConnectionState::Degraded
                };
                self.state_tx.send_replace(state);
                Err(e)
            }
        }
    }

    /// Fetch the hub's full state snapshot, filtered to watched entities.
    /// Used to reconcile after (re)connecting.
    pub async fn get_states(&mut self) -> Result<Vec<EntityState>, HubError> {
        let socket = self.socket.as_mut().ok_or(HubError::Closed)?;
        self.next_id += 1;
        let id = self.next_id;
        socket.send(Command::GetStates { id }).await?;

        loop {
            match socket.recv().await? {
                ServerMessage::Result {
                    id: rid,
                    success,
                    result,
                    error,
                } if rid == id => {
                    if !success {
                        return Err(result_error("get_states", error));
                    }
                    let states: Vec<EntityState> = match result {
                        Some(value) => serde_json::from_value(value)
                            .map_err(|e| HubError::Protocol(e.to_string()))?,
                        None => Vec::new(),
                    };
                    let watched = &self.watched;
                    return Ok(states
                        .into_iter()
                        .filter(|s| watched.iter().any(|p| p.matches(&s.entity_id)))
                        .collect());
                }
                other => {
                    // Out-of-band messages while waiting for our result
                    tracing::trace!("skipping message while awaiting result: {:?}", other);
                }
            }
        }
    }

    /// Subscribe to state-change events.
    ///
    /// Consumes the socket: it moves into a background reader task feeding
    /// the returned stream. The stream is restartable in the sense that a
    /// fresh `connect` + `subscribe` yields a fresh sequence.
    pub async fn subscribe(&mut self) -> Result<EventStream, HubError> {
        let mut socket = self.socket.take().ok_or(HubError::Closed)?;
        self.next_id += 1;
        let id = self.next_id;

        let result = async {
            socket
                .send(Command::SubscribeEvents {
                    id,
                    event_type: "state_changed".to_string(),
                })
                .await?;
            loop {
                match socket.recv().await? {
                    ServerMessage::Result {
                        id: rid,
                        success,
                        error,
                        ..
                    } if rid == id => {
                        if !success {
                            return Err(result_error("subscribe_events", error));
                        }
                        return Ok(());
                    }
                    other => {
                        tracing::trace!("skipping message while awaiting result: {:?}", other);
                    }
                }
            }
        }
        .await;

        if let Err(e) = result {
            socket.close().await;
            self.state_tx.send_replace(ConnectionState::Degraded);
            return Err(e);
        }

        self.state_tx.send_replace(ConnectionState::Subscribed);
        info!("Subscribed to hub state changes");

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        self.reader = Some(tokio::spawn(read_events(
            socket,
            self.watched.clone(),
            tx,
            self.state_tx.clone(),
        )));

        Ok(EventStream { rx })
    }

    /// Release the transport; idempotent.
    pub async fn close(&mut self) {
        self.abort_reader().await;
        if let Some(mut socket) = self.socket.take() {
            socket.close().await;
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    async fn abort_reader(&mut self) {
        if let Some(handle) = self.reader.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for HubClient {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.take() {
            handle.abort();
        }
    }
}

async fn handshake(socket: &mut dyn HubSocket, access_token: &str) -> Result<(), HubError> {
    match socket.recv().await? {
        ServerMessage::AuthRequired { .. } => {}
        other => {
            return Err(HubError::Protocol(format!(
                "expected auth_required, got {:?}",
                other
            )));
        }
    }

    socket
        .send(Command::Auth {
            access_token: access_token.to_string(),
        })
        .await?;

    match socket.recv().await? {
        ServerMessage::AuthOk { ha_version } => {
            info!(
                "Authenticated with hub (version: {})",
                ha_version.as_deref().unwrap_or("unknown")
            );
            Ok(())
        }
        ServerMessage::AuthInvalid { message } => Err(HubError::Auth(
            message.unwrap_or_else(|| "credential rejected".to_string()),
        )),
        other => Err(HubError::Protocol(format!(
            "expected auth result, got {:?}",
            other
        ))),
    }
}

fn result_error(command: &str, error: Option<protocol::ResultError>) -> HubError {
    let detail = error
        .and_then(|e| e.message)
        .unwrap_or_else(|| "unknown error".to_string());
    HubError::Protocol(format!("{} rejected by hub: {}", command, detail))
}

/// Socket reader: turns inbound messages into the event stream.
///
/// Malformed event payloads are logged and dropped; the connection is only
/// torn down once the strike limit is exceeded. Transport errors are always
/// terminal and delivered in-band.
async fn read_events(
    mut socket: Box<dyn HubSocket>,
    watched: Vec<Pattern>,
    tx: mpsc::Sender<Result<EntityState, HubError>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
) {
    let mut strikes = 0u32;

    loop {
        let strike = match socket.recv().await {
            Ok(ServerMessage::Event { event, .. }) => match event.state_change() {
                Ok(Some(change)) => {
                    // new_state is absent when the entity was removed from
                    // the hub; store eviction is watch-config driven, so the
                    // event carries nothing for us.
                    if let Some(new_state) = change.new_state {
                        if watched.iter().any(|p| p.matches(&new_state.entity_id))
                            && tx.send(Ok(new_state)).await.is_err()
                        {
                            break;
                        }
                    }
                    None
                }
                Ok(None) => None,
                Err(e) => Some(e.to_string()),
            },
            // Results for unrelated commands, pongs, and message types we
            // do not consume
            Ok(_) => None,
            Err(HubError::Protocol(e)) => Some(e),
            Err(e) => {
                state_tx.send_replace(ConnectionState::Degraded);
                let _ = tx.send(Err(e)).await;
                break;
            }
        };

        if let Some(detail) = strike {
            strikes += 1;
            warn!(
                "Malformed hub message ({}/{}): {}",
                strikes, PROTOCOL_STRIKE_LIMIT, detail
            );
            if strikes >= PROTOCOL_STRIKE_LIMIT {
                state_tx.send_replace(ConnectionState::Degraded);
                let _ = tx
                    .send(Err(HubError::Protocol(
                        "malformed message threshold exceeded".to_string(),
                    )))
                    .await;
                break;
            }
        }
    }

    socket.close().await;
}
