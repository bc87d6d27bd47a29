//! Per-transport connection state and the merged "connected" signal.
//!
//! Each transport moves through `Closed -> Connecting -> Open -> Closed`.
//! The channel is connected while at least one transport is open. Updates
//! carry the connection generation they belong to; updates from a
//! superseded generation are dropped, so a transport task that outlives a
//! disconnect cannot flip the signal back on.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    ServerPush,
    Socket,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::ServerPush => f.write_str("server_push"),
            Transport::Socket => f.write_str("socket"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub connected: bool,
    pub server_push: TransportState,
    pub socket: TransportState,
}

#[derive(Debug)]
struct Inner {
    generation: u64,
    server_push: TransportState,
    socket: TransportState,
}

impl Inner {
    fn slot(&mut self, transport: Transport) -> &mut TransportState {
        match transport {
            Transport::ServerPush => &mut self.server_push,
            Transport::Socket => &mut self.socket,
        }
    }

    fn connected(&self) -> bool {
        self.server_push == TransportState::Open || self.socket == TransportState::Open
    }

    fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            connected: self.connected(),
            server_push: self.server_push,
            socket: self.socket,
        }
    }
}

pub struct ChannelHealth {
    inner: Mutex<Inner>,
    connected_tx: watch::Sender<bool>,
}

impl ChannelHealth {
    pub fn new() -> Self {
        let (connected_tx, _) = watch::channel(false);
        Self {
            inner: Mutex::new(Inner {
                generation: 0,
                server_push: TransportState::Closed,
                socket: TransportState::Closed,
            }),
            connected_tx,
        }
    }

    /// Start a new generation with both transports connecting. Returns the
    /// generation number transport tasks must report with.
    pub fn begin(&self) -> u64 {
        let Ok(mut inner) = self.inner.lock() else {
            return 0;
        };
        inner.generation += 1;
        inner.server_push = TransportState::Connecting;
        inner.socket = TransportState::Connecting;
        self.publish(&inner);
        inner.generation
    }

    /// Close both transports and retire the current generation.
    pub fn reset(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.generation += 1;
        inner.server_push = TransportState::Closed;
        inner.socket = TransportState::Closed;
        self.publish(&inner);
    }

    /// Record a transport state change. Returns false when `generation` is stale.
    pub fn set(&self, generation: u64, transport: Transport, state: TransportState) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        if inner.generation != generation {
            debug!(%transport, ?state, generation, "ignoring stale transport update");
            return false;
        }
        let slot = inner.slot(transport);
        if *slot == state {
            return true;
        }
        *slot = state;
        info!(%transport, ?state, "transport state changed");
        self.publish(&inner);
        true
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.inner
            .lock()
            .map(|inner| inner.snapshot())
            .unwrap_or(HealthSnapshot {
                connected: false,
                server_push: TransportState::Closed,
                socket: TransportState::Closed,
            })
    }

    pub fn is_connected(&self) -> bool {
        *self.connected_tx.borrow()
    }

    /// Watch the merged signal. Only real transitions wake receivers.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.connected_tx.subscribe()
    }

    fn publish(&self, inner: &Inner) {
        let connected = inner.connected();
        self.connected_tx.send_if_modified(|current| {
            if *current == connected {
                return false;
            }
            *current = connected;
            true
        });
    }
}

impl Default for ChannelHealth {
    fn default() -> Self {
        Self::new()
    }
}
