//! Dual-transport realtime ingestion.
//!
//! One logical event source is reached over two transports at once: a
//! server-push (SSE) stream and a bidirectional socket. Both feed the same
//! [`MessageHandler`], in the order each transport delivers, with no
//! cross-transport dedup. The channel counts as connected while either
//! transport is open.

pub mod health;
pub mod sse;
pub mod ws;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use health::{ChannelHealth, HealthSnapshot, Transport, TransportState};

/// Called once per inbound message, inline on the transport task.
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

pub const READER_ID_PARAM: &str = "readerId";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid base URL '{0}': {1}")]
    InvalidUrl(String, String),
    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Where the two transports live, relative to one base address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEndpoints {
    pub base_url: String,
    pub sse_path: String,
    pub ws_path: String,
}

fn build_url(
    base_url: &str,
    path: &str,
    scheme_for: fn(&str) -> Option<&'static str>,
    reader_id: Option<&str>,
) -> Result<String, ChannelError> {
    let mut url = reqwest::Url::parse(base_url.trim())
        .map_err(|e| ChannelError::InvalidUrl(base_url.to_owned(), e.to_string()))?;
    let scheme = scheme_for(url.scheme())
        .ok_or_else(|| ChannelError::UnsupportedScheme(url.scheme().to_owned()))?;
    url.set_scheme(scheme)
        .map_err(|()| ChannelError::UnsupportedScheme(scheme.to_owned()))?;

    let prefix = url.path().trim_end_matches('/').to_owned();
    let suffix = if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    };
    url.set_path(&format!("{prefix}{suffix}"));
    url.set_query(None);
    if let Some(reader_id) = reader_id.map(str::trim).filter(|r| !r.is_empty()) {
        url.query_pairs_mut().append_pair(READER_ID_PARAM, reader_id);
    }
    Ok(url.to_string())
}

/// Server-push URL: the base address with an http(s) scheme.
pub fn sse_url(
    endpoints: &ChannelEndpoints,
    reader_id: Option<&str>,
) -> Result<String, ChannelError> {
    build_url(
        &endpoints.base_url,
        &endpoints.sse_path,
        |scheme| match scheme {
            "http" | "ws" => Some("http"),
            "https" | "wss" => Some("https"),
            _ => None,
        },
        reader_id,
    )
}

/// Socket URL: the base address with its scheme swapped to ws(s).
pub fn ws_url(
    endpoints: &ChannelEndpoints,
    reader_id: Option<&str>,
) -> Result<String, ChannelError> {
    build_url(
        &endpoints.base_url,
        &endpoints.ws_path,
        |scheme| match scheme {
            "http" | "ws" => Some("ws"),
            "https" | "wss" => Some("wss"),
            _ => None,
        },
        reader_id,
    )
}

/// Resolves once `cancel` is set, or its sender is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|c| *c).await;
}

struct ActiveConnection {
    cancel_tx: watch::Sender<bool>,
    /// Transport tasks exit on their own once `cancel_tx` fires.
    _tasks: Vec<JoinHandle<()>>,
}

pub struct EventChannel {
    client: reqwest::Client,
    health: Arc<ChannelHealth>,
    handler: MessageHandler,
    active: Mutex<Option<ActiveConnection>>,
}

impl EventChannel {
    pub fn new(handler: MessageHandler) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .build()?;
        Ok(Self {
            client,
            health: Arc::new(ChannelHealth::new()),
            handler,
            active: Mutex::new(None),
        })
    }

    /// Tear down any current connection, then open both transports.
    ///
    /// Must be called from within a tokio runtime. A transport whose URL
    /// cannot be built is marked closed and the other is still opened.
    pub fn connect(&self, endpoints: &ChannelEndpoints, reader_id: Option<&str>) {
        self.disconnect();

        let generation = self.health.begin();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(2);

        match sse_url(endpoints, reader_id) {
            Ok(url) => {
                info!(url = %url, "opening server-push transport");
                tasks.push(tokio::spawn(sse::run(
                    self.client.clone(),
                    url,
                    generation,
                    Arc::clone(&self.health),
                    Arc::clone(&self.handler),
                    cancel_rx.clone(),
                )));
            }
            Err(e) => {
                warn!(error = %e, "cannot build server-push URL");
                self.health
                    .set(generation, Transport::ServerPush, TransportState::Closed);
            }
        }

        match ws_url(endpoints, reader_id) {
            Ok(url) => {
                info!(url = %url, "opening socket transport");
                tasks.push(tokio::spawn(ws::run(
                    url,
                    generation,
                    Arc::clone(&self.health),
                    Arc::clone(&self.handler),
                    cancel_rx,
                )));
            }
            Err(e) => {
                warn!(error = %e, "cannot build socket URL");
                self.health
                    .set(generation, Transport::Socket, TransportState::Closed);
            }
        }

        if let Ok(mut active) = self.active.lock() {
            *active = Some(ActiveConnection {
                cancel_tx,
                _tasks: tasks,
            });
        }
    }

    /// Close both transports. Safe to call at any time, any number of times.
    pub fn disconnect(&self) {
        let previous = self.active.lock().ok().and_then(|mut a| a.take());
        // Retire the generation first so nothing the tasks report lands.
        self.health.reset();
        if let Some(active) = previous {
            let _ = active.cancel_tx.send(true);
            info!("event channel disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.health.is_connected()
    }

    pub fn health(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.health.subscribe()
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}
