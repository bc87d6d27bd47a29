// mock_gateway: Both upstream transports behind one address.
//
// Upgrades on `ws_path` become WebSocket clients; every other path is served
// as a `text/event-stream`. Each transport is scripted independently so a
// test can drop one while the other stays up.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{StatusCode, Uri};
use axum::response::Response;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use crate::mock_sse_server::{SseCommand, SseState, events_handler};

#[derive(Debug, Clone)]
enum SocketCommand {
    Send(String),
    Close,
}

struct SocketState {
    tx: broadcast::Sender<SocketCommand>,
    requests: Mutex<Vec<String>>,
}

pub struct MockGateway {
    addr: SocketAddr,
    sse: Arc<SseState>,
    socket: Arc<SocketState>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockGateway {
    /// Start a gateway with the socket transport on `/ws`.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        Self::start_with(StatusCode::OK, "/ws").await
    }

    /// Start a gateway whose event stream answers with `sse_status` and
    /// whose socket transport lives on `ws_path`.
    pub async fn start_with(
        sse_status: StatusCode,
        ws_path: &str,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (sse_tx, _) = broadcast::channel(256);
        let sse = Arc::new(SseState {
            tx: sse_tx,
            requests: Mutex::new(Vec::new()),
            status: sse_status,
        });
        let (socket_tx, _) = broadcast::channel(256);
        let socket = Arc::new(SocketState {
            tx: socket_tx,
            requests: Mutex::new(Vec::new()),
        });

        let socket_routes = Router::new()
            .route(ws_path, get(upgrade_handler))
            .with_state(Arc::clone(&socket));
        let sse_routes = Router::new()
            .fallback(events_handler)
            .with_state(Arc::clone(&sse));
        let app = socket_routes.merge(sse_routes);

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            addr,
            sse,
            socket,
            _task: task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn http_base(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Push an unnamed frame on every open event stream.
    pub fn send_sse(&self, data: impl Into<String>) {
        let _ = self.sse.tx.send(SseCommand::Send {
            event: None,
            data: data.into(),
        });
    }

    pub fn send_sse_named(&self, event: impl Into<String>, data: impl Into<String>) {
        let _ = self.sse.tx.send(SseCommand::Send {
            event: Some(event.into()),
            data: data.into(),
        });
    }

    /// Push a text frame to every open socket.
    pub fn send_ws(&self, text: impl Into<String>) {
        let _ = self.socket.tx.send(SocketCommand::Send(text.into()));
    }

    pub fn close_sse(&self) {
        let _ = self.sse.tx.send(SseCommand::Close);
    }

    pub fn close_ws(&self) {
        let _ = self.socket.tx.send(SocketCommand::Close);
    }

    /// Event-stream request URIs, oldest first.
    pub fn sse_requests(&self) -> Vec<String> {
        self.sse
            .requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Socket upgrade request URIs, oldest first.
    pub fn ws_requests(&self) -> Vec<String> {
        self.socket
            .requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Number of open clients per transport: (event streams, sockets).
    pub fn open_clients(&self) -> (usize, usize) {
        (self.sse.tx.receiver_count(), self.socket.tx.receiver_count())
    }
}

async fn upgrade_handler(
    State(state): State<Arc<SocketState>>,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    if let Ok(mut r) = state.requests.lock() {
        r.push(uri.to_string());
    }
    let rx = state.tx.subscribe();
    ws.on_upgrade(move |socket| serve_socket(socket, rx))
}

async fn serve_socket(socket: WebSocket, mut rx: broadcast::Receiver<SocketCommand>) {
    let (mut write, mut read) = socket.split();
    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Ok(SocketCommand::Send(text)) => {
                    if write.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(SocketCommand::Close) | Err(broadcast::error::RecvError::Closed) => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
