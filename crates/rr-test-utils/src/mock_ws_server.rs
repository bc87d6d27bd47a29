// mock_ws_server: A mock upstream WebSocket event source.
//
// Accepts connections on ws://localhost:<port>, records each request URI,
// and pushes whatever text frames the test hands it to every open client.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;

#[derive(Debug, Clone)]
enum WsCommand {
    Send(String),
    Close,
}

/// A mock realtime socket for integration testing.
///
/// Binds to port 0 (random) and exposes the actual bound port. Each test
/// can spin up its own isolated server instance.
pub struct MockWsServer {
    addr: SocketAddr,
    tx: broadcast::Sender<WsCommand>,
    requests: Arc<Mutex<Vec<String>>>,
    /// Handle to the background accept loop; dropped when the server is dropped.
    _task: tokio::task::JoinHandle<()>,
}

impl MockWsServer {
    /// Start the mock server, binding to a random available port.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, _) = broadcast::channel(256);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let task = tokio::spawn(Self::accept_loop(listener, tx.clone(), Arc::clone(&requests)));

        Ok(Self {
            addr,
            tx,
            requests,
            _task: task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://` base address; the channel under test swaps the scheme itself.
    pub fn http_base(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Push one text frame to every connected client.
    pub fn send(&self, text: impl Into<String>) {
        let _ = self.tx.send(WsCommand::Send(text.into()));
    }

    /// Close every connected client with a close frame.
    pub fn close_all(&self) {
        let _ = self.tx.send(WsCommand::Close);
    }

    /// Request URIs (path and query) of every accepted upgrade, oldest first.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    // -- internal --

    async fn accept_loop(
        listener: TcpListener,
        tx: broadcast::Sender<WsCommand>,
        requests: Arc<Mutex<Vec<String>>>,
    ) {
        while let Ok((stream, _peer)) = listener.accept().await {
            // Subscribe before the handshake so nothing sent after the client
            // sees the upgrade is lost.
            let rx = tx.subscribe();
            let requests = Arc::clone(&requests);
            tokio::spawn(async move {
                // In tests, connection errors are expected (e.g. client drops).
                let _ = Self::handle_connection(stream, rx, requests).await;
            });
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        mut rx: broadcast::Receiver<WsCommand>,
        requests: Arc<Mutex<Vec<String>>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let record = |req: &Request, resp: Response| {
            if let Ok(mut r) = requests.lock() {
                r.push(req.uri().to_string());
            }
            Ok::<_, ErrorResponse>(resp)
        };
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, record).await?;
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Ok(WsCommand::Send(text)) => write.send(Message::Text(text.into())).await?,
                    Ok(WsCommand::Close) | Err(broadcast::error::RecvError::Closed) => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                },
                msg = read.next() => match msg {
                    Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                },
            }
        }

        Ok(())
    }
}
