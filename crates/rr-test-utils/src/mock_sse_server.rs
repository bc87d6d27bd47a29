// mock_sse_server: A mock upstream server-push (SSE) event source.
//
// Serves `text/event-stream` on every path, records request URIs, and
// streams frames the test pushes to every open response.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Debug, Clone)]
pub(crate) enum SseCommand {
    Send { event: Option<String>, data: String },
    Close,
}

pub(crate) struct SseState {
    pub(crate) tx: broadcast::Sender<SseCommand>,
    pub(crate) requests: Mutex<Vec<String>>,
    pub(crate) status: StatusCode,
}

pub struct MockSseServer {
    addr: SocketAddr,
    state: Arc<SseState>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockSseServer {
    /// Start a server that accepts every stream request.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        Self::start_with_status(StatusCode::OK).await
    }

    /// Start a server that answers every request with `status`. Non-2xx
    /// statuses get a plain body instead of a stream.
    pub async fn start_with_status(status: StatusCode) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, _) = broadcast::channel(256);
        let state = Arc::new(SseState {
            tx,
            requests: Mutex::new(Vec::new()),
            status,
        });

        let app = Router::new()
            .fallback(events_handler)
            .with_state(Arc::clone(&state));
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            addr,
            state,
            _task: task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn http_base(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Push an unnamed (`message`) frame.
    pub fn send(&self, data: impl Into<String>) {
        let _ = self.state.tx.send(SseCommand::Send {
            event: None,
            data: data.into(),
        });
    }

    /// Push a frame with an explicit `event:` name.
    pub fn send_named(&self, event: impl Into<String>, data: impl Into<String>) {
        let _ = self.state.tx.send(SseCommand::Send {
            event: Some(event.into()),
            data: data.into(),
        });
    }

    /// End every open response stream.
    pub fn close_all(&self) {
        let _ = self.state.tx.send(SseCommand::Close);
    }

    pub fn requests(&self) -> Vec<String> {
        self.state
            .requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

pub(crate) async fn events_handler(State(state): State<Arc<SseState>>, uri: Uri) -> Response {
    if let Ok(mut r) = state.requests.lock() {
        r.push(uri.to_string());
    }
    if !state.status.is_success() {
        return (state.status, "unavailable").into_response();
    }

    let updates = BroadcastStream::new(state.tx.subscribe())
        .take_while(|cmd| !matches!(cmd, Ok(SseCommand::Close)))
        .filter_map(|cmd| match cmd {
            Ok(SseCommand::Send { event, data }) => {
                let frame = Event::default().data(data);
                Some(Ok::<_, Infallible>(match event {
                    Some(name) => frame.event(name),
                    None => frame,
                }))
            }
            _ => None,
        });
    // A leading comment flushes the response head right away.
    let initial = tokio_stream::once(Ok(Event::default().comment("connected")));

    Sse::new(initial.chain(updates)).into_response()
}
