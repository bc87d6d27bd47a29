//! Bidirectional socket transport.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use super::{MessageHandler, cancelled};
use super::health::{ChannelHealth, Transport, TransportState};

/// Run the socket transport until the peer closes, an error occurs, or
/// `cancel` flips to true. Always leaves the transport marked closed.
pub(crate) async fn run(
    url: String,
    generation: u64,
    health: Arc<ChannelHealth>,
    handler: MessageHandler,
    mut cancel: watch::Receiver<bool>,
) {
    let ws = tokio::select! {
        biased;
        _ = cancelled(&mut cancel) => {
            debug!("socket transport cancelled while connecting");
            health.set(generation, Transport::Socket, TransportState::Closed);
            return;
        }
        result = connect_async(url.as_str()) => match result {
            Ok((ws, _)) => ws,
            Err(e) => {
                warn!(url = %url, error = %e, "socket connect failed");
                health.set(generation, Transport::Socket, TransportState::Closed);
                return;
            }
        },
    };

    if !health.set(generation, Transport::Socket, TransportState::Open) {
        return;
    }
    info!(url = %url, "socket open");

    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                let _ = write.send(Message::Close(None)).await;
                debug!("socket transport cancelled");
                break;
            }
            msg = read.next() => match msg {
                None => {
                    info!(url = %url, "socket closed by peer");
                    break;
                }
                Some(Err(e)) => {
                    warn!(url = %url, error = %e, "socket error");
                    break;
                }
                Some(Ok(Message::Text(text))) => handler(text.as_str()),
                Some(Ok(Message::Binary(bytes))) => handler(&String::from_utf8_lossy(&bytes)),
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    info!(url = %url, "socket closed by peer");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
    health.set(generation, Transport::Socket, TransportState::Closed);
}
