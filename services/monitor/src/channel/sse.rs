//! Server-push transport: a long-lived `text/event-stream` response.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{MessageHandler, cancelled};
use super::health::{ChannelHealth, Transport, TransportState};

/// Event names routed to the message handler. Frames without an `event:`
/// line are dispatched as `message`.
pub const DISPATCHED_EVENTS: [&str; 4] = ["message", "tag", "detection", "event"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` line parser.
#[derive(Debug, Default)]
pub struct SseFrameParser {
    event: Option<String>,
    data: Vec<String>,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its terminator). Returns a frame when `line`
    /// closes one. Frames with no `data:` lines are dropped.
    pub fn push_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            let event = self.event.take();
            if self.data.is_empty() {
                return None;
            }
            let data = std::mem::take(&mut self.data).join("\n");
            return Some(SseFrame {
                event: event.unwrap_or_else(|| "message".to_owned()),
                data,
            });
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => {
                let name = value.trim();
                self.event = if name.is_empty() {
                    None
                } else {
                    Some(name.to_owned())
                };
            }
            "data" => self.data.push(value.to_owned()),
            _ => {}
        }
        None
    }
}

pub fn is_dispatched(event: &str) -> bool {
    DISPATCHED_EVENTS.contains(&event)
}

/// Run the server-push transport until the stream ends, errors, or
/// `cancel` flips to true. Always leaves the transport marked closed.
pub(crate) async fn run(
    client: reqwest::Client,
    url: String,
    generation: u64,
    health: Arc<ChannelHealth>,
    handler: MessageHandler,
    mut cancel: watch::Receiver<bool>,
) {
    tokio::select! {
        biased;
        _ = cancelled(&mut cancel) => {
            debug!("server-push transport cancelled");
        }
        result = consume(&client, &url, generation, &health, &handler) => {
            match result {
                Ok(()) => info!(url = %url, "server-push stream ended"),
                Err(e) => warn!(url = %url, error = %e, "server-push stream failed"),
            }
        }
    }
    health.set(generation, Transport::ServerPush, TransportState::Closed);
}

async fn consume(
    client: &reqwest::Client,
    url: &str,
    generation: u64,
    health: &ChannelHealth,
    handler: &MessageHandler,
) -> Result<(), String> {
    let mut response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("upstream returned {}", response.status()));
    }
    if !health.set(generation, Transport::ServerPush, TransportState::Open) {
        return Ok(());
    }
    info!(url, "server-push stream open");

    let mut pending_line_bytes: Vec<u8> = Vec::new();
    let mut parser = SseFrameParser::new();

    loop {
        let chunk = response
            .chunk()
            .await
            .map_err(|e| format!("read failed: {e}"))?;
        let Some(chunk) = chunk else {
            return Ok(());
        };
        pending_line_bytes.extend_from_slice(&chunk);

        while let Some(line_end_idx) = pending_line_bytes.iter().position(|byte| *byte == b'\n') {
            let mut line_bytes: Vec<u8> = pending_line_bytes.drain(..=line_end_idx).collect();
            line_bytes.pop();
            if line_bytes.last().copied() == Some(b'\r') {
                line_bytes.pop();
            }

            let line = String::from_utf8_lossy(&line_bytes);
            if let Some(frame) = parser.push_line(&line) {
                if is_dispatched(&frame.event) {
                    handler(&frame.data);
                } else {
                    debug!(event = %frame.event, "ignoring server-push event");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut SseFrameParser, text: &str) -> Vec<SseFrame> {
        text.split('\n').filter_map(|l| parser.push_line(l)).collect()
    }

    #[test]
    fn unnamed_frame_is_message() {
        let mut parser = SseFrameParser::new();
        let frames = feed(&mut parser, "data: {\"epc\":\"AB\"}\n\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "message".to_owned(),
                data: "{\"epc\":\"AB\"}".to_owned()
            }]
        );
    }

    #[test]
    fn named_frame_keeps_event_and_resets_after() {
        let mut parser = SseFrameParser::new();
        let frames = feed(&mut parser, "event: tag\ndata: a\n\ndata: b\n\n");
        assert_eq!(frames[0].event, "tag");
        assert_eq!(frames[1].event, "message");
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut parser = SseFrameParser::new();
        let frames = feed(&mut parser, "data: {\ndata:\"epc\":\"AB\"}\n\n");
        assert_eq!(frames[0].data, "{\n\"epc\":\"AB\"}");
    }

    #[test]
    fn comments_and_data_less_frames_are_dropped() {
        let mut parser = SseFrameParser::new();
        let frames = feed(&mut parser, ": keepalive\n\nevent: ping\n\nid: 4\nretry: 100\n\n");
        assert!(frames.is_empty());
    }

    #[test]
    fn only_known_events_are_dispatched() {
        for name in ["message", "tag", "detection", "event"] {
            assert!(is_dispatched(name), "{name}");
        }
        assert!(!is_dispatched("heartbeat"));
        assert!(!is_dispatched("Tag"));
    }
}
