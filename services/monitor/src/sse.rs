use crate::monitor::Monitor;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

/// UI event stream. Subscribers that fall behind get a `resync` event and
/// should refetch `/api/v1/status`.
pub async fn monitor_sse(
    State(monitor): State<Arc<Monitor>>,
) -> Sse<impl futures_util::stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = monitor.subscribe_ui();
    let updates = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().event(event.name()).data(json))),
            Err(_) => None,
        },
        Err(_) => Some(Ok(Event::default().event("resync").data("{}"))),
    });
    let connected = serde_json::json!({ "connected": monitor.is_connected() }).to_string();
    let initial = tokio_stream::once(Ok(Event::default().event("connected").data(connected)));
    let stream = initial.chain(updates);

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}
