// rr-test-utils: Shared test utilities for the monitor service.
//
// Provides mock upstream event sources (realtime socket and server-push
// stream) that tests can feed scripted payloads through.

pub mod mock_gateway;
pub mod mock_sse_server;
pub mod mock_ws_server;

pub use mock_gateway::MockGateway;
pub use mock_sse_server::MockSseServer;
pub use mock_ws_server::MockWsServer;

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio::time::{Duration, timeout};

    /// Test: both servers bind to a real port.
    #[tokio::test]
    async fn mock_servers_start_and_report_port() {
        let ws = MockWsServer::start().await.unwrap();
        let sse = MockSseServer::start().await.unwrap();
        assert_ne!(ws.local_addr().port(), 0);
        assert_ne!(sse.local_addr().port(), 0);
    }

    /// Test: frames pushed after connect reach the socket client, and the
    /// request URI is recorded.
    #[tokio::test]
    async fn mock_ws_server_pushes_text_frames() {
        let server = MockWsServer::start().await.unwrap();
        let url = format!("ws://{}/ws?readerId=r1", server.local_addr());
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        server.send(r#"{"epc":"AABBCCDD"}"#);
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("ws error");
        assert_eq!(msg.into_text().unwrap().as_str(), r#"{"epc":"AABBCCDD"}"#);
        assert_eq!(server.requests(), vec!["/ws?readerId=r1".to_owned()]);
    }

    /// Test: the SSE server emits named frames and ends the body on close.
    #[tokio::test]
    async fn mock_sse_server_streams_frames_until_closed() {
        let server = MockSseServer::start().await.unwrap();
        let mut resp = reqwest::get(format!("{}/api/events", server.http_base()))
            .await
            .unwrap();
        assert!(resp.status().is_success());

        server.send_named("tag", "{}");
        server.close_all();

        let mut body = String::new();
        while let Some(chunk) = timeout(Duration::from_secs(2), resp.chunk())
            .await
            .expect("timed out")
            .unwrap()
        {
            body.push_str(&String::from_utf8_lossy(&chunk));
        }
        assert!(body.contains("event: tag"), "body: {body}");
        assert!(body.contains("data: {}"), "body: {body}");
        assert_eq!(server.requests(), vec!["/api/events".to_owned()]);
    }

    #[tokio::test]
    async fn mock_gateway_serves_both_transports_on_one_port() {
        let gateway = MockGateway::start().await.unwrap();
        let url = format!("ws://{}/ws?readerId=r1", gateway.local_addr());
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let resp = reqwest::get(format!("{}/api/events", gateway.http_base()))
            .await
            .unwrap();
        assert!(resp.status().is_success());

        gateway.send_ws("hello");
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("ws error");
        assert_eq!(msg.into_text().unwrap().as_str(), "hello");
        assert_eq!(gateway.ws_requests(), vec!["/ws?readerId=r1".to_owned()]);
        assert_eq!(gateway.sse_requests(), vec!["/api/events".to_owned()]);
    }

    #[tokio::test]
    async fn mock_sse_server_can_refuse_streams() {
        let server = MockSseServer::start_with_status(axum::http::StatusCode::SERVICE_UNAVAILABLE)
            .await
            .unwrap();
        let resp = reqwest::get(format!("{}/x", server.http_base())).await.unwrap();
        assert_eq!(resp.status().as_u16(), 503);
    }
}
