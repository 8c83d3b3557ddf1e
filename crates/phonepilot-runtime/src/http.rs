//! REST + SSE transport against the agent server.

use crate::sse::{decode_agent_event, SseParser};
use crate::transport::{DeviceTransport, EventReceiver, TransportError, TransportResult};
use async_trait::async_trait;
use futures::StreamExt;
use phonepilot_types::api::{
    Ack, AgentStatus, ApiErrorBody, ChatRequest, ControlResponse, DeviceRequest, InitRequest,
    PointRequest, Screenshot, SwipeRequest, TouchPhase,
};
use phonepilot_types::device::{Device, DeviceList};
use phonepilot_types::event::AgentEvent;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Timeout for plain request/response calls. Task streams are unbounded.
const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;
/// Buffered task events before the reader applies backpressure.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// HTTP transport talking to the agent server's `/api` routes.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport for the server at `base_url` (e.g. `http://127.0.0.1:8000`).
    pub fn new(base_url: impl Into<String>) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> TransportResult<R> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        let resp = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        read_json(resp).await
    }

    async fn get_json<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> TransportResult<R> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .query(query)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        read_json(resp).await
    }
}

/// Map a non-2xx status to `TransportError::Api`, preferring the `detail` field.
async fn check_status(resp: reqwest::Response) -> TransportResult<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|e| e.detail)
        .unwrap_or(body);
    Err(TransportError::Api { status, message })
}

async fn read_json<R: DeserializeOwned>(resp: reqwest::Response) -> TransportResult<R> {
    let resp = check_status(resp).await?;
    let body = resp
        .text()
        .await
        .map_err(|e| TransportError::Http(e.to_string()))?;
    serde_json::from_str(&body).map_err(|e| TransportError::Parse(e.to_string()))
}

fn ack(ack: Ack, what: &str) -> TransportResult<()> {
    if ack.success {
        Ok(())
    } else {
        Err(TransportError::Rejected(
            ack.message.unwrap_or_else(|| format!("{what} failed")),
        ))
    }
}

fn control(resp: ControlResponse, what: &str) -> TransportResult<()> {
    if resp.success {
        Ok(())
    } else {
        Err(TransportError::Rejected(
            resp.error.unwrap_or_else(|| format!("{what} failed")),
        ))
    }
}

/// Read the SSE body and forward decoded task events until a terminal
/// event, end of stream, or the receiver going away.
async fn pump_task_stream(resp: reqwest::Response, tx: mpsc::Sender<AgentEvent>, device_id: String) {
    let mut parser = SseParser::new();
    let mut bytes = resp.bytes_stream();

    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => {
                debug!(device_id = %device_id, "Task stream receiver dropped");
                return;
            }
            chunk = bytes.next() => chunk,
        };

        let chunk = match chunk {
            Some(Ok(c)) => c,
            Some(Err(e)) => {
                warn!(device_id = %device_id, error = %e, "Task stream interrupted");
                let _ = tx
                    .send(AgentEvent::error(format!("Stream interrupted: {e}")))
                    .await;
                return;
            }
            None => {
                let _ = tx
                    .send(AgentEvent::error("Stream closed before the task finished"))
                    .await;
                return;
            }
        };

        parser.push(&chunk);
        while let Some(frame) = parser.next_frame() {
            let event = match decode_agent_event(&frame) {
                Some(Ok(ev)) => ev,
                Some(Err(e)) => {
                    warn!(device_id = %device_id, event = %frame.event, error = %e, "Malformed task event");
                    continue;
                }
                None => continue,
            };
            let terminal = event.is_terminal();
            if tx.send(event).await.is_err() || terminal {
                return;
            }
        }
    }
}

#[async_trait]
impl DeviceTransport for HttpTransport {
    async fn list_devices(&self) -> TransportResult<Vec<Device>> {
        let list: DeviceList = self.get_json("/api/devices", &[]).await?;
        Ok(list.devices)
    }

    async fn init_agent(&self, request: InitRequest) -> TransportResult<()> {
        let resp: Ack = self.post_json("/api/init", &request).await?;
        ack(resp, "init")
    }

    async fn reset_chat(&self, device_id: &str) -> TransportResult<()> {
        let body = DeviceRequest {
            device_id: device_id.to_string(),
        };
        let resp: Ack = self.post_json("/api/reset", &body).await?;
        ack(resp, "reset")
    }

    async fn get_screenshot(&self, device_id: &str) -> TransportResult<Screenshot> {
        let body = DeviceRequest {
            device_id: device_id.to_string(),
        };
        let shot: Screenshot = self.post_json("/api/screenshot", &body).await?;
        if !shot.success {
            return Err(TransportError::Rejected(
                shot.error.unwrap_or_else(|| "screenshot failed".to_string()),
            ));
        }
        Ok(shot)
    }

    async fn send_message_stream(
        &self,
        text: &str,
        device_id: &str,
    ) -> TransportResult<EventReceiver> {
        let url = self.url("/api/chat/stream");
        debug!(url = %url, device_id, "Opening task stream");
        let body = ChatRequest {
            message: text.to_string(),
            device_id: device_id.to_string(),
        };
        let resp = self
            .client
            .post(&url)
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let resp = check_status(resp).await?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(pump_task_stream(resp, tx, device_id.to_string()));
        Ok(rx)
    }

    async fn tap(&self, device_id: &str, x: i32, y: i32) -> TransportResult<()> {
        let body = PointRequest {
            x,
            y,
            device_id: device_id.to_string(),
            delay: 0.0,
        };
        let resp: ControlResponse = self.post_json("/api/control/tap", &body).await?;
        control(resp, "tap")
    }

    async fn swipe(&self, request: SwipeRequest) -> TransportResult<()> {
        let resp: ControlResponse = self.post_json("/api/control/swipe", &request).await?;
        control(resp, "swipe")
    }

    async fn status(&self, device_id: &str) -> TransportResult<AgentStatus> {
        self.get_json("/api/status", &[("device_id", device_id)])
            .await
    }

    async fn touch(
        &self,
        phase: TouchPhase,
        device_id: &str,
        x: i32,
        y: i32,
    ) -> TransportResult<()> {
        let body = PointRequest {
            x,
            y,
            device_id: device_id.to_string(),
            delay: 0.0,
        };
        let path = format!("/api/control/touch/{}", phase.as_path());
        let resp: ControlResponse = self.post_json(&path, &body).await?;
        control(resp, "touch")
    }

    async fn reset_video(&self, device_id: &str) -> TransportResult<()> {
        let url = self.url("/api/video/reset");
        let resp = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .query(&[("device_id", device_id)])
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let resp: Ack = read_json(resp).await?;
        ack(resp, "video reset")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one canned HTTP response and return the base URL plus
    /// a handle yielding the raw request that was received.
    async fn serve_once(
        status: &str,
        content_type: &str,
        body: String,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let head = format!(
            "HTTP/1.1 {status}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
            body.len()
        );
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let request = read_request(&mut sock).await;
            sock.write_all(head.as_bytes()).await.unwrap();
            sock.write_all(body.as_bytes()).await.unwrap();
            sock.shutdown().await.ok();
            request
        });
        (format!("http://{addr}"), handle)
    }

    async fn read_request(sock: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 4096];
        loop {
            let n = sock.read(&mut tmp).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    #[tokio::test]
    async fn list_devices_parses_roster() {
        let body = r#"{"devices":[{"id":"emulator-5554","model":"sdk","status":"device","connection_type":"usb","is_initialized":false}]}"#;
        let (url, server) = serve_once("200 OK", "application/json", body.to_string()).await;
        let transport = HttpTransport::new(url).unwrap();
        let devices = transport.list_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "emulator-5554");
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/devices"));
    }

    #[tokio::test]
    async fn api_error_uses_detail() {
        let body = r#"{"detail":"Device d9 not found"}"#;
        let (url, server) = serve_once("404 Not Found", "application/json", body.to_string()).await;
        let transport = HttpTransport::new(url).unwrap();
        let err = transport.reset_chat("d9").await.unwrap_err();
        match err {
            TransportError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Device d9 not found");
            }
            other => panic!("unexpected: {other:?}"),
        }
        let request = server.await.unwrap();
        assert!(request.contains("\"device_id\":\"d9\""));
    }

    #[tokio::test]
    async fn failed_screenshot_is_rejected() {
        let body = r#"{"success":false,"image":"","width":0,"height":0,"is_sensitive":false,"error":"adb timeout"}"#;
        let (url, _server) = serve_once("200 OK", "application/json", body.to_string()).await;
        let transport = HttpTransport::new(url).unwrap();
        let err = transport.get_screenshot("d1").await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected(ref m) if m == "adb timeout"));
    }

    #[tokio::test]
    async fn task_stream_delivers_events_in_order() {
        let body = concat!(
            "event: step\ndata: {\"type\":\"step\",\"step\":1,\"thinking\":\"open launcher\",\"action\":{\"action\":\"Home\"},\"success\":true,\"finished\":false}\n\n",
            "event: step\ndata: {\"type\":\"step\",\"step\":2,\"thinking\":\"tap camera\",\"action\":{\"action\":\"Tap\"},\"success\":true,\"finished\":true}\n\n",
            "event: done\ndata: {\"type\":\"done\",\"message\":\"Done\",\"steps\":2,\"success\":true}\n\n",
        );
        let (url, server) = serve_once("200 OK", "text/event-stream", body.to_string()).await;
        let transport = HttpTransport::new(url).unwrap();
        let mut rx = transport
            .send_message_stream("open camera", "d1")
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], AgentEvent::Step(ref s) if s.step == 1));
        assert!(matches!(events[1], AgentEvent::Step(ref s) if s.thinking == "tap camera"));
        assert!(matches!(events[2], AgentEvent::Done(ref d) if d.message == "Done" && d.success));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/chat/stream"));
        assert!(request.contains("\"message\":\"open camera\""));
    }

    #[tokio::test]
    async fn truncated_task_stream_ends_with_error() {
        let body = "event: step\ndata: {\"step\":1,\"thinking\":\"t\",\"action\":null}\n\n";
        let (url, _server) = serve_once("200 OK", "text/event-stream", body.to_string()).await;
        let transport = HttpTransport::new(url).unwrap();
        let mut rx = transport.send_message_stream("x", "d1").await.unwrap();

        assert!(matches!(rx.recv().await, Some(AgentEvent::Step(_))));
        match rx.recv().await {
            Some(AgentEvent::Error(e)) => assert!(e.message.contains("closed")),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn uninitialized_device_fails_before_streaming() {
        let body = r#"{"detail":"Device d1 not initialized. Call /api/init first."}"#;
        let (url, _server) = serve_once("400 Bad Request", "application/json", body.to_string()).await;
        let transport = HttpTransport::new(url).unwrap();
        let result = transport.send_message_stream("x", "d1").await;
        tokio_test::assert_err!(&result);
        assert!(matches!(result, Err(TransportError::Api { status: 400, .. })));
    }

    #[tokio::test]
    async fn touch_posts_to_phase_path() {
        let (url, server) =
            serve_once("200 OK", "application/json", r#"{"success":true}"#.to_string()).await;
        let transport = HttpTransport::new(url).unwrap();
        transport.touch(TouchPhase::Move, "d1", 300, 900).await.unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/control/touch/move"));
        assert!(request.contains("\"x\":300"));
    }

    #[tokio::test]
    async fn rejected_tap_reports_server_error() {
        let body = r#"{"success":false,"error":"input tap failed"}"#;
        let (url, _server) = serve_once("200 OK", "application/json", body.to_string()).await;
        let transport = HttpTransport::new(url).unwrap();
        let err = transport.tap("d1", 1, 2).await.unwrap_err();
        assert_eq!(err.to_string(), "Rejected: input tap failed");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let transport = HttpTransport::new("http://127.0.0.1:8000/").unwrap();
        assert_eq!(transport.base_url(), "http://127.0.0.1:8000");
        assert_eq!(transport.url("/api/devices"), "http://127.0.0.1:8000/api/devices");
    }
}
