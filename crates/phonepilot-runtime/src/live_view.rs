//! Live device video over WebSocket.
//!
//! The server pushes raw H.264 chunks as binary frames on
//! `/api/video/stream?device_id=...` and reports failures as a JSON text
//! frame `{"error": "..."}`. Anything that makes the video unusable
//! (connect failure, error frame, no first frame in time, early close) is
//! reported once as [`LiveViewEvent::Fallback`].

use crate::transport::{TransportError, TransportResult};
use bytes::Bytes;
use futures::StreamExt;
use phonepilot_types::display::LiveViewEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use url::Url;

/// Buffered video chunks before the reader applies backpressure.
const FRAME_CHANNEL_CAPACITY: usize = 256;

/// A live-view notification tagged with the device it concerns.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveViewNotice {
    pub device_id: String,
    pub event: LiveViewEvent,
}

/// Build the WebSocket URL of a device's video stream from the server's HTTP URL.
pub fn video_stream_url(server_url: &str, device_id: &str) -> TransportResult<Url> {
    let mut url = Url::parse(server_url).map_err(|e| TransportError::WebSocket(e.to_string()))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::WebSocket(format!("cannot use {scheme} for {server_url}")))?;
    url.set_path("/api/video/stream");
    url.query_pairs_mut()
        .clear()
        .append_pair("device_id", device_id);
    Ok(url)
}

/// An open live video stream for one device.
///
/// Dropping it closes the WebSocket.
pub struct VideoStream {
    device_id: String,
    frames: mpsc::Receiver<Bytes>,
    task: JoinHandle<()>,
}

impl VideoStream {
    /// Connect to the device's video stream.
    ///
    /// `max_wait` bounds both the connect and the arrival of the first frame.
    /// Failures are reported on `notices`, not as an error here; the returned
    /// stream then simply ends.
    pub fn open(
        server_url: &str,
        device_id: &str,
        max_wait: Duration,
        notices: mpsc::UnboundedSender<LiveViewNotice>,
    ) -> TransportResult<Self> {
        let url = video_stream_url(server_url, device_id)?;
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let task = tokio::spawn(run_stream(
            url,
            device_id.to_string(),
            max_wait,
            tx,
            notices,
        ));
        Ok(Self {
            device_id: device_id.to_string(),
            frames: rx,
            task,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Next H.264 chunk, or `None` once the stream ended.
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }
}

impl Drop for VideoStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_stream(
    url: Url,
    device_id: String,
    max_wait: Duration,
    frames: mpsc::Sender<Bytes>,
    notices: mpsc::UnboundedSender<LiveViewNotice>,
) {
    let fallback = |reason: String| {
        warn!(device_id = %device_id, reason = %reason, "Live view unusable, requesting fallback");
        let _ = notices.send(LiveViewNotice {
            device_id: device_id.clone(),
            event: LiveViewEvent::Fallback { reason },
        });
    };

    debug!(url = %url, "Connecting live view");
    let mut ws = match tokio::time::timeout(max_wait, tokio_tungstenite::connect_async(url.as_str())).await {
        Ok(Ok((ws, _))) => ws,
        Ok(Err(e)) => return fallback(format!("video connect failed: {e}")),
        Err(_) => return fallback("video connect timed out".to_string()),
    };

    let first_frame_deadline = tokio::time::Instant::now() + max_wait;
    let mut chunks: u64 = 0;

    loop {
        let next = if chunks == 0 {
            match tokio::time::timeout_at(first_frame_deadline, ws.next()).await {
                Ok(n) => n,
                Err(_) => {
                    return fallback(format!(
                        "no video frame within {} ms",
                        max_wait.as_millis()
                    ))
                }
            }
        } else {
            ws.next().await
        };

        match next {
            Some(Ok(WsMessage::Binary(data))) => {
                chunks += 1;
                if chunks == 1 {
                    info!(device_id = %device_id, "Live view started");
                }
                if frames.send(Bytes::from(data)).await.is_err() {
                    debug!(device_id = %device_id, chunks, "Live view consumer gone");
                    return;
                }
            }
            Some(Ok(WsMessage::Text(text))) => {
                let error = serde_json::from_str::<serde_json::Value>(&text)
                    .ok()
                    .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from));
                if let Some(error) = error {
                    return fallback(error);
                }
            }
            Some(Ok(WsMessage::Close(_))) | None => {
                return fallback("video stream closed".to_string());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return fallback(format!("video stream error: {e}")),
        }
    }
}
