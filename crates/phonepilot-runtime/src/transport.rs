//! The transport contract consumed by the console core.

use async_trait::async_trait;
use phonepilot_types::api::{AgentStatus, InitRequest, Screenshot, SwipeRequest, TouchPhase};
use phonepilot_types::device::Device;
use phonepilot_types::event::AgentEvent;
use tokio::sync::mpsc;

/// Receiving half of a task's event stream.
///
/// Dropping it stops delivery and releases the underlying connection.
pub type EventReceiver = mpsc::Receiver<AgentEvent>;

/// Error type for transport calls.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or the body could not be read.
    #[error("HTTP error: {0}")]
    Http(String),
    /// The server answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    /// The response body did not have the expected shape.
    #[error("Parse error: {0}")]
    Parse(String),
    /// The server answered but reported `success: false`.
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    /// The transport does not implement this call.
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Calls the console makes against the agent server.
///
/// Every call suspends the caller until the server answers or fails.
/// Task events are push-based: `send_message_stream` returns as soon as
/// the stream is open and events arrive on the returned receiver.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Enumerate attached devices.
    async fn list_devices(&self) -> TransportResult<Vec<Device>>;

    /// Create (or replace) the agent bound to `request.agent_config.device_id`.
    async fn init_agent(&self, request: InitRequest) -> TransportResult<()>;

    /// Drop the agent's conversation for a device.
    async fn reset_chat(&self, device_id: &str) -> TransportResult<()>;

    /// Capture one screenshot. Returns `Err` when the capture failed.
    async fn get_screenshot(&self, device_id: &str) -> TransportResult<Screenshot>;

    /// Start a task and open its event stream.
    async fn send_message_stream(
        &self,
        text: &str,
        device_id: &str,
    ) -> TransportResult<EventReceiver>;

    /// Tap at device coordinates.
    async fn tap(&self, device_id: &str, x: i32, y: i32) -> TransportResult<()>;

    /// Swipe between device coordinates.
    async fn swipe(&self, request: SwipeRequest) -> TransportResult<()>;

    /// Agent status for a device.
    async fn status(&self, _device_id: &str) -> TransportResult<AgentStatus> {
        Err(TransportError::Unsupported("status"))
    }

    /// Raw touch event (down/move/up) for drag gestures.
    async fn touch(
        &self,
        _phase: TouchPhase,
        _device_id: &str,
        _x: i32,
        _y: i32,
    ) -> TransportResult<()> {
        Err(TransportError::Unsupported("touch"))
    }

    /// Tear down the server-side video streamer for a device.
    async fn reset_video(&self, _device_id: &str) -> TransportResult<()> {
        Err(TransportError::Unsupported("reset_video"))
    }
}
