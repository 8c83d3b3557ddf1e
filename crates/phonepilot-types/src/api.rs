//! Request and response bodies of the agent server's REST API.

use crate::config::{AgentSettings, ModelSettings};
use serde::{Deserialize, Serialize};

/// Agent section of `POST /api/init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInitConfig {
    pub device_id: String,
    #[serde(flatten)]
    pub settings: AgentSettings,
}

/// Request body for `POST /api/init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitRequest {
    pub model_config: ModelSettings,
    pub agent_config: AgentInitConfig,
}

impl InitRequest {
    pub fn new(device_id: impl Into<String>, model: ModelSettings, agent: AgentSettings) -> Self {
        Self {
            model_config: model,
            agent_config: AgentInitConfig {
                device_id: device_id.into(),
                settings: agent,
            },
        }
    }
}

/// Generic acknowledgement returned by init/reset/video-reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Error body used by the server for non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub detail: String,
}

/// Request body for `POST /api/chat/stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub device_id: String,
}

/// Request body for `POST /api/reset` and `POST /api/screenshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRequest {
    pub device_id: String,
}

/// Result of a single screenshot capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Screenshot {
    pub success: bool,
    /// Base64-encoded PNG.
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// The screen shows sensitive content (the server blanks it).
    #[serde(default)]
    pub is_sensitive: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response body of `GET /api/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub version: String,
    pub initialized: bool,
    pub step_count: u32,
}

/// Request body for `POST /api/control/tap` and the touch endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointRequest {
    pub x: i32,
    pub y: i32,
    pub device_id: String,
    #[serde(default)]
    pub delay: f64,
}

/// Request body for `POST /api/control/swipe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwipeRequest {
    pub start_x: i32,
    pub start_y: i32,
    pub end_x: i32,
    pub end_y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub device_id: String,
    #[serde(default)]
    pub delay: f64,
}

/// Response body of the control endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Phase of a raw touch gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchPhase {
    Down,
    Move,
    Up,
}

impl TouchPhase {
    /// Path segment under `/api/control/touch/`.
    pub fn as_path(self) -> &'static str {
        match self {
            TouchPhase::Down => "down",
            TouchPhase::Move => "move",
            TouchPhase::Up => "up",
        }
    }
}
