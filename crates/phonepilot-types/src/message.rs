//! Conversation messages shown in the console chat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Generate a fresh random ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human operator.
    User,
    /// The device automation agent.
    Agent,
}

/// A single entry in a device conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Number of agent steps taken so far (agent messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    /// Final outcome of the task (agent messages only, once finished).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Reasoning text of each step, in order.
    #[serde(default)]
    pub thinking: Vec<String>,
    /// Action record of each step, in order. Opaque to the console.
    #[serde(default)]
    pub actions: Vec<serde_json::Value>,
    /// True while the agent is still filling this message.
    #[serde(default)]
    pub is_streaming: bool,
}

impl Message {
    /// A message typed by the operator.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            steps: None,
            success: None,
            thinking: Vec::new(),
            actions: Vec::new(),
            is_streaming: false,
        }
    }

    /// The empty agent message that a running task fills in.
    pub fn agent_placeholder() -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Agent,
            content: String::new(),
            timestamp: Utc::now(),
            steps: Some(0),
            success: None,
            thinking: Vec::new(),
            actions: Vec::new(),
            is_streaming: true,
        }
    }
}
