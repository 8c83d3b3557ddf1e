//! Events emitted by the agent while it executes a task.
//!
//! The server streams these as SSE frames named `step`, `done` and
//! `error`; the console folds them into the placeholder agent message.

use serde::{Deserialize, Serialize};

/// One reasoning/action step of the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    /// Step counter reported by the agent (1-based).
    pub step: u32,
    /// The model's reasoning for this step.
    #[serde(default)]
    pub thinking: String,
    /// The action performed. Opaque to the console.
    #[serde(default)]
    pub action: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<bool>,
}

/// The task finished (successfully or not).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneEvent {
    pub message: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
}

/// The task aborted with an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

/// A single event of an in-flight task stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentEvent {
    Step(StepEvent),
    Done(DoneEvent),
    Error(ErrorEvent),
}

impl AgentEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentEvent::Step(_))
    }

    /// Build an error event from any displayable message.
    pub fn error(message: impl Into<String>) -> Self {
        AgentEvent::Error(ErrorEvent {
            message: message.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_payload_from_server() {
        let json = r#"{"type":"step","step":2,"thinking":"tap the icon",
            "action":{"_metadata":"do","action":"Tap","element":[500,300]},
            "success":true,"finished":false}"#;
        let ev: AgentEvent = serde_json::from_str(json).unwrap();
        match ev {
            AgentEvent::Step(step) => {
                assert_eq!(step.step, 2);
                assert_eq!(step.thinking, "tap the icon");
                assert_eq!(step.action["action"], "Tap");
                assert_eq!(step.finished, Some(false));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn done_and_error_are_terminal() {
        let done: AgentEvent =
            serde_json::from_str(r#"{"type":"done","message":"Done","steps":3,"success":true}"#)
                .unwrap();
        assert!(done.is_terminal());
        assert!(AgentEvent::error("boom").is_terminal());

        let step = AgentEvent::Step(StepEvent {
            step: 1,
            thinking: String::new(),
            action: serde_json::Value::Null,
            success: None,
            finished: None,
        });
        assert!(!step.is_terminal());
    }
}
