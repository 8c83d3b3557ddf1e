//! The per-device state record and partial updates to it.

use crate::stream::StreamHandle;
use phonepilot_types::api::Screenshot;
use phonepilot_types::display::{DisplayMode, EffectiveMode, VideoHealth};
use phonepilot_types::message::{Message, MessageId};
use std::sync::Arc;
use tokio::time::Instant;

/// Transient result of a tap or swipe, shown until `expires_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct TapFeedback {
    /// Sequence number; an expiry timer only clears its own feedback.
    pub id: u64,
    pub success: bool,
    pub message: String,
    pub expires_at: Instant,
}

/// Everything the console knows about one device.
///
/// Records are never mutated in place once published; the store replaces
/// them wholesale.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    /// Chronological conversation.
    pub messages: Vec<Message>,
    /// A task is in flight.
    pub loading: bool,
    /// Last error surfaced for this device.
    pub error: Option<String>,
    /// The backend agent has been set up for this device.
    pub initialized: bool,
    /// The in-flight task stream, if any.
    pub active_stream: Option<StreamHandle>,
    /// Last fetched screenshot.
    pub screenshot: Option<Arc<Screenshot>>,
    pub display_mode: DisplayMode,
    /// Sticky: once `Failed`, stays failed.
    pub video_health: VideoHealth,
    pub tap_feedback: Option<TapFeedback>,
}

impl DeviceState {
    /// Resolved video-vs-screenshot choice.
    pub fn effective_mode(&self) -> EffectiveMode {
        EffectiveMode::resolve(self.display_mode, self.video_health)
    }

    pub fn video_stream_failed(&self) -> bool {
        self.video_health == VideoHealth::Failed
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// The agent message currently being filled, if any.
    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.is_streaming)
    }
}

/// A partial update merged into a [`DeviceState`].
///
/// Unset fields leave the record untouched. The video-failure latch can
/// only be set, never cleared.
#[derive(Debug, Clone, Default)]
pub struct DeviceStatePatch {
    messages: Option<Vec<Message>>,
    loading: Option<bool>,
    error: Option<Option<String>>,
    initialized: Option<bool>,
    active_stream: Option<Option<StreamHandle>>,
    screenshot: Option<Option<Arc<Screenshot>>>,
    display_mode: Option<DisplayMode>,
    video_failed: bool,
    tap_feedback: Option<Option<TapFeedback>>,
}

impl DeviceStatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    pub fn loading(mut self, loading: bool) -> Self {
        self.loading = Some(loading);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn initialized(mut self, initialized: bool) -> Self {
        self.initialized = Some(initialized);
        self
    }

    pub fn active_stream(mut self, handle: StreamHandle) -> Self {
        self.active_stream = Some(Some(handle));
        self
    }

    pub fn clear_active_stream(mut self) -> Self {
        self.active_stream = Some(None);
        self
    }

    pub fn screenshot(mut self, shot: Arc<Screenshot>) -> Self {
        self.screenshot = Some(Some(shot));
        self
    }

    pub fn display_mode(mut self, mode: DisplayMode) -> Self {
        self.display_mode = Some(mode);
        self
    }

    pub fn mark_video_failed(mut self) -> Self {
        self.video_failed = true;
        self
    }

    pub fn tap_feedback(mut self, feedback: TapFeedback) -> Self {
        self.tap_feedback = Some(Some(feedback));
        self
    }

    pub fn clear_tap_feedback(mut self) -> Self {
        self.tap_feedback = Some(None);
        self
    }

    /// Merge into `state`.
    pub fn apply(self, state: &mut DeviceState) {
        if let Some(messages) = self.messages {
            state.messages = messages;
        }
        if let Some(loading) = self.loading {
            state.loading = loading;
        }
        if let Some(error) = self.error {
            state.error = error;
        }
        if let Some(initialized) = self.initialized {
            state.initialized = initialized;
        }
        if let Some(handle) = self.active_stream {
            state.active_stream = handle;
        }
        if let Some(shot) = self.screenshot {
            state.screenshot = shot;
        }
        if let Some(mode) = self.display_mode {
            state.display_mode = mode;
        }
        if self.video_failed {
            state.video_health = VideoHealth::Failed;
        }
        if let Some(feedback) = self.tap_feedback {
            state.tap_feedback = feedback;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_idle_auto_video() {
        let state = DeviceState::default();
        assert!(state.messages.is_empty());
        assert!(!state.loading);
        assert!(!state.initialized);
        assert_eq!(state.display_mode, DisplayMode::Auto);
        assert_eq!(state.effective_mode(), EffectiveMode::Video);
        assert!(state.streaming_message().is_none());
    }

    #[test]
    fn patch_only_touches_named_fields() {
        let mut state = DeviceState {
            error: Some("old".into()),
            initialized: true,
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        DeviceStatePatch::new().loading(true).apply(&mut state);
        assert!(state.loading);
        assert_eq!(state.error.as_deref(), Some("old"));
        assert!(state.initialized);
        assert_eq!(state.messages.len(), 1);

        DeviceStatePatch::new().clear_error().apply(&mut state);
        assert!(state.error.is_none());
    }

    #[test]
    fn video_failure_latch_cannot_be_cleared_by_patch() {
        let mut state = DeviceState::default();
        DeviceStatePatch::new().mark_video_failed().apply(&mut state);
        assert!(state.video_stream_failed());
        // An unrelated patch, or a mode round trip, leaves the latch set.
        DeviceStatePatch::new()
            .display_mode(DisplayMode::Video)
            .apply(&mut state);
        DeviceStatePatch::new()
            .display_mode(DisplayMode::Auto)
            .apply(&mut state);
        assert!(state.video_stream_failed());
        assert_eq!(state.effective_mode(), EffectiveMode::Screenshot);
    }

    #[test]
    fn message_lookup_by_id() {
        let placeholder = Message::agent_placeholder();
        let id = placeholder.id;
        let mut state = DeviceState {
            messages: vec![Message::user("open camera"), placeholder],
            ..Default::default()
        };
        assert_eq!(state.streaming_message().map(|m| m.id), Some(id));
        state.message_mut(id).unwrap().is_streaming = false;
        assert!(state.streaming_message().is_none());
        assert!(state.message(id).is_some());
    }
}
