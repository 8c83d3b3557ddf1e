//! The console facade.
//!
//! Presentation layers drive everything through [`Console`]: user intents
//! become store mutations and transport calls here, and the background
//! roster and arbiter loops are started from here.

use crate::arbiter::DisplayArbiter;
use crate::roster::{DeviceRoster, RosterSnapshot};
use crate::state::{DeviceState, DeviceStatePatch, TapFeedback};
use crate::store::{DeviceStore, StoreSnapshot};
use crate::stream::{StreamHandle, StreamMultiplexer};
use phonepilot_runtime::live_view::LiveViewNotice;
use phonepilot_runtime::{DeviceTransport, TransportError};
use phonepilot_types::api::{AgentStatus, InitRequest, SwipeRequest};
use phonepilot_types::config::ConsoleConfig;
use phonepilot_types::display::{DisplayMode, LiveViewEvent};
use phonepilot_types::message::Message;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Content written into a placeholder whose stream was cancelled.
const INTERRUPTED: &str = "Task interrupted";

/// Error type for console operations.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    /// A task is already running on the device.
    #[error("Device {0} is busy with another task")]
    Busy(String),
    #[error("Agent is not initialized for device {0}")]
    NotInitialized(String),
    #[error("Message is empty")]
    EmptyMessage,
    /// The send was cancelled (device switch or reset) before its stream attached.
    #[error("Task was cancelled before it started")]
    Cancelled,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;

/// Per-device conversation and display coordinator.
pub struct Console {
    config: ConsoleConfig,
    transport: Arc<dyn DeviceTransport>,
    store: DeviceStore,
    selected: Arc<watch::Sender<Option<String>>>,
    roster: Arc<DeviceRoster>,
    arbiter: Arc<DisplayArbiter>,
    shutdown: watch::Sender<bool>,
    feedback_seq: AtomicU64,
}

impl Console {
    pub fn new(transport: Arc<dyn DeviceTransport>, config: ConsoleConfig) -> Self {
        let store = DeviceStore::new();
        let (selected, _) = watch::channel(None);
        let selected = Arc::new(selected);
        let roster = Arc::new(DeviceRoster::new(
            Arc::clone(&transport),
            store.clone(),
            Arc::clone(&selected),
        ));
        let arbiter = Arc::new(DisplayArbiter::new(
            store.clone(),
            Arc::clone(&transport),
            config.polling.screenshot_interval(),
        ));
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            transport,
            store,
            selected,
            roster,
            arbiter,
            shutdown,
            feedback_seq: AtomicU64::new(0),
        }
    }

    /// Start the device roster poller and the display arbiter.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        info!(server = %self.config.server_url, "Starting console");
        vec![
            Arc::clone(&self.roster).spawn(
                self.config.polling.device_refresh(),
                self.shutdown.subscribe(),
            ),
            Arc::clone(&self.arbiter).spawn(
                self.store.subscribe(),
                self.selected.subscribe(),
                self.shutdown.subscribe(),
            ),
        ]
    }

    /// Stop background loops and cancel every in-flight task.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.arbiter.stop();
        let snapshot = self.store.snapshot();
        for (device_id, state) in snapshot.iter() {
            if state.active_stream.is_some() {
                self.cancel_stream(device_id);
            }
        }
        info!("Console shut down");
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn store(&self) -> &DeviceStore {
        &self.store
    }

    /// Notified after every state change of any device.
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.store.subscribe()
    }

    pub fn device_state(&self, device_id: &str) -> Arc<DeviceState> {
        self.store.get(device_id)
    }

    pub fn devices(&self) -> RosterSnapshot {
        self.roster.snapshot()
    }

    pub fn subscribe_devices(&self) -> watch::Receiver<RosterSnapshot> {
        self.roster.subscribe()
    }

    pub async fn refresh_devices(&self) -> RosterSnapshot {
        self.roster.refresh().await
    }

    pub fn selected_device(&self) -> Option<String> {
        self.selected.borrow().clone()
    }

    pub fn subscribe_selected(&self) -> watch::Receiver<Option<String>> {
        self.selected.subscribe()
    }

    /// Device whose screenshots are being polled, if any.
    pub fn polling_device(&self) -> Option<String> {
        self.arbiter.polling_device()
    }

    /// Switch the selected device. The previous device's task stream is closed.
    pub fn select_device(&self, device_id: &str) {
        let previous = self.selected_device();
        if previous.as_deref() == Some(device_id) {
            return;
        }
        if let Some(prev) = previous {
            self.cancel_stream(&prev);
        }
        info!(device_id = %device_id, "Device selected");
        self.selected.send_replace(Some(device_id.to_string()));
    }

    /// Create the backend agent for a device from the configured model and
    /// agent settings.
    pub async fn init_agent(&self, device_id: &str) -> ConsoleResult<()> {
        let request = InitRequest::new(
            device_id,
            self.config.model.clone(),
            self.config.agent.clone(),
        );
        match self.transport.init_agent(request).await {
            Ok(()) => {
                info!(device_id = %device_id, "Agent initialized");
                self.store.update(
                    device_id,
                    DeviceStatePatch::new().initialized(true).clear_error(),
                );
                Ok(())
            }
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Agent initialization failed");
                self.store.update(
                    device_id,
                    DeviceStatePatch::new().error(format!("Initialization failed: {e}")),
                );
                Err(e.into())
            }
        }
    }

    /// Start a task on a device.
    ///
    /// Appends the user message and an empty streaming agent message, then
    /// folds the task's events into the latter in the background. Returns
    /// the stream's handle once the stream is attached.
    pub async fn send_message(&self, device_id: &str, text: &str) -> ConsoleResult<StreamHandle> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ConsoleError::EmptyMessage);
        }

        let user = Message::user(text);
        let placeholder = Message::agent_placeholder();
        let handle = StreamHandle::new(placeholder.id);
        let mut rejected = None;
        self.store.update_if(device_id, |state| {
            if !state.initialized {
                rejected = Some(ConsoleError::NotInitialized(device_id.to_string()));
                return false;
            }
            if state.loading {
                rejected = Some(ConsoleError::Busy(device_id.to_string()));
                return false;
            }
            state.messages.push(user);
            state.messages.push(placeholder);
            state.loading = true;
            state.error = None;
            true
        });
        if let Some(err) = rejected {
            return Err(err);
        }

        debug!(device_id = %device_id, stream_id = %handle.id(), "Opening task stream");
        let events = match self.transport.send_message_stream(text, device_id).await {
            Ok(events) => events,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Failed to start task");
                let message_id = handle.message_id();
                self.store.update_if(device_id, |state| {
                    let Some(msg) = state.message_mut(message_id).filter(|m| m.is_streaming) else {
                        return false;
                    };
                    msg.content = format!("Error: {e}");
                    msg.success = Some(false);
                    msg.is_streaming = false;
                    state.loading = false;
                    state.error = Some(e.to_string());
                    true
                });
                return Err(e.into());
            }
        };

        // A reset or device switch may have finalized the placeholder meanwhile.
        let message_id = handle.message_id();
        let attached = self.store.update_if(device_id, |state| {
            if !state.message(message_id).is_some_and(|m| m.is_streaming) {
                return false;
            }
            state.active_stream = Some(handle.clone());
            true
        });
        if !attached {
            debug!(device_id = %device_id, "Task cancelled before its stream attached");
            handle.close();
            return Err(ConsoleError::Cancelled);
        }

        let mux = StreamMultiplexer::new(self.store.clone(), device_id, handle.clone());
        let task = tokio::spawn(mux.run(events));
        handle.attach(task.abort_handle());
        Ok(handle)
    }

    /// Close the device's task stream, if any.
    ///
    /// The streaming message is finalized as interrupted and `loading`
    /// cleared. Returns whether anything was cancelled.
    pub fn cancel_stream(&self, device_id: &str) -> bool {
        self.store.update_if(device_id, |state| {
            let handle = state.active_stream.take();
            let streaming = state.messages.iter().any(|m| m.is_streaming);
            if handle.is_none() && !streaming && !state.loading {
                return false;
            }
            // Closed under the store lock: the multiplexer's next write sees it.
            if let Some(handle) = &handle {
                handle.close();
            }
            for msg in state.messages.iter_mut().filter(|m| m.is_streaming) {
                msg.is_streaming = false;
                msg.success = Some(false);
                if msg.content.is_empty() {
                    msg.content = INTERRUPTED.to_string();
                }
            }
            state.loading = false;
            info!(device_id = %device_id, "Task stream cancelled");
            true
        })
    }

    /// Cancel any running task and clear the device's conversation.
    pub async fn reset_chat(&self, device_id: &str) -> ConsoleResult<()> {
        self.cancel_stream(device_id);
        match self.transport.reset_chat(device_id).await {
            Ok(()) => {
                info!(device_id = %device_id, "Conversation reset");
                self.store.update(
                    device_id,
                    DeviceStatePatch::new()
                        .messages(Vec::new())
                        .loading(false)
                        .clear_error(),
                );
                Ok(())
            }
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Reset failed");
                self.store.update(
                    device_id,
                    DeviceStatePatch::new().error(format!("Reset failed: {e}")),
                );
                Err(e.into())
            }
        }
    }

    pub fn set_display_mode(&self, device_id: &str, mode: DisplayMode) {
        info!(device_id = %device_id, mode = ?mode, "Display mode changed");
        self.store
            .update(device_id, DeviceStatePatch::new().display_mode(mode));
    }

    /// Apply a notification from a device's live view.
    pub fn handle_live_view(&self, notice: LiveViewNotice) {
        let device_id = notice.device_id;
        match notice.event {
            LiveViewEvent::Fallback { reason } => {
                let latched = self.store.update_if(&device_id, |state| {
                    if state.video_stream_failed() {
                        return false;
                    }
                    DeviceStatePatch::new().mark_video_failed().apply(state);
                    true
                });
                if latched {
                    warn!(device_id = %device_id, reason = %reason, "Live video failed, falling back to screenshots");
                }
            }
            LiveViewEvent::TapResult { success, message } => {
                let message = message.unwrap_or_else(|| {
                    let text = if success { "Tap executed" } else { "Tap failed" };
                    text.to_string()
                });
                self.show_feedback(&device_id, success, message);
            }
            LiveViewEvent::SwipeResult { success, message } => {
                let message = message.unwrap_or_else(|| {
                    let text = if success { "Swipe executed" } else { "Swipe failed" };
                    text.to_string()
                });
                self.show_feedback(&device_id, success, message);
            }
        }
    }

    /// Tap at device coordinates; the outcome is also shown as feedback.
    pub async fn tap(&self, device_id: &str, x: i32, y: i32) -> ConsoleResult<()> {
        let result = self.transport.tap(device_id, x, y).await;
        self.handle_live_view(LiveViewNotice {
            device_id: device_id.to_string(),
            event: LiveViewEvent::TapResult {
                success: result.is_ok(),
                message: result.as_ref().err().map(|e| e.to_string()),
            },
        });
        Ok(result?)
    }

    /// Swipe between device coordinates; the outcome is also shown as feedback.
    pub async fn swipe(
        &self,
        device_id: &str,
        from: (i32, i32),
        to: (i32, i32),
        duration_ms: Option<u64>,
    ) -> ConsoleResult<()> {
        let request = SwipeRequest {
            start_x: from.0,
            start_y: from.1,
            end_x: to.0,
            end_y: to.1,
            duration_ms,
            device_id: device_id.to_string(),
            delay: 0.0,
        };
        let result = self.transport.swipe(request).await;
        self.handle_live_view(LiveViewNotice {
            device_id: device_id.to_string(),
            event: LiveViewEvent::SwipeResult {
                success: result.is_ok(),
                message: result.as_ref().err().map(|e| e.to_string()),
            },
        });
        Ok(result?)
    }

    pub async fn status(&self, device_id: &str) -> ConsoleResult<AgentStatus> {
        Ok(self.transport.status(device_id).await?)
    }

    /// Ask the server to restart the device's video streamer.
    pub async fn reset_video(&self, device_id: &str) -> ConsoleResult<()> {
        Ok(self.transport.reset_video(device_id).await?)
    }

    /// Fetch one screenshot for a device outside the polling loop.
    pub async fn refresh_screenshot(&self, device_id: &str) -> bool {
        self.arbiter.fetch_once(device_id).await
    }

    fn show_feedback(&self, device_id: &str, success: bool, message: String) {
        let id = self.feedback_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let expires_at = Instant::now() + self.config.polling.tap_feedback();
        debug!(device_id = %device_id, success, message = %message, "Control feedback");
        self.store.update(
            device_id,
            DeviceStatePatch::new().tap_feedback(TapFeedback {
                id,
                success,
                message,
                expires_at,
            }),
        );

        let store = self.store.clone();
        let device_id = device_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            store.update_if(&device_id, |state| {
                if state.tap_feedback.as_ref().map(|f| f.id) != Some(id) {
                    return false;
                }
                state.tap_feedback = None;
                true
            });
        });
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
