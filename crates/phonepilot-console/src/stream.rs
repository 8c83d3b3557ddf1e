//! Task stream multiplexer.
//!
//! One [`StreamMultiplexer`] is bound to exactly one send: one device and
//! one placeholder agent message. It keeps the step history of that send
//! in its own buffers and writes full copies into the store on every
//! event, so back-to-back events can never drop each other's entries.
//!
//! A [`StreamHandle`] is the cancellation side. Once closed, the
//! multiplexer makes no further store writes; the check happens inside the
//! store's write lock, so a late event cannot slip in after a close.

use crate::store::DeviceStore;
use phonepilot_runtime::EventReceiver;
use phonepilot_types::event::{AgentEvent, DoneEvent, ErrorEvent, StepEvent};
use phonepilot_types::message::MessageId;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
struct StreamInner {
    id: Uuid,
    message_id: MessageId,
    closed: AtomicBool,
    task: OnceLock<AbortHandle>,
}

/// Handle to one in-flight task stream. Clones share the same stream.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    inner: Arc<StreamInner>,
}

impl StreamHandle {
    /// A fresh, open handle for the send filling `message_id`.
    pub fn new(message_id: MessageId) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: Uuid::new_v4(),
                message_id,
                closed: AtomicBool::new(false),
                task: OnceLock::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The placeholder message this stream fills.
    pub fn message_id(&self) -> MessageId {
        self.inner.message_id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the stream: stop the pump task and make the multiplexer inert.
    ///
    /// Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(stream_id = %self.inner.id, "Closing task stream");
        if let Some(task) = self.inner.task.get() {
            task.abort();
        }
    }

    /// Bind the task that drives this stream. A handle closed before the
    /// task was bound aborts it right away.
    pub fn attach(&self, task: AbortHandle) {
        if self.inner.task.set(task).is_err() {
            warn!(stream_id = %self.inner.id, "Stream task already attached");
            return;
        }
        if self.is_closed() {
            if let Some(task) = self.inner.task.get() {
                task.abort();
            }
        }
    }

    /// Whether both handles refer to the same stream.
    pub fn same(&self, other: &StreamHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Folds one send's step/done/error events into the device's state.
pub struct StreamMultiplexer {
    store: DeviceStore,
    device_id: String,
    handle: StreamHandle,
    thinking: Vec<String>,
    actions: Vec<Value>,
    finished: bool,
}

impl StreamMultiplexer {
    pub fn new(store: DeviceStore, device_id: impl Into<String>, handle: StreamHandle) -> Self {
        Self {
            store,
            device_id: device_id.into(),
            handle,
            thinking: Vec::new(),
            actions: Vec::new(),
            finished: false,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    /// A terminal event has been applied.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn on_step(&mut self, event: StepEvent) {
        if self.finished || self.handle.is_closed() {
            return;
        }
        self.thinking.push(event.thinking);
        self.actions.push(event.action);

        let thinking = self.thinking.clone();
        let actions = self.actions.clone();
        let handle = &self.handle;
        let message_id = handle.message_id();
        self.store.update_if(&self.device_id, |state| {
            if handle.is_closed() {
                return false;
            }
            let Some(msg) = state.message_mut(message_id) else {
                return false;
            };
            if !msg.is_streaming {
                return false;
            }
            msg.thinking = thinking;
            msg.actions = actions;
            msg.steps = Some(event.step);
            true
        });
    }

    pub fn on_done(&mut self, event: DoneEvent) {
        if self.finished || self.handle.is_closed() {
            return;
        }
        self.finished = true;
        debug!(device_id = %self.device_id, success = event.success, "Task finished");
        self.finish(event.message, event.success, event.steps, None);
    }

    pub fn on_error(&mut self, event: ErrorEvent) {
        if self.finished || self.handle.is_closed() {
            return;
        }
        self.finished = true;
        warn!(device_id = %self.device_id, error = %event.message, "Task failed");
        let content = format!("Error: {}", event.message);
        self.finish(content, false, None, Some(event.message));
    }

    fn finish(&self, content: String, success: bool, steps: Option<u32>, error: Option<String>) {
        let handle = &self.handle;
        let message_id = handle.message_id();
        self.store.update_if(&self.device_id, |state| {
            if handle.is_closed() {
                return false;
            }
            if let Some(msg) = state.message_mut(message_id) {
                msg.content = content;
                msg.success = Some(success);
                msg.is_streaming = false;
                if steps.is_some() {
                    msg.steps = steps;
                }
            }
            state.loading = false;
            if state.active_stream.as_ref().is_some_and(|h| h.same(handle)) {
                state.active_stream = None;
            }
            if error.is_some() {
                state.error = error;
            }
            true
        });
    }

    pub fn handle_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Step(step) => self.on_step(step),
            AgentEvent::Done(done) => self.on_done(done),
            AgentEvent::Error(err) => self.on_error(err),
        }
    }

    /// Drain `events` until a terminal event, the channel ends, or the
    /// handle is closed.
    pub async fn run(mut self, mut events: EventReceiver) {
        while let Some(event) = events.recv().await {
            if self.handle.is_closed() {
                break;
            }
            let terminal = event.is_terminal();
            self.handle_event(event);
            if terminal {
                break;
            }
        }
        if !self.finished && !self.handle.is_closed() {
            self.on_error(ErrorEvent {
                message: "Stream closed before the task finished".to_string(),
            });
        }
    }
}
