//! Scripted in-memory transport for console tests.

use async_trait::async_trait;
use phonepilot_runtime::{DeviceTransport, EventReceiver, TransportError, TransportResult};
use phonepilot_types::api::{InitRequest, Screenshot, SwipeRequest};
use phonepilot_types::device::Device;
use phonepilot_types::event::AgentEvent;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) fn device(id: &str, initialized: bool) -> Device {
    Device {
        id: id.to_string(),
        model: format!("model-{id}"),
        status: "device".to_string(),
        connection_type: "usb".to_string(),
        device_type: None,
        is_initialized: initialized,
    }
}

/// An opened task stream: who it was for and the sender driving it.
pub(crate) struct OpenedStream {
    pub device_id: String,
    pub text: String,
    pub events: mpsc::Sender<AgentEvent>,
}

#[derive(Default)]
pub(crate) struct FakeTransport {
    pub devices: Mutex<Vec<Device>>,
    pub fail_list: AtomicBool,
    pub list_calls: AtomicUsize,
    /// Reply delay of `list_devices`; the list is read before the delay.
    pub list_delay: Mutex<Duration>,

    pub screenshot_delay: Mutex<Duration>,
    pub fail_screenshot: AtomicBool,
    pub screenshot_calls: AtomicUsize,
    screenshot_inflight: AtomicUsize,
    pub screenshot_max_inflight: AtomicUsize,

    pub fail_init: AtomicBool,
    pub fail_reset: AtomicBool,
    pub fail_send: AtomicBool,
    pub send_delay: Mutex<Duration>,
    pub fail_control: AtomicBool,
    pub reset_calls: Mutex<Vec<String>>,
    pub video_resets: Mutex<Vec<String>>,
    pub taps: Mutex<Vec<(String, i32, i32)>>,
    pub swipes: Mutex<Vec<SwipeRequest>>,
    streams: Mutex<Vec<OpenedStream>>,
}

impl FakeTransport {
    pub fn with_devices(devices: Vec<Device>) -> Self {
        Self {
            devices: Mutex::new(devices),
            ..Default::default()
        }
    }

    pub fn set_screenshot_delay(&self, delay: Duration) {
        *self.screenshot_delay.lock().unwrap() = delay;
    }

    pub fn screenshot_calls(&self) -> usize {
        self.screenshot_calls.load(Ordering::SeqCst)
    }

    pub fn max_inflight(&self) -> usize {
        self.screenshot_max_inflight.load(Ordering::SeqCst)
    }

    /// Sender of the most recent stream opened for `device_id`.
    pub fn stream_for(&self, device_id: &str) -> mpsc::Sender<AgentEvent> {
        self.streams
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.device_id == device_id)
            .map(|s| s.events.clone())
            .unwrap_or_else(|| panic!("no stream opened for {device_id}"))
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.streams
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.text.clone())
            .collect()
    }
}

#[async_trait]
impl DeviceTransport for FakeTransport {
    async fn list_devices(&self) -> TransportResult<Vec<Device>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(TransportError::Http("connection refused".into()));
        }
        let devices = self.devices.lock().unwrap().clone();
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(devices)
    }

    async fn init_agent(&self, request: InitRequest) -> TransportResult<()> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(TransportError::Api {
                status: 500,
                message: "model endpoint unreachable".into(),
            });
        }
        let id = request.agent_config.device_id;
        for d in self.devices.lock().unwrap().iter_mut() {
            if d.id == id {
                d.is_initialized = true;
            }
        }
        Ok(())
    }

    async fn reset_chat(&self, device_id: &str) -> TransportResult<()> {
        self.reset_calls.lock().unwrap().push(device_id.to_string());
        if self.fail_reset.load(Ordering::SeqCst) {
            return Err(TransportError::Api {
                status: 404,
                message: format!("Device {device_id} not initialized"),
            });
        }
        Ok(())
    }

    async fn get_screenshot(&self, device_id: &str) -> TransportResult<Screenshot> {
        let n = self.screenshot_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.screenshot_inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.screenshot_max_inflight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.screenshot_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.screenshot_inflight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_screenshot.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("screencap failed".into()));
        }
        Ok(Screenshot {
            success: true,
            image: format!("{device_id}-{n}"),
            width: 1080,
            height: 2400,
            is_sensitive: false,
            error: None,
        })
    }

    async fn send_message_stream(
        &self,
        text: &str,
        device_id: &str,
    ) -> TransportResult<EventReceiver> {
        let delay = *self.send_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(TransportError::Http("connection reset".into()));
        }
        let (tx, rx) = mpsc::channel(32);
        self.streams.lock().unwrap().push(OpenedStream {
            device_id: device_id.to_string(),
            text: text.to_string(),
            events: tx,
        });
        Ok(rx)
    }

    async fn tap(&self, device_id: &str, x: i32, y: i32) -> TransportResult<()> {
        self.taps.lock().unwrap().push((device_id.to_string(), x, y));
        if self.fail_control.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("input tap failed".into()));
        }
        Ok(())
    }

    async fn swipe(&self, request: SwipeRequest) -> TransportResult<()> {
        self.swipes.lock().unwrap().push(request);
        if self.fail_control.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("input swipe failed".into()));
        }
        Ok(())
    }

    async fn reset_video(&self, device_id: &str) -> TransportResult<()> {
        self.video_resets.lock().unwrap().push(device_id.to_string());
        if self.fail_control.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("video streamer not running".into()));
        }
        Ok(())
    }
}
