//! Display-mode arbitration and the screenshot-polling fallback.
//!
//! The effective mode of a device is derived from its preference and the
//! sticky video-failure latch (see [`DeviceState::effective_mode`]). While
//! the selected device resolves to `Screenshot`, one polling loop fetches
//! screenshots on a fixed interval; it is stopped as soon as the mode
//! resolves to video again or another device is selected.
//!
//! [`DeviceState::effective_mode`]: crate::state::DeviceState::effective_mode

use crate::state::DeviceStatePatch;
use crate::store::{DeviceStore, StoreSnapshot};
use dashmap::DashMap;
use phonepilot_runtime::DeviceTransport;
use phonepilot_types::display::EffectiveMode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Shortest poll period; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// The running poll loop.
struct Poller {
    device_id: String,
    task: JoinHandle<()>,
}

/// Clears a fetch guard when the fetch ends, even if it is cancelled.
struct InflightGuard(Arc<AtomicBool>);

impl InflightGuard {
    /// Take the guard, or `None` if a fetch is already in flight.
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Decides between live video and screenshot polling for the selected device.
pub struct DisplayArbiter {
    store: DeviceStore,
    transport: Arc<dyn DeviceTransport>,
    interval: Duration,
    /// One fetch-in-progress flag per device.
    inflight: DashMap<String, Arc<AtomicBool>>,
    poller: Mutex<Option<Poller>>,
}

impl DisplayArbiter {
    pub fn new(store: DeviceStore, transport: Arc<dyn DeviceTransport>, interval: Duration) -> Self {
        Self {
            store,
            transport,
            interval: interval.max(MIN_INTERVAL),
            inflight: DashMap::new(),
            poller: Mutex::new(None),
        }
    }

    /// Device whose screenshots are currently being polled.
    pub fn polling_device(&self) -> Option<String> {
        self.lock_poller()
            .as_ref()
            .filter(|p| !p.task.is_finished())
            .map(|p| p.device_id.clone())
    }

    /// Start, keep or stop the poll loop for the current selection.
    pub fn reconcile(&self, selected: Option<&str>) {
        let wanted = selected.filter(|id| {
            self.store.get(id).effective_mode() == EffectiveMode::Screenshot
        });

        let mut poller = self.lock_poller();
        if let (Some(current), Some(id)) = (poller.as_ref(), wanted) {
            if current.device_id == id && !current.task.is_finished() {
                return;
            }
        }
        if let Some(old) = poller.take() {
            debug!(device_id = %old.device_id, "Stopping screenshot polling");
            old.task.abort();
        }
        if let Some(id) = wanted {
            info!(device_id = %id, interval_ms = self.interval.as_millis() as u64, "Starting screenshot polling");
            *poller = Some(Poller {
                device_id: id.to_string(),
                task: self.spawn_poll_loop(id.to_string()),
            });
        }
    }

    /// Stop polling regardless of the selection.
    pub fn stop(&self) {
        if let Some(old) = self.lock_poller().take() {
            debug!(device_id = %old.device_id, "Stopping screenshot polling");
            old.task.abort();
        }
    }

    /// Poll one screenshot now, unless a fetch for the device is in flight.
    ///
    /// Returns `false` when the tick was suppressed.
    pub async fn fetch_once(&self, device_id: &str) -> bool {
        let flag = self.guard_for(device_id);
        fetch_screenshot(&self.store, self.transport.as_ref(), &flag, device_id).await
    }

    /// Re-run [`reconcile`](Self::reconcile) whenever the store or the
    /// selection changes, until shutdown.
    pub fn spawn(
        self: Arc<Self>,
        mut store_rx: watch::Receiver<StoreSnapshot>,
        mut selected_rx: watch::Receiver<Option<String>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let initial = selected_rx.borrow_and_update().clone();
            self.reconcile(initial.as_deref());
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    changed = store_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        store_rx.borrow_and_update();
                    }
                    changed = selected_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let selected = selected_rx.borrow_and_update().clone();
                self.reconcile(selected.as_deref());
            }
            self.stop();
            debug!("Display arbiter stopped");
        })
    }

    fn guard_for(&self, device_id: &str) -> Arc<AtomicBool> {
        Arc::clone(
            self.inflight
                .entry(device_id.to_string())
                .or_insert_with(|| Arc::new(AtomicBool::new(false)))
                .value(),
        )
    }

    fn spawn_poll_loop(&self, device_id: String) -> JoinHandle<()> {
        let store = self.store.clone();
        let transport = Arc::clone(&self.transport);
        let flag = self.guard_for(&device_id);
        let period = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                // The first tick completes immediately.
                ticker.tick().await;
                let store = store.clone();
                let transport = Arc::clone(&transport);
                let flag = Arc::clone(&flag);
                let device_id = device_id.clone();
                tokio::spawn(async move {
                    fetch_screenshot(&store, transport.as_ref(), &flag, &device_id).await;
                });
            }
        })
    }

    fn lock_poller(&self) -> std::sync::MutexGuard<'_, Option<Poller>> {
        self.poller.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for DisplayArbiter {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn fetch_screenshot(
    store: &DeviceStore,
    transport: &dyn DeviceTransport,
    flag: &Arc<AtomicBool>,
    device_id: &str,
) -> bool {
    let Some(_guard) = InflightGuard::acquire(flag) else {
        debug!(device_id = %device_id, "Screenshot fetch still in flight, skipping tick");
        return false;
    };
    match transport.get_screenshot(device_id).await {
        Ok(shot) => {
            store.update(device_id, DeviceStatePatch::new().screenshot(Arc::new(shot)));
        }
        Err(e) => {
            // Keep showing the previous screenshot; the next tick retries.
            warn!(device_id = %device_id, error = %e, "Screenshot fetch failed");
        }
    }
    true
}
