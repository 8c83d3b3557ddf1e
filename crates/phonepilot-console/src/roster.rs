//! Periodic device list refresh.

use crate::store::DeviceStore;
use phonepilot_runtime::DeviceTransport;
use phonepilot_types::device::Device;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shortest refresh period; `tokio::time::interval` rejects zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// The last known device list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterSnapshot {
    pub devices: Vec<Device>,
    /// Error of the most recent refresh, if it failed.
    pub error: Option<String>,
}

/// Keeps the device list fresh and picks a device when none is selected.
pub struct DeviceRoster {
    transport: Arc<dyn DeviceTransport>,
    store: DeviceStore,
    selected: Arc<watch::Sender<Option<String>>>,
    tx: watch::Sender<RosterSnapshot>,
}

impl DeviceRoster {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        store: DeviceStore,
        selected: Arc<watch::Sender<Option<String>>>,
    ) -> Self {
        let (tx, _rx) = watch::channel(RosterSnapshot::default());
        Self {
            transport,
            store,
            selected,
            tx,
        }
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RosterSnapshot> {
        self.tx.subscribe()
    }

    /// Fetch the device list once.
    ///
    /// On failure the previous list is kept and the error recorded. The
    /// first online device is auto-selected only while nothing is selected.
    ///
    /// The server's `is_initialized` flag only ever raises the local one: a
    /// list fetched before a local init finished must not undo it.
    pub async fn refresh(&self) -> RosterSnapshot {
        match self.transport.list_devices().await {
            Ok(devices) => {
                for device in devices.iter().filter(|d| d.is_initialized) {
                    self.store.update_if(&device.id, |state| {
                        if state.initialized {
                            return false;
                        }
                        state.initialized = true;
                        true
                    });
                }
                if let Some(first) = devices.iter().find(|d| d.is_online()) {
                    let first = first.id.clone();
                    self.selected.send_if_modified(|selected| {
                        if selected.is_some() {
                            return false;
                        }
                        info!(device_id = %first, "Auto-selecting device");
                        *selected = Some(first);
                        true
                    });
                }
                debug!(count = devices.len(), "Device list refreshed");
                self.tx.send_modify(|snap| {
                    snap.devices = devices;
                    snap.error = None;
                });
            }
            Err(e) => {
                warn!(error = %e, "Device list refresh failed");
                self.tx.send_modify(|snap| snap.error = Some(e.to_string()));
            }
        }
        self.snapshot()
    }

    /// Refresh every `period` until shutdown. The first refresh is immediate.
    pub fn spawn(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = period.max(MIN_PERIOD);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        self.refresh().await;
                    }
                }
            }
            debug!("Device roster stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device, FakeTransport};
    use std::sync::atomic::Ordering;

    fn roster(fake: &Arc<FakeTransport>) -> (DeviceStore, Arc<watch::Sender<Option<String>>>, Arc<DeviceRoster>) {
        let store = DeviceStore::new();
        let (selected, _) = watch::channel(None);
        let selected = Arc::new(selected);
        let transport: Arc<dyn DeviceTransport> = fake.clone();
        let roster = Arc::new(DeviceRoster::new(transport, store.clone(), Arc::clone(&selected)));
        (store, selected, roster)
    }

    #[tokio::test]
    async fn first_device_is_auto_selected() {
        let fake = Arc::new(FakeTransport::with_devices(vec![
            device("D1", false),
            device("D2", true),
        ]));
        let (store, selected, roster) = roster(&fake);
        let snap = roster.refresh().await;
        assert_eq!(snap.devices.len(), 2);
        assert_eq!(selected.borrow().as_deref(), Some("D1"));
        assert!(store.get("D2").initialized);
        assert!(!store.get("D1").initialized);
    }

    #[tokio::test]
    async fn existing_selection_is_never_overridden() {
        let fake = Arc::new(FakeTransport::with_devices(vec![device("D1", false)]));
        let (_store, selected, roster) = roster(&fake);
        selected.send_replace(Some("D9".to_string()));
        roster.refresh().await;
        assert_eq!(selected.borrow().as_deref(), Some("D9"));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_list() {
        let fake = Arc::new(FakeTransport::with_devices(vec![device("D1", false)]));
        let (_store, _selected, roster) = roster(&fake);
        roster.refresh().await;

        fake.fail_list.store(true, Ordering::SeqCst);
        let snap = roster.refresh().await;
        assert_eq!(snap.devices.len(), 1);
        assert!(snap.error.as_deref().unwrap().contains("connection refused"));

        fake.fail_list.store(false, Ordering::SeqCst);
        assert!(roster.refresh().await.error.is_none());
    }

    #[tokio::test]
    async fn unchanged_flags_do_not_publish() {
        let fake = Arc::new(FakeTransport::with_devices(vec![device("D1", false)]));
        let (store, _selected, roster) = roster(&fake);
        roster.refresh().await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn offline_devices_are_not_auto_selected() {
        let mut offline = device("D1", false);
        offline.status = "offline".to_string();
        let fake = Arc::new(FakeTransport::with_devices(vec![offline, device("D2", false)]));
        let (_store, selected, roster) = roster(&fake);
        roster.refresh().await;
        assert_eq!(selected.borrow().as_deref(), Some("D2"));
    }

    #[tokio::test]
    async fn nothing_selected_while_all_devices_offline() {
        let mut offline = device("D1", false);
        offline.status = "unauthorized".to_string();
        let fake = Arc::new(FakeTransport::with_devices(vec![offline]));
        let (_store, selected, roster) = roster(&fake);
        let snap = roster.refresh().await;
        assert_eq!(snap.devices.len(), 1);
        assert!(selected.borrow().is_none());
    }

    #[tokio::test]
    async fn server_flag_never_lowers_local_init() {
        let fake = Arc::new(FakeTransport::with_devices(vec![device("D1", false)]));
        let (store, _selected, roster) = roster(&fake);
        store.update_with("D1", |state| state.initialized = true);
        roster.refresh().await;
        assert!(store.get("D1").initialized);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_still_refreshes() {
        let fake = Arc::new(FakeTransport::with_devices(vec![device("D1", false)]));
        let (_store, selected, roster) = roster(&fake);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = Arc::clone(&roster).spawn(Duration::ZERO, shutdown_rx);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(fake.list_calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(selected.borrow().as_deref(), Some("D1"));

        shutdown_tx.send_replace(true);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_on_interval_until_shutdown() {
        let fake = Arc::new(FakeTransport::with_devices(vec![device("D1", false)]));
        let (_store, _selected, roster) = roster(&fake);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = Arc::clone(&roster).spawn(Duration::from_secs(3), shutdown_rx);

        tokio::time::sleep(Duration::from_millis(6500)).await;
        // t = 0, 3 s and 6 s.
        assert_eq!(fake.list_calls.load(Ordering::SeqCst), 3);

        shutdown_tx.send_replace(true);
        task.await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fake.list_calls.load(Ordering::SeqCst), 3);
    }
}
