//! Scripted in-memory adapter.
//!
//! Devices are plain [`MockDevice`] values held behind a mutex. Tests mutate them
//! between engine calls to simulate signal changes, dropped links, or a device that
//! stops answering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{AdapterControl, BluetoothError, BluetoothResult};
use crate::types::SignalObservation;

/// A simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDevice {
    /// Canonical address.
    pub address: String,
    /// Name returned by `resolve_name`.
    pub name: Option<String>,
    /// Name token attached to scan observations.
    pub advertised_name: Option<String>,
    /// One observation per entry is emitted during each scan window.
    pub scan_rssi: Vec<i16>,
    /// Value returned by `live_rssi`.
    pub live_rssi: Option<i16>,
    /// Whether the device shows up in scans at all.
    pub visible: bool,
    /// Link state.
    pub connected: bool,
    /// Bond state.
    pub paired: bool,
    /// `connect` brings the link up.
    pub accepts_connection: bool,
    /// `pair` creates a bond.
    pub accepts_pairing: bool,
    /// `disconnect` takes the link down.
    pub releases_connection: bool,
    /// Every call for this device fails.
    pub failing: bool,
    /// Every call for this device hangs forever.
    pub unresponsive: bool,
}

impl MockDevice {
    /// A visible, cooperative device with no signal readings.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            advertised_name: None,
            scan_rssi: Vec::new(),
            live_rssi: None,
            visible: true,
            connected: false,
            paired: false,
            accepts_connection: true,
            accepts_pairing: true,
            releases_connection: true,
            failing: false,
            unresponsive: false,
        }
    }

    /// Set both the resolved and the advertised name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.advertised_name = Some(name.clone());
        self.name = Some(name);
        self
    }

    /// Override only the name token seen in scan output.
    #[must_use]
    pub fn with_advertised_name(mut self, token: impl Into<String>) -> Self {
        self.advertised_name = Some(token.into());
        self
    }

    /// RSSI samples emitted per scan window.
    #[must_use]
    pub fn with_scan_rssi(mut self, samples: impl IntoIterator<Item = i16>) -> Self {
        self.scan_rssi = samples.into_iter().collect();
        self
    }

    /// RSSI reported by direct queries.
    #[must_use]
    pub const fn with_live_rssi(mut self, rssi: i16) -> Self {
        self.live_rssi = Some(rssi);
        self
    }

    /// Exclude from scan results.
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// `connect` reports success but the link never comes up.
    #[must_use]
    pub const fn refusing_connection(mut self) -> Self {
        self.accepts_connection = false;
        self
    }

    /// `pair` reports success but no bond is created.
    #[must_use]
    pub const fn refusing_pairing(mut self) -> Self {
        self.accepts_pairing = false;
        self
    }

    /// `disconnect` reports success but the link stays up.
    #[must_use]
    pub const fn keeping_connection(mut self) -> Self {
        self.releases_connection = false;
        self
    }
}

/// Holds one adapter call open until the test releases it.
#[derive(Debug, Default)]
pub struct QueryGate {
    entered: Notify,
    release: Notify,
}

impl QueryGate {
    /// Resolves once the held call has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Lets the held call finish.
    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

/// In-memory [`AdapterControl`] implementation.
#[derive(Debug, Default)]
pub struct MockAdapter {
    devices: Mutex<HashMap<String, MockDevice>>,
    scans: AtomicUsize,
    fail_scans: AtomicBool,
    link_gate: Mutex<Option<Arc<QueryGate>>>,
}

impl MockAdapter {
    /// An adapter with no devices in range.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An adapter preloaded with `devices`.
    #[must_use]
    pub fn with_devices(devices: impl IntoIterator<Item = MockDevice>) -> Self {
        let adapter = Self::new();
        for device in devices {
            adapter.add_device(device);
        }
        adapter
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MockDevice>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace a device.
    pub fn add_device(&self, device: MockDevice) {
        self.lock().insert(device.address.clone(), device);
    }

    /// Take a device out of range entirely.
    pub fn remove_device(&self, address: &str) -> Option<MockDevice> {
        self.lock().remove(address)
    }

    /// Snapshot of a device's current state.
    #[must_use]
    pub fn device(&self, address: &str) -> Option<MockDevice> {
        self.lock().get(address).cloned()
    }

    /// Mutate a device in place. Returns `false` if it does not exist.
    pub fn update(&self, address: &str, f: impl FnOnce(&mut MockDevice)) -> bool {
        self.lock().get_mut(address).map(f).is_some()
    }

    /// Change the directly queried RSSI.
    pub fn set_live_rssi(&self, address: &str, rssi: Option<i16>) {
        self.update(address, |d| d.live_rssi = rssi);
    }

    /// Force the link state, as if the device dropped or restored it on its own.
    pub fn set_connected(&self, address: &str, connected: bool) {
        self.update(address, |d| d.connected = connected);
    }

    /// Make every call for `address` fail.
    pub fn set_failing(&self, address: &str, failing: bool) {
        self.update(address, |d| d.failing = failing);
    }

    /// Make every call for `address` hang.
    pub fn set_unresponsive(&self, address: &str, unresponsive: bool) {
        self.update(address, |d| d.unresponsive = unresponsive);
    }

    /// Make discovery itself fail.
    pub fn set_scan_failure(&self, fail: bool) {
        self.fail_scans.store(fail, Ordering::SeqCst);
    }

    /// Hold the next `is_connected` call, whichever device it is for, until released.
    /// Later calls are not affected.
    pub fn hold_next_link_query(&self) -> Arc<QueryGate> {
        let gate = Arc::new(QueryGate::default());
        *self.link_gate.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&gate));
        gate
    }

    /// Number of scan windows run so far.
    #[must_use]
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Returns whether the call should hang.
    fn check(&self, operation: &'static str, address: &str) -> BluetoothResult<bool> {
        let devices = self.lock();
        let device = devices
            .get(address)
            .ok_or_else(|| BluetoothError::DeviceNotFound {
                address: address.to_string(),
            })?;
        if device.failing {
            return Err(BluetoothError::OperationFailed {
                operation,
                address: address.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(device.unresponsive)
    }

    async fn enter(&self, operation: &'static str, address: &str) -> BluetoothResult<()> {
        if self.check(operation, address)? {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn read<T>(&self, address: &str, f: impl FnOnce(&MockDevice) -> T) -> BluetoothResult<T> {
        self.lock()
            .get(address)
            .map(f)
            .ok_or_else(|| BluetoothError::DeviceNotFound {
                address: address.to_string(),
            })
    }
}

#[async_trait]
impl AdapterControl for MockAdapter {
    async fn scan_window(&self, _window: Duration) -> BluetoothResult<Vec<SignalObservation>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if self.fail_scans.load(Ordering::SeqCst) {
            return Err(BluetoothError::DiscoveryFailed {
                message: "injected failure".to_string(),
            });
        }

        let devices = self.lock();
        let mut visible: Vec<&MockDevice> = devices.values().filter(|d| d.visible).collect();
        visible.sort_by(|a, b| a.address.cmp(&b.address));

        let mut observations = Vec::new();
        for device in visible {
            if device.scan_rssi.is_empty() {
                observations.push(SignalObservation::new(
                    device.address.clone(),
                    None,
                    device.advertised_name.clone(),
                ));
            }
            for &rssi in &device.scan_rssi {
                observations.push(SignalObservation::new(
                    device.address.clone(),
                    Some(rssi),
                    device.advertised_name.clone(),
                ));
            }
        }
        Ok(observations)
    }

    async fn live_rssi(&self, address: &str) -> BluetoothResult<Option<i16>> {
        self.enter("rssi", address).await?;
        self.read(address, |d| d.live_rssi)
    }

    async fn is_connected(&self, address: &str) -> BluetoothResult<bool> {
        let gate = self
            .link_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.enter("is_connected", address).await?;
        self.read(address, |d| d.connected)
    }

    async fn is_paired(&self, address: &str) -> BluetoothResult<bool> {
        self.enter("is_paired", address).await?;
        self.read(address, |d| d.paired)
    }

    async fn resolve_name(&self, address: &str) -> BluetoothResult<Option<String>> {
        self.enter("name", address).await?;
        self.read(address, |d| d.name.clone())
    }

    async fn pair(&self, address: &str) -> BluetoothResult<()> {
        self.enter("pair", address).await?;
        self.update(address, |d| {
            if d.accepts_pairing {
                d.paired = true;
            }
        });
        Ok(())
    }

    async fn connect(&self, address: &str) -> BluetoothResult<()> {
        self.enter("connect", address).await?;
        self.update(address, |d| {
            if d.accepts_connection {
                d.connected = true;
                d.paired = true;
            }
        });
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> BluetoothResult<()> {
        self.enter("disconnect", address).await?;
        self.update(address, |d| {
            if d.releases_connection {
                d.connected = false;
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    const ADDR: &str = "AA:BB:CC:DD:EE:01";

    #[tokio::test]
    async fn test_scan_emits_one_observation_per_sample() {
        let adapter = MockAdapter::with_devices([
            MockDevice::new(ADDR).with_name("Pixel").with_scan_rssi([-60, -62]),
            MockDevice::new("AA:BB:CC:DD:EE:02").hidden(),
        ]);

        let observations = adapter.scan_window(Duration::from_secs(1)).await.unwrap();
        assert_eq!(observations.len(), 2);
        assert!(observations.iter().all(|o| o.address == ADDR));
        assert_eq!(adapter.scan_count(), 1);
    }

    #[tokio::test]
    async fn test_silent_device_still_reported() {
        let adapter = MockAdapter::with_devices([MockDevice::new(ADDR)]);
        let observations = adapter.scan_window(Duration::from_secs(1)).await.unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].rssi, None);
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let adapter = MockAdapter::with_devices([MockDevice::new(ADDR)]);

        assert_ok!(adapter.connect(ADDR).await);
        assert!(adapter.is_connected(ADDR).await.unwrap());
        assert!(adapter.is_paired(ADDR).await.unwrap());

        assert_ok!(adapter.disconnect(ADDR).await);
        assert!(!adapter.is_connected(ADDR).await.unwrap());
    }

    #[tokio::test]
    async fn test_refusing_device_reports_ok_but_stays_down() {
        let adapter = MockAdapter::with_devices([MockDevice::new(ADDR).refusing_connection()]);
        adapter.connect(ADDR).await.unwrap();
        assert!(!adapter.is_connected(ADDR).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_and_failing_devices() {
        let adapter = MockAdapter::with_devices([MockDevice::new(ADDR)]);
        assert!(matches!(
            adapter.live_rssi("AA:BB:CC:DD:EE:99").await,
            Err(BluetoothError::DeviceNotFound { .. })
        ));

        adapter.set_failing(ADDR, true);
        assert!(matches!(
            adapter.is_connected(ADDR).await,
            Err(BluetoothError::OperationFailed { operation: "is_connected", .. })
        ));
    }

    #[tokio::test]
    async fn test_held_link_query_only_blocks_once() {
        let adapter = MockAdapter::with_devices([MockDevice::new(ADDR)]);
        let gate = adapter.hold_next_link_query();

        let (held, ()) = tokio::join!(adapter.is_connected(ADDR), async {
            gate.entered().await;
            assert_ok!(adapter.connect(ADDR).await);
            assert!(adapter.is_connected(ADDR).await.unwrap());
            gate.release();
        });
        assert!(held.unwrap());
    }

    #[tokio::test]
    async fn test_scan_failure_injection() {
        let adapter = MockAdapter::new();
        adapter.set_scan_failure(true);
        assert_err!(adapter.scan_window(Duration::from_secs(1)).await);
    }
}
