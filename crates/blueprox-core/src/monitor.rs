//! Periodic refresh of connected devices.
//!
//! Every tick walks a snapshot of the connected view and, per device, reads the live
//! RSSI (falling back to the cache), runs it through the distance model and the filter,
//! and writes back signal, distance and link state. Devices are never removed here;
//! only an explicit disconnect does that.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, info_span, Instrument};

use crate::engine::{publishable, ProximityEngine};
use crate::types::Observation;

impl ProximityEngine {
    /// Refresh every connected device once. Returns how many records were updated.
    ///
    /// A device whose queries fail or time out keeps its cached RSSI and link flag, and
    /// the remaining devices are still processed.
    pub async fn monitor_tick(&self) -> usize {
        let addresses = self.state.lock().await.registry.connected_addresses();
        let mut refreshed = 0;
        for address in &addresses {
            if self.refresh_connected(address).await {
                refreshed += 1;
            }
        }
        refreshed
    }

    async fn refresh_connected(&self, address: &str) -> bool {
        let live = self.live_rssi(address).await;
        let link = self
            .query("is_connected", address, self.adapter().is_connected(address))
            .await;

        let mut state = self.state.lock().await;
        // Disconnected while the queries were in flight.
        if !state.registry.is_connected(address) {
            return false;
        }

        let rssi = state.remember_rssi(address, live);
        let raw = self
            .distance_for(rssi)
            .or_else(|| state.filters.last_raw_distance(address));
        let distance = state.filters.update(address, Observation::from(raw));
        let tx_power = self.config().reference_tx_power;

        let Some(record) = state.registry.connected_mut(address) else {
            return false;
        };
        record.rssi_dbm = rssi;
        record.distance_m = publishable(distance);
        record.tx_power_dbm = tx_power;
        if let Some(link) = link {
            record.connected = link;
        }
        debug!(%address, rssi = ?rssi, distance = ?distance, link = ?link, "Refreshed");
        true
    }

    /// Start the monitor loop on the current runtime.
    ///
    /// The first tick fires immediately. Slow ticks push the schedule back instead of
    /// bursting to catch up. Abort the returned handle to stop the loop.
    pub fn spawn_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = engine.config().monitor_interval();
        info!(interval_secs = period.as_secs(), "Starting connected-device monitor");

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut tick: u64 = 0;
            loop {
                ticker.tick().await;
                tick += 1;
                let refreshed = engine
                    .monitor_tick()
                    .instrument(info_span!("monitor_tick", tick))
                    .await;
                if refreshed > 0 {
                    debug!(tick, refreshed, "Monitor tick complete");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bluetooth::{MockAdapter, MockDevice};
    use crate::engine::tests::{engine_with, fast_config, ADDR};

    const OTHER: &str = "AA:BB:CC:DD:EE:02";

    #[tokio::test]
    async fn test_tick_without_connections() {
        let (_adapter, engine) = engine_with([MockDevice::new(ADDR).with_live_rssi(-60)]);
        assert_eq!(engine.monitor_tick().await, 0);
    }

    #[tokio::test]
    async fn test_tick_moves_estimate_toward_new_signal() {
        let (adapter, engine) = engine_with([MockDevice::new(ADDR).with_live_rssi(-59)]);
        assert!(engine.connect(ADDR).await);

        // -69 dBm is about 2.51 m.
        adapter.set_live_rssi(ADDR, Some(-69));
        assert_eq!(engine.monitor_tick().await, 1);

        let record = &engine.connected_devices().await[0];
        assert_eq!(record.rssi_dbm, Some(-69));
        let distance = record.distance_m.unwrap();
        assert!(distance > 1.0 && distance < 2.52, "got {distance}");
    }

    #[tokio::test]
    async fn test_out_of_range_live_rssi_keeps_previous_reading() {
        let (adapter, engine) = engine_with([MockDevice::new(ADDR).with_live_rssi(-69)]);
        assert!(engine.connect(ADDR).await);
        let before = engine.connected_devices().await[0].clone();
        assert_eq!(before.distance_m, Some(2.51));

        for bogus in [20, -100, -120] {
            adapter.set_live_rssi(ADDR, Some(bogus));
            assert_eq!(engine.monitor_tick().await, 1);

            let record = &engine.connected_devices().await[0];
            assert_eq!(record.rssi_dbm, Some(-69), "live reading {bogus}");
            assert_eq!(record.distance_m, before.distance_m, "live reading {bogus}");
        }

        let state = engine.state.lock().await;
        assert_eq!(state.cached_rssi(ADDR), Some(-69));
    }

    #[tokio::test]
    async fn test_tick_survives_failing_device() {
        let (adapter, engine) = engine_with([
            MockDevice::new(ADDR).with_live_rssi(-60),
            MockDevice::new(OTHER).with_live_rssi(-70),
        ]);
        assert!(engine.connect(ADDR).await);
        assert!(engine.connect(OTHER).await);

        adapter.set_failing(ADDR, true);
        adapter.set_live_rssi(OTHER, Some(-72));
        assert_eq!(engine.monitor_tick().await, 2);

        let devices = engine.connected_devices().await;
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].rssi_dbm, Some(-60));
        assert!(devices[0].connected);
        assert_eq!(devices[1].rssi_dbm, Some(-72));
    }

    #[tokio::test]
    async fn test_dropped_link_stays_tracked() {
        let (adapter, engine) = engine_with([MockDevice::new(ADDR).with_live_rssi(-60)]);
        assert!(engine.connect(ADDR).await);

        adapter.set_connected(ADDR, false);
        adapter.set_live_rssi(ADDR, None);
        engine.monitor_tick().await;

        let devices = engine.connected_devices().await;
        assert_eq!(devices.len(), 1);
        assert!(!devices[0].connected);
        assert_eq!(devices[0].rssi_dbm, Some(-60));
        assert!(devices[0].distance_m.is_some());
    }

    #[tokio::test]
    async fn test_disconnect_during_refresh_is_not_undone() {
        let (adapter, engine) = engine_with([MockDevice::new(ADDR).with_live_rssi(-60)]);
        assert!(engine.connect(ADDR).await);

        adapter.set_live_rssi(ADDR, Some(-75));
        let gate = adapter.hold_next_link_query();
        let (refreshed, disconnected) = tokio::join!(engine.refresh_connected(ADDR), async {
            gate.entered().await;
            let disconnected = engine.disconnect(ADDR).await;
            gate.release();
            disconnected
        });

        assert!(disconnected);
        assert!(!refreshed);
        assert!(engine.connected_devices().await.is_empty());
        assert!(engine.list_all().await.is_empty());

        let state = engine.state.lock().await;
        assert_eq!(state.filters.get(ADDR).unwrap().updates(), 1);
        assert_eq!(state.cached_rssi(ADDR), Some(-60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_ticks_on_interval() {
        let adapter = Arc::new(MockAdapter::with_devices([
            MockDevice::new(ADDR).with_live_rssi(-59)
        ]));
        let engine = Arc::new(ProximityEngine::new(adapter.clone(), &fast_config()));
        assert!(engine.connect(ADDR).await);

        let handle = engine.spawn_monitor();
        tokio::time::sleep(Duration::from_secs(11)).await;
        handle.abort();

        let state = engine.state.lock().await;
        // One update from connect, then ticks at 0 s, 5 s and 10 s.
        assert!(state.filters.get(ADDR).unwrap().updates() >= 3);
    }
}
