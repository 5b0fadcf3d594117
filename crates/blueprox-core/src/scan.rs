//! Scan aggregation.
//!
//! A scan window yields a burst of [`SignalObservation`]s, several per device. They are
//! folded into one [`ScanSummary`] per address: the RSSI samples inside the trusted
//! range and the best name token seen. [`ProximityEngine::scan`] then fills the gaps
//! with adapter lookups and pushes each device through its filter.

use std::collections::BTreeMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::distance::in_trusted_range;
use crate::engine::{publishable, ProximityEngine};
use crate::types::{DeviceRecord, Observation, SignalObservation};

/// Property-change lines that some adapters surface in the name slot.
static LEAKED_METADATA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(RSSI:|Connected|ServiceResolved|Paired:|TxPower|[+-]?\d+)")
        .expect("metadata regex is valid")
});

/// Returns `true` if `token` is adapter metadata rather than a device name.
#[must_use]
pub fn is_leaked_metadata(token: &str) -> bool {
    LEAKED_METADATA.is_match(token.trim())
}

/// Whether a name token is unusable and must be resolved through the adapter.
#[must_use]
pub fn needs_name_resolution(token: Option<&str>) -> bool {
    token.map_or(true, |t| {
        let t = t.trim();
        t.is_empty() || t.eq_ignore_ascii_case("unknown") || is_leaked_metadata(t)
    })
}

/// Median of `samples`, truncated toward zero for even counts.
///
/// # Examples
///
/// ```
/// use blueprox_core::scan::median_rssi;
///
/// assert_eq!(median_rssi(&[-60, -62, -58]), Some(-60));
/// assert_eq!(median_rssi(&[-60, -61]), Some(-60));
/// assert_eq!(median_rssi(&[]), None);
/// ```
#[must_use]
pub fn median_rssi(samples: &[i16]) -> Option<i16> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        return Some(sorted[mid]);
    }
    let sum = i32::from(sorted[mid - 1]) + i32::from(sorted[mid]);
    // Integer division truncates toward zero and the mean of two i16 fits in i16.
    i16::try_from(sum / 2).ok()
}

/// Everything one scan window saw of a single device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Canonical address.
    pub address: String,
    /// RSSI samples inside the trusted range, in arrival order.
    pub samples: Vec<i16>,
    /// Last usable name token, if any event carried one.
    pub name: Option<String>,
}

impl ScanSummary {
    /// Median of the collected samples.
    #[must_use]
    pub fn median_rssi(&self) -> Option<i16> {
        median_rssi(&self.samples)
    }
}

/// Group observations by address, sorted by address.
///
/// Samples outside the trusted range are dropped here. A device that only produced
/// out-of-range or RSSI-less events still gets a summary with no samples.
#[must_use]
pub fn aggregate(observations: &[SignalObservation]) -> Vec<ScanSummary> {
    let mut summaries: BTreeMap<String, ScanSummary> = BTreeMap::new();

    for observation in observations {
        let address = observation.address.trim().to_ascii_uppercase();
        let summary = summaries
            .entry(address.clone())
            .or_insert_with(|| ScanSummary {
                address,
                ..ScanSummary::default()
            });

        if let Some(rssi) = observation.rssi.filter(|&r| in_trusted_range(r)) {
            summary.samples.push(rssi);
        }
        if let Some(name) = observation
            .name
            .as_deref()
            .filter(|n| !needs_name_resolution(Some(*n)))
        {
            summary.name = Some(name.trim().to_string());
        }
    }

    summaries.into_values().collect()
}

/// Adapter-side facts gathered for one scanned device before the state lock is taken.
struct Sighting {
    address: String,
    name: String,
    median_rssi: Option<i16>,
    live_rssi: Option<i16>,
    connected: bool,
    paired: bool,
}

impl ProximityEngine {
    /// Run one discovery window of the configured length.
    pub async fn scan(&self) -> Vec<DeviceRecord> {
        self.scan_for(self.config().scan_window()).await
    }

    /// Run one discovery window of length `window` and rebuild the discovered view.
    ///
    /// Returns the devices seen in this window plus any connected devices that were
    /// not, sorted by address. Discovery failures yield an empty window rather than an
    /// error, so connected devices are still returned.
    pub async fn scan_for(&self, window: Duration) -> Vec<DeviceRecord> {
        let span = info_span!("scan", window_secs = window.as_secs());
        self.scan_inner(window).instrument(span).await
    }

    async fn scan_inner(&self, window: Duration) -> Vec<DeviceRecord> {
        self.state.lock().await.registry.clear_discovered();

        let budget = window + self.config().query_timeout();
        let window_call = self.adapter().scan_window(window);
        let observations = match tokio::time::timeout(budget, window_call).await {
            Ok(Ok(observations)) => observations,
            Ok(Err(err)) => {
                warn!(error = %err, "Scan window failed");
                Vec::new()
            }
            Err(_) => {
                warn!("Scan window overran");
                Vec::new()
            }
        };

        let summaries = aggregate(&observations);
        debug!(
            observations = observations.len(),
            devices = summaries.len(),
            "Scan window aggregated"
        );

        let mut sightings = Vec::with_capacity(summaries.len());
        for summary in summaries {
            sightings.push(self.inspect(summary).await);
        }

        let mut state = self.state.lock().await;
        // An overlapping scan may have written its window since the clear above.
        state.registry.clear_discovered();
        let mut results = Vec::with_capacity(sightings.len());
        for sighting in sightings {
            let rssi = state.remember_rssi(
                &sighting.address,
                sighting.median_rssi.or(sighting.live_rssi),
            );
            let raw = Observation::from(self.distance_for(rssi));
            let distance = state.filters.update(&sighting.address, raw);

            let record = DeviceRecord {
                address: sighting.address,
                name: sighting.name,
                rssi_dbm: rssi,
                distance_m: publishable(distance),
                connected: sighting.connected,
                paired: sighting.paired,
                tx_power_dbm: self.config().reference_tx_power,
            };
            state.registry.upsert_discovered(record.clone());
            results.push(record);
        }

        let carried: Vec<DeviceRecord> = state
            .registry
            .connected_snapshot()
            .into_iter()
            .filter(|c| !results.iter().any(|r| r.address == c.address))
            .collect();
        drop(state);
        results.extend(carried);

        results.sort_by(|a, b| a.address.cmp(&b.address));
        info!(devices = results.len(), "Scan complete");
        results
    }

    async fn inspect(&self, summary: ScanSummary) -> Sighting {
        let address = summary.address.as_str();
        let median_rssi = summary.median_rssi();
        let live_rssi = if median_rssi.is_none() {
            self.live_rssi(address).await
        } else {
            None
        };
        let name = self.display_name(address, summary.name.as_deref()).await;
        let connected = self
            .query("is_connected", address, self.adapter().is_connected(address))
            .await
            .unwrap_or(false);
        let paired = self
            .query("is_paired", address, self.adapter().is_paired(address))
            .await
            .unwrap_or(false);

        Sighting {
            address: summary.address,
            name,
            median_rssi,
            live_rssi,
            connected,
            paired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::MockDevice;
    use crate::engine::tests::{engine_with, ADDR};

    const OTHER: &str = "AA:BB:CC:DD:EE:02";

    fn obs(address: &str, rssi: Option<i16>, name: Option<&str>) -> SignalObservation {
        SignalObservation::new(address, rssi, name.map(str::to_string))
    }

    #[test]
    fn test_leaked_metadata() {
        for token in [
            "RSSI: -60",
            "Connected: yes",
            "ServiceResolved: yes",
            "Paired: no",
            "TxPower: 4",
            "-72",
            "+3",
            "1234",
        ] {
            assert!(is_leaked_metadata(token), "{token}");
        }
        assert!(!is_leaked_metadata("Pixel 8"));
        assert!(!is_leaked_metadata("Jabra Elite"));
    }

    #[test]
    fn test_needs_name_resolution() {
        assert!(needs_name_resolution(None));
        assert!(needs_name_resolution(Some("")));
        assert!(needs_name_resolution(Some("  ")));
        assert!(needs_name_resolution(Some("Unknown")));
        assert!(needs_name_resolution(Some("RSSI: -48")));
        assert!(!needs_name_resolution(Some("Galaxy Buds")));
    }

    #[test]
    fn test_median() {
        assert_eq!(median_rssi(&[-60, -62, -58]), Some(-60));
        assert_eq!(median_rssi(&[-70]), Some(-70));
        assert_eq!(median_rssi(&[-60, -61, -90, -59]), Some(-60));
        assert_eq!(median_rssi(&[-61, -62]), Some(-61));
    }

    #[test]
    fn test_aggregate_groups_and_filters() {
        let observations = [
            obs(ADDR, Some(-60), Some("Pixel 8")),
            obs("aa:bb:cc:dd:ee:01", Some(-62), Some("RSSI: -62")),
            obs(ADDR, Some(-100), None),
            obs(ADDR, Some(0), None),
            obs(ADDR, Some(-58), None),
            obs(OTHER, None, Some("unknown")),
        ];

        let summaries = aggregate(&observations);
        assert_eq!(summaries.len(), 2);

        assert_eq!(summaries[0].address, ADDR);
        assert_eq!(summaries[0].samples, [-60, -62, -58]);
        assert_eq!(summaries[0].name.as_deref(), Some("Pixel 8"));
        assert_eq!(summaries[0].median_rssi(), Some(-60));

        assert_eq!(summaries[1].address, OTHER);
        assert!(summaries[1].samples.is_empty());
        assert_eq!(summaries[1].name, None);
    }

    #[tokio::test]
    async fn test_scan_publishes_filtered_distance() {
        let (_adapter, engine) = engine_with([MockDevice::new(ADDR)
            .with_name("Pixel 8")
            .with_scan_rssi([-60, -62, -58])]);

        let devices = engine.scan().await;
        assert_eq!(devices.len(), 1);
        let record = &devices[0];
        assert_eq!(record.rssi_dbm, Some(-60));
        assert_eq!(record.name, "Pixel 8");
        // 10^((-59 + 60) / 25) = 1.096 m
        assert_eq!(record.distance_m, Some(1.1));
        assert!(!record.connected);
        assert_eq!(engine.list_all().await, devices);
    }

    #[tokio::test]
    async fn test_scan_carries_over_connected_device() {
        let (adapter, engine) = engine_with([
            MockDevice::new(ADDR).with_scan_rssi([-60, -62, -58]),
            MockDevice::new(OTHER).with_name("Headset").with_live_rssi(-70),
        ]);

        assert!(engine.connect(OTHER).await);
        adapter.update(OTHER, |d| {
            d.visible = false;
            d.live_rssi = None;
        });

        let devices = engine.scan().await;
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].address, ADDR);
        assert_eq!(devices[0].rssi_dbm, Some(-60));

        let carried = &devices[1];
        assert_eq!(carried.address, OTHER);
        assert_eq!(carried.rssi_dbm, Some(-70));
        assert!(carried.connected);
        assert_eq!(carried.name, "Headset");
    }

    #[tokio::test]
    async fn test_scan_without_samples_uses_live_then_cache() {
        let (adapter, engine) = engine_with([MockDevice::new(ADDR).with_live_rssi(-65)]);

        let first = engine.scan().await;
        assert_eq!(first[0].rssi_dbm, Some(-65));
        // Name falls back to the address when nothing resolves.
        assert_eq!(first[0].name, ADDR);

        adapter.set_live_rssi(ADDR, None);
        let second = engine.scan().await;
        assert_eq!(second[0].rssi_dbm, Some(-65));
        assert_eq!(second[0].distance_m, first[0].distance_m);
    }

    #[tokio::test]
    async fn test_scan_resolves_leaked_name() {
        let (_adapter, engine) = engine_with([MockDevice::new(ADDR)
            .with_name("Watch")
            .with_advertised_name("RSSI: -61")
            .with_scan_rssi([-61])]);

        let devices = engine.scan().await;
        assert_eq!(devices[0].name, "Watch");
    }

    #[tokio::test]
    async fn test_scan_rebuilds_discovered_view() {
        let (adapter, engine) = engine_with([
            MockDevice::new(ADDR).with_scan_rssi([-60]),
            MockDevice::new(OTHER).with_scan_rssi([-75]),
        ]);

        assert_eq!(engine.scan().await.len(), 2);
        adapter.remove_device(OTHER);
        let devices = engine.scan().await;
        assert_eq!(devices.len(), 1);
        assert_eq!(engine.list_all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_scans_leave_one_window_in_view() {
        let (adapter, engine) = engine_with([MockDevice::new(ADDR).with_scan_rssi([-60])]);

        // The first scan stalls in its per-device queries while a second one runs.
        let gate = adapter.hold_next_link_query();
        let (first, second) = tokio::join!(engine.scan(), async {
            gate.entered().await;
            adapter.remove_device(ADDR);
            adapter.add_device(MockDevice::new(OTHER).with_scan_rssi([-75]));
            let second = engine.scan().await;
            gate.release();
            second
        });

        assert_eq!(second.len(), 1);
        assert_eq!(second[0].address, OTHER);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].address, ADDR);
        assert_eq!(engine.list_all().await, first);
    }

    #[tokio::test]
    async fn test_scan_failure_returns_connected_only() {
        let (adapter, engine) = engine_with([MockDevice::new(ADDR).with_live_rssi(-55)]);
        assert!(engine.connect(ADDR).await);

        adapter.set_scan_failure(true);
        let devices = engine.scan().await;
        assert_eq!(devices.len(), 1);
        assert!(devices[0].connected);
    }

    #[tokio::test]
    async fn test_out_of_range_samples_yield_no_distance() {
        let (_adapter, engine) = engine_with([MockDevice::new(ADDR).with_scan_rssi([-100, -104])]);

        let devices = engine.scan().await;
        assert_eq!(devices[0].rssi_dbm, None);
        assert_eq!(devices[0].distance_m, None);
    }
}
