//! The proximity engine.
//!
//! [`ProximityEngine`] owns the device registry, the filter bank and the last-known RSSI
//! cache behind one async mutex, plus a handle to the adapter. Adapter I/O always runs
//! outside the lock; each device's read-filter-write sequence runs inside a single
//! critical section so concurrent scans, monitor ticks and API calls never interleave
//! filter updates for the same device.
//!
//! Scanning lives in [`crate::scan`] and the periodic refresh in [`crate::monitor`];
//! both are further `impl ProximityEngine` blocks.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use crate::bluetooth::{canonical_address, AdapterControl, BluetoothResult};
use crate::config::{Config, EngineConfig};
use crate::distance::{estimate_distance_with, in_trusted_range};
use crate::filter::FilterBank;
use crate::registry::Registry;
use crate::scan::needs_name_resolution;
use crate::types::{DeviceRecord, Observation};

/// Mutable engine state guarded by [`ProximityEngine`]'s mutex.
#[derive(Debug, Default)]
pub struct EngineState {
    pub(crate) registry: Registry,
    pub(crate) filters: FilterBank,
    last_rssi: HashMap<String, i16>,
}

impl EngineState {
    fn new(filters: FilterBank) -> Self {
        Self {
            registry: Registry::new(),
            filters,
            last_rssi: HashMap::new(),
        }
    }

    /// Record a fresh reading, or fall back to the cached one when `live` is absent.
    pub(crate) fn remember_rssi(&mut self, address: &str, live: Option<i16>) -> Option<i16> {
        let rssi = Observation::from(live)
            .or_cached(self.cached_rssi(address))
            .into_option();
        if let Some(rssi) = rssi {
            self.last_rssi.insert(address.to_string(), rssi);
        }
        rssi
    }

    /// Last RSSI seen for `address` from any source.
    #[must_use]
    pub fn cached_rssi(&self, address: &str) -> Option<i16> {
        self.last_rssi.get(address).copied()
    }
}

/// Smoothed proximity tracking for every device in range.
pub struct ProximityEngine {
    adapter: Arc<dyn AdapterControl>,
    config: EngineConfig,
    pub(crate) state: Mutex<EngineState>,
}

impl std::fmt::Debug for ProximityEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProximityEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProximityEngine {
    /// Build an engine on top of `adapter`.
    #[must_use]
    pub fn new(adapter: Arc<dyn AdapterControl>, config: &Config) -> Self {
        Self {
            adapter,
            config: config.engine.clone(),
            state: Mutex::new(EngineState::new(FilterBank::new(config.filter))),
        }
    }

    /// Build an engine on the system's default BlueZ adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter cannot be opened or powered on.
    #[cfg(feature = "bluetooth")]
    pub async fn with_bluez(config: &Config) -> crate::error::Result<Self> {
        let adapter = crate::bluetooth::BluezAdapter::new().await?;
        Ok(Self::new(Arc::new(adapter), config))
    }

    /// Engine timing and distance model parameters.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn adapter(&self) -> &dyn AdapterControl {
        self.adapter.as_ref()
    }

    /// Every known device: the discovered view merged with the connected view.
    pub async fn list_all(&self) -> Vec<DeviceRecord> {
        self.state.lock().await.registry.merged_list()
    }

    /// Devices in the connected view only.
    pub async fn connected_devices(&self) -> Vec<DeviceRecord> {
        self.state.lock().await.registry.connected_snapshot()
    }

    /// Pair with and trust `address`.
    ///
    /// Returns `true` only if the adapter reports the device as paired once the bond
    /// has had time to settle.
    #[instrument(skip(self))]
    pub async fn pair(&self, address: &str) -> bool {
        let Some(address) = Self::canonical(address) else {
            return false;
        };

        info!("Pairing");
        self.act("pair", &address, self.adapter.pair(&address)).await;
        sleep(self.config.pair_settle()).await;

        let paired = self
            .query("is_paired", &address, self.adapter.is_paired(&address))
            .await
            .unwrap_or(false);
        if paired {
            info!("Paired");
        } else {
            warn!("Device did not report a bond after pairing");
        }
        paired
    }

    /// Connect to `address` and start tracking it in the connected view.
    ///
    /// The link is verified by re-querying the adapter after the settle delay; the
    /// result of the connect call itself is not trusted.
    #[instrument(skip(self))]
    pub async fn connect(&self, address: &str) -> bool {
        let Some(address) = Self::canonical(address) else {
            return false;
        };

        info!("Connecting");
        self.act("connect", &address, self.adapter.connect(&address))
            .await;
        sleep(self.config.connect_settle()).await;

        let connected = self
            .query("is_connected", &address, self.adapter.is_connected(&address))
            .await;
        if connected != Some(true) {
            warn!("Link not up after connect");
            return false;
        }

        let name = self.display_name(&address, None).await;
        let live = self.live_rssi(&address).await;

        let mut state = self.state.lock().await;
        let rssi = state.remember_rssi(&address, live);
        let raw = self
            .distance_for(rssi)
            .or_else(|| state.filters.last_raw_distance(&address));
        let distance = state.filters.update(&address, Observation::from(raw));

        state.registry.upsert_connected(DeviceRecord {
            address,
            name,
            rssi_dbm: rssi,
            distance_m: publishable(distance),
            connected: true,
            paired: true,
            tx_power_dbm: self.config.reference_tx_power,
        });
        info!(rssi = ?rssi, distance = ?distance, "Connected");
        true
    }

    /// Disconnect `address` and drop it from the connected view.
    ///
    /// The entry is removed only once the adapter reports the link as down. A failed
    /// or timed-out query leaves it in place.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, address: &str) -> bool {
        let Some(address) = Self::canonical(address) else {
            return false;
        };

        info!("Disconnecting");
        self.act("disconnect", &address, self.adapter.disconnect(&address))
            .await;
        sleep(self.config.disconnect_settle()).await;

        let connected = self
            .query("is_connected", &address, self.adapter.is_connected(&address))
            .await;
        if connected != Some(false) {
            warn!(still_connected = ?connected, "Link not confirmed down");
            return false;
        }

        self.state.lock().await.registry.remove_connected(&address);
        info!("Disconnected");
        true
    }

    fn canonical(address: &str) -> Option<String> {
        match canonical_address(address) {
            Ok(address) => Some(address),
            Err(err) => {
                warn!(error = %err, "Rejecting malformed address");
                None
            }
        }
    }

    /// Run an adapter query under the query timeout. Failures become `None`.
    pub(crate) async fn query<T>(
        &self,
        operation: &'static str,
        address: &str,
        call: impl Future<Output = BluetoothResult<T>> + Send,
    ) -> Option<T> {
        match timeout(self.config.query_timeout(), call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                debug!(%address, operation, error = %err, "Adapter query failed");
                None
            }
            Err(_) => {
                warn!(%address, operation, "Adapter query timed out");
                None
            }
        }
    }

    /// Run an adapter action under the action timeout. Returns whether it reported success.
    pub(crate) async fn act(
        &self,
        operation: &'static str,
        address: &str,
        call: impl Future<Output = BluetoothResult<()>> + Send,
    ) -> bool {
        match timeout(self.config.action_timeout(), call).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(%address, operation, error = %err, "Adapter action failed");
                false
            }
            Err(_) => {
                warn!(%address, operation, "Adapter action timed out");
                false
            }
        }
    }

    /// Live RSSI from the adapter, if it lies in the trusted `(-100, 0)` window.
    ///
    /// Zero means the controller has no reading; anything else outside the window is
    /// noise and must not reach the cache or the filter.
    pub(crate) async fn live_rssi(&self, address: &str) -> Option<i16> {
        let rssi = self
            .query("rssi", address, self.adapter.live_rssi(address))
            .await
            .flatten()?;
        if in_trusted_range(rssi) {
            Some(rssi)
        } else {
            debug!(%address, rssi, "Discarding out-of-range live RSSI");
            None
        }
    }

    /// `token` if it is a usable name, otherwise whatever the adapter resolves, otherwise
    /// the address itself.
    pub(crate) async fn display_name(&self, address: &str, token: Option<&str>) -> String {
        if let Some(name) = token.filter(|t| !needs_name_resolution(Some(*t))) {
            return name.to_string();
        }
        self.query("name", address, self.adapter.resolve_name(address))
            .await
            .flatten()
            .filter(|name| !needs_name_resolution(Some(name.as_str())))
            .unwrap_or_else(|| address.to_string())
    }

    /// Raw distance for `rssi` under the configured model.
    pub(crate) fn distance_for(&self, rssi: Option<i16>) -> Option<f64> {
        estimate_distance_with(
            rssi,
            self.config.reference_tx_power,
            self.config.path_loss_exponent,
        )
    }
}

/// Only strictly positive estimates are published.
pub(crate) fn publishable(distance: Option<f64>) -> Option<f64> {
    distance.filter(|&d| d > 0.0)
}
