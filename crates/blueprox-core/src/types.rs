//! Shared types and OpenAPI schemas.
//!
//! [`DeviceRecord`] is the snapshot handed to API consumers, [`SignalObservation`] is what
//! the adapter reports during a scan window, and [`Observation`] models best-effort
//! readings that may be missing.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Default reference transmit power (measured RSSI at one metre), in dBm.
pub const DEFAULT_TX_POWER_DBM: i16 = -59;

/// A best-effort reading that may not have been obtained.
///
/// Adapter calls that fail, time out, or return values outside the trusted range all
/// collapse into [`Observation::Absent`]; downstream code branches on this instead of
/// on scattered `None` checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation<T> {
    /// A usable reading.
    Present(T),
    /// Nothing usable was observed.
    Absent,
}

impl<T> Observation<T> {
    /// Returns `true` if a reading is present.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Converts into an `Option`.
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Present(value) => Some(value),
            Self::Absent => None,
        }
    }

    /// Substitutes a cached value when this observation is absent.
    #[must_use]
    pub fn or_cached(self, cached: Option<T>) -> Self {
        match self {
            Self::Present(_) => self,
            Self::Absent => cached.into(),
        }
    }
}

impl<T> From<Option<T>> for Observation<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Self::Present)
    }
}

/// One raw sighting of a device during a scan window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalObservation {
    /// Canonical hardware address of the device.
    pub address: String,

    /// Raw signal strength in dBm, if the event carried one.
    pub rssi: Option<i16>,

    /// Name token attached to the event, if any. May be leaked protocol metadata.
    pub name: Option<String>,
}

impl SignalObservation {
    /// Creates an observation.
    pub fn new(address: impl Into<String>, rssi: Option<i16>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            rssi,
            name,
        }
    }
}

/// Externally visible state of one device.
///
/// The JSON field names (`mac`, `rssi`, `distance`, `txPower`) are the ones the web
/// client reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "mac": "AA:BB:CC:DD:EE:01",
    "name": "Pixel 8",
    "rssi": -62,
    "distance": 1.41,
    "connected": true,
    "paired": true,
    "txPower": -59
}))]
pub struct DeviceRecord {
    /// Bluetooth MAC address.
    #[serde(rename = "mac")]
    #[schema(example = "AA:BB:CC:DD:EE:01")]
    pub address: String,

    /// Display name, resolved through the adapter when the scan text was unusable.
    #[schema(example = "Pixel 8")]
    pub name: String,

    /// Last signal strength used for this record, in dBm.
    #[serde(rename = "rssi")]
    #[schema(example = -62)]
    pub rssi_dbm: Option<i16>,

    /// Filtered distance estimate in metres.
    #[serde(rename = "distance")]
    #[schema(example = 1.41)]
    pub distance_m: Option<f64>,

    /// Whether the device reported a live connection.
    #[schema(example = true)]
    pub connected: bool,

    /// Whether the device is paired with this host.
    #[schema(example = true)]
    pub paired: bool,

    /// Reference transmit power used for the distance computation.
    #[serde(rename = "txPower")]
    #[schema(example = -59)]
    pub tx_power_dbm: i16,
}
