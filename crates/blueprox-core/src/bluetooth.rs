//! Bluetooth adapter boundary.
//!
//! Everything the engine needs from the radio goes through [`AdapterControl`]:
//! a timed discovery window, per-device property queries, and the pair, connect and
//! disconnect actions. Two backends exist:
//!
//! - [`BluezAdapter`] talks to BlueZ over D-Bus via `bluer` (feature `bluetooth`)
//! - [`MockAdapter`] is a scripted in-memory radio for tests and hardware-free
//!   development (feature `mock-bluetooth`, or whenever `bluetooth` is off)
//!
//! Backends report failures as [`BluetoothError`]. The engine turns those into absent
//! observations or `false` results, so implementations should not retry internally.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::types::SignalObservation;

#[cfg(feature = "bluetooth")]
mod bluez;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
mod mock;

#[cfg(feature = "bluetooth")]
pub use bluez::BluezAdapter;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use mock::{MockAdapter, MockDevice, QueryGate};

/// Errors raised by adapter backends.
#[derive(Debug, Error)]
pub enum BluetoothError {
    /// No Bluetooth adapter found on the system.
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// Bluetooth adapter is powered off and could not be powered on.
    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// The adapter has no record of the device.
    #[error("Device not found: {address}")]
    DeviceNotFound {
        /// Address that was looked up.
        address: String,
    },

    /// The address could not be parsed.
    #[error("Invalid Bluetooth address: {address}")]
    InvalidAddress {
        /// The rejected input.
        address: String,
    },

    /// Could not open a session with the Bluetooth daemon.
    #[error("Failed to initialize Bluetooth session: {message}")]
    SessionInitFailed {
        /// Backend error text.
        message: String,
    },

    /// Discovery could not be started.
    #[error("Device discovery failed: {message}")]
    DiscoveryFailed {
        /// Backend error text.
        message: String,
    },

    /// A per-device query or action failed.
    #[error("{operation} failed for {address}: {message}")]
    OperationFailed {
        /// Which call failed, e.g. `"connect"`.
        operation: &'static str,
        /// Target device.
        address: String,
        /// Backend error text.
        message: String,
    },
}

/// Result type for adapter calls.
pub type BluetoothResult<T> = std::result::Result<T, BluetoothError>;

/// Control surface of a Bluetooth adapter.
///
/// Addresses are passed in canonical form (see [`canonical_address`]).
#[async_trait]
pub trait AdapterControl: Send + Sync {
    /// Run discovery for `window` and return every sighting made during it.
    ///
    /// A device may appear many times, once per advertisement or property change.
    /// Observations that only carry a name have `rssi: None`.
    async fn scan_window(&self, window: Duration) -> BluetoothResult<Vec<SignalObservation>>;

    /// Current signal strength for `address`, if the adapter has one.
    async fn live_rssi(&self, address: &str) -> BluetoothResult<Option<i16>>;

    /// Whether a link to `address` is currently up.
    async fn is_connected(&self, address: &str) -> BluetoothResult<bool>;

    /// Whether `address` is bonded with this adapter.
    async fn is_paired(&self, address: &str) -> BluetoothResult<bool>;

    /// Friendly name reported for `address`.
    async fn resolve_name(&self, address: &str) -> BluetoothResult<Option<String>>;

    /// Pair with and trust `address`.
    async fn pair(&self, address: &str) -> BluetoothResult<()>;

    /// Open a link to `address`.
    async fn connect(&self, address: &str) -> BluetoothResult<()>;

    /// Close the link to `address`.
    async fn disconnect(&self, address: &str) -> BluetoothResult<()>;
}

static MAC_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("MAC regex is valid")
});

/// Validates a Bluetooth MAC address format (e.g., "AA:BB:CC:DD:EE:FF").
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_REGEX.is_match(address)
}

/// Normalise a user-supplied address to the upper-case form used as registry key.
///
/// # Errors
///
/// Returns [`BluetoothError::InvalidAddress`] if the trimmed input is not a MAC address.
///
/// # Examples
///
/// ```
/// use blueprox_core::bluetooth::canonical_address;
///
/// assert_eq!(canonical_address(" aa:bb:cc:dd:ee:01 ").unwrap(), "AA:BB:CC:DD:EE:01");
/// assert!(canonical_address("AA-BB-CC-DD-EE-01").is_err());
/// ```
pub fn canonical_address(address: &str) -> BluetoothResult<String> {
    let trimmed = address.trim();
    if is_valid_mac_address(trimmed) {
        Ok(trimmed.to_ascii_uppercase())
    } else {
        Err(BluetoothError::InvalidAddress {
            address: address.to_string(),
        })
    }
}
