//! # blueprox-core
//!
//! Proximity estimation engine for nearby Bluetooth devices.
//!
//! This crate provides:
//! - Raw RSSI to distance conversion with a log-distance path loss model
//! - Per-device unscented Kalman filtering of distance estimates
//! - Discovery windows that aggregate noisy sightings into one record per device
//! - Pair, connect and disconnect with post-action verification
//! - A background monitor that keeps connected devices' estimates fresh
//!
//! ## Architecture
//!
//! - [`bluetooth`] - The [`AdapterControl`] boundary, the BlueZ backend and a mock radio
//! - [`distance`] - RSSI to metres
//! - [`filter`] - [`ProximityFilter`] and the per-device [`FilterBank`]
//! - [`registry`] - Discovered and connected device views
//! - [`scan`] - Aggregation of a scan window into per-device summaries
//! - [`engine`] - [`ProximityEngine`], which ties the pieces together
//! - [`monitor`] - The periodic connected-device refresh
//! - [`config`] - Layered TOML + environment configuration
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod bluetooth;
pub mod config;
pub mod distance;
pub mod engine;
pub mod error;
pub mod filter;
pub mod monitor;
pub mod registry;
pub mod scan;
pub mod types;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluezAdapter;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use bluetooth::{MockAdapter, MockDevice, QueryGate};
pub use bluetooth::{
    canonical_address, is_valid_mac_address, AdapterControl, BluetoothError, BluetoothResult,
};
pub use config::{Config, ConfigError, ConfigResult, EngineConfig, FilterConfig, ServerConfig};
pub use distance::{estimate_distance, estimate_distance_with};
pub use engine::ProximityEngine;
pub use error::{BlueproxError, Error, Result};
pub use filter::{FilterBank, FilterError, ProximityFilter};
pub use registry::Registry;
pub use types::{DeviceRecord, Observation, SignalObservation, DEFAULT_TX_POWER_DBM};
