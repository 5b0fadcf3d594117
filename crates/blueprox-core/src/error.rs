//! Unified error types for the blueprox core library.
//!
//! [`BlueproxError`] covers every failure that can leave the crate. Modules keep their
//! own specific error types ([`ConfigError`](crate::config::ConfigError),
//! [`BluetoothError`](crate::bluetooth::BluetoothError)) and convert into it at the
//! boundary. Filter failures never leave the filter bank, which logs them and keeps
//! the previous estimate.
//!
//! Most engine operations never fail outright: missing readings become absent values
//! and adapter failures become `false`. Errors surface at startup (adapter
//! initialisation, configuration) and when callers hand in malformed addresses.
//!
//! # Example
//!
//! ```rust
//! use blueprox_core::error::{BlueproxError, Result};
//!
//! fn require_adapter(present: bool) -> Result<()> {
//!     if !present {
//!         return Err(BlueproxError::BluetoothAdapterNotFound);
//!     }
//!     Ok(())
//! }
//! assert!(require_adapter(false).unwrap_err().is_bluetooth_error());
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all blueprox operations.
#[derive(Debug, Error)]
pub enum BlueproxError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and bluetoothd is running."
    )]
    BluetoothAdapterNotFound,

    /// The Bluetooth adapter exists but could not be powered on.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    BluetoothAdapterPoweredOff,

    /// Device discovery could not be started or failed mid-window.
    #[error("Bluetooth scan failed: {0}")]
    BluetoothScanFailed(String),

    /// A device-level adapter call failed.
    #[error("Bluetooth operation failed: {0}")]
    BluetoothOperationFailed(String),

    /// The adapter does not know the requested device.
    #[error("Device not found: '{0}'. Ensure the device is powered on and within range.")]
    DeviceNotFound(String),

    /// The address is not a colon-separated hexadecimal MAC address.
    #[error("Invalid Bluetooth address: '{0}'. Expected format XX:XX:XX:XX:XX:XX.")]
    InvalidAddress(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // I/O ERRORS
    // =========================================================================
    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for blueprox operations.
pub type Result<T> = std::result::Result<T, BlueproxError>;

/// Short alias for [`BlueproxError`].
pub type Error = BlueproxError;

impl BlueproxError {
    /// Returns `true` if this error is related to Bluetooth operations.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::BluetoothAdapterNotFound
                | Self::BluetoothAdapterPoweredOff
                | Self::BluetoothScanFailed(_)
                | Self::BluetoothOperationFailed(_)
                | Self::DeviceNotFound(_)
                | Self::InvalidAddress(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::InvalidAddress(_) => 400,

            // 404 Not Found
            Self::ConfigNotFound(_) | Self::DeviceNotFound(_) => 404,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::IoError(_) => 500,

            // 503 Service Unavailable - Bluetooth hardware issues
            Self::BluetoothAdapterNotFound
            | Self::BluetoothAdapterPoweredOff
            | Self::BluetoothScanFailed(_)
            | Self::BluetoothOperationFailed(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::BluetoothAdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::BluetoothAdapterPoweredOff => "BLUETOOTH_ADAPTER_POWERED_OFF",
            Self::BluetoothScanFailed(_) => "BLUETOOTH_SCAN_FAILED",
            Self::BluetoothOperationFailed(_) => "BLUETOOTH_OPERATION_FAILED",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::InvalidAddress(_) => "INVALID_BLUETOOTH_ADDRESS",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BlueproxError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::LoadError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::bluetooth::BluetoothError> for BlueproxError {
    fn from(err: crate::bluetooth::BluetoothError) -> Self {
        use crate::bluetooth::BluetoothError;
        match err {
            BluetoothError::AdapterNotFound => Self::BluetoothAdapterNotFound,
            BluetoothError::AdapterPoweredOff => Self::BluetoothAdapterPoweredOff,
            BluetoothError::DeviceNotFound { address } => Self::DeviceNotFound(address),
            BluetoothError::InvalidAddress { address } => Self::InvalidAddress(address),
            BluetoothError::SessionInitFailed { message }
            | BluetoothError::DiscoveryFailed { message } => Self::BluetoothScanFailed(message),
            BluetoothError::OperationFailed {
                operation,
                address,
                message,
            } => Self::BluetoothOperationFailed(format!("{operation} {address}: {message}")),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
