//! OpenAPI specification generation for the blueprox API.
//!
//! The document is served at `/api/openapi.json` (alongside Swagger UI at `/docs`) and
//! written to the workspace root by the `gen-openapi` binary for client generation.

use blueprox_core::DeviceRecord;
use utoipa::OpenApi;

// Import all the handler modules to reference their types
use super::bluetooth::{
    ActionResponse, AddressRequest, DevicesResponse, ScanRequest, ScanResponse,
};
use super::error::ErrorResponse;
use super::health::HealthResponse;

/// Returns the OpenAPI specification as a string (for writing to file).
/// Used by the gen-openapi binary.
///
/// # Panics
///
/// Panics if the derived document cannot be serialized, which indicates a bug in the
/// schema definitions.
#[must_use]
pub fn get_openapi_json() -> String {
    ApiDoc::openapi()
        .to_pretty_json()
        .expect("Failed to serialize OpenAPI spec")
}

/// Main OpenAPI document structure for blueprox.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "blueprox API",
        version = "0.1.0",
        description = r#"
# blueprox API

blueprox tracks nearby Bluetooth devices and estimates how far away each one is.

## Overview

1. **Scan**: run a discovery window; every device seen gets a median signal strength and a
   distance estimate
2. **Connect**: open a link to a device; connected devices are refreshed in the background
   every few seconds
3. **List**: read the latest estimates for everything known

## Distances

Raw signal strength is converted with a log-distance path loss model and then smoothed per
device by an unscented Kalman filter, so estimates move steadily rather than jumping with
every reading. `distance` is `null` until a device has produced a usable reading.

## Actions

Pair, connect and disconnect always answer `200`. `success` reflects what the adapter
reported after a short settle delay, not whether the command was accepted.

If the Bluetooth adapter could not be opened at startup, device endpoints answer `503` and
`/health` reports `degraded`.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local blueprox server")
    ),
    tags(
        (
            name = "system",
            description = "Health checks and service status"
        ),
        (
            name = "devices",
            description = "Discovery, device state and connection management"
        )
    ),
    paths(
        // Health endpoints
        super::health::health_check,
        // Device endpoints
        super::bluetooth::scan_devices,
        super::bluetooth::list_devices,
        super::bluetooth::pair_device,
        super::bluetooth::connect_device,
        super::bluetooth::disconnect_device,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            // Device types
            DeviceRecord,
            ScanRequest,
            ScanResponse,
            DevicesResponse,
            AddressRequest,
            ActionResponse,
        )
    )
)]
pub struct ApiDoc;
