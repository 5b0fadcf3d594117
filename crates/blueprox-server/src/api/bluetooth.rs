//! Bluetooth device API endpoints.
//!
//! Scanning, the merged device list, and the pair/connect/disconnect actions.
//! Action endpoints always answer 200 with `success` reflecting what the adapter
//! reported after the settle delay. Malformed input is a 400, and every endpoint
//! answers 503 when the adapter could not be opened at startup.
//!
//! Request bodies also accept the field names of the original web client
//! (`mac`, `duration`).

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use blueprox_core::{canonical_address, DeviceRecord};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Shortest scan window a client may request, in seconds.
pub const MIN_SCAN_DURATION_SECS: u64 = 1;

/// Longest scan window a client may request, in seconds.
pub const MAX_SCAN_DURATION_SECS: u64 = 60;

/// Creates the device router, mounted under `/api`.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/scan", post(scan_devices))
        .route("/devices", get(list_devices))
        .route("/pair", post(pair_device))
        .route("/connect", post(connect_device))
        .route("/disconnect", post(disconnect_device))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Optional scan parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "duration_secs": 8 }))]
pub struct ScanRequest {
    /// Length of the discovery window. Defaults to the configured window.
    #[serde(alias = "duration")]
    #[schema(example = 8, minimum = 1, maximum = 60)]
    pub duration_secs: Option<u64>,
}

/// Result of a discovery window.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "success": true,
    "devices": [
        {
            "mac": "AA:BB:CC:DD:EE:01",
            "name": "Pixel 8",
            "rssi": -60,
            "distance": 1.1,
            "connected": false,
            "paired": false,
            "txPower": -59
        }
    ],
    "scan_duration_secs": 8,
    "scanned_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct ScanResponse {
    /// Always `true`; discovery failures yield an empty window instead.
    #[schema(example = true)]
    pub success: bool,

    /// Devices seen in this window plus connected devices that were not.
    pub devices: Vec<DeviceRecord>,

    /// Length of the window that was run.
    #[schema(example = 8)]
    pub scan_duration_secs: u64,

    /// When the scan completed.
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub scanned_at_utc: String,
}

/// All known devices.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DevicesResponse {
    /// Discovered devices merged with connected ones, sorted by address.
    pub devices: Vec<DeviceRecord>,
}

/// Target of a pair, connect or disconnect action.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "address": "AA:BB:CC:DD:EE:01" }))]
pub struct AddressRequest {
    /// Bluetooth MAC address in XX:XX:XX:XX:XX:XX format.
    #[serde(alias = "mac")]
    #[schema(example = "AA:BB:CC:DD:EE:01", pattern = "^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$")]
    pub address: String,
}

/// Outcome of a pair, connect or disconnect action.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "success": true, "address": "AA:BB:CC:DD:EE:01" }))]
pub struct ActionResponse {
    /// Whether the adapter confirmed the new state.
    #[schema(example = true)]
    pub success: bool,

    /// Canonical (upper-case) address the action was run against.
    #[schema(example = "AA:BB:CC:DD:EE:01")]
    pub address: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Run a discovery window.
///
/// Blocks for the length of the window, then returns what was seen. The
/// discovered view is rebuilt from scratch by every scan.
#[utoipa::path(
    post,
    path = "/api/scan",
    tag = "devices",
    operation_id = "scanDevices",
    summary = "Scan for nearby devices",
    description = "Runs a Bluetooth discovery window and returns every device seen, with \
        median signal strength and a smoothed distance estimate. Connected devices that \
        were not seen are included unchanged.",
    request_body(content = ScanRequest, description = "Optional scan parameters", content_type = "application/json"),
    responses(
        (status = 200, description = "Scan completed", body = ScanResponse),
        (status = 400, description = "Invalid scan duration", body = crate::api::ErrorResponse),
        (status = 503, description = "Bluetooth adapter unavailable", body = crate::api::ErrorResponse)
    )
)]
pub async fn scan_devices(
    State(state): State<SharedState>,
    body: Bytes,
) -> ApiResult<Json<ScanResponse>> {
    let request: ScanRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ScanRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request("invalid_request_body", e.to_string()))?
    };

    let duration_secs = request
        .duration_secs
        .unwrap_or(state.config.engine.scan_window_secs);
    if !(MIN_SCAN_DURATION_SECS..=MAX_SCAN_DURATION_SECS).contains(&duration_secs) {
        return Err(ApiError::bad_request(
            "invalid_scan_duration",
            format!(
                "Scan duration must be between {MIN_SCAN_DURATION_SECS} and \
                 {MAX_SCAN_DURATION_SECS} seconds, got {duration_secs}"
            ),
        )
        .with_details(json!({
            "min": MIN_SCAN_DURATION_SECS,
            "max": MAX_SCAN_DURATION_SECS,
        })));
    }

    let devices = state
        .engine()?
        .scan_for(std::time::Duration::from_secs(duration_secs))
        .await;

    Ok(Json(ScanResponse {
        success: true,
        devices,
        scan_duration_secs: duration_secs,
        scanned_at_utc: Utc::now().to_rfc3339(),
    }))
}

/// List every known device.
#[utoipa::path(
    get,
    path = "/api/devices",
    tag = "devices",
    operation_id = "listDevices",
    summary = "List known devices",
    description = "Returns the devices from the most recent scan merged with all \
        connected devices. Connected entries carry live, monitor-refreshed estimates.",
    responses(
        (status = 200, description = "Device list", body = DevicesResponse),
        (status = 503, description = "Bluetooth adapter unavailable", body = crate::api::ErrorResponse)
    )
)]
pub async fn list_devices(State(state): State<SharedState>) -> ApiResult<Json<DevicesResponse>> {
    Ok(Json(DevicesResponse {
        devices: state.engine()?.list_all().await,
    }))
}

/// Pair with and trust a device.
#[utoipa::path(
    post,
    path = "/api/pair",
    tag = "devices",
    operation_id = "pairDevice",
    summary = "Pair a device",
    request_body = AddressRequest,
    responses(
        (status = 200, description = "Pairing attempted", body = ActionResponse),
        (status = 400, description = "Malformed address", body = crate::api::ErrorResponse),
        (status = 503, description = "Bluetooth adapter unavailable", body = crate::api::ErrorResponse)
    )
)]
pub async fn pair_device(
    State(state): State<SharedState>,
    Json(request): Json<AddressRequest>,
) -> ApiResult<Json<ActionResponse>> {
    let address = canonical_address(&request.address)?;
    let engine = state.engine()?;
    let success = engine.pair(&address).await;
    Ok(Json(ActionResponse { success, address }))
}

/// Connect to a device and start tracking it.
#[utoipa::path(
    post,
    path = "/api/connect",
    tag = "devices",
    operation_id = "connectDevice",
    summary = "Connect a device",
    description = "Opens a link and, once the adapter confirms it, adds the device to \
        the connected view where the monitor keeps its distance estimate fresh.",
    request_body = AddressRequest,
    responses(
        (status = 200, description = "Connection attempted", body = ActionResponse),
        (status = 400, description = "Malformed address", body = crate::api::ErrorResponse),
        (status = 503, description = "Bluetooth adapter unavailable", body = crate::api::ErrorResponse)
    )
)]
pub async fn connect_device(
    State(state): State<SharedState>,
    Json(request): Json<AddressRequest>,
) -> ApiResult<Json<ActionResponse>> {
    let address = canonical_address(&request.address)?;
    let engine = state.engine()?;
    let success = engine.connect(&address).await;
    Ok(Json(ActionResponse { success, address }))
}

/// Disconnect a device and stop tracking it.
#[utoipa::path(
    post,
    path = "/api/disconnect",
    tag = "devices",
    operation_id = "disconnectDevice",
    summary = "Disconnect a device",
    request_body = AddressRequest,
    responses(
        (status = 200, description = "Disconnection attempted", body = ActionResponse),
        (status = 400, description = "Malformed address", body = crate::api::ErrorResponse),
        (status = 503, description = "Bluetooth adapter unavailable", body = crate::api::ErrorResponse)
    )
)]
pub async fn disconnect_device(
    State(state): State<SharedState>,
    Json(request): Json<AddressRequest>,
) -> ApiResult<Json<ActionResponse>> {
    let address = canonical_address(&request.address)?;
    let engine = state.engine()?;
    let success = engine.disconnect(&address).await;
    Ok(Json(ActionResponse { success, address }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use blueprox_core::{BlueproxError, Config, MockAdapter, MockDevice};

    use super::*;
    use crate::api::create_router;
    use crate::state::AppState;

    const ADDR: &str = "AA:BB:CC:DD:EE:01";

    fn test_server(devices: impl IntoIterator<Item = MockDevice>) -> (Arc<MockAdapter>, TestServer) {
        let mut config = Config::default();
        config.engine.connect_settle_ms = 0;
        config.engine.disconnect_settle_ms = 0;
        config.engine.pair_settle_ms = 0;

        let adapter = Arc::new(MockAdapter::with_devices(devices));
        let state = Arc::new(AppState::with_mock(adapter.clone(), config));
        let server = TestServer::new(create_router(state)).unwrap();
        (adapter, server)
    }

    #[tokio::test]
    async fn test_scan_returns_devices() {
        let (_adapter, server) = test_server([MockDevice::new(ADDR)
            .with_name("Pixel 8")
            .with_scan_rssi([-60, -62, -58])]);

        let response = server.post("/api/scan").await;
        response.assert_status_ok();

        let body: ScanResponse = response.json();
        assert!(body.success);
        assert_eq!(body.scan_duration_secs, 8);
        assert_eq!(body.devices.len(), 1);
        assert_eq!(body.devices[0].rssi_dbm, Some(-60));
        assert_eq!(body.devices[0].distance_m, Some(1.1));
    }

    #[tokio::test]
    async fn test_scan_with_explicit_duration() {
        let (_adapter, server) = test_server([]);
        let response = server
            .post("/api/scan")
            .json(&json!({ "duration_secs": 3 }))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<ScanResponse>().scan_duration_secs, 3);
    }

    #[tokio::test]
    async fn test_scan_rejects_out_of_range_duration() {
        let (adapter, server) = test_server([]);
        for duration in [0, 61] {
            let response = server
                .post("/api/scan")
                .json(&json!({ "duration_secs": duration }))
                .await;
            response.assert_status(StatusCode::BAD_REQUEST);
            let body: serde_json::Value = response.json();
            assert_eq!(body["error"], "invalid_scan_duration");
            assert_eq!(body["details"]["max"], 60);
        }
        assert_eq!(adapter.scan_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_list_disconnect_round_trip() {
        let (_adapter, server) = test_server([MockDevice::new(ADDR)
            .with_name("Pixel 8")
            .with_live_rssi(-59)]);

        let response = server
            .post("/api/connect")
            .json(&json!({ "address": "aa:bb:cc:dd:ee:01" }))
            .await;
        response.assert_status_ok();
        let body: ActionResponse = response.json();
        assert!(body.success);
        assert_eq!(body.address, ADDR);

        let devices: DevicesResponse = server.get("/api/devices").await.json();
        assert_eq!(devices.devices.len(), 1);
        assert!(devices.devices[0].connected);
        assert_eq!(devices.devices[0].distance_m, Some(1.0));

        let response = server
            .post("/api/disconnect")
            .json(&json!({ "address": ADDR }))
            .await;
        assert!(response.json::<ActionResponse>().success);

        let devices: DevicesResponse = server.get("/api/devices").await.json();
        assert!(devices.devices.is_empty());
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_an_http_error() {
        let (_adapter, server) = test_server([MockDevice::new(ADDR).refusing_connection()]);

        let response = server
            .post("/api/connect")
            .json(&json!({ "address": ADDR }))
            .await;
        response.assert_status_ok();
        assert!(!response.json::<ActionResponse>().success);
    }

    #[tokio::test]
    async fn test_pair() {
        let (adapter, server) = test_server([MockDevice::new(ADDR)]);

        let response = server
            .post("/api/pair")
            .json(&json!({ "address": ADDR }))
            .await;
        assert!(response.json::<ActionResponse>().success);
        assert!(adapter.device(ADDR).unwrap().paired);
    }

    #[tokio::test]
    async fn test_original_client_field_names() {
        let (_adapter, server) = test_server([MockDevice::new(ADDR)
            .with_name("Pixel 8")
            .with_live_rssi(-59)]);

        let response = server
            .post("/api/connect")
            .json(&json!({ "mac": "aa:bb:cc:dd:ee:01" }))
            .await;
        response.assert_status_ok();
        assert!(response.json::<ActionResponse>().success);

        let body: serde_json::Value = server.get("/api/devices").await.json();
        let device = &body["devices"][0];
        assert_eq!(device["mac"], ADDR);
        assert_eq!(device["name"], "Pixel 8");
        assert_eq!(device["rssi"], -59);
        assert_eq!(device["distance"], 1.0);
        assert_eq!(device["txPower"], -59);
        assert_eq!(device["connected"], true);

        let response = server
            .post("/api/scan")
            .json(&json!({ "duration": 10 }))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<ScanResponse>().scan_duration_secs, 10);

        let response = server
            .post("/api/disconnect")
            .json(&json!({ "mac": ADDR }))
            .await;
        assert!(response.json::<ActionResponse>().success);
    }

    #[tokio::test]
    async fn test_unavailable_adapter_answers_503() {
        let state = Arc::new(AppState::unavailable(
            BlueproxError::BluetoothAdapterNotFound,
            Config::default(),
            "bluez",
        ));
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server.get("/api/devices").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "bluetooth_adapter_not_found");

        let response = server
            .post("/api/connect")
            .json(&json!({ "address": ADDR }))
            .await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);

        let response = server.post("/api/scan").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);

        // Input is still validated first.
        let response = server
            .post("/api/pair")
            .json(&json!({ "address": "not-an-address" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_address_is_bad_request() {
        let (_adapter, server) = test_server([]);

        for path in ["/api/pair", "/api/connect", "/api/disconnect"] {
            let response = server
                .post(path)
                .json(&json!({ "address": "AA-BB-CC-DD-EE-01" }))
                .await;
            response.assert_status(StatusCode::BAD_REQUEST);
            let body: serde_json::Value = response.json();
            assert_eq!(body["error"], "invalid_bluetooth_address");
        }
    }
}
