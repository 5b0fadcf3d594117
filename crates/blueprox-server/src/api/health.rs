//! Liveness endpoint.
//!
//! Always answers 200 so supervisors can tell the process is up; `status` says
//! whether the Bluetooth adapter actually opened.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Process and adapter status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "bluetooth_backend": "bluez",
    "adapter_error": null
}))]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the adapter failed to open and device endpoints
    /// answer 503.
    #[schema(example = "ok")]
    pub status: String,

    /// Crate version.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// `bluez` or `mock`.
    #[schema(example = "bluez")]
    pub bluetooth_backend: String,

    /// Why the adapter is unavailable, if it is.
    #[schema(nullable)]
    pub adapter_error: Option<String>,
}

/// Report process and adapter status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Reports the service version, which Bluetooth backend is compiled in and \
        whether its adapter opened at startup.",
    responses(
        (status = 200, description = "Service is running", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let adapter_error = state.engine().err().map(ToString::to_string);
    let status = if adapter_error.is_some() { "degraded" } else { "ok" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        bluetooth_backend: state.backend.to_string(),
        adapter_error,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum_test::TestServer;
    use blueprox_core::{BlueproxError, Config};

    use super::*;
    use crate::api::create_router;
    use crate::state::AppState;

    #[tokio::test]
    async fn test_degraded_when_adapter_missing() {
        let state = Arc::new(AppState::unavailable(
            BlueproxError::BluetoothAdapterPoweredOff,
            Config::default(),
            "bluez",
        ));
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server.get("/health").await;
        response.assert_status_ok();

        let body: HealthResponse = response.json();
        assert_eq!(body.status, "degraded");
        assert_eq!(body.bluetooth_backend, "bluez");
        assert!(body.adapter_error.unwrap().contains("powered off"));
    }
}
