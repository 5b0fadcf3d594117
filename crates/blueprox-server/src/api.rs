//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `bluetooth` - Scanning, device listing and pair/connect/disconnect
//! - `health` - Service health checks
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod bluetooth;
pub mod error;
pub mod health;
pub mod openapi;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};

// Re-export OpenAPI utilities for the gen-openapi binary
pub use openapi::{get_openapi_json, ApiDoc};

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /docs                  - Swagger UI
/// /api
/// ├── /scan              - Run a discovery window (POST)
/// ├── /devices           - Merged device list
/// ├── /pair              - Pair a device (POST)
/// ├── /connect           - Connect a device (POST)
/// ├── /disconnect        - Disconnect a device (POST)
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", bluetooth::router())
        // Swagger UI also serves the spec at /api/openapi.json
        .merge(SwaggerUi::new("/docs").url("/api/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum_test::TestServer;
    use blueprox_core::{Config, MockAdapter};

    use super::*;
    use crate::state::AppState;

    fn server() -> TestServer {
        let state = Arc::new(AppState::with_mock(
            Arc::new(MockAdapter::new()),
            Config::default(),
        ));
        TestServer::new(create_router(state)).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = server().get("/health").await;
        response.assert_status_ok();

        let body: health::HealthResponse = response.json();
        assert_eq!(body.status, "ok");
        assert_eq!(body.bluetooth_backend, "mock");
    }

    #[tokio::test]
    async fn test_openapi_endpoint() {
        let response = server().get("/api/openapi.json").await;
        response.assert_status_ok();

        let spec: serde_json::Value = response.json();
        assert!(spec["paths"]["/api/scan"].is_object());
        assert!(spec["paths"]["/api/connect"].is_object());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = server().get("/api/nope").await;
        response.assert_status_not_found();
    }
}
