//! Application state shared across handlers.

use std::sync::Arc;

use blueprox_core::{BlueproxError, Config, ProximityEngine};
use tracing::info;

/// Shared application state handle.
pub type SharedState = Arc<AppState>;

/// Everything a handler needs: the engine and the configuration it was built from.
///
/// If the adapter could not be opened at startup the server still runs; the engine
/// slot holds the startup error instead and device endpoints answer 503 with it.
#[derive(Debug)]
pub struct AppState {
    engine: Result<Arc<ProximityEngine>, BlueproxError>,

    /// Loaded configuration.
    pub config: Config,

    /// Which adapter backend is in use (`"bluez"` or `"mock"`).
    pub backend: &'static str,
}

impl AppState {
    /// Wrap an already built engine.
    #[must_use]
    pub fn new(engine: Arc<ProximityEngine>, config: Config, backend: &'static str) -> Self {
        Self {
            engine: Ok(engine),
            config,
            backend,
        }
    }

    /// State for a backend whose adapter failed to initialise.
    #[must_use]
    pub fn unavailable(err: BlueproxError, config: Config, backend: &'static str) -> Self {
        Self {
            engine: Err(err),
            config,
            backend,
        }
    }

    /// The engine, or the error that kept it from starting.
    ///
    /// # Errors
    ///
    /// Returns the adapter initialisation error recorded at startup.
    pub const fn engine(&self) -> Result<&Arc<ProximityEngine>, &BlueproxError> {
        self.engine.as_ref()
    }

    /// Build the engine on the system Bluetooth adapter.
    ///
    /// An adapter that cannot be opened or powered on is logged and recorded; the
    /// server then starts in a degraded mode.
    #[cfg(feature = "bluetooth")]
    pub async fn from_config(config: Config) -> Self {
        match ProximityEngine::with_bluez(&config).await {
            Ok(engine) => {
                info!("Using BlueZ adapter backend");
                Self::new(Arc::new(engine), config, "bluez")
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    "Bluetooth adapter unavailable, device endpoints disabled"
                );
                Self::unavailable(err, config, "bluez")
            }
        }
    }

    /// Build the engine on an empty mock adapter (no Bluetooth support compiled in).
    #[cfg(not(feature = "bluetooth"))]
    #[allow(clippy::unused_async)]
    pub async fn from_config(config: Config) -> Self {
        let adapter = Arc::new(blueprox_core::MockAdapter::new());
        let engine = ProximityEngine::new(adapter, &config);
        info!("Bluetooth support not compiled in, using mock adapter backend");
        Self::new(Arc::new(engine), config, "mock")
    }

    /// Build state around a scripted adapter.
    #[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
    #[must_use]
    pub fn with_mock(adapter: Arc<blueprox_core::MockAdapter>, config: Config) -> Self {
        let engine = ProximityEngine::new(adapter, &config);
        Self::new(Arc::new(engine), config, "mock")
    }
}
