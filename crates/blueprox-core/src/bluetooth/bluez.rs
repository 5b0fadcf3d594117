//! BlueZ backend built on `bluer`.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bluer::agent::{Agent, AgentHandle};
use bluer::{Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty, Session};
use futures::stream::{SelectAll, Stream, StreamExt};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::{AdapterControl, BluetoothError, BluetoothResult};
use crate::types::SignalObservation;

type DeviceEvents = Pin<Box<dyn Stream<Item = (Address, DeviceEvent)> + Send>>;

/// Adapter backed by the system's default BlueZ controller.
pub struct BluezAdapter {
    adapter: Adapter,
    // Dropping either unregisters the pairing agent or closes the D-Bus session.
    _agent: AgentHandle,
    _session: Session,
}

impl BluezAdapter {
    /// Open a BlueZ session, power on the default adapter and register a pairing agent.
    ///
    /// # Errors
    ///
    /// Returns an error if bluetoothd is unreachable, there is no adapter, or the
    /// adapter refuses to power on.
    pub async fn new() -> BluetoothResult<Self> {
        let session = Session::new()
            .await
            .map_err(|e| BluetoothError::SessionInitFailed {
                message: e.to_string(),
            })?;

        let adapter = session
            .default_adapter()
            .await
            .map_err(|_| BluetoothError::AdapterNotFound)?;

        adapter
            .set_powered(true)
            .await
            .map_err(|_| BluetoothError::AdapterPoweredOff)?;

        let agent = Agent {
            request_default: true,
            ..Agent::default()
        };
        let agent = session
            .register_agent(agent)
            .await
            .map_err(|e| BluetoothError::SessionInitFailed {
                message: format!("agent registration: {e}"),
            })?;

        info!(adapter = adapter.name(), "Bluetooth adapter ready");

        Ok(Self {
            adapter,
            _agent: agent,
            _session: session,
        })
    }

    fn device(&self, address: &str) -> BluetoothResult<Device> {
        let parsed: Address = address.parse().map_err(|_| BluetoothError::InvalidAddress {
            address: address.to_string(),
        })?;
        self.adapter
            .device(parsed)
            .map_err(|e| failed("lookup", address, &e))
    }
}

fn failed(operation: &'static str, address: &str, err: &bluer::Error) -> BluetoothError {
    if matches!(err.kind, bluer::ErrorKind::NotFound) {
        return BluetoothError::DeviceNotFound {
            address: address.to_string(),
        };
    }
    BluetoothError::OperationFailed {
        operation,
        address: address.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl AdapterControl for BluezAdapter {
    async fn scan_window(&self, window: Duration) -> BluetoothResult<Vec<SignalObservation>> {
        let discover = self
            .adapter
            .discover_devices()
            .await
            .map_err(|e| BluetoothError::DiscoveryFailed {
                message: e.to_string(),
            })?;
        futures::pin_mut!(discover);

        let deadline = Instant::now() + window;
        let mut device_events: SelectAll<DeviceEvents> = SelectAll::new();
        let mut observations = Vec::new();
        let mut discovery_open = true;

        loop {
            tokio::select! {
                () = sleep_until(deadline) => break,
                event = discover.next(), if discovery_open => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => {
                        let Ok(device) = self.adapter.device(address) else {
                            continue;
                        };
                        let rssi = device.rssi().await.ok().flatten();
                        let name = device.name().await.ok().flatten();
                        observations.push(SignalObservation::new(address.to_string(), rssi, name));

                        match device.events().await {
                            Ok(events) => {
                                device_events.push(Box::pin(events.map(move |e| (address, e))));
                            }
                            Err(e) => debug!(%address, error = %e, "No property stream for device"),
                        }
                    }
                    Some(_) => {}
                    None => {
                        warn!("Discovery stream ended before the scan window closed");
                        discovery_open = false;
                    }
                },
                Some((address, event)) = device_events.next(), if !device_events.is_empty() => {
                    let DeviceEvent::PropertyChanged(property) = event else {
                        continue;
                    };
                    match property {
                        DeviceProperty::Rssi(rssi) => observations.push(
                            SignalObservation::new(address.to_string(), Some(rssi), None),
                        ),
                        DeviceProperty::Name(name) => observations.push(
                            SignalObservation::new(address.to_string(), None, Some(name)),
                        ),
                        _ => {}
                    }
                }
            }
        }

        debug!(count = observations.len(), "Scan window closed");
        Ok(observations)
    }

    async fn live_rssi(&self, address: &str) -> BluetoothResult<Option<i16>> {
        self.device(address)?
            .rssi()
            .await
            .map_err(|e| failed("rssi", address, &e))
    }

    async fn is_connected(&self, address: &str) -> BluetoothResult<bool> {
        self.device(address)?
            .is_connected()
            .await
            .map_err(|e| failed("is_connected", address, &e))
    }

    async fn is_paired(&self, address: &str) -> BluetoothResult<bool> {
        self.device(address)?
            .is_paired()
            .await
            .map_err(|e| failed("is_paired", address, &e))
    }

    async fn resolve_name(&self, address: &str) -> BluetoothResult<Option<String>> {
        self.device(address)?
            .name()
            .await
            .map_err(|e| failed("name", address, &e))
    }

    async fn pair(&self, address: &str) -> BluetoothResult<()> {
        let device = self.device(address)?;
        device.pair().await.map_err(|e| failed("pair", address, &e))?;
        device
            .set_trusted(true)
            .await
            .map_err(|e| failed("trust", address, &e))
    }

    async fn connect(&self, address: &str) -> BluetoothResult<()> {
        self.device(address)?
            .connect()
            .await
            .map_err(|e| failed("connect", address, &e))
    }

    async fn disconnect(&self, address: &str) -> BluetoothResult<()> {
        self.device(address)?
            .disconnect()
            .await
            .map_err(|e| failed("disconnect", address, &e))
    }
}
