//! In-memory transport for tests, benches and host-side simulation
//!
//! Behaves like a BLE stack with a fixed set of peripherals in range:
//! connects complete immediately through events, UART chunks are injected
//! with [`MockTransport::inject_rx`], and every write is recorded.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::transport::{RxSink, Transport, TransportEvent};
use crate::types::{DiscoveredPeripheral, PeripheralId};
use crate::{LinkError, Result};

const EVENT_CAPACITY: usize = 256;
const DEFAULT_BATTERY_LEVEL: u8 = 100;

#[derive(Debug, Default)]
struct MockState {
    in_range: Vec<DiscoveredPeripheral>,
    scanning: bool,
    connected: HashSet<PeripheralId>,
    unreachable: HashSet<PeripheralId>,
    missing_uart: HashSet<PeripheralId>,
    failing_services: HashSet<PeripheralId>,
    failing_disconnects: HashSet<PeripheralId>,
    sinks: HashMap<PeripheralId, RxSink>,
    writes: Vec<(PeripheralId, Vec<u8>)>,
    battery: HashMap<PeripheralId, u8>,
    fail_writes: bool,
    uart_disable_calls: usize,
}

impl MockState {
    fn find(&self, id: &PeripheralId) -> Option<&DiscoveredPeripheral> {
        self.in_range.iter().find(|p| &p.id == id)
    }
}

/// Scriptable in-memory [`Transport`]
#[derive(Debug)]
pub struct MockTransport {
    state: Mutex<MockState>,
    events: broadcast::Sender<TransportEvent>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { state: Mutex::new(MockState::default()), events }
    }

    /// Transport with the given peripherals already in range
    pub fn with_peripherals(peripherals: impl IntoIterator<Item = DiscoveredPeripheral>) -> Self {
        let transport = Self::new();
        transport.state.lock().in_range.extend(peripherals);
        transport
    }

    fn emit(&self, event: TransportEvent) {
        trace!(?event, "Mock transport event");
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Bring a peripheral into range, advertising it if a scan is running
    pub fn add_peripheral(&self, peripheral: DiscoveredPeripheral) {
        let scanning = {
            let mut state = self.state.lock();
            state.in_range.retain(|p| p.id != peripheral.id);
            state.in_range.push(peripheral.clone());
            state.scanning
        };
        if scanning {
            self.emit(TransportEvent::Discovered(peripheral));
        }
    }

    /// Change the advertised name of a peripheral
    pub fn rename(&self, id: &PeripheralId, name: Option<&str>) {
        {
            let mut state = self.state.lock();
            if let Some(p) = state.in_range.iter_mut().find(|p| &p.id == id) {
                p.name = name.map(str::to_owned);
            }
        }
        self.emit(TransportEvent::NameUpdated {
            peripheral: id.clone(),
            name: name.map(str::to_owned),
        });
    }

    /// Push a UART chunk as if the peripheral had notified it.
    ///
    /// Returns `false` when UART is not enabled for the peripheral.
    pub fn inject_rx(&self, id: &PeripheralId, bytes: &[u8]) -> bool {
        let state = self.state.lock();
        match state.sinks.get(id) {
            Some(sink) => sink.send(bytes.to_vec()).is_ok(),
            None => false,
        }
    }

    /// Simulate a link loss
    pub fn drop_connection(&self, id: &PeripheralId) {
        let was_connected = {
            let mut state = self.state.lock();
            state.sinks.remove(id);
            state.connected.remove(id)
        };
        if was_connected {
            self.emit(TransportEvent::Disconnected(id.clone()));
        }
    }

    /// Make connects to `id` fail
    pub fn set_unreachable(&self, id: &PeripheralId) {
        self.state.lock().unreachable.insert(id.clone());
    }

    /// Make `id` lack the UART characteristic
    pub fn set_uart_missing(&self, id: &PeripheralId) {
        self.state.lock().missing_uart.insert(id.clone());
    }

    /// Make service discovery on `id` fail
    pub fn set_service_discovery_failing(&self, id: &PeripheralId) {
        self.state.lock().failing_services.insert(id.clone());
    }

    /// Make disconnect requests for `id` fail, leaving it in place
    pub fn set_disconnect_failing(&self, id: &PeripheralId) {
        self.state.lock().failing_disconnects.insert(id.clone());
    }

    /// Make every write fail with [`TransportEvent::WriteFailed`]
    pub fn set_write_failure(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn set_battery_level(&self, id: &PeripheralId, level: u8) {
        self.state.lock().battery.insert(id.clone(), level);
    }

    /// Writes recorded so far
    pub fn writes(&self) -> Vec<(PeripheralId, Vec<u8>)> {
        self.state.lock().writes.clone()
    }

    /// Drain the recorded writes
    pub fn take_writes(&self) -> Vec<(PeripheralId, Vec<u8>)> {
        std::mem::take(&mut self.state.lock().writes)
    }

    pub fn is_connected(&self, id: &PeripheralId) -> bool {
        self.state.lock().connected.contains(id)
    }

    pub fn is_uart_enabled(&self, id: &PeripheralId) -> bool {
        self.state.lock().sinks.contains_key(id)
    }

    pub fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    /// Number of `disable_uart` calls received
    pub fn uart_disable_calls(&self) -> usize {
        self.state.lock().uart_disable_calls
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn start_scan(&self) -> Result<()> {
        let advertised = {
            let mut state = self.state.lock();
            state.scanning = true;
            state.in_range.clone()
        };
        debug!(peripherals = advertised.len(), "Mock scan started");
        for peripheral in advertised {
            self.emit(TransportEvent::Discovered(peripheral));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.state.lock().scanning = false;
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        let advertised = {
            let state = self.state.lock();
            if state.scanning { state.in_range.clone() } else { Vec::new() }
        };
        for peripheral in advertised {
            self.emit(TransportEvent::Discovered(peripheral));
        }
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<()> {
        let event = {
            let mut state = self.state.lock();
            if state.find(peripheral).is_none() {
                TransportEvent::ConnectFailed {
                    peripheral: peripheral.clone(),
                    reason: "peripheral out of range".to_string(),
                }
            } else if state.unreachable.contains(peripheral) {
                TransportEvent::ConnectFailed {
                    peripheral: peripheral.clone(),
                    reason: "connection timed out".to_string(),
                }
            } else {
                state.connected.insert(peripheral.clone());
                TransportEvent::Connected(peripheral.clone())
            }
        };
        self.emit(event);
        Ok(())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<()> {
        if self.state.lock().failing_disconnects.contains(peripheral) {
            return Err(LinkError::transport(format!("disconnect of {} rejected", peripheral)));
        }
        self.drop_connection(peripheral);
        Ok(())
    }

    async fn discover_services(&self, peripheral: &PeripheralId) -> Result<()> {
        let state = self.state.lock();
        if !state.connected.contains(peripheral) {
            return Err(LinkError::not_connected(peripheral.clone()));
        }
        if state.failing_services.contains(peripheral) {
            return Err(LinkError::ServiceDiscovery {
                peripheral: peripheral.clone(),
                reason: "GATT error".to_string(),
            });
        }
        Ok(())
    }

    async fn enable_uart(&self, peripheral: &PeripheralId, sink: RxSink) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connected.contains(peripheral) {
            return Err(LinkError::not_connected(peripheral.clone()));
        }
        if state.missing_uart.contains(peripheral) {
            return Err(LinkError::characteristic_not_found(peripheral.clone()));
        }
        state.sinks.insert(peripheral.clone(), sink);
        Ok(())
    }

    async fn disable_uart(&self, peripheral: &PeripheralId) -> Result<()> {
        let mut state = self.state.lock();
        state.uart_disable_calls += 1;
        state.sinks.remove(peripheral);
        Ok(())
    }

    fn write(&self, peripheral: &PeripheralId, bytes: Vec<u8>) {
        let failure = {
            let mut state = self.state.lock();
            if state.fail_writes {
                Some("write rejected".to_string())
            } else if !state.connected.contains(peripheral) {
                Some("peripheral not connected".to_string())
            } else {
                state.writes.push((peripheral.clone(), bytes));
                None
            }
        };
        if let Some(reason) = failure {
            self.emit(TransportEvent::WriteFailed { peripheral: peripheral.clone(), reason });
        }
    }

    async fn read_rssi(&self, peripheral: &PeripheralId) -> Result<i16> {
        let state = self.state.lock();
        state
            .find(peripheral)
            .map(|p| p.rssi)
            .ok_or_else(|| LinkError::UnknownPeripheral { peripheral: peripheral.clone() })
    }

    async fn read_battery_level(&self, peripheral: &PeripheralId) -> Result<u8> {
        let state = self.state.lock();
        if !state.connected.contains(peripheral) {
            return Err(LinkError::not_connected(peripheral.clone()));
        }
        Ok(state.battery.get(peripheral).copied().unwrap_or(DEFAULT_BATTERY_LEVEL))
    }
}
