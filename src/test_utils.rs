//! Test utilities shared by unit tests, integration tests and benches
//!
//! - [`FixedSensors`]: a [`SensorProvider`] returning canned sample vectors
//! - [`RecordingListener`]: a [`SessionListener`] that records every callback
//! - [`demo_peripherals`]: a small, varied set of advertisements

#![cfg(any(test, feature = "benchmark"))]

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::LinkError;
use crate::connection::SessionListener;
use crate::types::{DiscoveredPeripheral, PeripheralId, SensorKind, SensorProvider};

/// Sensor provider with a fixed sample per slot
#[derive(Debug, Clone, Default)]
pub struct FixedSensors {
    samples: HashMap<SensorKind, Vec<f64>>,
}

impl FixedSensors {
    /// Provider with no data for any slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider with plausible data for every slot
    pub fn demo() -> Self {
        Self::new()
            .with(SensorKind::Quaternion, vec![0.0, 0.0, 0.0, 1.0])
            .with(SensorKind::Accelerometer, vec![0.1, 0.2, 0.3])
            .with(SensorKind::Gyroscope, vec![0.01, -0.02, 0.03])
            .with(SensorKind::Magnetometer, vec![22.5, -4.0, 40.1])
            .with(SensorKind::Location, vec![52.52, 13.405, 34.0])
    }

    pub fn with(mut self, kind: SensorKind, sample: Vec<f64>) -> Self {
        self.samples.insert(kind, sample);
        self
    }
}

impl SensorProvider for FixedSensors {
    fn sample(&self, kind: SensorKind) -> Option<Vec<f64>> {
        self.samples.get(&kind).cloned()
    }
}

/// One recorded listener callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    UartReady(Result<(), String>),
    UartRx(PeripheralId),
    Disconnected(PeripheralId),
    TransportError(String),
}

/// Listener that records callbacks in arrival order
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&ListenerEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| matches(event)).count()
    }
}

impl SessionListener for RecordingListener {
    fn on_uart_ready(&self, _peripheral: &PeripheralId, result: Result<(), &LinkError>) {
        self.events.lock().push(ListenerEvent::UartReady(result.map_err(|e| e.to_string())));
    }

    fn on_uart_rx(&self, peripheral: &PeripheralId) {
        self.events.lock().push(ListenerEvent::UartRx(peripheral.clone()));
    }

    fn on_disconnected(&self, peripheral: &PeripheralId) {
        self.events.lock().push(ListenerEvent::Disconnected(peripheral.clone()));
    }

    fn on_transport_error(&self, error: &LinkError) {
        self.events.lock().push(ListenerEvent::TransportError(error.to_string()));
    }
}

/// Named and unnamed, UART-capable and not
pub fn demo_peripherals() -> Vec<DiscoveredPeripheral> {
    vec![
        DiscoveredPeripheral::new("EV-0003", Some("Evolution Right"), -71, true),
        DiscoveredPeripheral::new("EV-0001", Some("Evolution Left"), -58, true),
        DiscoveredPeripheral::new("HR-0009", Some("Heart Rate"), -80, false),
        DiscoveredPeripheral::new("ANON-01", None, -90, true),
        DiscoveredPeripheral::new("ANON-02", None, -85, false),
    ]
}
