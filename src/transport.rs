//! Transport trait for BLE backends

use tokio::sync::{broadcast, mpsc};

use crate::Result;
use crate::types::{DiscoveredPeripheral, PeripheralId};

/// Sink the transport pushes every received UART chunk into
pub type RxSink = mpsc::UnboundedSender<Vec<u8>>;

/// Asynchronous notification from the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A peripheral was discovered or re-advertised
    Discovered(DiscoveredPeripheral),

    /// A peripheral changed its advertised name
    NameUpdated { peripheral: PeripheralId, name: Option<String> },

    /// A connect request completed
    Connected(PeripheralId),

    /// A connect request failed
    ConnectFailed { peripheral: PeripheralId, reason: String },

    /// A connection ended, requested or not
    Disconnected(PeripheralId),

    /// A fire-and-forget write could not be delivered
    WriteFailed { peripheral: PeripheralId, reason: String },
}

impl TransportEvent {
    /// Peripheral the event concerns
    pub fn peripheral(&self) -> &PeripheralId {
        match self {
            TransportEvent::Discovered(found) => &found.id,
            TransportEvent::NameUpdated { peripheral, .. } => peripheral,
            TransportEvent::Connected(peripheral) => peripheral,
            TransportEvent::ConnectFailed { peripheral, .. } => peripheral,
            TransportEvent::Disconnected(peripheral) => peripheral,
            TransportEvent::WriteFailed { peripheral, .. } => peripheral,
        }
    }
}

/// BLE backend the sessions are built on
///
/// Implementations own discovery, GATT connections and the UART
/// characteristics. Lifecycle results are reported through [`events`]
/// rather than returned, mirroring how BLE stacks complete requests
/// asynchronously. Requests only fail synchronously when they cannot be
/// issued at all.
///
/// [`events`]: Transport::events
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Subscribe to discovery and lifecycle notifications
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Start reporting advertisements as [`TransportEvent::Discovered`]
    async fn start_scan(&self) -> Result<()>;

    async fn stop_scan(&self) -> Result<()>;

    /// Forget every discovered peripheral that is not connected
    async fn refresh(&self) -> Result<()>;

    /// Request a connection; completion arrives as an event
    async fn connect(&self, peripheral: &PeripheralId) -> Result<()>;

    /// Request a disconnection; completion arrives as an event
    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<()>;

    /// Discover GATT services on a connected peripheral
    async fn discover_services(&self, peripheral: &PeripheralId) -> Result<()>;

    /// Enable notifications on the UART RX characteristic.
    ///
    /// Every received chunk is pushed into `sink` in arrival order.
    ///
    /// # Errors
    ///
    /// - [`LinkError::CharacteristicNotFound`](crate::LinkError::CharacteristicNotFound)
    /// - [`LinkError::NotConnected`](crate::LinkError::NotConnected)
    async fn enable_uart(&self, peripheral: &PeripheralId, sink: RxSink) -> Result<()>;

    /// Disable UART notifications and drop the sink
    async fn disable_uart(&self, peripheral: &PeripheralId) -> Result<()>;

    /// Write bytes to the UART TX characteristic without response.
    ///
    /// Never blocks and never fails synchronously; delivery failures arrive
    /// as [`TransportEvent::WriteFailed`].
    fn write(&self, peripheral: &PeripheralId, bytes: Vec<u8>);

    /// Read the current signal strength in dBm
    async fn read_rssi(&self, peripheral: &PeripheralId) -> Result<i16>;

    /// Read the battery level in percent
    async fn read_battery_level(&self, peripheral: &PeripheralId) -> Result<u8>;
}
