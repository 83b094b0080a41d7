//! Host-side link to Evolution Devices sensor modules over BLE UART.
//!
//! evolink scans for peripherals, connects to one, streams sensor samples to
//! it as checksummed binary frames and caches the text it sends back.
//!
//! # Features
//!
//! - **Frame codec**: `[prefix][f32 LE samples][checksum]` frames with a
//!   pluggable checksum trailer
//! - **Receive cache**: per-peripheral raw and text buffers that survive
//!   reconnects
//! - **Sensor poller**: fixed-cadence streaming of the enabled sensor slots
//! - **Scanning**: filtered, sorted discovery with a cached view
//! - **Transport-agnostic**: any BLE stack behind the [`Transport`] trait
//!
//! # Quick Start
//!
//! ```rust
//! use evolink::transports::MockTransport;
//! use evolink::{Evolink, ModuleMode, PeripheralId, SensorKind};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> evolink::Result<()> {
//!     let transport = Arc::new(MockTransport::new());
//!     let link = Evolink::with_mode(transport.clone(), ModuleMode::Controller);
//!
//!     let mut scanner = link.scanner();
//!     scanner.start_scan().await?;
//!
//!     let sensors = Arc::new(|kind: SensorKind| Some(vec![0.0; kind.arity()]));
//!     let mut session = link.session(PeripheralId::new("EV-0001"), sensors);
//!     session.set_sensor_enabled(SensorKind::Accelerometer, true);
//!
//!     // Not connected, so enabling UART fails
//!     assert!(session.start(link.poll_interval(), None).await.is_err());
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod codec;
pub mod config;
mod error;
pub mod rx_cache;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Link layer
pub mod connection;
pub mod poller;
pub mod stream;
pub mod transport;
pub mod transports;
pub mod uart;

// Core exports
pub use codec::{Checksum, ChecksumKind, FrameCodec, SensorFrame};
pub use config::{LinkConfig, ScanConfig};
pub use error::*;
pub use rx_cache::{RxCache, RxNotice};
pub use types::*;

// Main API exports
pub use connection::{
    ConnectionSession, DeviceRoster, RosterSlot, ScanSession, ScannedPeripheral, SessionListener,
    SessionState,
};
pub use poller::{PollerState, SensorPoller, TickHandler};
pub use transport::{RxSink, Transport, TransportEvent};
pub use uart::UartChannel;

use std::sync::Arc;
use std::time::Duration;

/// Entry point tying a transport, a configuration and one shared receive
/// cache together.
///
/// Sessions created from the same `Evolink` share the cache, so text
/// received before a reconnect is still there afterwards.
///
/// # Examples
///
/// ```rust
/// use evolink::transports::MockTransport;
/// use evolink::{Evolink, LinkConfig};
/// use std::sync::Arc;
///
/// let config = LinkConfig::from_yaml_str("poll_interval_secs: 0.5").unwrap();
/// let link = Evolink::new(Arc::new(MockTransport::new()), config).unwrap();
/// assert_eq!(link.poll_interval().as_millis(), 500);
/// ```
pub struct Evolink {
    transport: Arc<dyn Transport>,
    config: LinkConfig,
    poll_interval: Duration,
    cache: Arc<RxCache>,
}

impl std::fmt::Debug for Evolink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evolink")
            .field("config", &self.config)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl Evolink {
    /// Validate `config` and build the entry point.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Config`] if the poll interval is not a positive
    /// number of seconds.
    pub fn new(transport: Arc<dyn Transport>, config: LinkConfig) -> Result<Self> {
        let poll_interval = config.poll_interval()?;
        Ok(Self { transport, config, poll_interval, cache: Arc::new(RxCache::new()) })
    }

    /// Defaults with the poll interval of `mode`
    pub fn with_mode(transport: Arc<dyn Transport>, mode: ModuleMode) -> Self {
        Self {
            transport,
            config: LinkConfig::for_mode(mode),
            poll_interval: mode.default_poll_interval(),
            cache: Arc::new(RxCache::new()),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Receive cache shared by every session created here
    pub fn rx_cache(&self) -> &Arc<RxCache> {
        &self.cache
    }

    /// Scanner using the configured filters
    pub fn scanner(&self) -> ScanSession {
        ScanSession::new(Arc::clone(&self.transport), self.config.scan.clone())
    }

    /// Session for a connected peripheral
    pub fn session(
        &self,
        peripheral: PeripheralId,
        sensors: Arc<dyn SensorProvider>,
    ) -> ConnectionSession {
        ConnectionSession::with_cache(
            peripheral,
            Arc::clone(&self.transport),
            sensors,
            Arc::clone(&self.cache),
            &self.config,
        )
    }
}
