//! Core types shared by the codec, cache and session layers.
//!
//! - [`PeripheralId`] is the stable identity every per-device state is keyed by
//! - [`DiscoveredPeripheral`] is what the transport reports on discovery
//! - [`SensorKind`] and [`SensorChannels`] describe the five streamed sensor slots
//! - [`RefreshRate`] throttles receive-text updates
//! - [`ModuleMode`] carries the polling presets of each mode
//!
//! ```rust
//! use evolink::types::{SensorChannels, SensorKind};
//!
//! let mut channels = SensorChannels::new();
//! channels.set_enabled(SensorKind::Accelerometer, true);
//! assert_eq!(SensorKind::Accelerometer.prefix(), b"!A");
//! assert_eq!(channels.enabled_count(), 1);
//! ```

mod mode;
mod peripheral;
mod refresh_rate;
mod sensor;

pub use mode::ModuleMode;
pub use peripheral::{ConnectionState, DiscoveredPeripheral, PeripheralId};
pub use refresh_rate::RefreshRate;
pub use sensor::{SensorChannels, SensorKind, SensorProvider};
