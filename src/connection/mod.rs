//! Scanning for peripherals and streaming to a connected one
//!
//! [`ScanSession`] owns discovery, filtering and selection. Once the
//! selected peripheral is connected, a [`ConnectionSession`] enables UART,
//! caches what the peripheral sends and streams sensor frames to it.

pub mod roster;
pub mod scan;
pub mod session;

pub use roster::{DeviceRoster, RosterSlot};
pub use scan::{ScanSession, ScannedPeripheral};
pub use session::{ConnectionSession, SessionListener, SessionState};

#[cfg(test)]
mod tests;
