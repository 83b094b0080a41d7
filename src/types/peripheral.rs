//! Peripheral identity and discovery records

use std::fmt;
use std::sync::Arc;

/// Stable identifier of a physical peripheral.
///
/// All receive and transmit state is keyed by this identity, never by a
/// transient connection handle, so a reconnect lands on the same cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId(Arc<str>);

impl PeripheralId {
    /// Create an identifier from any string-like value
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PeripheralId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Advertisement data reported by the transport for one peripheral
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredPeripheral {
    /// Stable identity
    pub id: PeripheralId,

    /// Advertised local name, if any
    pub name: Option<String>,

    /// Received signal strength in dBm
    pub rssi: i16,

    /// Whether the UART service UUID is advertised
    pub uart_advertised: bool,
}

impl DiscoveredPeripheral {
    /// Create a discovery record
    pub fn new(id: impl Into<PeripheralId>, name: Option<&str>, rssi: i16, uart: bool) -> Self {
        Self { id: id.into(), name: name.map(str::to_owned), rssi, uart_advertised: uart }
    }
}

/// Connection state of the currently selected peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn identity_is_value_based() {
        let a = PeripheralId::new("E4:5F:01:AA");
        let b = PeripheralId::from(String::from("E4:5F:01:AA"));
        assert_eq!(a, b);

        let mut slots = HashMap::new();
        slots.insert(a, 1);
        assert_eq!(slots.get(&b), Some(&1));
        assert_eq!(b.to_string(), "E4:5F:01:AA");
    }
}
