//! Error types for the UART link.
//!
//! All errors implement `std::error::Error` and carry enough context to tell
//! which peripheral and which step failed.
//!
//! ## Error Categories
//!
//! - **Transport Errors**: missing UART characteristic, peripheral not
//!   connected, failed writes, failed connects or service discovery
//! - **Selection Errors**: connect conflicts and unknown peripherals
//! - **Frame Errors**: malformed or corrupted frames handed to the decoder
//! - **Configuration Errors**: invalid or unparsable [`LinkConfig`](crate::LinkConfig)
//!
//! Malformed UTF-8 on the receive path is not an error. The decoder drops it
//! and logs a warning.
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use evolink::{LinkError, PeripheralId};
//!
//! let error = LinkError::not_connected(PeripheralId::new("C0:FF:EE"));
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use thiserror::Error;

use crate::types::PeripheralId;

/// Result type alias for link operations.
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

/// Main error type for link operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("UART characteristic not found on {peripheral}")]
    CharacteristicNotFound { peripheral: PeripheralId },

    #[error("Peripheral {peripheral} is not connected")]
    NotConnected { peripheral: PeripheralId },

    #[error("Write to {peripheral} failed: {reason}")]
    WriteFailed { peripheral: PeripheralId, reason: String },

    #[error("Transport error: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Failed to connect to {peripheral}: {reason}")]
    ConnectFailed { peripheral: PeripheralId, reason: String },

    #[error("Service discovery failed on {peripheral}: {reason}")]
    ServiceDiscovery { peripheral: PeripheralId, reason: String },

    #[error("Connect to {requested} requested while {pending} is still connecting")]
    ConnectConflict { pending: PeripheralId, requested: PeripheralId },

    #[error("Peripheral {peripheral} has not been discovered")]
    UnknownPeripheral { peripheral: PeripheralId },

    #[error("Decode error in {context}: {details}")]
    Decode { context: String, details: String },

    #[error("Checksum mismatch: expected {expected:02x?}, found {found:02x?}")]
    ChecksumMismatch { expected: Vec<u8>, found: Vec<u8> },

    #[error("Invalid configuration for '{field}': {details}")]
    Config { field: String, details: String },

    #[error("Failed to parse configuration")]
    ConfigParse {
        #[source]
        source: serde_yaml_ng::Error,
    },
}

impl LinkError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::NotConnected { .. } => true,
            LinkError::WriteFailed { .. } => true,
            LinkError::Transport { .. } => true,
            LinkError::ConnectFailed { .. } => true,
            LinkError::ServiceDiscovery { .. } => true,
            LinkError::ConnectConflict { .. } => true,
            LinkError::CharacteristicNotFound { .. } => false,
            LinkError::UnknownPeripheral { .. } => false,
            LinkError::Decode { .. } => false,
            LinkError::ChecksumMismatch { .. } => false,
            LinkError::Config { .. } => false,
            LinkError::ConfigParse { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            LinkError::CharacteristicNotFound { .. } => vec![
                "Check that the peripheral firmware exposes the UART service",
                "Rediscover services after reconnecting",
            ],
            LinkError::NotConnected { .. } => vec![
                "Connect to the peripheral before enabling UART",
                "Check that the peripheral is powered and in range",
            ],
            LinkError::WriteFailed { .. } => vec![
                "Check the connection state of the peripheral",
                "Reduce the polling rate if writes are queueing up",
            ],
            LinkError::Transport { .. } => vec![
                "Check that Bluetooth is powered on and authorized",
                "Restart scanning",
            ],
            LinkError::ConnectFailed { .. } => vec![
                "Move closer to the peripheral",
                "Power cycle the peripheral and rescan",
            ],
            LinkError::ServiceDiscovery { .. } => vec![
                "Disconnect and connect again",
                "Power cycle the peripheral",
            ],
            LinkError::ConnectConflict { .. } => vec![
                "Wait for the pending connection to finish",
                "Disconnect the pending peripheral first",
            ],
            LinkError::UnknownPeripheral { .. } => vec![
                "Start scanning and wait for the peripheral to be discovered",
                "Refresh the peripheral list",
            ],
            LinkError::Decode { .. } => vec![
                "Check that the frame prefix length matches the channel",
                "Verify the frame was captured completely",
            ],
            LinkError::ChecksumMismatch { .. } => vec![
                "Check that both sides use the same checksum algorithm",
                "Verify the frame was not truncated in transit",
            ],
            LinkError::Config { .. } | LinkError::ConfigParse { .. } => vec![
                "Check the configuration file against the documented fields",
                "Remove the field to fall back to its default",
            ],
        }
    }

    /// Helper constructor for a peripheral that is not connected.
    pub fn not_connected(peripheral: PeripheralId) -> Self {
        LinkError::NotConnected { peripheral }
    }

    /// Helper constructor for a missing UART characteristic.
    pub fn characteristic_not_found(peripheral: PeripheralId) -> Self {
        LinkError::CharacteristicNotFound { peripheral }
    }

    /// Helper constructor for generic transport errors.
    pub fn transport(reason: impl Into<String>) -> Self {
        LinkError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        LinkError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for frame decode errors.
    pub fn decode(context: impl Into<String>, details: impl Into<String>) -> Self {
        LinkError::Decode { context: context.into(), details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(field: impl Into<String>, details: impl Into<String>) -> Self {
        LinkError::Config { field: field.into(), details: details.into() }
    }
}

impl From<serde_yaml_ng::Error> for LinkError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        LinkError::ConfigParse { source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn messages_carry_their_context(
            id in "[A-F0-9:]{1,17}",
            reason in ".*",
            details in ".*"
          ) {
            let peripheral = PeripheralId::new(id.clone());

            let write = LinkError::WriteFailed { peripheral: peripheral.clone(), reason: reason.clone() };
            prop_assert!(write.to_string().contains(&id));
            prop_assert!(write.to_string().contains(&reason));

            let not_connected = LinkError::not_connected(peripheral.clone());
            prop_assert!(not_connected.to_string().contains(&id));

            let decode = LinkError::decode("sensor frame", details.clone());
            prop_assert!(decode.to_string().contains(&details));
          }

          #[test]
          fn checksum_mismatch_prints_hex(expected in any::<u8>(), found in any::<u8>()) {
            let err = LinkError::ChecksumMismatch { expected: vec![expected], found: vec![found] };
            let msg = err.to_string();
            let expected_hex = format!("{:02x}", expected);
            let found_hex = format!("{:02x}", found);
            prop_assert!(msg.contains(&expected_hex));
            prop_assert!(msg.contains(&found_hex));
          }

          #[test]
          fn transport_source_chain_is_preserved(base_message in ".*") {
            let err = LinkError::transport_with_source(
              "notify failed",
              Box::new(std::io::Error::other(base_message.clone())),
            );
            let source = std::error::Error::source(&err);
            prop_assert!(source.is_some());
            prop_assert_eq!(source.map(|s| s.to_string()), Some(base_message));
          }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<LinkError>();

        let error = LinkError::transport("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn retry_classification() {
        let id = PeripheralId::new("AA");
        assert!(LinkError::not_connected(id.clone()).is_retryable());
        assert!(!LinkError::characteristic_not_found(id.clone()).is_retryable());
        assert!(!LinkError::config("poll_interval_secs", "must be positive").is_retryable());
        assert!(
            LinkError::ConnectConflict { pending: id.clone(), requested: PeripheralId::new("BB") }
                .is_retryable()
        );

        for suggestion in LinkError::characteristic_not_found(id).recovery_suggestions() {
            assert!(suggestion.len() > 5);
        }
    }

    #[test]
    fn every_link_failure_suggests_a_recovery() {
        let id = PeripheralId::new("AA");
        let errors = [
            LinkError::characteristic_not_found(id.clone()),
            LinkError::not_connected(id.clone()),
            LinkError::WriteFailed { peripheral: id.clone(), reason: "busy".into() },
            LinkError::transport("adapter gone"),
            LinkError::ConnectFailed { peripheral: id.clone(), reason: "out of range".into() },
            LinkError::ServiceDiscovery { peripheral: id.clone(), reason: "GATT".into() },
            LinkError::ConnectConflict { pending: id.clone(), requested: PeripheralId::new("BB") },
            LinkError::UnknownPeripheral { peripheral: id },
            LinkError::config("poll_interval_secs", "must be positive"),
        ];

        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty(), "{error}");
            assert!(suggestions.iter().all(|s| !s.to_lowercase().contains("timeout")));
        }
    }

    #[test]
    fn yaml_errors_convert() {
        let err = serde_yaml_ng::from_str::<u32>("not: [a number").unwrap_err();
        let link: LinkError = err.into();
        assert!(matches!(link, LinkError::ConfigParse { .. }));
        assert!(std::error::Error::source(&link).is_some());
    }
}
