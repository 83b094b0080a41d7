//! Runtime configuration for sessions and scanning
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```rust
//! use evolink::LinkConfig;
//!
//! let config = LinkConfig::from_yaml_str(
//!     "poll_interval_secs: 0.25\nscan:\n  show_unnamed: true\n",
//! ).unwrap();
//! assert_eq!(config.poll_interval().unwrap().as_millis(), 250);
//! assert!(config.scan.only_uart);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::codec::{ChecksumKind, FrameCodec};
use crate::types::ModuleMode;
use crate::{LinkError, Result};

/// Filters and selection policy for [`ScanSession`](crate::ScanSession)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Hide peripherals that do not advertise the UART service
    pub only_uart: bool,

    /// Show peripherals without an advertised name
    pub show_unnamed: bool,

    /// Cancel a pending connect when another peripheral is selected.
    /// When false the second request is rejected.
    pub cancel_pending_on_reselect: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { only_uart: true, show_unnamed: false, cancel_pending_on_reselect: true }
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Sensor poll interval in seconds
    pub poll_interval_secs: f64,

    /// Checksum trailer algorithm
    pub checksum: ChecksumKind,

    /// Cache received UART data
    pub rx_cache_enabled: bool,

    pub scan: ScanConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1.0,
            checksum: ChecksumKind::default(),
            rx_cache_enabled: true,
            scan: ScanConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Defaults with the poll interval preset of `mode`
    pub fn for_mode(mode: ModuleMode) -> Self {
        Self { poll_interval_secs: mode.default_poll_interval().as_secs_f64(), ..Self::default() }
    }

    /// Parse a YAML document and validate it
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: LinkConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.poll_interval().map(|_| ())
    }

    /// Poll interval as a [`Duration`]
    pub fn poll_interval(&self) -> Result<Duration> {
        let secs = self.poll_interval_secs;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(LinkError::config(
                "poll_interval_secs",
                format!("must be a positive number of seconds, got {}", secs),
            ));
        }
        Ok(Duration::from_secs_f64(secs))
    }

    /// Codec using the configured checksum
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.checksum)
    }
}
