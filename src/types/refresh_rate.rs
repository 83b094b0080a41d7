//! Update rate control for receive-text streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate at which receive-text snapshots are delivered to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshRate {
    /// Every receive notification
    Native,

    /// At most this many snapshots per second, latest wins
    Max(u32),
}

impl RefreshRate {
    /// Normalize degenerate rates; `Max(0)` cannot be honoured and means `Native`
    pub fn normalize(self) -> Self {
        match self {
            RefreshRate::Max(0) => RefreshRate::Native,
            other => other,
        }
    }

    /// Throttle interval, if any
    pub fn throttle_interval(self) -> Option<Duration> {
        match self.normalize() {
            RefreshRate::Native => None,
            RefreshRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}
