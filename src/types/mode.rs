//! Module modes and their polling presets

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// On-screen mode driving a connection session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleMode {
    /// Controller pad: button events plus fast sensor streaming
    Controller,
    /// Run/stopwatch mode
    Run,
}

impl ModuleMode {
    pub fn default_poll_interval(self) -> Duration {
        match self {
            ModuleMode::Controller => Duration::from_millis(250),
            ModuleMode::Run => Duration::from_secs(1),
        }
    }
}
