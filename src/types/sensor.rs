//! Sensor channel slots streamed by the poller

use serde::{Deserialize, Serialize};

/// One of the fixed sensor slots, in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Quaternion,
    Accelerometer,
    Gyroscope,
    Magnetometer,
    Location,
}

impl SensorKind {
    /// Number of slots
    pub const COUNT: usize = 5;

    /// All slots in polling order
    pub const ALL: [SensorKind; Self::COUNT] = [
        SensorKind::Quaternion,
        SensorKind::Accelerometer,
        SensorKind::Gyroscope,
        SensorKind::Magnetometer,
        SensorKind::Location,
    ];

    /// Wire prefix tag that opens every frame of this slot
    pub fn prefix(self) -> &'static [u8] {
        match self {
            SensorKind::Quaternion => b"!Q",
            SensorKind::Accelerometer => b"!A",
            SensorKind::Gyroscope => b"!G",
            SensorKind::Magnetometer => b"!M",
            SensorKind::Location => b"!L",
        }
    }

    /// Slot index in polling order
    pub fn index(self) -> usize {
        self as usize
    }

    /// Number of samples the firmware expects for this slot
    pub fn arity(self) -> usize {
        match self {
            SensorKind::Quaternion => 4,
            _ => 3,
        }
    }
}

/// Enabled flags for the five sensor slots
///
/// Every slot starts disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorChannels {
    enabled: [bool; SensorKind::COUNT],
}

impl SensorChannels {
    /// All slots disabled
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&mut self, kind: SensorKind, enabled: bool) {
        self.enabled[kind.index()] = enabled;
    }

    pub fn is_enabled(&self, kind: SensorKind) -> bool {
        self.enabled[kind.index()]
    }

    /// Enabled slots in polling order
    pub fn enabled(&self) -> impl Iterator<Item = SensorKind> + '_ {
        SensorKind::ALL.into_iter().filter(|kind| self.is_enabled(*kind))
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled.iter().filter(|on| **on).count()
    }
}

/// Source of sample vectors for the poller
///
/// Returning `None` means no data is available yet for that slot. The
/// poller skips the slot for this tick without treating it as an error.
pub trait SensorProvider: Send + Sync + 'static {
    fn sample(&self, kind: SensorKind) -> Option<Vec<f64>>;
}

impl<F> SensorProvider for F
where
    F: Fn(SensorKind) -> Option<Vec<f64>> + Send + Sync + 'static,
{
    fn sample(&self, kind: SensorKind) -> Option<Vec<f64>> {
        self(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_follow_slot_order() {
        let prefixes: Vec<&[u8]> = SensorKind::ALL.iter().map(|k| k.prefix()).collect();
        assert_eq!(prefixes, vec![&b"!Q"[..], b"!A", b"!G", b"!M", b"!L"]);
        for (i, kind) in SensorKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn channels_start_disabled() {
        let mut channels = SensorChannels::new();
        assert_eq!(channels.enabled_count(), 0);

        channels.set_enabled(SensorKind::Gyroscope, true);
        channels.set_enabled(SensorKind::Accelerometer, true);
        let enabled: Vec<_> = channels.enabled().collect();
        assert_eq!(enabled, vec![SensorKind::Accelerometer, SensorKind::Gyroscope]);

        channels.set_enabled(SensorKind::Gyroscope, false);
        assert!(!channels.is_enabled(SensorKind::Gyroscope));
        assert_eq!(channels.enabled_count(), 1);
    }

    #[test]
    fn closures_are_providers() {
        let provider = |kind: SensorKind| match kind {
            SensorKind::Accelerometer => Some(vec![0.0, 0.0, 9.81]),
            _ => None,
        };
        assert_eq!(provider.sample(SensorKind::Accelerometer), Some(vec![0.0, 0.0, 9.81]));
        assert_eq!(provider.sample(SensorKind::Location), None);
    }
}
