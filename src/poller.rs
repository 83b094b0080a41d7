//! Sensor poller streaming enabled sensor slots at a fixed cadence

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::types::{SensorChannels, SensorKind, SensorProvider};
use crate::uart::UartChannel;
use crate::{LinkError, Result};

/// Per-tick callback run before the sensor slots are sampled
pub type TickHandler = Box<dyn FnMut() + Send + 'static>;

/// Poller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Armed,
}

/// Samples enabled sensor slots every interval and sends one frame per slot
///
/// The timer runs on its own task. A tick only writes through the
/// transport; it never touches the receive cache.
pub struct SensorPoller {
    uart: UartChannel,
    sensors: Arc<dyn SensorProvider>,
    channels: Arc<RwLock<SensorChannels>>,
    ticks: Arc<AtomicU64>,
    armed: Option<CancellationToken>,
    interval: Option<Duration>,
}

impl fmt::Debug for SensorPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorPoller")
            .field("peripheral", self.uart.peripheral())
            .field("state", &self.state())
            .field("interval", &self.interval)
            .field("channels", &*self.channels.read())
            .finish()
    }
}

impl SensorPoller {
    pub fn new(uart: UartChannel, sensors: Arc<dyn SensorProvider>) -> Self {
        Self {
            uart,
            sensors,
            channels: Arc::new(RwLock::new(SensorChannels::new())),
            ticks: Arc::new(AtomicU64::new(0)),
            armed: None,
            interval: None,
        }
    }

    /// Enable or disable one slot; takes effect from the next tick
    pub fn set_enabled(&self, kind: SensorKind, enabled: bool) {
        self.channels.write().set_enabled(kind, enabled);
    }

    pub fn channels(&self) -> SensorChannels {
        *self.channels.read()
    }

    pub fn state(&self) -> PollerState {
        match &self.armed {
            Some(token) if !token.is_cancelled() => PollerState::Armed,
            _ => PollerState::Idle,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.state() == PollerState::Armed
    }

    /// Interval of the current or last arming
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Ticks fired since the last [`start`](Self::start)
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Arm the timer.
    ///
    /// The first tick fires one `interval` after arming. Calling `start`
    /// while armed cancels the running timer first, so at most one timer is
    /// ever active. Must be called from within a tokio runtime.
    pub fn start(&mut self, interval: Duration, on_tick: Option<TickHandler>) -> Result<()> {
        self.arm(interval, on_tick, CancellationToken::new())
    }

    /// Arm under an externally owned token; cancelling it disarms the poller
    pub(crate) fn arm(
        &mut self,
        interval: Duration,
        on_tick: Option<TickHandler>,
        cancel: CancellationToken,
    ) -> Result<()> {
        if interval.is_zero() {
            return Err(LinkError::config("poll_interval", "must be greater than zero"));
        }

        if let Some(previous) = self.armed.take() {
            debug!("Re-arming sensor poller, cancelling previous timer");
            previous.cancel();
        }

        self.armed = Some(cancel.clone());
        self.interval = Some(interval);
        self.ticks.store(0, Ordering::Relaxed);

        let uart = self.uart.clone();
        let sensors = Arc::clone(&self.sensors);
        let channels = Arc::clone(&self.channels);
        let ticks = Arc::clone(&self.ticks);

        info!(peripheral = %uart.peripheral(), ?interval, "Sensor poller armed");

        tokio::spawn(async move {
            Self::poll_task(uart, sensors, channels, ticks, interval, on_tick, cancel).await;
        });

        Ok(())
    }

    /// Disarm the timer and drop the tick callback.
    ///
    /// Safe in any state, including before the first `start`. A tick that is
    /// already running completes; no new tick fires.
    pub fn stop(&mut self) {
        if let Some(token) = self.armed.take() {
            token.cancel();
            debug!(peripheral = %self.uart.peripheral(), "Sensor poller disarmed");
        }
    }

    /// Sample every enabled slot once and send the frames.
    ///
    /// Returns the number of frames sent.
    pub fn poll_once(&self) -> usize {
        Self::emit_frames(&self.uart, self.sensors.as_ref(), &self.channels)
    }

    async fn poll_task(
        uart: UartChannel,
        sensors: Arc<dyn SensorProvider>,
        channels: Arc<RwLock<SensorChannels>>,
        ticks: Arc<AtomicU64>,
        period: Duration,
        mut on_tick: Option<TickHandler>,
        cancel: CancellationToken,
    ) {
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            let tick = ticks.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(handler) = on_tick.as_mut() {
                handler();
            }

            let sent = Self::emit_frames(&uart, sensors.as_ref(), &channels);
            trace!(tick, frames = sent, "Sensor poll tick");
        }

        debug!(
            peripheral = %uart.peripheral(),
            "Sensor poll task ended after {} ticks",
            ticks.load(Ordering::Relaxed)
        );
    }

    fn emit_frames(
        uart: &UartChannel,
        sensors: &dyn SensorProvider,
        channels: &RwLock<SensorChannels>,
    ) -> usize {
        let channels = *channels.read();
        let mut sent = 0;

        for kind in channels.enabled() {
            let Some(sample) = sensors.sample(kind) else {
                continue;
            };
            if sample.iter().any(|value| !value.is_finite()) {
                warn!(?kind, "Skipping non-finite sensor sample");
                continue;
            }

            let frame = uart.codec().encode(kind.prefix(), &sample);
            uart.write_frame(frame);
            sent += 1;
        }

        sent
    }
}

impl Drop for SensorPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
