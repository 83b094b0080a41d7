//! Connected-peripheral session: UART, receive pump and sensor poller

use futures::stream::{BoxStream, Stream, StreamExt};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::LinkConfig;
use crate::poller::{SensorPoller, TickHandler};
use crate::rx_cache::{RxCache, RxNotice};
use crate::stream::ThrottleExt;
use crate::transport::{Transport, TransportEvent};
use crate::types::{PeripheralId, RefreshRate, SensorChannels, SensorKind, SensorProvider};
use crate::uart::UartChannel;
use crate::{LinkError, Result};

/// Callbacks from a running [`ConnectionSession`]
///
/// Called from the session's background task, so implementations must not
/// block.
pub trait SessionListener: Send + Sync + 'static {
    /// UART enabling finished
    fn on_uart_ready(&self, peripheral: &PeripheralId, result: Result<(), &LinkError>);

    /// New text was appended to the receive cache
    fn on_uart_rx(&self, _peripheral: &PeripheralId) {}

    /// The peripheral disconnected while streaming
    fn on_disconnected(&self, _peripheral: &PeripheralId) {}

    /// A write could not be delivered
    fn on_transport_error(&self, _error: &LinkError) {}
}

/// Listener slot shared between a session and its receive pump
type ListenerSlot = Arc<RwLock<Option<Arc<dyn SessionListener>>>>;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    EnablingUart,
    Streaming,
}

/// Streams sensor frames to one connected peripheral and caches what it
/// sends back
///
/// `start` enables UART notifications, spawns the receive pump and arms the
/// poller; `stop` undoes all three. Received chunks are appended to the
/// shared [`RxCache`] by the pump task only.
pub struct ConnectionSession {
    uart: UartChannel,
    poller: SensorPoller,
    state: Arc<watch::Sender<SessionState>>,
    listener: ListenerSlot,
    rx_cache_enabled: Arc<AtomicBool>,
    run: Option<CancellationToken>,
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("peripheral", self.uart.peripheral())
            .field("state", &self.state())
            .field("rx_cache_enabled", &self.is_rx_cache_enabled())
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

impl ConnectionSession {
    /// Session with its own receive cache
    pub fn new(
        peripheral: PeripheralId,
        transport: Arc<dyn Transport>,
        sensors: Arc<dyn SensorProvider>,
        config: &LinkConfig,
    ) -> Self {
        Self::with_cache(peripheral, transport, sensors, Arc::new(RxCache::new()), config)
    }

    /// Session sharing `cache` with other sessions.
    ///
    /// Cache entries are keyed by peripheral, so a reconnect to the same
    /// peripheral picks up the text received before.
    pub fn with_cache(
        peripheral: PeripheralId,
        transport: Arc<dyn Transport>,
        sensors: Arc<dyn SensorProvider>,
        cache: Arc<RxCache>,
        config: &LinkConfig,
    ) -> Self {
        let uart = UartChannel::new(peripheral, transport, cache, config.codec());
        let poller = SensorPoller::new(uart.clone(), sensors);
        let (state, _) = watch::channel(SessionState::Disconnected);

        Self {
            uart,
            poller,
            state: Arc::new(state),
            listener: Arc::new(RwLock::new(None)),
            rx_cache_enabled: Arc::new(AtomicBool::new(config.rx_cache_enabled)),
            run: None,
        }
    }

    pub fn peripheral(&self) -> &PeripheralId {
        self.uart.peripheral()
    }

    /// Register the listener, replacing any previous one.
    ///
    /// Takes effect immediately, including for a session already streaming.
    pub fn set_listener(&mut self, listener: Arc<dyn SessionListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Detach the listener; no further callbacks are delivered to it
    pub fn clear_listener(&mut self) {
        *self.listener.write() = None;
    }

    fn current_listener(&self) -> Option<Arc<dyn SessionListener>> {
        self.listener.read().clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Current state followed by every change
    pub fn state_updates(&self) -> impl Stream<Item = SessionState> + 'static {
        WatchStream::new(self.state.subscribe())
    }

    pub fn poller(&self) -> &SensorPoller {
        &self.poller
    }

    /// Enable UART, start caching received data and arm the sensor poller.
    ///
    /// The listener's `on_uart_ready` fires with the enable result. On
    /// failure the session stays disconnected and the poller is not armed.
    /// Calling `start` while streaming re-arms the poller with the new
    /// interval and callback.
    pub async fn start(
        &mut self,
        poll_interval: Duration,
        on_tick: Option<TickHandler>,
    ) -> Result<()> {
        if poll_interval.is_zero() {
            return Err(LinkError::config("poll_interval", "must be greater than zero"));
        }

        if self.state() == SessionState::Streaming
            && let Some(run) = self.run.as_ref().filter(|run| !run.is_cancelled())
        {
            debug!(peripheral = %self.peripheral(), "Session already streaming, re-arming poller");
            return self.poller.arm(poll_interval, on_tick, run.child_token());
        }

        if let Some(stale) = self.run.take() {
            stale.cancel();
        }

        self.state.send_replace(SessionState::EnablingUart);

        // Subscribe before enabling so an early disconnect is not missed
        let events = self.uart.transport().events();
        let (sink, chunks) = mpsc::unbounded_channel();

        if let Err(e) = self.uart.enable(sink).await {
            if let Some(listener) = self.current_listener() {
                listener.on_uart_ready(self.peripheral(), Err(&e));
            }
            self.state.send_replace(SessionState::Disconnected);
            return Err(e);
        }

        if let Some(listener) = self.current_listener() {
            listener.on_uart_ready(self.peripheral(), Ok(()));
        }

        let run = CancellationToken::new();
        self.poller.arm(poll_interval, on_tick, run.child_token())?;

        let pump = RxPump {
            uart: self.uart.clone(),
            listener: Arc::clone(&self.listener),
            rx_cache_enabled: Arc::clone(&self.rx_cache_enabled),
            state: Arc::clone(&self.state),
            cancel: run.clone(),
        };
        tokio::spawn(pump.drive(chunks, events));

        self.run = Some(run);
        self.state.send_replace(SessionState::Streaming);
        info!(peripheral = %self.peripheral(), ?poll_interval, "Session streaming");

        Ok(())
    }

    /// Disarm the poller, stop the receive pump and disable UART.
    ///
    /// Safe to call in any state and more than once. After a link loss the
    /// run is already cancelled and UART is left alone.
    pub async fn stop(&mut self) {
        self.poller.stop();

        if let Some(run) = self.run.take() {
            if run.is_cancelled() {
                debug!(peripheral = %self.peripheral(), "Link already lost, skipping UART disable");
            } else {
                run.cancel();
                if let Err(e) = self.uart.disable().await {
                    warn!(peripheral = %self.peripheral(), "Failed to disable UART: {}", e);
                }
            }
            info!(peripheral = %self.peripheral(), "Session stopped");
        }

        self.state.send_replace(SessionState::Disconnected);
    }

    /// Send a command with the checksum trailer appended
    pub fn send_command(&self, payload: impl Into<Vec<u8>>) {
        self.uart.send(payload);
    }

    /// Send a control-pad button press or release
    pub fn send_button(&self, tag: u32, pressed: bool) {
        let frame = self.uart.codec().encode_button(tag, pressed);
        self.uart.write_frame(frame);
    }

    pub fn set_sensor_enabled(&self, kind: SensorKind, enabled: bool) {
        self.poller.set_enabled(kind, enabled);
    }

    pub fn sensor_channels(&self) -> SensorChannels {
        self.poller.channels()
    }

    /// Received text accumulated for this peripheral
    pub fn uart_text(&self) -> String {
        self.uart.text()
    }

    pub fn reset_rx_cache(&self) {
        self.uart.reset_rx();
    }

    /// Toggle caching of received data; takes effect for the next chunk
    pub fn set_rx_cache_enabled(&self, enabled: bool) {
        self.rx_cache_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_rx_cache_enabled(&self) -> bool {
        self.rx_cache_enabled.load(Ordering::Relaxed)
    }

    /// Snapshot of the received text after every append, at most once per
    /// throttle interval
    pub fn rx_text_updates(&self, rate: RefreshRate) -> BoxStream<'static, String> {
        let cache = Arc::clone(self.uart.cache());
        let peripheral = self.peripheral().clone();
        let notices = WatchStream::from_changes(cache.subscribe(&peripheral));
        let snapshot = move |_: Option<RxNotice>| cache.text_snapshot(&peripheral);

        match rate.throttle_interval() {
            None => notices.map(snapshot).boxed(),
            Some(interval) => notices.throttle(interval).map(snapshot).boxed(),
        }
    }

    pub async fn read_rssi(&self) -> Result<i16> {
        self.uart.transport().read_rssi(self.peripheral()).await
    }

    pub async fn read_battery_level(&self) -> Result<u8> {
        self.uart.transport().read_battery_level(self.peripheral()).await
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            debug!(peripheral = %self.peripheral(), "Dropping streaming session");
            run.cancel();
        }
    }
}

/// Background task moving received chunks into the cache and watching the
/// transport for this peripheral's disconnect
struct RxPump {
    uart: UartChannel,
    listener: ListenerSlot,
    rx_cache_enabled: Arc<AtomicBool>,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
}

impl RxPump {
    fn listener(&self) -> Option<Arc<dyn SessionListener>> {
        self.listener.read().clone()
    }

    async fn drive(
        self,
        mut chunks: mpsc::UnboundedReceiver<Vec<u8>>,
        mut events: broadcast::Receiver<TransportEvent>,
    ) {
        let peripheral = self.uart.peripheral().clone();
        let mut chunks_open = true;
        let mut events_open = true;

        while chunks_open || events_open {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                chunk = chunks.recv(), if chunks_open => match chunk {
                    Some(chunk) => self.on_chunk(&chunk),
                    None => {
                        debug!(%peripheral, "UART sink closed");
                        chunks_open = false;
                    }
                },
                event = events.recv(), if events_open => match event {
                    Ok(TransportEvent::Disconnected(id)) if id == peripheral => {
                        self.on_disconnected(&peripheral);
                        break;
                    }
                    Ok(TransportEvent::WriteFailed { peripheral: id, reason }) if id == peripheral => {
                        warn!(%peripheral, "UART write failed: {}", reason);
                        if let Some(listener) = self.listener() {
                            listener.on_transport_error(&LinkError::WriteFailed {
                                peripheral: id,
                                reason,
                            });
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%peripheral, skipped, "Transport events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(%peripheral, "Transport event channel closed");
                        events_open = false;
                    }
                },
            }
        }

        trace!(%peripheral, "RX pump ended");
    }

    fn on_chunk(&self, chunk: &[u8]) {
        if !self.rx_cache_enabled.load(Ordering::Relaxed) {
            self.uart.discard_rx(chunk);
            return;
        }

        let appended = self.uart.handle_rx(chunk);
        if appended.text.is_empty() {
            return;
        }
        if let Some(listener) = self.listener() {
            listener.on_uart_rx(self.uart.peripheral());
        }
    }

    fn on_disconnected(&self, peripheral: &PeripheralId) {
        warn!(%peripheral, "Peripheral disconnected while streaming");
        // Disarms the poller armed under this run
        self.cancel.cancel();
        self.state.send_replace(SessionState::Disconnected);
        if let Some(listener) = self.listener() {
            listener.on_disconnected(peripheral);
        }
    }
}
