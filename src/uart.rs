//! UART channel bound to one peripheral

use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::Result;
use crate::codec::FrameCodec;
use crate::rx_cache::{RxAppend, RxCache};
use crate::transport::{RxSink, Transport};
use crate::types::PeripheralId;

/// Sends sealed frames to one peripheral and feeds its receive chunks into
/// the shared [`RxCache`]
///
/// Cloning is cheap; clones share the transport and cache.
#[derive(Clone)]
pub struct UartChannel {
    peripheral: PeripheralId,
    transport: Arc<dyn Transport>,
    cache: Arc<RxCache>,
    codec: FrameCodec,
}

impl fmt::Debug for UartChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UartChannel")
            .field("peripheral", &self.peripheral)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl UartChannel {
    pub fn new(
        peripheral: PeripheralId,
        transport: Arc<dyn Transport>,
        cache: Arc<RxCache>,
        codec: FrameCodec,
    ) -> Self {
        Self { peripheral, transport, cache, codec }
    }

    pub fn peripheral(&self) -> &PeripheralId {
        &self.peripheral
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    pub fn cache(&self) -> &Arc<RxCache> {
        &self.cache
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Enable UART notifications, delivering chunks into `sink`.
    ///
    /// On failure nothing else happens; the error is returned as reported by
    /// the transport.
    pub async fn enable(&self, sink: RxSink) -> Result<()> {
        debug!(peripheral = %self.peripheral, "Enabling UART");
        self.transport
            .enable_uart(&self.peripheral, sink)
            .await
            .inspect_err(|e| warn!(peripheral = %self.peripheral, "UART enable failed: {}", e))
    }

    pub async fn disable(&self) -> Result<()> {
        debug!(peripheral = %self.peripheral, "Disabling UART");
        self.transport.disable_uart(&self.peripheral).await
    }

    /// Append a received chunk to the cache, then acknowledge exactly its
    /// bytes
    pub fn handle_rx(&self, chunk: &[u8]) -> RxAppend {
        let outcome = self.cache.append(&self.peripheral, chunk);
        self.cache.consume_first(&self.peripheral, chunk.len());
        outcome
    }

    /// Acknowledge a chunk without caching it
    pub(crate) fn discard_rx(&self, chunk: &[u8]) {
        trace!(peripheral = %self.peripheral, bytes = chunk.len(), "RX cache disabled, chunk dropped");
    }

    /// Seal `payload` with the checksum trailer and write it.
    ///
    /// Fire-and-forget: failures surface as transport events.
    pub fn send(&self, payload: impl Into<Vec<u8>>) {
        let frame = self.codec.seal(payload);
        self.write_frame(frame);
    }

    /// Write an already sealed frame
    pub fn write_frame(&self, frame: Vec<u8>) {
        trace!(peripheral = %self.peripheral, bytes = frame.len(), "TX frame");
        self.transport.write(&self.peripheral, frame);
    }

    /// Accumulated receive text
    pub fn text(&self) -> String {
        self.cache.text_snapshot(&self.peripheral)
    }

    /// Clear this peripheral's receive cache
    pub fn reset_rx(&self) {
        self.cache.reset(&self.peripheral);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LinkError;
    use crate::codec::ChecksumKind;
    use crate::transports::MockTransport;
    use crate::types::DiscoveredPeripheral;
    use tokio::sync::mpsc;

    fn setup() -> (Arc<MockTransport>, UartChannel) {
        let transport =
            Arc::new(MockTransport::with_peripherals([DiscoveredPeripheral::new("EV", None, -50, true)]));
        let channel = UartChannel::new(
            PeripheralId::new("EV"),
            transport.clone(),
            Arc::new(RxCache::new()),
            FrameCodec::new(ChecksumKind::Bluefruit),
        );
        (transport, channel)
    }

    #[test]
    fn rx_chunks_are_cached_and_acknowledged() {
        let (_, channel) = setup();

        let outcome = channel.handle_rx(b"temp=21\n");
        assert_eq!(outcome.text, "temp=21\n");
        assert_eq!(outcome.raw_len, 8);

        // Raw bytes consumed, text kept
        assert_eq!(channel.cache().raw_len(channel.peripheral()), 0);
        assert_eq!(channel.text(), "temp=21\n");

        channel.reset_rx();
        assert_eq!(channel.text(), "");
    }

    #[tokio::test]
    async fn send_appends_trailer() {
        let (transport, channel) = setup();
        transport.connect(channel.peripheral()).await.unwrap();

        channel.send(b"!B51".to_vec());

        let writes = transport.take_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, channel.codec().seal(b"!B51".to_vec()));
    }

    #[tokio::test]
    async fn enable_failure_is_returned() {
        let (transport, channel) = setup();
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = channel.enable(tx.clone()).await.unwrap_err();
        assert!(matches!(err, LinkError::NotConnected { .. }));

        transport.connect(channel.peripheral()).await.unwrap();
        transport.set_uart_missing(channel.peripheral());
        let err = channel.enable(tx).await.unwrap_err();
        assert!(matches!(err, LinkError::CharacteristicNotFound { .. }));
        assert!(!transport.is_uart_enabled(channel.peripheral()));
    }
}
