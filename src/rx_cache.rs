//! Per-peripheral receive cache
//!
//! Every peripheral identity owns two independent representations of the
//! bytes received from it:
//!
//! - a raw byte buffer, drained from the front only by [`RxCache::consume_first`]
//! - a text buffer, append-only until [`RxCache::reset`]
//!
//! Consuming raw bytes never touches the text, so a reader can acknowledge a
//! chunk right after it has been decoded without losing the accumulated text.
//!
//! Entries are created lazily on the first receive or subscription and are
//! never removed on disconnect, only cleared. Each entry sits behind its own
//! mutex and publishes its own notices, so receives for different
//! peripherals never contend and never overwrite each other's notices.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::trace;

use crate::codec::TextDecoder;
use crate::types::PeripheralId;

/// "Data available" notification published after an append produced text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxNotice {
    /// Peripheral the data came from
    pub peripheral: PeripheralId,

    /// Raw bytes in the appended chunk
    pub appended_bytes: usize,

    /// Length of the text buffer after the append
    pub text_len: usize,

    /// Monotonic notice counter across all peripherals
    pub sequence: u64,
}

/// Outcome of one append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxAppend {
    /// Text completed by this chunk
    pub text: String,

    /// Raw bytes buffered after the append
    pub raw_len: usize,
}

#[derive(Debug, Default)]
struct RxBuffers {
    raw: VecDeque<u8>,
    text: String,
    decoder: TextDecoder,
}

impl RxBuffers {
    fn clear(&mut self) {
        self.raw.clear();
        self.text.clear();
        self.decoder.reset();
    }
}

#[derive(Debug)]
struct RxEntry {
    buffers: Mutex<RxBuffers>,
    notices: watch::Sender<Option<RxNotice>>,
}

impl Default for RxEntry {
    fn default() -> Self {
        let (notices, _) = watch::channel(None);
        Self { buffers: Mutex::new(RxBuffers::default()), notices }
    }
}

/// Receive cache keyed by peripheral identity
#[derive(Debug)]
pub struct RxCache {
    entries: RwLock<HashMap<PeripheralId, Arc<RxEntry>>>,
    sequence: AtomicU64,
}

impl Default for RxCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RxCache {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()), sequence: AtomicU64::new(0) }
    }

    fn entry(&self, id: &PeripheralId) -> Arc<RxEntry> {
        if let Some(entry) = self.entries.read().get(id) {
            return Arc::clone(entry);
        }
        Arc::clone(self.entries.write().entry(id.clone()).or_default())
    }

    fn existing(&self, id: &PeripheralId) -> Option<Arc<RxEntry>> {
        self.entries.read().get(id).cloned()
    }

    /// Append a received chunk and decode it into the text buffer
    pub fn append(&self, id: &PeripheralId, bytes: &[u8]) -> RxAppend {
        if bytes.is_empty() {
            return RxAppend { text: String::new(), raw_len: self.raw_len(id) };
        }

        let entry = self.entry(id);
        let (text, raw_len, text_len) = {
            let mut buffers = entry.buffers.lock();
            buffers.raw.extend(bytes.iter().copied());
            let text = buffers.decoder.push(bytes);
            buffers.text.push_str(&text);
            (text, buffers.raw.len(), buffers.text.len())
        };

        trace!(peripheral = %id, bytes = bytes.len(), chars = text.chars().count(), "RX appended");

        if !text.is_empty() {
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            entry.notices.send_replace(Some(RxNotice {
                peripheral: id.clone(),
                appended_bytes: bytes.len(),
                text_len,
                sequence,
            }));
        }

        RxAppend { text, raw_len }
    }

    /// Remove up to `n` bytes from the front of the raw buffer.
    ///
    /// Returns how many bytes were actually removed; `n` is clamped to the
    /// buffered length.
    pub fn consume_first(&self, id: &PeripheralId, n: usize) -> usize {
        let Some(entry) = self.existing(id) else {
            return 0;
        };
        let mut buffers = entry.buffers.lock();
        let n = n.min(buffers.raw.len());
        buffers.raw.drain(..n);
        n
    }

    /// Clear raw bytes, text and any partially received character
    pub fn reset(&self, id: &PeripheralId) {
        if let Some(entry) = self.existing(id) {
            entry.buffers.lock().clear();
        }
    }

    /// Clear every entry
    pub fn clear_all(&self) {
        for entry in self.entries.read().values() {
            entry.buffers.lock().clear();
        }
    }

    /// Current accumulated text
    pub fn text_snapshot(&self, id: &PeripheralId) -> String {
        self.existing(id).map(|entry| entry.buffers.lock().text.clone()).unwrap_or_default()
    }

    /// Raw bytes not yet consumed
    pub fn raw_len(&self, id: &PeripheralId) -> usize {
        self.existing(id).map(|entry| entry.buffers.lock().raw.len()).unwrap_or(0)
    }

    /// Whether an entry has ever been created for `id`
    pub fn contains(&self, id: &PeripheralId) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Subscribe to "data available" notices for `id`.
    ///
    /// Creates the entry if nothing was received yet, so a subscription made
    /// before the first chunk still sees it.
    pub fn subscribe(&self, id: &PeripheralId) -> watch::Receiver<Option<RxNotice>> {
        self.entry(id).notices.subscribe()
    }
}
