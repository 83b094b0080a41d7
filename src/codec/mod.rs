//! Frame codec for the UART service.
//!
//! Outgoing frames are laid out as
//!
//! ```text
//! [prefix tag][N x f32 little-endian][checksum trailer]
//! ```
//!
//! Button events use the same trailer over the UTF-8 text
//! `"!B" + tag + "1" | "0"`. Incoming data is treated as UTF-8 text; see
//! [`TextDecoder`].
//!
//! ```rust
//! use evolink::codec::{ChecksumKind, FrameCodec};
//!
//! let codec = FrameCodec::new(ChecksumKind::AdditiveSum);
//! let frame = codec.encode(b"!A", &[0.1, 0.2, 0.3]);
//! assert_eq!(frame.len(), 2 + 3 * 4 + 1);
//!
//! let decoded = codec.decode_sensor(&frame, 2).unwrap();
//! assert_eq!(decoded.prefix, b"!A");
//! assert_eq!(decoded.values, vec![0.1f32, 0.2, 0.3]);
//! ```

mod checksum;
mod text;

pub use checksum::{Checksum, ChecksumKind};
pub use text::{TextDecoder, decode_text};

use std::fmt;
use std::sync::Arc;

use crate::{LinkError, Result};

/// Size in bytes of one encoded sample
pub const SAMPLE_SIZE: usize = 4;

/// A sensor frame split back into its parts
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFrame {
    pub prefix: Vec<u8>,
    pub values: Vec<f32>,
}

/// Builds and checks frames with a pluggable checksum
#[derive(Clone)]
pub struct FrameCodec {
    checksum: Arc<dyn Checksum>,
}

impl fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCodec").field("trailer_len", &self.checksum.trailer_len()).finish()
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(ChecksumKind::default())
    }
}

impl FrameCodec {
    pub fn new(checksum: impl Checksum) -> Self {
        Self { checksum: Arc::new(checksum) }
    }

    /// Length of the checksum trailer
    pub fn trailer_len(&self) -> usize {
        self.checksum.trailer_len()
    }

    /// Append the checksum trailer to `payload`
    pub fn seal(&self, payload: impl Into<Vec<u8>>) -> Vec<u8> {
        let mut frame = payload.into();
        let trailer = self.checksum.trailer(&frame);
        frame.extend_from_slice(&trailer);
        frame
    }

    /// Encode a sensor sample vector behind `prefix`.
    ///
    /// Samples are narrowed to `f32` on the wire.
    pub fn encode(&self, prefix: &[u8], values: &[f64]) -> Vec<u8> {
        let mut payload =
            Vec::with_capacity(prefix.len() + values.len() * SAMPLE_SIZE + self.trailer_len());
        payload.extend_from_slice(prefix);
        for value in values {
            payload.extend_from_slice(&(*value as f32).to_le_bytes());
        }
        self.seal(payload)
    }

    /// Encode a controller button press or release
    pub fn encode_button(&self, tag: u32, pressed: bool) -> Vec<u8> {
        let message = format!("!B{}{}", tag, if pressed { "1" } else { "0" });
        self.seal(message.into_bytes())
    }

    /// Check the trailer and return the frame body without it
    pub fn verify<'a>(&self, frame: &'a [u8]) -> Result<&'a [u8]> {
        let trailer_len = self.trailer_len();
        if frame.len() < trailer_len {
            return Err(LinkError::decode(
                "frame trailer",
                format!("frame of {} bytes is shorter than the trailer", frame.len()),
            ));
        }
        let (body, found) = frame.split_at(frame.len() - trailer_len);
        let expected = self.checksum.trailer(body);
        if expected != found {
            return Err(LinkError::ChecksumMismatch { expected, found: found.to_vec() });
        }
        Ok(body)
    }

    /// Split a sealed sensor frame into prefix and samples
    pub fn decode_sensor(&self, frame: &[u8], prefix_len: usize) -> Result<SensorFrame> {
        let body = self.verify(frame)?;
        if body.len() < prefix_len {
            return Err(LinkError::decode(
                "sensor frame",
                format!("body of {} bytes is shorter than prefix of {}", body.len(), prefix_len),
            ));
        }
        let (prefix, payload) = body.split_at(prefix_len);
        if payload.len() % SAMPLE_SIZE != 0 {
            return Err(LinkError::decode(
                "sensor frame",
                format!("payload of {} bytes is not a whole number of samples", payload.len()),
            ));
        }

        let values = payload
            .chunks_exact(SAMPLE_SIZE)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(SensorFrame { prefix: prefix.to_vec(), values })
    }
}
