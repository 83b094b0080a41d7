//! Checksum trailers appended to every outgoing frame

use serde::{Deserialize, Serialize};

/// Algorithm producing the trailer bytes of a frame
///
/// The trailer is computed over every byte that precedes it and must match
/// what the peripheral firmware recomputes, otherwise the frame is rejected.
pub trait Checksum: Send + Sync + 'static {
    /// Number of trailer bytes this algorithm appends
    fn trailer_len(&self) -> usize;

    /// Trailer for `data`
    fn trailer(&self, data: &[u8]) -> Vec<u8>;
}

/// Built-in checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumKind {
    /// Complement of the 8-bit wrapping byte sum (Bluefruit UART firmware)
    #[default]
    Bluefruit,
    /// Plain 8-bit wrapping byte sum
    AdditiveSum,
}

fn byte_sum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

impl Checksum for ChecksumKind {
    fn trailer_len(&self) -> usize {
        1
    }

    fn trailer(&self, data: &[u8]) -> Vec<u8> {
        match self {
            ChecksumKind::Bluefruit => vec![!byte_sum(data)],
            ChecksumKind::AdditiveSum => vec![byte_sum(data)],
        }
    }
}
