//! Value encoding for cache backends
//!
//! Values are serialized with bincode. Payloads above the compression
//! threshold are LZ4 compressed. The first byte tags the layout:
//!
//! ```text
//! [0x00][bincode bytes]                  stored as is
//! [0x01][u32 len][lz4 block]             compress_prepend_size
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::error::{CacheError, CacheResult};

const RAW: u8 = 0;
const LZ4: u8 = 1;

/// Serialize `value`, compressing when the encoding exceeds `threshold` bytes
pub fn encode<T: Serialize>(value: &T, threshold: usize) -> CacheResult<Vec<u8>> {
    let serialized = bincode::serialize(value)?;

    if threshold > 0 && serialized.len() > threshold {
        let compressed = lz4_flex::compress_prepend_size(&serialized);
        let mut out = Vec::with_capacity(compressed.len() + 1);
        out.push(LZ4);
        out.extend_from_slice(&compressed);
        return Ok(out);
    }

    let mut out = Vec::with_capacity(serialized.len() + 1);
    out.push(RAW);
    out.extend_from_slice(&serialized);
    Ok(out)
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> CacheResult<T> {
    let (tag, body) = data
        .split_first()
        .ok_or_else(|| CacheError::Serialization("empty cache value".to_string()))?;

    match *tag {
        RAW => Ok(bincode::deserialize(body)?),
        LZ4 => {
            let decompressed = lz4_flex::decompress_size_prepended(body).map_err(|e| {
                CacheError::Compression(format!("LZ4 decompression failed: {}", e))
            })?;
            Ok(bincode::deserialize(&decompressed)?)
        }
        other => Err(CacheError::Serialization(format!(
            "unknown cache value tag {}",
            other
        ))),
    }
}
