//! Gzip decompression of fetched payloads.
//!
//! CloudTrail delivers every log file gzip-compressed. Payloads are small
//! enough (a few MB at most) to be inflated in memory.

use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use std::io::Read;

use crate::error::{Result, StorageError};

/// First two bytes of every gzip member.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Check whether data starts with a gzip header.
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[..2] == GZIP_MAGIC
}

/// Decompress a gzip payload.
///
/// Concatenated gzip members are decoded as one stream.
pub fn gunzip(data: &[u8]) -> Result<Bytes> {
    if !is_gzip(data) {
        return Err(StorageError::Decompression(format!(
            "not a gzip stream ({} bytes)",
            data.len()
        )));
    }

    let mut decoder = MultiGzDecoder::new(data);
    let mut output = Vec::with_capacity(data.len() * 4);
    decoder
        .read_to_end(&mut output)
        .map_err(|e| StorageError::Decompression(e.to_string()))?;

    Ok(Bytes::from(output))
}
