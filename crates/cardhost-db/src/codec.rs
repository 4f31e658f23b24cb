//! Snapshot body encoding: UTF-8 JSON wrapped in a gzip stream.

use cardhost_common::{Error, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};

/// Serialize `state` to JSON and gzip it.
pub fn encode<S: Serialize>(state: &S) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(state)?;
    compress(&json)
}

/// [`encode`], refusing values whose JSON does not deserialize back into `S`.
///
/// `serde_json` writes non-finite floats as `null`, which a later load of an
/// `f64` field rejects. Catching it here keeps the failure with the writer.
pub fn encode_verified<S: Serialize + DeserializeOwned>(state: &S) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(state)?;
    let _: S = serde_json::from_slice(&json)?;
    compress(&json)
}

/// Inverse of [`encode`]. Any failure is reported as [`Error::Corruption`].
pub fn decode<S: DeserializeOwned>(blob: &[u8]) -> Result<S> {
    let json = decompress(blob)?;
    serde_json::from_slice(&json)
        .map_err(|e| Error::Corruption(format!("failed to decode snapshot JSON: {e}")))
}

pub fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

pub fn decompress(blob: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(blob.len() * 4);
    GzDecoder::new(blob)
        .read_to_end(&mut out)
        .map_err(|e| Error::Corruption(format!("failed to decompress snapshot: {e}")))?;
    Ok(out)
}
