//! Encoding of generations into record file bytes
//!
//! The chain hashes record files byte for byte, so a codec must be
//! canonical: the same [`Generation`] always encodes to the same bytes, and
//! `decode(encode(g)) == g` for every generation.

use crate::error::Result;
use crate::generation::Generation;

/// Encode/decode contract for persisted generation records
pub trait RecordCodec: Send + Sync {
    /// Serialize a generation
    fn encode(&self, generation: &Generation) -> Result<Vec<u8>>;

    /// Deserialize a generation
    fn decode(&self, bytes: &[u8]) -> Result<Generation>;

    /// File extension used for record files, without the dot
    fn extension(&self) -> &'static str;
}

/// Pretty-printed JSON records
///
/// Field order follows the struct definitions and every collection is a
/// sorted list, which makes the output canonical.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRecordCodec;

impl RecordCodec for JsonRecordCodec {
    fn encode(&self, generation: &Generation) -> Result<Vec<u8>> {
        let mut canonical = generation.clone();
        canonical.canonicalize();
        let mut bytes = serde_json::to_vec_pretty(&canonical)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Generation> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}
