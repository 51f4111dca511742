//! No-op codec used when payload encoding is disabled

use crate::traits::PayloadCodec;
use anyhow::Result;

/// Stores serialized entries unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCodec;

impl PayloadCodec for IdentityCodec {
    fn encode(&self, plain: &[u8]) -> Result<Vec<u8>> {
        Ok(plain.to_vec())
    }

    fn decode(&self, stored: &[u8]) -> Result<Vec<u8>> {
        Ok(stored.to_vec())
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}
