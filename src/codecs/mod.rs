//! Payload Codec Implementations
//!
//! This module provides built-in implementations of the [`PayloadCodec`](crate::traits::PayloadCodec)
//! trait. The codec runs after an entry is serialized and before it is written to the store.

mod identity;
pub use identity::IdentityCodec;

#[cfg(feature = "encryption")]
mod encrypted;
#[cfg(feature = "encryption")]
#[cfg_attr(docsrs, doc(cfg(feature = "encryption")))]
pub use encrypted::AesGcmCodec;
