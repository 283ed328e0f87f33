//! Thin wrappers over the `hex` crate, kept so every caller in the
//! workspace goes through one place and gets this crate's error type back
//! instead of `hex::FromHexError` directly.

use crate::error::CodecError;

pub fn encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn decode(s: &str) -> Result<Vec<u8>, CodecError> {
    hex::decode(s).map_err(|e| CodecError::InvalidHex(e.to_string()))
}
