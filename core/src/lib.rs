//! Shared primitives for the node: fixed-width byte codecs, varuint32,
//! hex helpers, decimal128 conversion, and the block identifier type every
//! other crate in the workspace builds on.
//!
//! Nothing in this crate is consensus-critical in the sense of validating
//! a chain; it only provides the byte-level vocabulary the ABI codec and
//! block log use to agree on wire/disk representations.

pub mod block_id;
pub mod bytes;
pub mod decimal;
pub mod error;
pub mod hexutil;
pub mod varuint;

pub use block_id::{BlockId, BlockNum};
pub use error::CodecError;
pub use varuint::{decode_varuint32, encode_varuint32};

/// Result alias used throughout this crate and re-exported for callers that
/// only deal in [`CodecError`].
pub type Result<T> = std::result::Result<T, CodecError>;
