use thiserror::Error;

/// Errors raised by the byte-level codecs in this crate.
///
/// Mirrors the flat, one-enum-per-crate shape the rest of the workspace
/// uses (see `glint_abi::AbiError`, `glint_blocklog::BlockLogError`):
/// every failure mode gets its own named variant instead of a generic
/// "codec error" bucket, so callers can match on the specific invariant
/// that broke.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("varuint32 exceeds 5 bytes or encodes a value > u32::MAX")]
    BadVarint,

    #[error("unexpected end of input while decoding")]
    UnexpectedEof,

    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("decimal string does not fit in {0} bytes: {1}")]
    DecimalOverflow(usize, String),

    #[error("malformed decimal string: {0}")]
    MalformedDecimal(String),
}
