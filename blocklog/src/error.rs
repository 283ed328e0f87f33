use thiserror::Error;

/// Flat per-crate error enum, matching `glint_core::CodecError` and
/// `glint_abi::AbiError`'s shape (and the teacher's `ChainError` in
/// `node/src/chain.rs`): every distinct failure mode spec.md names gets its
/// own variant.
#[derive(Error, Debug)]
pub enum BlockLogError {
    #[error("no block log found at {0}")]
    NotFound(String),

    #[error("unsupported block log version {0}")]
    UnsupportedVersion(u32),

    #[error("append failed: {0}")]
    AppendFail(String),

    #[error("backup directory already exists: {0}")]
    BackupDirExists(String),

    #[error("block log structural invariant violated: {0}")]
    Exception(String),

    #[error("block {0} is not in the retained range")]
    BlockNotFound(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] glint_core::CodecError),
}

pub type Result<T> = std::result::Result<T, BlockLogError>;
