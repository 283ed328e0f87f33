use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("unknown message discriminant: {0}")]
    UnknownDiscriminant(u32),
    #[error("message exceeds maximum frame size: {0} bytes")]
    OversizedFrame(u32),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("write queue exceeded soft cap: {queued} bytes queued")]
    WriteQueueOverflow { queued: usize },
    #[error("peer rejected too many blocks; closing with benign_other")]
    RejectionLimitExceeded,
    #[error("no eligible sync source")]
    NoSyncSource,
    #[error(transparent)]
    Codec(#[from] glint_core::CodecError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetError>;
