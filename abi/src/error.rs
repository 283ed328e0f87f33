use thiserror::Error;

/// Errors raised while resolving a [`crate::schema::Schema`] into a
/// [`crate::resolve::TypeTable`], or while the codec drives a resolved
/// type against JSON or binary input.
///
/// One flat enum, matching `glint_core::CodecError`'s shape and the
/// teacher's `ChainError`/`ConsensusError` convention: every distinct
/// failure mode spec.md names gets its own variant instead of a generic
/// string bucket.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AbiError {
    #[error("type `{0}` is not declared in the schema")]
    UnknownType(String),

    #[error("type name `{0}` is declared more than once")]
    RedefinedType(String),

    #[error("cannot apply optional/array/extension to an already-wrapped type `{0}`")]
    InvalidNesting(String),

    #[error("alias `{0}` targets an extension type, which is not allowed")]
    ExtensionTypedef(String),

    #[error("struct `{0}` has a base that does not resolve to a struct")]
    BaseNotAStruct(String),

    #[error("type resolution recursion exceeded 32 levels while resolving `{0}`")]
    RecursionLimitReached(String),

    #[error("codec work stack exceeded 128 frames")]
    CodecRecursionLimitReached,

    #[error("variant discriminant {0} is out of range for `{1}` ({2} alternatives)")]
    BadVariantIndex(u32, String, usize),

    #[error("`{0}` is not a member of variant `{1}`")]
    InvalidTypeForVariant(String, String),

    #[error("unexpected field `{0}` after an extension field was already skipped")]
    UnexpectedField(String),

    #[error("missing required field `{0}`")]
    MissingField(String),

    #[error("invalid optional flag byte {0:#x}, expected 0 or 1")]
    InvalidOptionalFlag(u8),

    #[error("unexpected end of binary input")]
    UnexpectedEof,

    #[error("expected a JSON {0}, got `{1}`")]
    UnexpectedJsonShape(&'static str, String),

    #[error(transparent)]
    Codec(#[from] glint_core::CodecError),
}
