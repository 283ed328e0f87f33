//! Schema resolution and JSON-binary codec for the node's self-describing
//! wire format (see `glint_core` for the leaf integer/varint primitives
//! this builds on).

pub mod builtin;
pub mod codec;
pub mod error;
pub mod resolve;
pub mod schema;

pub use builtin::BuiltinType;
pub use codec::{to_binary, to_json, MAX_CODEC_DEPTH};
pub use error::AbiError;
pub use resolve::{ResolvedType, TypeTable, MAX_RESOLUTION_DEPTH};
pub use schema::{AliasDef, FieldDef, Schema, StructDef, VariantDef};

pub type Result<T> = std::result::Result<T, AbiError>;
