//! Turns an operator-supplied genesis JSON file into the canonical opaque
//! bytes `glint_blocklog::ChainIdentity::Genesis` carries, the same way the
//! wire protocol turns JSON into bytes for any other self-describing type:
//! resolve a schema once, then run it through `glint_abi`'s codec.

use std::path::Path;

use glint_abi::{FieldDef, Schema, StructDef, TypeTable};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("failed to read genesis file {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("genesis file {path} is not valid JSON: {source}")]
    Json { path: String, source: serde_json::Error },
    #[error("genesis schema rejected {path}: {source}")]
    Abi { path: String, source: glint_abi::AbiError },
}

fn schema() -> Schema {
    Schema {
        structs: vec![StructDef {
            name: "genesis".to_string(),
            base: String::new(),
            fields: vec![
                FieldDef { name: "chain_name".to_string(), type_name: "string".to_string() },
                FieldDef { name: "initial_timestamp".to_string(), type_name: "uint64".to_string() },
                FieldDef { name: "initial_key".to_string(), type_name: "string$".to_string() },
            ],
        }],
        ..Default::default()
    }
}

/// Reads `path`, validates it against the built-in genesis schema, and
/// returns the canonical binary encoding to store as the block log's
/// genesis identity.
pub fn encode_genesis_file(path: &Path) -> Result<Vec<u8>, GenesisError> {
    let path_display = path.display().to_string();
    let text = std::fs::read_to_string(path)
        .map_err(|source| GenesisError::Io { path: path_display.clone(), source })?;
    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|source| GenesisError::Json { path: path_display.clone(), source })?;

    let table = TypeTable::resolve(&schema()).expect("built-in genesis schema is statically valid");
    let idx = table.index_of("genesis").expect("built-in genesis schema always declares `genesis`");
    glint_abi::to_binary(&table, idx, &value).map_err(|source| GenesisError::Abi { path: path_display, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn valid_genesis_file_encodes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"chain_name": "glint-devnet", "initial_timestamp": 1700000000}}"#).unwrap();
        let bytes = encode_genesis_file(file.path()).unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn malformed_json_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(encode_genesis_file(file.path()), Err(GenesisError::Json { .. })));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"chain_name": "glint-devnet"}}"#).unwrap();
        assert!(matches!(encode_genesis_file(file.path()), Err(GenesisError::Abi { .. })));
    }

    #[test]
    fn missing_file_is_rejected() {
        assert!(matches!(encode_genesis_file(Path::new("/no/such/genesis.json")), Err(GenesisError::Io { .. })));
    }
}
