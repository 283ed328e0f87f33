//! Walks a raw [`Schema`] into a [`TypeTable`]: every named type becomes an
//! arena index rather than an owning reference, so the inherently-graph
//! shape of structs-referencing-structs never needs Rust-side `Rc`/`RefCell`
//! cycles (Design Note "Cyclic references").

use crate::builtin::BuiltinType;
use crate::error::AbiError;
use crate::schema::{AliasDef, Schema, StructDef, VariantDef};
use std::collections::HashMap;

pub const MAX_RESOLUTION_DEPTH: u32 = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedType {
    Builtin(BuiltinType),
    Optional(usize),
    Array(usize),
    Extension(usize),
    /// Fields already include the flattened base chain, in base-then-own
    /// order, per spec.md 4.B.
    Struct { fields: Vec<(String, usize)> },
    Variant(Vec<(String, usize)>),
}

impl ResolvedType {
    fn is_wrapper(&self) -> bool {
        matches!(self, ResolvedType::Optional(_) | ResolvedType::Array(_) | ResolvedType::Extension(_))
    }
}

#[derive(Debug, PartialEq)]
pub struct TypeTable {
    types: Vec<ResolvedType>,
    names: HashMap<String, usize>,
}

impl TypeTable {
    pub fn get(&self, idx: usize) -> &ResolvedType {
        &self.types[idx]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    pub fn resolve(schema: &Schema) -> Result<TypeTable, AbiError> {
        Resolver::new(schema)?.run()
    }
}

struct Resolver<'a> {
    schema: &'a Schema,
    structs: HashMap<&'a str, &'a StructDef>,
    variants: HashMap<&'a str, &'a VariantDef>,
    aliases: HashMap<&'a str, &'a AliasDef>,
    types: Vec<Option<ResolvedType>>,
    names: HashMap<String, usize>,
}

impl<'a> Resolver<'a> {
    fn new(schema: &'a Schema) -> Result<Resolver<'a>, AbiError> {
        let mut structs = HashMap::new();
        let mut variants = HashMap::new();
        let mut aliases = HashMap::new();
        let mut seen: HashMap<&str, ()> = HashMap::new();

        let mut check_unique = |name: &'a str| -> Result<(), AbiError> {
            if BuiltinType::by_name(name).is_some() || seen.insert(name, ()).is_some() {
                return Err(AbiError::RedefinedType(name.to_string()));
            }
            Ok(())
        };

        for s in &schema.structs {
            check_unique(&s.name)?;
            structs.insert(s.name.as_str(), s);
        }
        for v in &schema.variants {
            check_unique(&v.name)?;
            variants.insert(v.name.as_str(), v);
        }
        for t in &schema.types {
            check_unique(&t.new_type_name)?;
            aliases.insert(t.new_type_name.as_str(), t);
        }

        let mut types = Vec::new();
        let mut names = HashMap::new();
        for tag in BUILTIN_NAMES {
            let b = BuiltinType::by_name(tag).expect("static builtin name table is complete");
            let idx = types.len();
            types.push(Some(ResolvedType::Builtin(b)));
            names.insert(tag.to_string(), idx);
        }
        // Reserve arena slots for every declared struct/variant up front so
        // that mutually-referencing structs resolve without re-entrancy
        // tricks: `get_type` sees the slot already has an index reserved
        // (even though its contents are still `None`) and only recurses
        // into actually filling it in once.
        for name in structs.keys().chain(variants.keys()) {
            let idx = types.len();
            types.push(None);
            names.insert(name.to_string(), idx);
        }

        Ok(Resolver { schema, structs, variants, aliases, types, names })
    }

    fn run(mut self) -> Result<TypeTable, AbiError> {
        let struct_names: Vec<String> = self.structs.keys().map(|s| s.to_string()).collect();
        for name in struct_names {
            self.get_type(&name, 0)?;
        }
        let variant_names: Vec<String> = self.variants.keys().map(|s| s.to_string()).collect();
        for name in variant_names {
            self.get_type(&name, 0)?;
        }
        let alias_names: Vec<String> = self.aliases.keys().map(|s| s.to_string()).collect();
        for name in alias_names {
            self.get_type(&name, 0)?;
        }

        let types = self
            .types
            .into_iter()
            .enumerate()
            .map(|(i, t)| t.ok_or_else(|| AbiError::UnknownType(format!("<arena slot {i}>"))))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TypeTable { types, names: self.names })
    }

    fn get_type(&mut self, name: &str, depth: u32) -> Result<usize, AbiError> {
        if depth >= MAX_RESOLUTION_DEPTH {
            return Err(AbiError::RecursionLimitReached(name.to_string()));
        }

        if let Some(&idx) = self.names.get(name) {
            if self.types[idx].is_some() {
                return Ok(idx);
            }
            // Reserved but not yet filled: it's a struct or variant being
            // resolved for the first time.
            if let Some(def) = self.structs.get(name).copied() {
                let resolved = self.resolve_struct(def, depth)?;
                self.types[idx] = Some(resolved);
                return Ok(idx);
            }
            if let Some(def) = self.variants.get(name).copied() {
                let resolved = self.resolve_variant(def, depth)?;
                self.types[idx] = Some(resolved);
                return Ok(idx);
            }
            unreachable!("reserved arena slot with neither a struct nor variant definition");
        }

        if let Some(def) = self.aliases.get(name).copied() {
            let target_idx = self.get_type(&def.type_name, depth + 1)?;
            if let ResolvedType::Extension(_) = self.types[target_idx].as_ref().unwrap() {
                return Err(AbiError::ExtensionTypedef(name.to_string()));
            }
            self.names.insert(name.to_string(), target_idx);
            return Ok(target_idx);
        }

        if let Some(base_name) = name.strip_suffix('?') {
            return self.materialize_wrapper(name, base_name, depth, ResolvedType::Optional);
        }
        if let Some(base_name) = name.strip_suffix("[]") {
            return self.materialize_wrapper(name, base_name, depth, ResolvedType::Array);
        }
        if let Some(base_name) = name.strip_suffix('$') {
            return self.materialize_wrapper(name, base_name, depth, ResolvedType::Extension);
        }

        Err(AbiError::UnknownType(name.to_string()))
    }

    fn materialize_wrapper(
        &mut self,
        full_name: &str,
        base_name: &str,
        depth: u32,
        wrap: impl Fn(usize) -> ResolvedType,
    ) -> Result<usize, AbiError> {
        let base_idx = self.get_type(base_name, depth + 1)?;
        if self.types[base_idx].as_ref().unwrap().is_wrapper() {
            return Err(AbiError::InvalidNesting(full_name.to_string()));
        }
        let idx = self.types.len();
        self.types.push(Some(wrap(base_idx)));
        self.names.insert(full_name.to_string(), idx);
        Ok(idx)
    }

    fn resolve_struct(&mut self, def: &'a StructDef, depth: u32) -> Result<ResolvedType, AbiError> {
        if depth >= MAX_RESOLUTION_DEPTH {
            return Err(AbiError::RecursionLimitReached(def.name.clone()));
        }
        let mut fields = Vec::new();
        if !def.base.is_empty() {
            let base_idx = self.get_type(&def.base, depth + 1)?;
            match self.types[base_idx].as_ref().unwrap() {
                ResolvedType::Struct { fields: base_fields } => fields.extend(base_fields.clone()),
                _ => return Err(AbiError::BaseNotAStruct(def.name.clone())),
            }
        }
        for field in &def.fields {
            let t_idx = self.get_type(&field.type_name, depth + 1)?;
            fields.push((field.name.clone(), t_idx));
        }
        Ok(ResolvedType::Struct { fields })
    }

    fn resolve_variant(&mut self, def: &'a VariantDef, depth: u32) -> Result<ResolvedType, AbiError> {
        if depth >= MAX_RESOLUTION_DEPTH {
            return Err(AbiError::RecursionLimitReached(def.name.clone()));
        }
        let mut alts = Vec::new();
        for type_name in &def.types {
            let t_idx = self.get_type(type_name, depth + 1)?;
            alts.push((type_name.clone(), t_idx));
        }
        Ok(ResolvedType::Variant(alts))
    }
}

const BUILTIN_NAMES: &[&str] = &[
    "bool", "int8", "uint8", "int16", "uint16", "int32", "uint32", "int64", "uint64", "int128",
    "uint128", "float32", "float64", "varint32", "varuint32", "bytes", "string", "checksum256",
    "public_key", "signature",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AliasDef, FieldDef};

    fn struct_def(name: &str, base: &str, fields: &[(&str, &str)]) -> StructDef {
        StructDef {
            name: name.to_string(),
            base: base.to_string(),
            fields: fields
                .iter()
                .map(|(n, t)| FieldDef { name: n.to_string(), type_name: t.to_string() })
                .collect(),
        }
    }

    #[test]
    fn resolves_simple_struct() {
        let schema = Schema {
            structs: vec![struct_def("point", "", &[("x", "int32"), ("y", "int32")])],
            ..Default::default()
        };
        let table = TypeTable::resolve(&schema).unwrap();
        let idx = table.index_of("point").unwrap();
        match table.get(idx) {
            ResolvedType::Struct { fields } => assert_eq!(fields.len(), 2),
            other => panic!("expected struct, got {other:?}"),
        }
    }

    #[test]
    fn flattens_base_fields_first() {
        let schema = Schema {
            structs: vec![
                struct_def("base", "", &[("a", "int32")]),
                struct_def("derived", "base", &[("b", "int32")]),
            ],
            ..Default::default()
        };
        let table = TypeTable::resolve(&schema).unwrap();
        let idx = table.index_of("derived").unwrap();
        match table.get(idx) {
            ResolvedType::Struct { fields } => {
                assert_eq!(fields[0].0, "a");
                assert_eq!(fields[1].0, "b");
            }
            other => panic!("expected struct, got {other:?}"),
        }
    }

    #[test]
    fn base_must_be_a_struct() {
        let schema = Schema {
            structs: vec![struct_def("derived", "int32", &[])],
            ..Default::default()
        };
        assert_eq!(
            TypeTable::resolve(&schema),
            Err(AbiError::BaseNotAStruct("derived".to_string()))
        );
    }

    #[test]
    fn rejects_double_optional_nesting() {
        let schema = Schema {
            structs: vec![struct_def("s", "", &[("f", "int32??")])],
            ..Default::default()
        };
        assert!(matches!(TypeTable::resolve(&schema), Err(AbiError::InvalidNesting(_))));
    }

    #[test]
    fn rejects_extension_of_extension() {
        let schema = Schema {
            structs: vec![struct_def("s", "", &[("f", "int32$$")])],
            ..Default::default()
        };
        assert!(matches!(TypeTable::resolve(&schema), Err(AbiError::InvalidNesting(_))));
    }

    #[test]
    fn alias_to_extension_fails() {
        let schema = Schema {
            types: vec![AliasDef { new_type_name: "ext_alias".to_string(), type_name: "int32$".to_string() }],
            structs: vec![struct_def("s", "", &[("f", "ext_alias")])],
            ..Default::default()
        };
        assert!(matches!(TypeTable::resolve(&schema), Err(AbiError::ExtensionTypedef(_))));
    }

    #[test]
    fn duplicate_struct_name_fails() {
        let schema = Schema {
            structs: vec![struct_def("dup", "", &[]), struct_def("dup", "", &[])],
            ..Default::default()
        };
        assert!(matches!(TypeTable::resolve(&schema), Err(AbiError::RedefinedType(_))));
    }

    #[test]
    fn name_colliding_with_builtin_fails() {
        let schema = Schema { structs: vec![struct_def("bool", "", &[])], ..Default::default() };
        assert!(matches!(TypeTable::resolve(&schema), Err(AbiError::RedefinedType(_))));
    }

    #[test]
    fn variant_resolves_members() {
        let schema = Schema {
            variants: vec![VariantDef { name: "v".to_string(), types: vec!["uint32".to_string(), "string".to_string()] }],
            ..Default::default()
        };
        let table = TypeTable::resolve(&schema).unwrap();
        let idx = table.index_of("v").unwrap();
        match table.get(idx) {
            ResolvedType::Variant(alts) => assert_eq!(alts.len(), 2),
            other => panic!("expected variant, got {other:?}"),
        }
    }

    #[test]
    fn wrapper_types_are_memoised() {
        let schema = Schema { structs: vec![struct_def("s", "", &[("a", "int32?"), ("b", "int32?")])], ..Default::default() };
        let table = TypeTable::resolve(&schema).unwrap();
        let idx = table.index_of("s").unwrap();
        match table.get(idx) {
            ResolvedType::Struct { fields } => assert_eq!(fields[0].1, fields[1].1),
            other => panic!("expected struct, got {other:?}"),
        }
    }

    #[test]
    fn self_referential_struct_hits_recursion_limit() {
        // A struct that directly contains a field of its own type can never
        // resolve (there is no base-case), so resolution should fail with
        // the recursion-limit error rather than looping forever.
        let schema = Schema {
            structs: vec![struct_def("node", "", &[("next", "node")])],
            ..Default::default()
        };
        assert!(matches!(TypeTable::resolve(&schema), Err(AbiError::RecursionLimitReached(_))));
    }
}
