//! Drives a resolved type against JSON or binary input.
//!
//! Both directions walk an explicit `Vec<Frame>` rather than the native call
//! stack, so the 128-frame bound in [`MAX_CODEC_DEPTH`] is the actual depth
//! of the stack this module owns, not a proxy for how close the real call
//! stack is to overflowing. Encoding never needs to combine a child's output
//! with its parent's (bytes are appended to `out` in document order as soon
//! as they're known), so its stack is a flat worklist of pending nodes.
//! Decoding builds a `serde_json::Value` tree bottom-up, so its stack holds
//! partially-built structs/arrays/variants that resume, field by field or
//! item by item, each time a child finishes.

use crate::error::AbiError;
use crate::resolve::{ResolvedType, TypeTable};
use glint_core::decode_varuint32;
use serde_json::{Map, Value};

pub const MAX_CODEC_DEPTH: u32 = 128;

pub fn to_binary(table: &TypeTable, root: usize, value: &Value) -> Result<Vec<u8>, AbiError> {
    let mut out = Vec::new();
    let mut stack = vec![EncodeTask { idx: root, value, depth: 0, allow_extensions: true }];
    while let Some(task) = stack.pop() {
        encode_one(table, task, &mut out, &mut stack)?;
    }
    Ok(out)
}

pub fn to_json(table: &TypeTable, root: usize, bytes: &[u8]) -> Result<Value, AbiError> {
    let mut cursor = bytes;
    decode_value(table, root, &mut cursor, 0, true)
}

/// One pending "encode this JSON value as this type" unit of work.
struct EncodeTask<'a> {
    idx: usize,
    value: &'a Value,
    depth: u32,
    allow_extensions: bool,
}

/// Encodes a single task, appending any children it has to `stack` (in
/// reverse so the first child pops first, preserving document order).
fn encode_one<'a>(
    table: &TypeTable,
    task: EncodeTask<'a>,
    out: &mut Vec<u8>,
    stack: &mut Vec<EncodeTask<'a>>,
) -> Result<(), AbiError> {
    let EncodeTask { idx, value, depth, allow_extensions } = task;
    if depth >= MAX_CODEC_DEPTH {
        return Err(AbiError::CodecRecursionLimitReached);
    }

    match table.get(idx) {
        ResolvedType::Builtin(b) => b.encode_binary(value, out),

        ResolvedType::Optional(inner) => {
            if value.is_null() {
                out.push(0u8);
            } else {
                out.push(1u8);
                stack.push(EncodeTask { idx: *inner, value, depth: depth + 1, allow_extensions });
            }
            Ok(())
        }

        ResolvedType::Extension(inner) => {
            stack.push(EncodeTask { idx: *inner, value, depth: depth + 1, allow_extensions });
            Ok(())
        }

        ResolvedType::Array(inner) => {
            let items = value
                .as_array()
                .ok_or_else(|| AbiError::UnexpectedJsonShape("array", value.to_string()))?;
            let mut len_buf = Vec::new();
            glint_core::encode_varuint32(items.len() as u32, &mut len_buf);
            out.extend_from_slice(&len_buf);
            for item in items.iter().rev() {
                stack.push(EncodeTask { idx: *inner, value: item, depth: depth + 1, allow_extensions: false });
            }
            Ok(())
        }

        ResolvedType::Variant(alts) => {
            let pair = value
                .as_array()
                .filter(|a| a.len() == 2)
                .ok_or_else(|| AbiError::UnexpectedJsonShape("[type, value] pair", value.to_string()))?;
            let type_name = pair[0]
                .as_str()
                .ok_or_else(|| AbiError::UnexpectedJsonShape("string", pair[0].to_string()))?;
            let (alt_idx, (_, alt_type)) = alts
                .iter()
                .enumerate()
                .find(|(_, (name, _))| name == type_name)
                .ok_or_else(|| AbiError::InvalidTypeForVariant(type_name.to_string(), "<variant>".to_string()))?;
            let mut idx_buf = Vec::new();
            glint_core::encode_varuint32(alt_idx as u32, &mut idx_buf);
            out.extend_from_slice(&idx_buf);
            stack.push(EncodeTask { idx: *alt_type, value: &pair[1], depth: depth + 1, allow_extensions: false });
            Ok(())
        }

        ResolvedType::Struct { fields } => {
            let obj = value
                .as_object()
                .ok_or_else(|| AbiError::UnexpectedJsonShape("object", value.to_string()))?;
            let mut consumed = 0usize;
            let last = fields.len().saturating_sub(1);
            let mut pending = Vec::new();
            for (i, (name, field_idx)) in fields.iter().enumerate() {
                let is_last = i == last;
                // `allow_extensions` governs whether *any* field here may be
                // an omittable extension; only the last field's own
                // extension-ness is allowed to propagate further down.
                let child_allow_ext = allow_extensions && is_last;
                match obj.get(name) {
                    Some(v) => {
                        consumed += 1;
                        pending.push(EncodeTask { idx: *field_idx, value: v, depth: depth + 1, allow_extensions: child_allow_ext });
                    }
                    None => {
                        if allow_extensions && matches!(table.get(*field_idx), ResolvedType::Extension(_)) {
                            // Omitted trailing extension field: nothing written.
                        } else {
                            return Err(AbiError::MissingField(name.clone()));
                        }
                    }
                }
            }
            if consumed != obj.len() {
                let unknown = obj.keys().find(|k| !fields.iter().any(|(n, _)| n == *k));
                if let Some(k) = unknown {
                    return Err(AbiError::UnexpectedField(k.clone()));
                }
            }
            stack.extend(pending.into_iter().rev());
            Ok(())
        }
    }
}

/// A parent node waiting on a decoded child before it can finish: the stack
/// of these is the explicit equivalent of the call frames plain recursion
/// would otherwise hold.
enum DecodeFrame<'t> {
    Struct {
        fields: &'t [(String, usize)],
        field_idx: usize,
        allow_extensions: bool,
        depth: u32,
        built: Map<String, Value>,
    },
    Array {
        inner: usize,
        remaining: usize,
        depth: u32,
        built: Vec<Value>,
    },
    Variant {
        name: String,
    },
}

enum StructStep<'t> {
    Done(Value),
    Descend { frame: DecodeFrame<'t>, child_idx: usize, child_depth: u32, child_allow_ext: bool },
}

/// Advances a struct-in-progress starting at `field_idx`, skipping any
/// trailing extension fields omitted at end-of-input, until it either needs
/// a child decoded (`Descend`) or has every field (`Done`).
fn step_struct<'t>(
    table: &TypeTable,
    fields: &'t [(String, usize)],
    mut field_idx: usize,
    allow_extensions: bool,
    depth: u32,
    built: Map<String, Value>,
    cursor: &mut &[u8],
) -> StructStep<'t> {
    loop {
        if field_idx >= fields.len() {
            return StructStep::Done(Value::Object(built));
        }
        let last = fields.len() - 1;
        let (_, field_type_idx) = &fields[field_idx];
        let is_last = field_idx == last;
        let child_allow_ext = allow_extensions && is_last;
        if allow_extensions && cursor.is_empty() && matches!(table.get(*field_type_idx), ResolvedType::Extension(_)) {
            field_idx += 1;
            continue;
        }
        return StructStep::Descend {
            frame: DecodeFrame::Struct { fields, field_idx, allow_extensions, depth, built },
            child_idx: *field_type_idx,
            child_depth: depth + 1,
            child_allow_ext,
        };
    }
}

fn decode_value<'t>(
    table: &'t TypeTable,
    root: usize,
    cursor: &mut &[u8],
    depth0: u32,
    allow0: bool,
) -> Result<Value, AbiError> {
    let mut stack: Vec<DecodeFrame<'t>> = Vec::new();
    let mut next = Some((root, depth0, allow0));

    'main: loop {
        let (idx, depth, allow_extensions) = next.take().expect("descend target always set before looping");
        if depth >= MAX_CODEC_DEPTH {
            return Err(AbiError::CodecRecursionLimitReached);
        }

        let mut value = match table.get(idx) {
            ResolvedType::Builtin(b) => b.decode_binary(cursor)?,

            ResolvedType::Optional(inner) => match read_u8(cursor)? {
                0 => Value::Null,
                1 => {
                    next = Some((*inner, depth + 1, allow_extensions));
                    continue 'main;
                }
                other => return Err(AbiError::InvalidOptionalFlag(other)),
            },

            ResolvedType::Extension(inner) => {
                next = Some((*inner, depth + 1, allow_extensions));
                continue 'main;
            }

            ResolvedType::Array(inner) => {
                let len = decode_length(cursor)? as usize;
                if len == 0 {
                    Value::Array(Vec::new())
                } else {
                    stack.push(DecodeFrame::Array { inner: *inner, remaining: len, depth, built: Vec::with_capacity(len.min(4096)) });
                    next = Some((*inner, depth + 1, false));
                    continue 'main;
                }
            }

            ResolvedType::Variant(alts) => {
                let tag = decode_length(cursor)? as usize;
                let (name, alt_type) = alts
                    .get(tag)
                    .ok_or_else(|| AbiError::BadVariantIndex(tag as u32, "<variant>".to_string(), alts.len()))?;
                stack.push(DecodeFrame::Variant { name: name.clone() });
                next = Some((*alt_type, depth + 1, false));
                continue 'main;
            }

            ResolvedType::Struct { fields } => {
                match step_struct(table, fields, 0, allow_extensions, depth, Map::with_capacity(fields.len()), cursor) {
                    StructStep::Done(v) => v,
                    StructStep::Descend { frame, child_idx, child_depth, child_allow_ext } => {
                        stack.push(frame);
                        next = Some((child_idx, child_depth, child_allow_ext));
                        continue 'main;
                    }
                }
            }
        };

        // `value` just finished; climb the stack as far as it closes out
        // parents, resuming a sibling descent the moment one doesn't, and
        // returning once nothing is left waiting on it.
        loop {
            match stack.pop() {
                None => return Ok(value),
                Some(DecodeFrame::Variant { name }) => {
                    value = Value::Array(vec![Value::String(name), value]);
                }
                Some(DecodeFrame::Array { inner, remaining, depth, mut built }) => {
                    built.push(value);
                    let remaining = remaining - 1;
                    if remaining == 0 {
                        value = Value::Array(built);
                    } else {
                        stack.push(DecodeFrame::Array { inner, remaining, depth, built });
                        next = Some((inner, depth + 1, false));
                        continue 'main;
                    }
                }
                Some(DecodeFrame::Struct { fields, field_idx, allow_extensions, depth, mut built }) => {
                    built.insert(fields[field_idx].0.clone(), value);
                    match step_struct(table, fields, field_idx + 1, allow_extensions, depth, built, cursor) {
                        StructStep::Done(v) => value = v,
                        StructStep::Descend { frame, child_idx, child_depth, child_allow_ext } => {
                            stack.push(frame);
                            next = Some((child_idx, child_depth, child_allow_ext));
                            continue 'main;
                        }
                    }
                }
            }
        }
    }
}

fn read_u8(cursor: &mut &[u8]) -> Result<u8, AbiError> {
    let (first, rest) = cursor.split_first().ok_or(AbiError::UnexpectedEof)?;
    *cursor = rest;
    Ok(*first)
}

fn decode_length(cursor: &mut &[u8]) -> Result<u32, AbiError> {
    let (v, consumed) = decode_varuint32(cursor)?;
    *cursor = &cursor[consumed..];
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, Schema, StructDef, VariantDef};
    use serde_json::json;

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
    fn roundtrips_flat_struct() {
        let schema = Schema {
            structs: vec![struct_def("point", "", &[("x", "int32"), ("y", "int32")])],
            ..Default::default()
        };
        let table = TypeTable::resolve(&schema).unwrap();
        let idx = table.index_of("point").unwrap();
        let value = json!({"x": 1, "y": -2});
        let bin = to_binary(&table, idx, &value).unwrap();
        assert_eq!(bin.len(), 8);
        let back = to_json(&table, idx, &bin).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn roundtrips_struct_with_array_field() {
        let schema = Schema {
            structs: vec![
                struct_def("point", "", &[("x", "int32")]),
                struct_def("path", "", &[("points", "point[]")]),
            ],
            ..Default::default()
        };
        let table = TypeTable::resolve(&schema).unwrap();
        let idx = table.index_of("path").unwrap();
        let value = json!({"points": [{"x": 1}, {"x": 2}, {"x": 3}]});
        let bin = to_binary(&table, idx, &value).unwrap();
        let back = to_json(&table, idx, &bin).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn trailing_extension_field_may_be_omitted() {
        let schema = Schema {
            structs: vec![struct_def("msg", "", &[("id", "uint32"), ("note", "string$")])],
            ..Default::default()
        };
        let table = TypeTable::resolve(&schema).unwrap();
        let idx = table.index_of("msg").unwrap();
        let value = json!({"id": 7});
        let bin = to_binary(&table, idx, &value).unwrap();
        let back = to_json(&table, idx, &bin).unwrap();
        assert_eq!(back, json!({"id": 7}));
    }

    #[test]
    fn multiple_trailing_extension_fields_may_all_be_omitted() {
        let schema = Schema {
            structs: vec![struct_def("msg", "", &[("a", "uint32"), ("b", "string$"), ("c", "string$")])],
            ..Default::default()
        };
        let table = TypeTable::resolve(&schema).unwrap();
        let idx = table.index_of("msg").unwrap();
        let value = json!({"a": 1});
        let bin = to_binary(&table, idx, &value).unwrap();
        let back = to_json(&table, idx, &bin).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn missing_non_extension_field_errors() {
        let schema = Schema {
            structs: vec![struct_def("point", "", &[("x", "int32"), ("y", "int32")])],
            ..Default::default()
        };
        let table = TypeTable::resolve(&schema).unwrap();
        let idx = table.index_of("point").unwrap();
        let err = to_binary(&table, idx, &json!({"x": 1})).unwrap_err();
        assert_eq!(err, AbiError::MissingField("y".to_string()));
    }

    #[test]
    fn unknown_field_errors() {
        let schema = Schema {
            structs: vec![struct_def("point", "", &[("x", "int32")])],
            ..Default::default()
        };
        let table = TypeTable::resolve(&schema).unwrap();
        let idx = table.index_of("point").unwrap();
        let err = to_binary(&table, idx, &json!({"x": 1, "z": 2})).unwrap_err();
        assert_eq!(err, AbiError::UnexpectedField("z".to_string()));
    }

    #[test]
    fn optional_roundtrips_both_states() {
        let schema = Schema {
            structs: vec![struct_def("s", "", &[("a", "int32?")])],
            ..Default::default()
        };
        let table = TypeTable::resolve(&schema).unwrap();
        let idx = table.index_of("s").unwrap();
        for value in [json!({"a": null}), json!({"a": 5})] {
            let bin = to_binary(&table, idx, &value).unwrap();
            let back = to_json(&table, idx, &bin).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn variant_roundtrips() {
        let schema = Schema {
            variants: vec![VariantDef { name: "v".to_string(), types: vec!["uint32".to_string(), "string".to_string()] }],
            ..Default::default()
        };
        let table = TypeTable::resolve(&schema).unwrap();
        let idx = table.index_of("v").unwrap();
        let value = json!(["string", "hi"]);
        let bin = to_binary(&table, idx, &value).unwrap();
        let back = to_json(&table, idx, &bin).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn variant_rejects_unknown_alternative_name() {
        let schema = Schema {
            variants: vec![VariantDef { name: "v".to_string(), types: vec!["uint32".to_string()] }],
            ..Default::default()
        };
        let table = TypeTable::resolve(&schema).unwrap();
        let idx = table.index_of("v").unwrap();
        let err = to_binary(&table, idx, &json!(["bogus", 1])).unwrap_err();
        assert!(matches!(err, AbiError::InvalidTypeForVariant(_, _)));
    }

    #[test]
    fn variant_decode_rejects_out_of_range_tag() {
        let schema = Schema {
            variants: vec![VariantDef { name: "v".to_string(), types: vec!["uint32".to_string()] }],
            ..Default::default()
        };
        let table = TypeTable::resolve(&schema).unwrap();
        let idx = table.index_of("v").unwrap();
        let bin = vec![5u8, 0, 0, 0, 0];
        let err = to_json(&table, idx, &bin).unwrap_err();
        assert!(matches!(err, AbiError::BadVariantIndex(5, _, 1)));
    }

    #[test]
    fn nested_struct_extension_propagates_only_through_last_field() {
        let schema = Schema {
            structs: vec![
                struct_def("inner", "", &[("a", "uint32"), ("b", "string$")]),
                struct_def("outer", "", &[("first", "inner"), ("last", "inner")]),
            ],
            ..Default::default()
        };
        let table = TypeTable::resolve(&schema).unwrap();
        let idx = table.index_of("outer").unwrap();
        // `first` is not the outer struct's last field, so its own trailing
        // extension field is NOT optional to provide.
        let err = to_binary(&table, idx, &json!({"first": {"a": 1}, "last": {"a": 2, "b": "x"}})).unwrap_err();
        assert_eq!(err, AbiError::MissingField("b".to_string()));

        let ok = to_binary(&table, idx, &json!({"first": {"a": 1, "b": "x"}, "last": {"a": 2}})).unwrap();
        let back = to_json(&table, idx, &ok).unwrap();
        assert_eq!(back, json!({"first": {"a": 1, "b": "x"}, "last": {"a": 2}}));
    }
}
