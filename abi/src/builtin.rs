//! Leaf builtin types. Encoders/decoders are an exhaustive match on this
//! enum rather than a virtual-dispatch hierarchy (Design Note "Dynamic
//! dispatch over the ABI variant"): a sum type plus a match *is* the lookup
//! table keyed by the builtin tag.

use crate::error::AbiError;
use glint_core::{bytes as bc, decimal, hexutil};
use serde_json::Value;
use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    I128,
    U128,
    F32,
    F64,
    VarInt32,
    VarUint32,
    Bytes,
    String,
    /// Fixed-width hash, e.g. a block or transaction id.
    Checksum256,
    /// Fixed-width public key container (opaque; no curve operations live
    /// here, per spec.md's signature/key non-goal).
    PublicKey,
    /// Fixed-width signature container (opaque, same reasoning).
    Signature,
}

impl BuiltinType {
    pub fn by_name(name: &str) -> Option<BuiltinType> {
        use BuiltinType::*;
        Some(match name {
            "bool" => Bool,
            "int8" => I8,
            "uint8" => U8,
            "int16" => I16,
            "uint16" => U16,
            "int32" => I32,
            "uint32" => U32,
            "int64" => I64,
            "uint64" => U64,
            "int128" => I128,
            "uint128" => U128,
            "float32" => F32,
            "float64" => F64,
            "varint32" => VarInt32,
            "varuint32" => VarUint32,
            "bytes" => Bytes,
            "string" => String,
            "checksum256" => Checksum256,
            "public_key" => PublicKey,
            "signature" => Signature,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use BuiltinType::*;
        match self {
            Bool => "bool",
            I8 => "int8",
            U8 => "uint8",
            I16 => "int16",
            U16 => "uint16",
            I32 => "int32",
            U32 => "uint32",
            I64 => "int64",
            U64 => "uint64",
            I128 => "int128",
            U128 => "uint128",
            F32 => "float32",
            F64 => "float64",
            VarInt32 => "varint32",
            VarUint32 => "varuint32",
            Bytes => "bytes",
            String => "string",
            Checksum256 => "checksum256",
            PublicKey => "public_key",
            Signature => "signature",
        }
    }

    /// Integers at or above 64 bits round-trip through JSON as strings to
    /// avoid the precision loss JS-style float-backed numbers would cause.
    fn is_wide_integer(self) -> bool {
        matches!(self, BuiltinType::I64 | BuiltinType::U64 | BuiltinType::I128 | BuiltinType::U128)
    }

    pub fn encode_binary<W: Write>(self, value: &Value, w: &mut W) -> Result<(), AbiError> {
        use BuiltinType::*;
        match self {
            Bool => {
                let b = value.as_bool().ok_or_else(|| json_shape("bool", value))?;
                w.write_all(&[b as u8]).map_err(ioerr)
            }
            I8 => write_int(value, w, |v| (v as i8).to_le_bytes().to_vec()),
            U8 => write_int(value, w, |v| (v as u8).to_le_bytes().to_vec()),
            I16 => write_int(value, w, |v| (v as i16).to_le_bytes().to_vec()),
            U16 => write_int(value, w, |v| (v as u16).to_le_bytes().to_vec()),
            I32 => write_int(value, w, |v| (v as i32).to_le_bytes().to_vec()),
            U32 => write_int(value, w, |v| (v as u32).to_le_bytes().to_vec()),
            I64 => {
                let s = value.as_str().ok_or_else(|| json_shape("string", value))?;
                w.write_all(&decimal::decimal_to_bytes(s, 8)?).map_err(ioerr)
            }
            U64 => {
                let s = value.as_str().ok_or_else(|| json_shape("string", value))?;
                w.write_all(&decimal::unsigned_decimal_to_bytes(s, 8)?).map_err(ioerr)
            }
            I128 => {
                let s = value.as_str().ok_or_else(|| json_shape("string", value))?;
                w.write_all(&decimal::decimal_to_bytes(s, 16)?).map_err(ioerr)
            }
            U128 => {
                let s = value.as_str().ok_or_else(|| json_shape("string", value))?;
                w.write_all(&decimal::unsigned_decimal_to_bytes(s, 16)?).map_err(ioerr)
            }
            F32 => {
                let f = value.as_f64().ok_or_else(|| json_shape("number", value))? as f32;
                w.write_all(&f.to_le_bytes()).map_err(ioerr)
            }
            F64 => {
                let f = value.as_f64().ok_or_else(|| json_shape("number", value))?;
                w.write_all(&f.to_le_bytes()).map_err(ioerr)
            }
            VarInt32 => {
                let n = value.as_i64().ok_or_else(|| json_shape("number", value))? as i32;
                // zig-zag encode, LEB128 body.
                let zz = (n.wrapping_shl(1) ^ (n >> 31)) as u32;
                let mut buf = Vec::new();
                glint_core::encode_varuint32(zz, &mut buf);
                w.write_all(&buf).map_err(ioerr)
            }
            VarUint32 => {
                let n = value.as_u64().ok_or_else(|| json_shape("number", value))? as u32;
                let mut buf = Vec::new();
                glint_core::encode_varuint32(n, &mut buf);
                w.write_all(&buf).map_err(ioerr)
            }
            Bytes => {
                let s = value.as_str().ok_or_else(|| json_shape("hex string", value))?;
                let raw = hexutil::decode(s)?;
                let mut len_buf = Vec::new();
                glint_core::encode_varuint32(raw.len() as u32, &mut len_buf);
                w.write_all(&len_buf).map_err(ioerr)?;
                w.write_all(&raw).map_err(ioerr)
            }
            String => {
                let s = value.as_str().ok_or_else(|| json_shape("string", value))?;
                let raw = s.as_bytes();
                let mut len_buf = Vec::new();
                glint_core::encode_varuint32(raw.len() as u32, &mut len_buf);
                w.write_all(&len_buf).map_err(ioerr)?;
                w.write_all(raw).map_err(ioerr)
            }
            Checksum256 => write_fixed_hex(value, w, 32),
            PublicKey => write_fixed_hex(value, w, 33),
            Signature => write_fixed_hex(value, w, 65),
        }
    }

    pub fn decode_binary<R: Read>(self, r: &mut R) -> Result<Value, AbiError> {
        use BuiltinType::*;
        Ok(match self {
            Bool => {
                let mut b = [0u8; 1];
                r.read_exact(&mut b).map_err(|_| AbiError::UnexpectedEof)?;
                Value::Bool(b[0] != 0)
            }
            I8 => Value::from(read_i8(r)?),
            U8 => Value::from(read_u8(r)?),
            I16 => Value::from(i16::from_le_bytes(read_n::<2>(r)?)),
            U16 => Value::from(u16::from_le_bytes(read_n::<2>(r)?)),
            I32 => Value::from(i32::from_le_bytes(read_n::<4>(r)?)),
            U32 => Value::from(u32::from_le_bytes(read_n::<4>(r)?)),
            I64 => Value::String(decimal::bytes_to_decimal(&read_vec(r, 8)?, true)),
            U64 => Value::String(decimal::bytes_to_decimal(&read_vec(r, 8)?, false)),
            I128 => Value::String(decimal::bytes_to_decimal(&read_vec(r, 16)?, true)),
            U128 => Value::String(decimal::bytes_to_decimal(&read_vec(r, 16)?, false)),
            F32 => Value::from(f32::from_le_bytes(read_n::<4>(r)?) as f64),
            F64 => Value::from(f64::from_le_bytes(read_n::<8>(r)?)),
            VarInt32 => {
                let zz = decode_varuint_stream(r)?;
                let n = ((zz >> 1) as i32) ^ -((zz & 1) as i32);
                Value::from(n)
            }
            VarUint32 => Value::from(decode_varuint_stream(r)?),
            Bytes => {
                let len = decode_varuint_stream(r)? as usize;
                Value::String(hexutil::encode(&bc::read_exact_vec(r, len)?))
            }
            String => {
                let len = decode_varuint_stream(r)? as usize;
                let raw = bc::read_exact_vec(r, len)?;
                Value::String(std::string::String::from_utf8_lossy(&raw).into_owned())
            }
            Checksum256 => Value::String(hexutil::encode(&read_vec(r, 32)?)),
            PublicKey => Value::String(hexutil::encode(&read_vec(r, 33)?)),
            Signature => Value::String(hexutil::encode(&read_vec(r, 65)?)),
        })
    }

    /// Whether this leaf is represented as a JSON string (vs. a bare
    /// number/bool) — used by struct/array JSON-object field ordering to
    /// decide nothing special, kept mainly for documentation purposes.
    pub fn is_string_encoded(self) -> bool {
        self.is_wide_integer()
            || matches!(
                self,
                BuiltinType::Bytes
                    | BuiltinType::String
                    | BuiltinType::Checksum256
                    | BuiltinType::PublicKey
                    | BuiltinType::Signature
            )
    }
}

fn json_shape(expected: &'static str, got: &Value) -> AbiError {
    AbiError::UnexpectedJsonShape(expected, got.to_string())
}

fn ioerr(_: std::io::Error) -> AbiError {
    AbiError::UnexpectedEof
}

fn write_int<W: Write>(
    value: &Value,
    w: &mut W,
    to_bytes: impl Fn(i64) -> Vec<u8>,
) -> Result<(), AbiError> {
    let n = value.as_i64().ok_or_else(|| json_shape("number", value))?;
    w.write_all(&to_bytes(n)).map_err(ioerr)
}

fn write_fixed_hex<W: Write>(value: &Value, w: &mut W, width: usize) -> Result<(), AbiError> {
    let s = value.as_str().ok_or_else(|| json_shape("hex string", value))?;
    let raw = hexutil::decode(s)?;
    if raw.len() != width {
        return Err(AbiError::UnexpectedJsonShape("hex string", value.to_string()));
    }
    w.write_all(&raw).map_err(ioerr)
}

fn read_n<const N: usize>(r: &mut impl Read) -> Result<[u8; N], AbiError> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(|_| AbiError::UnexpectedEof)?;
    Ok(buf)
}

fn read_i8(r: &mut impl Read) -> Result<i8, AbiError> {
    Ok(read_n::<1>(r)?[0] as i8)
}

fn read_u8(r: &mut impl Read) -> Result<u8, AbiError> {
    Ok(read_n::<1>(r)?[0])
}

fn read_vec(r: &mut impl Read, n: usize) -> Result<Vec<u8>, AbiError> {
    bc::read_exact_vec(r, n).map_err(AbiError::from)
}

fn decode_varuint_stream(r: &mut impl Read) -> Result<u32, AbiError> {
    // varuint32 is self-delimiting (continuation bit), so read byte at a
    // time rather than guessing a buffer size up front.
    let mut buf = Vec::with_capacity(5);
    loop {
        let byte = read_u8(r)?;
        buf.push(byte);
        if byte & 0x80 == 0 {
            break;
        }
        if buf.len() > 5 {
            return Err(AbiError::Codec(glint_core::CodecError::BadVarint));
        }
    }
    let (v, _) = glint_core::decode_varuint32(&buf)?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(ty: BuiltinType, value: Value) {
        let mut buf = Vec::new();
        ty.encode_binary(&value, &mut buf).unwrap();
        let mut cursor = &buf[..];
        let decoded = ty.decode_binary(&mut cursor).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn bool_roundtrip() {
        roundtrip(BuiltinType::Bool, json!(true));
        roundtrip(BuiltinType::Bool, json!(false));
    }

    #[test]
    fn u32_roundtrip() {
        roundtrip(BuiltinType::U32, json!(42));
    }

    #[test]
    fn u64_is_string_encoded() {
        roundtrip(BuiltinType::U64, json!("18446744073709551615"));
    }

    #[test]
    fn i128_negative_roundtrip() {
        roundtrip(BuiltinType::I128, json!("-170141183460469231731687303715884105728"));
    }

    #[test]
    fn string_roundtrip() {
        roundtrip(BuiltinType::String, json!("hello"));
    }

    #[test]
    fn checksum256_roundtrip() {
        let hex = "00".repeat(32);
        roundtrip(BuiltinType::Checksum256, Value::String(hex));
    }

    #[test]
    fn varuint32_roundtrip() {
        roundtrip(BuiltinType::VarUint32, json!(300));
    }

    #[test]
    fn varint32_negative_roundtrip() {
        roundtrip(BuiltinType::VarInt32, json!(-5));
    }
}
