//! Decimal string <-> fixed-width little-endian byte array, for the ABI
//! codec's `int128`/`uint128` builtins. Signed values use two's-complement
//! negation the same way a plain `i128`/`u128` would, just expressed over
//! an arbitrary-width `BigInt` so the byte width is a parameter rather than
//! baked into the type.

use crate::error::CodecError;
use num_bigint::{BigInt, Sign};
use num_traits::{Signed, Zero};

/// Parse a base-10 string (optional leading `-`) into `width` bytes,
/// little-endian, two's-complement if negative.
pub fn decimal_to_bytes(s: &str, width: usize) -> Result<Vec<u8>, CodecError> {
    let value: BigInt = s
        .parse()
        .map_err(|_| CodecError::MalformedDecimal(s.to_string()))?;

    let bit_width = width * 8;
    let (min, max) = signed_range(bit_width);
    if value < min || value > max {
        return Err(CodecError::DecimalOverflow(width, s.to_string()));
    }

    let unsigned = if value.is_negative() {
        let modulus = BigInt::from(1) << bit_width;
        value + modulus
    } else {
        value
    };

    let (_, mut le_bytes) = unsigned.to_bytes_le();
    le_bytes.resize(width, 0);
    Ok(le_bytes)
}

/// Parse `width` little-endian bytes as a two's-complement signed decimal,
/// rendering the base-10 string.
pub fn bytes_to_decimal(bytes: &[u8], signed: bool) -> String {
    let unsigned = BigInt::from_bytes_le(Sign::Plus, bytes);
    if signed && is_negative(bytes) {
        let bit_width = bytes.len() * 8;
        let modulus = BigInt::from(1) << bit_width;
        (unsigned - modulus).to_string()
    } else {
        unsigned.to_string()
    }
}

fn is_negative(bytes: &[u8]) -> bool {
    matches!(bytes.last(), Some(top) if top & 0x80 != 0)
}

fn signed_range(bit_width: usize) -> (BigInt, BigInt) {
    let max = (BigInt::from(1) << (bit_width - 1)) - BigInt::from(1);
    let min = -(BigInt::from(1) << (bit_width - 1));
    (min, max)
}

/// Parse an unsigned-only base-10 string into `width` little-endian bytes.
pub fn unsigned_decimal_to_bytes(s: &str, width: usize) -> Result<Vec<u8>, CodecError> {
    let value: BigInt = s
        .parse()
        .map_err(|_| CodecError::MalformedDecimal(s.to_string()))?;
    if value.is_negative() || value.bits() > (width * 8) as u64 {
        return Err(CodecError::DecimalOverflow(width, s.to_string()));
    }
    let (_, mut le_bytes) = value.to_bytes_le();
    le_bytes.resize(width, 0);
    if le_bytes.is_empty() {
        le_bytes = vec![0; width];
    }
    Ok(le_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_positive_i128() {
        let bytes = decimal_to_bytes("170141183460469231731687303715884105727", 16).unwrap();
        assert_eq!(
            bytes_to_decimal(&bytes, true),
            "170141183460469231731687303715884105727"
        );
    }

    #[test]
    fn roundtrips_negative_i128() {
        let bytes = decimal_to_bytes("-1", 16).unwrap();
        assert_eq!(bytes, vec![0xff; 16]);
        assert_eq!(bytes_to_decimal(&bytes, true), "-1");
    }

    #[test]
    fn rejects_overflow() {
        assert!(decimal_to_bytes("170141183460469231731687303715884105728", 16).is_err());
    }

    #[test]
    fn unsigned_u64_roundtrip() {
        let bytes = unsigned_decimal_to_bytes("18446744073709551615", 8).unwrap();
        assert_eq!(bytes_to_decimal(&bytes, false), "18446744073709551615");
    }

    #[test]
    fn unsigned_rejects_negative() {
        assert!(unsigned_decimal_to_bytes("-1", 8).is_err());
    }
}
