//! Hash type shared by the chunker, merkle tree and proof codec
//!
//! A hash is 32 bytes. Whenever it leaves this crate as a number (on-chain
//! uint256 fields, the storage order) it is read as a big-endian unsigned
//! integer.

use alloy_primitives::U256;

/// 32-byte SHA256 hash
pub type Hash = [u8; 32];

/// Zero hash, also the smallest 256-bit value
pub const ZERO_HASH: Hash = [0u8; 32];

/// Convert hash to hex string
pub fn to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Convert hex string to hash
///
/// Accepts an optional `0x` prefix. The value must be exactly 32 bytes.
pub fn from_hex(hex_str: &str) -> Result<Hash, hex::FromHexError> {
    let trimmed = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(trimmed)?;
    if bytes.len() != 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

/// Render a hash as the decimal form of its big-endian 256-bit value
pub fn to_decimal(hash: &Hash) -> String {
    U256::from_be_bytes(*hash).to_string()
}

/// Widen a u64 into a big-endian 256-bit hash value
pub fn hash_from_u64(value: u64) -> Hash {
    let mut hash = ZERO_HASH;
    hash[24..].copy_from_slice(&value.to_be_bytes());
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_hex_empty() {
        let hex = to_hex(&ZERO_HASH);
        assert_eq!(hex, "0000000000000000000000000000000000000000000000000000000000000000");
    }

    #[test]
    fn test_from_hex_with_prefix() {
        let hex = "0x00ff100000000000000000000000000000000000000000000000000000000000";
        let hash = from_hex(hex).unwrap();
        assert_eq!(hash[0], 0x00);
        assert_eq!(hash[1], 0xff);
        assert_eq!(hash[2], 0x10);
    }

    #[test]
    fn test_from_hex_wrong_length() {
        assert!(from_hex("abcd").is_err());
        assert!(from_hex("zz").is_err());
    }

    #[test]
    fn test_roundtrip() {
        let mut original = [0u8; 32];
        original[1] = 1;
        original[3] = 128;
        original[31] = 255;

        let result = from_hex(&to_hex(&original)).unwrap();
        assert_eq!(result, original);
    }

    #[test]
    fn test_to_decimal_small_values() {
        assert_eq!(to_decimal(&ZERO_HASH), "0");
        assert_eq!(to_decimal(&hash_from_u64(1)), "1");
        assert_eq!(to_decimal(&hash_from_u64(255)), "255");
        assert_eq!(to_decimal(&hash_from_u64(256)), "256");
        assert_eq!(to_decimal(&hash_from_u64(u64::MAX)), "18446744073709551615");
    }

    #[test]
    fn test_to_decimal_max() {
        let max = [0xffu8; 32];
        assert_eq!(
            to_decimal(&max),
            "115792089237316195423570985008687907853269984665640564039457584007913129639935"
        );
    }

    #[test]
    fn test_to_decimal_big_endian() {
        let mut hash = ZERO_HASH;
        hash[23] = 1; // 2^64
        assert_eq!(to_decimal(&hash), "18446744073709551616");
    }
}
