//! MST utility functions: hashing, layers, keys

use crate::error::{KeyError, MstError, Result};
use crate::{DAG_CBOR_CID_CODEC, SHA2_256};
use cid::Cid as IpldCid;
use sha2::{Digest, Sha256};

/// Maximum key length in bytes
pub const MAX_KEY_LEN: usize = 256;

/// Compute CID from raw bytes
///
/// Uses SHA-256 hash and DAG-CBOR codec. Assumes data is already DAG-CBOR encoded.
pub fn compute_cid(data: &[u8]) -> Result<IpldCid> {
    compute_cid_with_codec(DAG_CBOR_CID_CODEC, data)
}

/// Compute a SHA-256 CID for bytes under an arbitrary codec
///
/// Value blocks are opaque to the tree; callers pick the codec (raw, dag-cbor, ...).
pub fn compute_cid_with_codec(codec: u64, data: &[u8]) -> Result<IpldCid> {
    let hash = Sha256::digest(data);
    let mh = multihash::Multihash::<64>::wrap(SHA2_256, hash.as_slice())
        .map_err(MstError::serialization)?;

    Ok(IpldCid::new_v1(codec, mh))
}

/// Calculate the layer (height) for a key based on its hash
///
/// height = floor(leading_zero_bits(sha256(key)) / 2), which gives a fanout of 4.
/// More leading zeros = higher layer, closer to the root.
pub fn key_height(key: &str) -> usize {
    let hash = Sha256::digest(key.as_bytes());
    leading_zeros(&hash) / 2
}

/// Count leading zero bits in hash
fn leading_zeros(hash: &[u8]) -> usize {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 8;
        } else {
            count += byte.leading_zeros() as usize;
            break;
        }
    }
    count
}

/// Validate MST key format
///
/// Keys must match: [a-zA-Z0-9._:~/-]+
/// Max length: 256 bytes
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(KeyError::Empty.into());
    }

    if key.len() > MAX_KEY_LEN {
        return Err(KeyError::TooLong {
            len: key.len(),
            max: MAX_KEY_LEN,
        }
        .into());
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '~' | '-' | '/'))
    {
        return Err(KeyError::InvalidChars {
            key: key.to_string(),
        }
        .into());
    }

    Ok(())
}

/// Count shared prefix length between two byte strings
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_valid() {
        assert!(validate_key("app.bsky.feed.post/abc123").is_ok());
        assert!(validate_key("foo.bar/test-key_2024").is_ok());
        assert!(validate_key("a").is_ok());
    }

    #[test]
    fn test_validate_key_empty() {
        assert!(validate_key("").is_err());
    }

    #[test]
    fn test_validate_key_too_long() {
        let long_key = "a".repeat(257);
        assert!(validate_key(&long_key).is_err());
        assert!(validate_key(&"a".repeat(256)).is_ok());
    }

    #[test]
    fn test_validate_key_invalid_chars() {
        assert!(validate_key("key with spaces").is_err());
        assert!(validate_key("key@invalid").is_err());
        assert!(validate_key("key#hash").is_err());
    }

    #[test]
    fn test_common_prefix_len() {
        assert_eq!(common_prefix_len(b"hello", b"help"), 3);
        assert_eq!(common_prefix_len(b"abc", b"abc"), 3);
        assert_eq!(common_prefix_len(b"abc", b"def"), 0);
        assert_eq!(common_prefix_len(b"", b"test"), 0);
    }

    #[test]
    fn test_key_height_known_values() {
        // Fixtures shared by atproto MST implementations
        assert_eq!(key_height("2653ae71"), 0);
        assert_eq!(key_height("blue"), 1);
        assert_eq!(key_height("app.bsky.feed.post/454397e440ec"), 4);
        assert_eq!(key_height("app.bsky.feed.post/9adeb165882c"), 8);
    }

    #[test]
    fn test_leading_zeros() {
        assert_eq!(leading_zeros(&[0, 0, 0, 1]), 31);
        assert_eq!(leading_zeros(&[0xFF, 0, 0]), 0);
        assert_eq!(leading_zeros(&[0, 0x80]), 8);
        assert_eq!(leading_zeros(&[0, 0x01]), 15);
    }

    #[test]
    fn test_compute_cid_is_deterministic() {
        let a = compute_cid(b"hello").unwrap();
        let b = compute_cid(b"hello").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.codec(), DAG_CBOR_CID_CODEC);
        assert_eq!(a.hash().code(), SHA2_256);
        assert_eq!(a.hash().digest(), Sha256::digest(b"hello").as_slice());
        assert_ne!(a, compute_cid(b"hellp").unwrap());
    }
}
