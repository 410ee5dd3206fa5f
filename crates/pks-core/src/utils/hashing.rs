//! Digest helpers for bundle signatures.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compare two hex digests without short-circuiting on the first mismatch.
///
/// Case-insensitive; digests of different length never match.
pub fn digests_match(expected: &str, actual: &str) -> bool {
    let (a, b) = (expected.as_bytes(), actual.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b)
        .fold(0u8, |acc, (x, y)| acc | (x.to_ascii_lowercase() ^ y.to_ascii_lowercase()))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(sha256_hex(b"").len(), 64);
    }

    #[test]
    fn test_digests_match() {
        let digest = sha256_hex(b"bundle");
        assert!(digests_match(&digest, &digest));
        assert!(digests_match(&digest, &digest.to_uppercase()));
        assert!(!digests_match(&digest, &sha256_hex(b"bundle!")));
        assert!(!digests_match(&digest, &digest[..63]));
        assert!(!digests_match("", &digest));
    }
}
