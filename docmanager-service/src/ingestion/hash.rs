//! Content hashing for uploaded documents.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the uploaded bytes, stored as `content_hash`.
pub fn compute_content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            compute_content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_is_hex_and_content_sensitive() {
        let hash = compute_content_hash(b"%PDF-1.7 quarterly report");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(hash, compute_content_hash(b"%PDF-1.7 annual report"));
    }
}
