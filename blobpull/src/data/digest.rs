//! Deterministic fingerprinting of structured data.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Default digest length, in hex characters.
pub const DIGEST_LEN: usize = 64;

/// Return the hex SHA-256 digest of `data` JSON serialization, truncated to `len` hex characters.
///
/// Struct fields serialize in declaration order, so the digest only depends on field values.
/// Data failing to serialize (eg. maps with non-string keys) is digested as an empty input.
pub fn digest_data<T: Serialize + ?Sized>(data: &T, len: usize) -> String {
    let input = serde_json::to_vec(data).unwrap_or_default();
    digest_bytes(&input, len)
}

/// Return the hex SHA-256 digest of `s`, truncated to `len` hex characters.
#[inline]
pub fn digest_string(s: &str, len: usize) -> String {
    digest_bytes(s.as_bytes(), len)
}

fn digest_bytes(input: &[u8], len: usize) -> String {
    let mut digest = hex::encode(Sha256::digest(input));
    digest.truncate(len);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_string() {
        // sha256("abc")
        assert_eq!(
            digest_string("abc", DIGEST_LEN),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest_string("abc", 32), "ba7816bf8f01cfea414140de5dae2223");
    }

    #[test]
    fn test_digest_data_is_deterministic() {
        #[derive(Serialize)]
        struct Data<'a> {
            url: &'a str,
            strip: usize,
        }

        let a = digest_data(&Data { url: "x", strip: 1 }, DIGEST_LEN);
        let b = digest_data(&Data { url: "x", strip: 1 }, DIGEST_LEN);
        let c = digest_data(&Data { url: "x", strip: 2 }, DIGEST_LEN);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), DIGEST_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_digest_prefix() {
        let long = digest_data(&["a", "b"], DIGEST_LEN);
        let short = digest_data(&["a", "b"], 32);

        assert!(long.starts_with(&short));
        assert_eq!(digest_data(&["a", "b"], 100), long);
    }
}
