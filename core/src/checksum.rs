//! SHA-256 streaming checksum, shared by the metadata enrichment pipeline
//! (`metadata::checksum` step) and the duplicate/collision resolver's
//! content-equality check (`reuse_if_equal`).

use crate::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Digest of the empty byte sequence, used as a sentinel/test fixture.
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
const _: () = assert!(EMPTY_SHA256.len() == 64);

const CHUNK_SIZE: usize = 8 * 1024;

/// Computes the lowercase hex SHA-256 digest of a file's contents,
/// streaming it in 8 KiB chunks so peak memory stays bounded regardless of
/// file size.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Computes the lowercase hex SHA-256 digest of an in-memory byte slice.
/// Used by tests and by small sidecar payloads that are already resident.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_matches_canonical_digest() {
        let file = NamedTempFile::new().unwrap();
        let digest = sha256_file(file.path()).unwrap();
        assert_eq!(digest, EMPTY_SHA256);
    }

    #[test]
    fn idempotent_across_calls_and_identical_content() {
        let mut a = NamedTempFile::new().unwrap();
        a.write_all(b"hello world").unwrap();
        let mut b = NamedTempFile::new().unwrap();
        b.write_all(b"hello world").unwrap();

        let d1 = sha256_file(a.path()).unwrap();
        let d2 = sha256_file(a.path()).unwrap();
        let d3 = sha256_file(b.path()).unwrap();

        assert_eq!(d1, d2);
        assert_eq!(d1, d3);
    }

    #[test]
    fn different_content_differs() {
        let mut a = NamedTempFile::new().unwrap();
        a.write_all(b"hello").unwrap();
        let mut b = NamedTempFile::new().unwrap();
        b.write_all(b"world").unwrap();

        assert_ne!(sha256_file(a.path()).unwrap(), sha256_file(b.path()).unwrap());
    }
}
