//! Content fingerprints and document identities.
//!
//! Two independent axes: the identity tracks *where* a document lives (a
//! truncated SHA-256 of its source URI) and the fingerprint tracks *what* it
//! contains (xxHash64 of the raw bytes). Reindexing compares fingerprints
//! under a fixed identity.

use sha2::{Digest, Sha256};
use std::hash::Hasher;
use std::io::Read;
use std::path::Path;
use twox_hash::XxHash64;

/// Read size used while streaming content through the fingerprint hash.
pub const FINGERPRINT_BLOCK_SIZE: usize = 64 * 1024;

/// Hex characters kept from the SHA-256 digest of a source URI.
pub const DOCUMENT_ID_LEN: usize = 16;

/// Fingerprint everything `reader` yields, reading fixed-size blocks.
pub fn content_fingerprint<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = XxHash64::with_seed(0);
    let mut buffer = vec![0u8; FINGERPRINT_BLOCK_SIZE];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.write(&buffer[..read]);
    }
    Ok(format!("{:016x}", hasher.finish()))
}

/// Fingerprint an in-memory byte slice.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut hasher = XxHash64::with_seed(0);
    for block in bytes.chunks(FINGERPRINT_BLOCK_SIZE) {
        hasher.write(block);
    }
    format!("{:016x}", hasher.finish())
}

/// Fingerprint a file on disk without loading it whole.
pub async fn fingerprint_file(path: &Path) -> std::io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&path)?;
        content_fingerprint(std::io::BufReader::new(file))
    })
    .await
    .map_err(std::io::Error::other)?
}

/// Normalize a source URI before hashing: trim, and use `/` separators.
pub fn normalize_source_uri(source_uri: &str) -> String {
    source_uri.trim().replace('\\', "/")
}

/// Deterministic identity of the document stored at `source_uri`.
pub fn document_identity(source_uri: &str) -> String {
    let digest = Sha256::digest(normalize_source_uri(source_uri).as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(DOCUMENT_ID_LEN);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_stable_and_short() {
        let first = document_identity("/srv/docs/manual.txt");
        let second = document_identity("/srv/docs/manual.txt");
        assert_eq!(first, second);
        assert_eq!(first.len(), DOCUMENT_ID_LEN);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identity_known_value() {
        // sha256("abc") = ba7816bf8f01cfea...
        assert_eq!(document_identity("abc"), "ba7816bf8f01cfea");
    }

    #[test]
    fn test_identity_normalizes_separators_and_whitespace() {
        assert_eq!(
            document_identity("  C:\\Projects\\report.txt "),
            document_identity("C:/Projects/report.txt")
        );
        assert_ne!(
            document_identity("/srv/a.txt"),
            document_identity("/srv/b.txt")
        );
    }

    #[test]
    fn test_fingerprint_detects_changes() {
        let original = fingerprint_bytes(b"first version");
        assert_eq!(original, fingerprint_bytes(b"first version"));
        assert_ne!(original, fingerprint_bytes(b"second version"));
        assert_eq!(original.len(), 16);
    }

    #[test]
    fn test_streaming_matches_in_memory_across_blocks() -> std::io::Result<()> {
        let content: Vec<u8> = (0..(FINGERPRINT_BLOCK_SIZE * 2 + 17))
            .map(|i| (i % 251) as u8)
            .collect();
        let streamed = content_fingerprint(std::io::Cursor::new(&content))?;
        assert_eq!(streamed, fingerprint_bytes(&content));
        Ok(())
    }

    #[tokio::test]
    async fn test_fingerprint_file() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("notes.txt");
        tokio::fs::write(&path, b"garden plan").await?;
        assert_eq!(fingerprint_file(&path).await?, fingerprint_bytes(b"garden plan"));
        Ok(())
    }
}
