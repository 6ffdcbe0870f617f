//! Content hashing for dedup.

use sha2::{Digest, Sha256};
use std::{io, path::Path};
use tokio::{fs::File, io::AsyncReadExt};

const READ_BUFFER: usize = 64 * 1024;

/// SHA-256 of a file's bytes together with its length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    /// Lowercase hex, 64 characters.
    pub hash: String,
    pub size_bytes: u64,
}

/// Stream the file through SHA-256 without loading it whole.
pub async fn hash_file(path: &Path) -> io::Result<FileDigest> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER];
    let mut size_bytes = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size_bytes += n as u64;
    }
    Ok(FileDigest {
        hash: hex::encode(hasher.finalize()),
        size_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"", "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")]
    #[case(b"hello", "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")]
    #[tokio::test]
    async fn test_known_digests(#[case] content: &[u8], #[case] expected: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        tokio::fs::write(&path, content).await.unwrap();

        let digest = hash_file(&path).await.unwrap();
        assert_eq!(digest.hash, expected);
        assert_eq!(digest.size_bytes, content.len() as u64);
    }

    #[tokio::test]
    async fn test_file_larger_than_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let content: Vec<u8> = (0..READ_BUFFER * 3 + 17).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &content).await.unwrap();

        let digest = hash_file(&path).await.unwrap();
        assert_eq!(digest.hash, hex::encode(Sha256::digest(&content)));
        assert_eq!(digest.size_bytes, content.len() as u64);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = hash_file(&dir.path().join("absent")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
