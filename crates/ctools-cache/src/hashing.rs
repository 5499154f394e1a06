//! Streaming content hashes.
//!
//! Both archive members and extracted files are hashed by reading fixed-size
//! blocks, so memory use stays flat regardless of file size.

use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use md5::{Digest, Md5};
use sha2::Sha256;

use crate::CacheError;

/// Read size used for every streamed hash.
pub const HASH_BLOCK_SIZE: usize = 64 * 1024;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum HashAlgorithm {
    /// What conda records in repodata and `info/files` checks
    #[default]
    Md5,
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Blake3 => "blake3",
        }
    }

    /// Fresh incremental hasher for this algorithm.
    pub fn hasher(&self) -> StreamHasher {
        match self {
            HashAlgorithm::Md5 => StreamHasher::Md5(Md5::new()),
            HashAlgorithm::Sha256 => StreamHasher::Sha256(Sha256::new()),
            HashAlgorithm::Blake3 => StreamHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "blake3" => Ok(HashAlgorithm::Blake3),
            _ => Err(CacheError::UnsupportedHash(s.to_string())),
        }
    }
}

/// Incremental hasher over one of the supported algorithms
pub enum StreamHasher {
    Md5(Md5),
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl StreamHasher {
    pub fn update(&mut self, block: &[u8]) {
        match self {
            StreamHasher::Md5(h) => h.update(block),
            StreamHasher::Sha256(h) => h.update(block),
            StreamHasher::Blake3(h) => {
                h.update(block);
            }
        }
    }

    /// Raw digest bytes.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            StreamHasher::Md5(h) => h.finalize().to_vec(),
            StreamHasher::Sha256(h) => h.finalize().to_vec(),
            StreamHasher::Blake3(h) => h.finalize().as_bytes().to_vec(),
        }
    }
}

/// Hash everything `reader` yields, one block at a time.
pub fn hash_reader<R: Read + ?Sized>(reader: &mut R, algorithm: HashAlgorithm) -> io::Result<Vec<u8>> {
    let mut hasher = algorithm.hasher();
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Hex form of [`hash_reader`].
pub fn hash_reader_hex<R: Read + ?Sized>(reader: &mut R, algorithm: HashAlgorithm) -> io::Result<String> {
    hash_reader(reader, algorithm).map(hex::encode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        let data = b"hello world";
        assert_eq!(
            hash_reader_hex(&mut &data[..], HashAlgorithm::Md5).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert_eq!(
            hash_reader_hex(&mut &data[..], HashAlgorithm::Sha256).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(
            hash_reader_hex(&mut &data[..], HashAlgorithm::Blake3).unwrap(),
            blake3::hash(data).to_hex().to_string()
        );
    }

    #[test]
    fn test_multi_block_input() {
        let data = vec![7u8; HASH_BLOCK_SIZE * 3 + 11];
        let streamed = hash_reader(&mut &data[..], HashAlgorithm::Sha256).unwrap();
        assert_eq!(streamed, Sha256::digest(&data).to_vec());
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!("MD5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert_eq!("blake3".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Blake3);
        assert!(matches!(
            "crc32".parse::<HashAlgorithm>(),
            Err(CacheError::UnsupportedHash(_))
        ));
    }
}
