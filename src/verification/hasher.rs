use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
    Sha1,
    Md5,
}

impl HashAlgorithm {
    /// Length of the hex encoding of a digest.
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha512 => 128,
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Md5 => 32,
        }
    }

    /// Whether files can be hashed with this algorithm. sha1 and md5 are
    /// recognized in checksum files but never trusted.
    pub fn is_supported(&self) -> bool {
        matches!(self, HashAlgorithm::Sha256 | HashAlgorithm::Sha512)
    }

    pub fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            64 => Some(HashAlgorithm::Sha256),
            128 => Some(HashAlgorithm::Sha512),
            40 => Some(HashAlgorithm::Sha1),
            32 => Some(HashAlgorithm::Md5),
            _ => None,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Md5 => "md5",
        };
        f.write_str(name)
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "md5" => Ok(HashAlgorithm::Md5),
            other => Err(Error::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

fn hash_reader<D: Digest, R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hex digest of a file, streamed in fixed-size chunks.
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<String> {
    let file = File::open(path)?;
    match algorithm {
        HashAlgorithm::Sha256 => Ok(hash_reader::<Sha256, _>(file)?),
        HashAlgorithm::Sha512 => Ok(hash_reader::<Sha512, _>(file)?),
        other => Err(Error::UnsupportedAlgorithm(other.to_string())),
    }
}

pub fn sha256_file(path: &Path) -> Result<String> {
    hash_file(path, HashAlgorithm::Sha256)
}

/// Hashes one local file off the async executor.
#[derive(Debug, Clone)]
pub struct FileHasher {
    path: PathBuf,
}

impl FileHasher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn compute(&self, algorithm: HashAlgorithm) -> Result<String> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || hash_file(&path, algorithm))
            .await
            .map_err(|e| Error::Task(e.to_string()))?
    }
}
