//! Parsers for checksum files published next to release assets.
//!
//! Three layouts are understood:
//!
//! ```text
//! # traditional (sha256sum / sha512sum output)
//! 9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08  Foo.AppImage
//!
//! # BSD (`shasum --tag`, `.DIGEST` files)
//! SHA256 (Foo.AppImage) = 9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08
//!
//! # electron-builder manifest (latest-linux.yml)
//! files:
//!   - url: Foo.AppImage
//!     sha512: <base64 or hex>
//! ```
//!
//! Every parser skips records it cannot read and returns whatever it could.

use super::hasher::HashAlgorithm;
use crate::types::ChecksumFormat;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecksumEntry {
    /// Lowercase hex.
    pub hash: String,
    pub algorithm: HashAlgorithm,
}

pub type ChecksumMap = HashMap<String, ChecksumEntry>;

fn bsd_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z0-9-]+)\s*\((.+)\)\s*=\s*([A-Fa-f0-9]+)\s*$")
            .expect("BSD checksum pattern is valid")
    })
}

pub fn parse_checksum_file(content: &str, format: ChecksumFormat) -> ChecksumMap {
    let parsed = match format {
        ChecksumFormat::Traditional => parse_traditional(content),
        ChecksumFormat::Bsd => parse_bsd(content),
        ChecksumFormat::Yaml => parse_yaml(content),
    };
    tracing::debug!("Parsed {} entries from {} checksum file", parsed.len(), format);
    parsed
}

/// Exact filename lookup.
pub fn find_checksum_entry<'a>(parsed: &'a ChecksumMap, target: &str) -> Option<&'a ChecksumEntry> {
    parsed.get(target)
}

/// Guess the layout of a checksum file from its text.
pub fn detect_format_from_content(content: &str) -> ChecksumFormat {
    let first = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'));

    match first {
        Some(line) if bsd_line().is_match(line) => ChecksumFormat::Bsd,
        Some(line)
            if line.starts_with("version:")
                || line.starts_with("files:")
                || line.starts_with("path:")
                || line.starts_with("sha512:") =>
        {
            ChecksumFormat::Yaml
        }
        _ => ChecksumFormat::Traditional,
    }
}

pub fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Turn a manifest hash value into lowercase hex.
///
/// Hex is tested first: a hex digest is also valid base64 alphabet and would
/// otherwise be decoded into garbage.
pub fn normalize_hash_value(value: &str, algorithm: HashAlgorithm) -> Option<String> {
    let value = value.trim();
    if is_hex(value) {
        return Some(value.to_lowercase());
    }

    let decoded = STANDARD.decode(value).ok()?;
    if decoded.len() * 2 != algorithm.hex_len() {
        tracing::debug!(
            "Decoded {} value has {} bytes, expected {}",
            algorithm,
            decoded.len(),
            algorithm.hex_len() / 2
        );
        return None;
    }
    Some(hex::encode(decoded))
}

fn parse_traditional(content: &str) -> ChecksumMap {
    let mut entries = ChecksumMap::new();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((hash, rest)) = line.split_once(char::is_whitespace) else {
            tracing::debug!("Skipping checksum line {}: no filename", index + 1);
            continue;
        };
        let filename = rest.trim_start().trim_start_matches('*').trim_end();

        let algorithm = if is_hex(hash) {
            HashAlgorithm::from_hex_len(hash.len())
        } else {
            None
        };
        let Some(algorithm) = algorithm else {
            tracing::debug!("Skipping checksum line {}: '{}' is not a digest", index + 1, hash);
            continue;
        };
        if filename.is_empty() {
            continue;
        }

        entries.insert(
            filename.to_string(),
            ChecksumEntry {
                hash: hash.to_lowercase(),
                algorithm,
            },
        );
    }

    entries
}

fn parse_bsd(content: &str) -> ChecksumMap {
    let mut entries = ChecksumMap::new();

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let Some(caps) = bsd_line().captures(line) else {
            tracing::debug!("Skipping BSD checksum line {}", index + 1);
            continue;
        };

        let algorithm = match caps[1].parse::<HashAlgorithm>() {
            Ok(algorithm) => algorithm,
            Err(e) => {
                tracing::debug!("Skipping BSD checksum line {}: {}", index + 1, e);
                continue;
            }
        };
        let hash = caps[3].to_lowercase();
        if hash.len() != algorithm.hex_len() {
            tracing::debug!("Skipping BSD checksum line {}: wrong digest length", index + 1);
            continue;
        }

        entries.insert(caps[2].trim().to_string(), ChecksumEntry { hash, algorithm });
    }

    entries
}

fn yaml_entry(node: &serde_yaml::Value) -> Option<ChecksumEntry> {
    if let Some(value) = node.get("sha512").and_then(|v| v.as_str()) {
        if let Some(hash) = normalize_hash_value(value, HashAlgorithm::Sha512) {
            let algorithm = HashAlgorithm::from_hex_len(hash.len()).unwrap_or(HashAlgorithm::Sha512);
            return Some(ChecksumEntry { hash, algorithm });
        }
    }
    if let Some(value) = node.get("sha256").and_then(|v| v.as_str()) {
        if let Some(hash) = normalize_hash_value(value, HashAlgorithm::Sha256) {
            let algorithm = HashAlgorithm::from_hex_len(hash.len()).unwrap_or(HashAlgorithm::Sha256);
            return Some(ChecksumEntry { hash, algorithm });
        }
    }
    None
}

fn parse_yaml(content: &str) -> ChecksumMap {
    let mut entries = ChecksumMap::new();

    let document: serde_yaml::Value = match serde_yaml::from_str(content) {
        Ok(document) => document,
        Err(e) => {
            tracing::warn!("Could not parse YAML checksum manifest: {}", e);
            return entries;
        }
    };

    if let Some(files) = document.get("files").and_then(|f| f.as_sequence()) {
        for file in files {
            let name = file
                .get("url")
                .or_else(|| file.get("name"))
                .or_else(|| file.get("path"))
                .and_then(|v| v.as_str());
            match (name, yaml_entry(file)) {
                (Some(name), Some(entry)) => {
                    entries.insert(name.to_string(), entry);
                }
                _ => tracing::debug!("Skipping manifest file entry without name or hash"),
            }
        }
    }

    if let Some(path) = document.get("path").and_then(|v| v.as_str()) {
        if !entries.contains_key(path) {
            if let Some(entry) = yaml_entry(&document) {
                entries.insert(path.to_string(), entry);
            }
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA256_A: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
    const SHA256_B: &str = "60303ae22b998861bce3b28f33eec1be758a213c86c93c076dbe9f558c11c752";

    #[test]
    fn test_traditional_lookup_ignores_layout() {
        let content = format!(
            "# checksums\n\n{}  Foo-x86_64.AppImage\n   {} *Foo-arm64.AppImage  \nnot-a-hash broken.txt\n",
            SHA256_A.to_uppercase(),
            SHA256_B
        );

        let parsed = parse_checksum_file(&content, ChecksumFormat::Traditional);

        assert_eq!(parsed.len(), 2);
        let entry = find_checksum_entry(&parsed, "Foo-x86_64.AppImage").unwrap();
        assert_eq!(entry.hash, SHA256_A);
        assert_eq!(entry.algorithm, HashAlgorithm::Sha256);
        assert_eq!(
            find_checksum_entry(&parsed, "Foo-arm64.AppImage").unwrap().hash,
            SHA256_B
        );
    }

    #[test]
    fn test_lookup_is_exact() {
        let content = format!("{}  Foo.AppImage\n", SHA256_A);
        let parsed = parse_checksum_file(&content, ChecksumFormat::Traditional);

        assert!(find_checksum_entry(&parsed, "Foo").is_none());
        assert!(find_checksum_entry(&parsed, "foo.appimage").is_none());
    }

    #[test]
    fn test_bsd_format() {
        let content = format!(
            "SHA256 (Foo.AppImage) = {}\nSHA256 (Bar.AppImage) = tooshort\nCRC32 (Baz) = abcd\n",
            SHA256_A
        );

        let parsed = parse_checksum_file(&content, ChecksumFormat::Bsd);

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["Foo.AppImage"].hash, SHA256_A);
    }

    #[test]
    fn test_yaml_base64_sha512() {
        let raw = [0xabu8; 64];
        let b64 = STANDARD.encode(raw);
        let content = format!(
            "version: 1.2.0\nfiles:\n  - url: Foo-1.2.0.AppImage\n    sha512: {}\n    size: 42\npath: Foo-1.2.0.AppImage\nsha512: {}\n",
            b64, b64
        );

        let parsed = parse_checksum_file(&content, ChecksumFormat::Yaml);
        let entry = find_checksum_entry(&parsed, "Foo-1.2.0.AppImage").unwrap();

        assert_eq!(entry.algorithm, HashAlgorithm::Sha512);
        assert_eq!(entry.hash, "ab".repeat(64));
    }

    #[test]
    fn test_yaml_hex_sha256() {
        let content = format!("files:\n  - url: Foo.AppImage\n    sha256: {}\n", SHA256_B);
        let parsed = parse_checksum_file(&content, ChecksumFormat::Yaml);
        assert_eq!(parsed["Foo.AppImage"].hash, SHA256_B);
    }

    #[test]
    fn test_hex_digest_never_base64_decoded() {
        // 64 hex characters are also valid base64 and would decode to 48 bytes.
        assert_eq!(
            normalize_hash_value(SHA256_A, HashAlgorithm::Sha256).as_deref(),
            Some(SHA256_A)
        );
        assert_eq!(
            normalize_hash_value(SHA256_A, HashAlgorithm::Sha512).as_deref(),
            Some(SHA256_A)
        );
    }

    #[test]
    fn test_invalid_yaml_returns_empty() {
        let parsed = parse_checksum_file("files: [unclosed", ChecksumFormat::Yaml);
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_detect_format_from_content() {
        assert_eq!(
            detect_format_from_content(&format!("SHA256 (a) = {}", SHA256_A)),
            ChecksumFormat::Bsd
        );
        assert_eq!(
            detect_format_from_content("version: 1.0\nfiles: []"),
            ChecksumFormat::Yaml
        );
        assert_eq!(
            detect_format_from_content(&format!("{}  a", SHA256_A)),
            ChecksumFormat::Traditional
        );
    }
}
