//! Release integrity verification.
//!
//! A downloaded AppImage is checked with every strong method the release
//! offers:
//! - **digest**: the `algo:hex` hash GitHub publishes on the asset itself
//! - **checksum_file**: one checksum asset (traditional, BSD or YAML manifest)
//!
//! Both run concurrently. Any passing method is enough to install; a warning is
//! attached when some method failed or when nothing could be checked at all.

pub mod detection;
pub mod hasher;
pub mod parser;
pub mod service;

pub use detection::{detect_available_methods, prioritize_checksum_files, DetectedMethods};
pub use hasher::{FileHasher, HashAlgorithm};
pub use parser::{find_checksum_entry, parse_checksum_file, ChecksumEntry, ChecksumMap};
pub use service::{VerificationContext, VerificationService};

use crate::config::VerificationConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DIGEST_METHOD: &str = "digest";
pub const CHECKSUM_FILE_METHOD: &str = "checksum_file";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MethodResult {
    pub passed: bool,
    /// Expected hash.
    pub hash: String,
    #[serde(default)]
    pub computed_hash: Option<String>,
    pub details: String,
}

impl MethodResult {
    fn passed(expected: &str, computed: String, details: String) -> Self {
        Self {
            passed: true,
            hash: expected.to_lowercase(),
            computed_hash: Some(computed),
            details,
        }
    }

    fn failed(expected: &str, computed: Option<String>, details: String) -> Self {
        Self {
            passed: false,
            hash: expected.to_lowercase(),
            computed_hash: computed,
            details,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub passed: bool,
    pub methods: BTreeMap<String, MethodResult>,
    pub warning: Option<String>,
    /// The verification config as it should be after this run.
    pub updated_config: VerificationConfig,
}

impl VerificationResult {
    pub fn method_names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }
}
