//! SHA256 digest utilities for registry manifests
//!
//! Registries are supposed to return `Docker-Content-Digest` with every manifest,
//! but not all of them do. These helpers compute the digest from the raw body
//! exactly as received, and validate digest-shaped references.

use sha2::{Digest, Sha256};

/// Utilities for working with SHA256 digests in registry context
pub struct DigestUtils;

impl DigestUtils {
    /// Compute SHA256 digest from byte data as lowercase hex
    pub fn compute_sha256(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Compute full content digest (with sha256: prefix) from byte data
    pub fn compute_docker_digest(data: &[u8]) -> String {
        format!("sha256:{}", Self::compute_sha256(data))
    }

    /// Validate SHA256 hex string (64 characters, all hex)
    pub fn is_valid_sha256_hex(digest: &str) -> bool {
        digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// Validate full content digest format (sha256:xxxxx)
    pub fn is_valid_docker_digest(digest: &str) -> bool {
        digest
            .strip_prefix("sha256:")
            .is_some_and(Self::is_valid_sha256_hex)
    }

    /// Short image id as printed by `docker images`: 12 hex chars of the config digest
    pub fn short_id(digest: &str) -> Option<String> {
        if digest.len() > 19 {
            digest.get(7..19).map(str::to_string)
        } else {
            None
        }
    }
}
