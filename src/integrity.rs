//! Map payload integrity: SHA-256 digests and what to do on mismatch.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What a checksum mismatch does to a map load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumPolicy {
    /// A mismatch fails the load; the map is never activated.
    #[default]
    Enforce,

    /// A mismatch is logged and the map is activated anyway.
    Warn,
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compare `bytes` against an expected hex digest, ignoring case.
///
/// Returns the computed digest on mismatch.
pub fn verify(bytes: &[u8], expected: &str) -> Result<(), String> {
    let actual = sha256_hex(bytes);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(actual)
    }
}
