//! Short content fingerprint for artifact naming. Not an integrity
//! mechanism — just a stable deduplication hint.

use sha2::{Digest, Sha256};

/// Hex-character length of the fingerprint prefix.
pub const FINGERPRINT_LEN: usize = 8;

/// SHA-256 of the content, truncated to [`FINGERPRINT_LEN`] hex chars.
pub fn fingerprint(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..FINGERPRINT_LEN].to_string()
}
