// Time and key encoding helpers shared by the stores

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use sha2::{Digest, Sha256};

use crate::types::Fingerprint;

/// Current time as Unix seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Encode SSH wire-format key bytes for storage.
pub fn encode_pubkey(pubkey: &[u8]) -> String {
    STANDARD.encode(pubkey)
}

/// Decode a stored key back to wire-format bytes.
pub fn decode_pubkey(stored: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(stored)
}

/// OpenSSH style fingerprint: `SHA256:` followed by unpadded base64.
pub fn fingerprint(pubkey: &[u8]) -> Fingerprint {
    let digest = Sha256::digest(pubkey);
    Fingerprint::new(format!("SHA256:{}", STANDARD_NO_PAD.encode(digest)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pubkey_storage_encoding() {
        let key = b"\x00\x00\x00\x0bssh-ed25519\x00\x00\x00\x20abcdefghijklmnopqrstuvwxyz012345";
        let stored = encode_pubkey(key);
        assert_eq!(decode_pubkey(&stored).unwrap(), key.to_vec());
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = fingerprint(b"");
        // SHA-256 of the empty input
        assert_eq!(fp.as_str(), "SHA256:47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU");
    }

    #[test]
    fn test_fingerprint_distinguishes_keys() {
        assert_ne!(fingerprint(b"key-a"), fingerprint(b"key-b"));
    }

    #[test]
    fn test_unix_now_is_recent() {
        assert!(unix_now() > 1_700_000_000);
    }
}
