//! Random, human-transcribable tokens.
//!
//! Tokens are drawn from the z-base-32 alphabet, so every character carries
//! exactly five bits of entropy and survives being read aloud or typed into a
//! terminal. Signin and session tokens are split tokens: a short public id
//! used to find the row, followed by a secret that is only ever compared in
//! constant time.

use std::fmt;

use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

/// The 32-symbol z-base-32 alphabet, indexed by 5-bit value.
pub const ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

/// Length of the CSRF token bound to each session.
pub const CSRF_TOKEN_LEN: usize = 40;

/// Errors that can occur while minting tokens.
#[derive(Debug, Clone)]
pub enum TokenError {
    /// The operating system randomness source could not be read.
    EntropySource(String),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntropySource(msg) => write!(f, "Randomness source unavailable: {}", msg),
        }
    }
}

impl std::error::Error for TokenError {}

/// Shape of a split `id || secret` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenShape {
    pub id_len: usize,
    pub secret_len: usize,
}

impl TokenShape {
    /// Signin tokens: 4 character id, 8 character secret.
    pub const SIGNIN: TokenShape = TokenShape {
        id_len: 4,
        secret_len: 8,
    };

    /// Session tokens: 8 character id, 40 character secret.
    pub const SESSION: TokenShape = TokenShape {
        id_len: 8,
        secret_len: 40,
    };

    /// Total length of a token of this shape.
    pub const fn token_len(&self) -> usize {
        self.id_len + self.secret_len
    }

    /// Mint a fresh `(id, secret)` pair.
    pub fn generate(&self) -> Result<(String, String), TokenError> {
        Ok((generate(self.id_len)?, generate(self.secret_len)?))
    }

    /// Split a presented token into `(id, secret)`.
    ///
    /// Returns `None` when the length is wrong or the token is not ASCII. No
    /// store lookup should happen for such input. Characters outside the
    /// alphabet are not rejected here; they simply never match a stored row.
    pub fn split<'a>(&self, token: &'a str) -> Option<(&'a str, &'a str)> {
        if token.len() != self.token_len() || !token.is_ascii() {
            return None;
        }
        Some(token.split_at(self.id_len))
    }
}

/// Generate a token of `chars` characters from the OS randomness source.
///
/// There is no fallback generator: if the source fails, the caller gets
/// `TokenError::EntropySource` and the request must be aborted.
pub fn generate(chars: usize) -> Result<String, TokenError> {
    let bits = chars * 5;
    let mut bytes = vec![0u8; bits.div_ceil(8)];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| TokenError::EntropySource(e.to_string()))?;
    Ok(encode_bits(&bytes, bits))
}

/// Encode the first `bits` bits of `data` (most significant bit first).
///
/// A trailing group shorter than five bits is padded with zeros.
pub fn encode_bits(data: &[u8], bits: usize) -> String {
    let bits = bits.min(data.len() * 8);
    let mut out = String::with_capacity(bits.div_ceil(5));

    let mut offset = 0;
    while offset < bits {
        let mut value = 0usize;
        for i in 0..5 {
            let bit = offset + i;
            value <<= 1;
            if bit < bits && data[bit / 8] & (0x80 >> (bit % 8)) != 0 {
                value |= 1;
            }
        }
        out.push(ALPHABET[value] as char);
        offset += 5;
    }

    out
}

/// True when every character of `token` belongs to the alphabet.
pub fn is_well_formed(token: &str) -> bool {
    token.bytes().all(|b| ALPHABET.contains(&b))
}

/// Compare two secrets without leaking the position of the first mismatch.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_has_requested_length_and_alphabet() {
        for chars in [1, 4, 8, 16, 40, 57] {
            let token = generate(chars).unwrap();
            assert_eq!(token.len(), chars);
            assert!(is_well_formed(&token), "unexpected character in {}", token);
        }
    }

    #[test]
    fn test_generate_zero_is_empty() {
        assert_eq!(generate(0).unwrap(), "");
    }

    #[test]
    fn test_generated_secrets_differ() {
        let a = generate(40).unwrap();
        let b = generate(40).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_encode_bits_known_values() {
        assert_eq!(encode_bits(&[0x00], 5), "y");
        assert_eq!(encode_bits(&[0xff], 5), "9");
        assert_eq!(encode_bits(&[0b0000_1000], 5), "b");
        // 0xff 0xff = 11111 11111 11111 1(0000)
        assert_eq!(encode_bits(&[0xff, 0xff], 16), "999o");
    }

    #[test]
    fn test_encode_bits_clamps_to_available_data() {
        assert_eq!(encode_bits(&[0x00], 40), "yy");
    }

    #[test]
    fn test_split_signin_token() {
        let (id, secret) = TokenShape::SIGNIN.split("ybndrfg8ejkm").unwrap();
        assert_eq!(id, "ybnd");
        assert_eq!(secret, "rfg8ejkm");
    }

    #[test]
    fn test_split_rejects_wrong_length() {
        assert!(TokenShape::SIGNIN.split("ybndrfg8ejk").is_none());
        assert!(TokenShape::SIGNIN.split("ybndrfg8ejkmc").is_none());
        assert!(TokenShape::SIGNIN.split("").is_none());
    }

    #[test]
    fn test_split_rejects_non_ascii() {
        // multi-byte input of the right byte length must not panic
        assert!(TokenShape::SIGNIN.split("ybnéfg8ejkm").is_none());
    }

    #[test]
    fn test_split_only_checks_shape() {
        let (id, secret) = TokenShape::SIGNIN.split("ABCDEFGHIJKL").unwrap();
        assert_eq!(id, "ABCD");
        assert_eq!(secret, "EFGHIJKL");
        assert!(!is_well_formed("ABCDEFGHIJKL"));
    }

    #[test]
    fn test_shape_generate() {
        let (id, secret) = TokenShape::SESSION.generate().unwrap();
        assert_eq!(id.len(), 8);
        assert_eq!(secret.len(), 40);
        let token = format!("{}{}", id, secret);
        assert_eq!(TokenShape::SESSION.split(&token), Some((id.as_str(), secret.as_str())));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("rfg8ejkm", "rfg8ejkm"));
        assert!(!constant_time_eq("rfg8ejkm", "rfg8ejky"));
        assert!(!constant_time_eq("short", "longer"));
        assert!(!constant_time_eq("", "x"));
    }
}
