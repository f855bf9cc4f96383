// ABOUTME: Generates opaque credentials from the system CSPRNG and hashes them for storage
// ABOUTME: Only SHA-256 digests of codes and refresh tokens are ever persisted
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use tollgate_core::errors::AppError;
use zeroize::Zeroize;

/// Bytes of entropy in codes and refresh tokens (256 bits)
pub const OPAQUE_TOKEN_BYTES: usize = 32;

/// Generate a URL-safe random value with `bytes` bytes of entropy
///
/// # Errors
///
/// Returns an error if the system random number generator fails
pub fn generate_random_string(bytes: usize) -> Result<String, AppError> {
    let rng = SystemRandom::new();
    let mut buffer = vec![0u8; bytes];
    rng.fill(&mut buffer)
        .map_err(|_| AppError::crypto("System RNG failure"))?;
    let encoded = URL_SAFE_NO_PAD.encode(&buffer);
    buffer.zeroize();
    Ok(encoded)
}

/// Generate an authorization code or refresh token
///
/// # Errors
///
/// Returns an error if the system random number generator fails
pub fn generate_opaque_token() -> Result<String, AppError> {
    generate_random_string(OPAQUE_TOKEN_BYTES)
}

/// Storage key for an opaque credential: hex SHA-256
#[must_use]
pub fn hash_opaque_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_token_has_256_bits() {
        let token = generate_opaque_token().unwrap();
        // 32 bytes -> 43 base64url characters without padding
        assert_eq!(token.len(), 43);
        assert_ne!(token, generate_opaque_token().unwrap());
    }

    #[test]
    fn test_hash_is_stable_hex() {
        let hash = hash_opaque_token("abc123");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_opaque_token("abc123"));
        assert_ne!(hash, hash_opaque_token("abc124"));
    }
}
