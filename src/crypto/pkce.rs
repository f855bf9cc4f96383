// ABOUTME: PKCE (RFC 7636) challenge format checks and verifier validation
// ABOUTME: S256 comparison is constant-time; plain is accepted only where the caller allows it
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tollgate_core::constants::pkce::{MAX_LENGTH, MIN_LENGTH};
use tollgate_core::models::PkceMethod;

/// Whether `value` is 43-128 characters from the RFC 3986 unreserved set
#[must_use]
pub fn is_well_formed(value: &str) -> bool {
    (MIN_LENGTH..=MAX_LENGTH).contains(&value.len())
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}

/// `BASE64URL(SHA256(verifier))`
#[must_use]
pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Verify `verifier` against a stored challenge
#[must_use]
pub fn verify(verifier: &str, challenge: &str, method: PkceMethod) -> bool {
    if !is_well_formed(verifier) {
        return false;
    }
    let computed = match method {
        PkceMethod::S256 => s256_challenge(verifier),
        PkceMethod::Plain => verifier.to_owned(),
    };
    computed.as_bytes().ct_eq(challenge.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        assert_eq!(s256_challenge(VERIFIER), CHALLENGE);
        assert!(verify(VERIFIER, CHALLENGE, PkceMethod::S256));
    }

    #[test]
    fn test_wrong_verifier_fails() {
        let other = "x".repeat(43);
        assert!(!verify(&other, CHALLENGE, PkceMethod::S256));
    }

    #[test]
    fn test_plain_compares_verbatim() {
        assert!(verify(VERIFIER, VERIFIER, PkceMethod::Plain));
        assert!(!verify(VERIFIER, CHALLENGE, PkceMethod::Plain));
    }

    #[test]
    fn test_format_bounds() {
        assert!(!is_well_formed(&"a".repeat(42)));
        assert!(is_well_formed(&"a".repeat(43)));
        assert!(is_well_formed(&"a".repeat(128)));
        assert!(!is_well_formed(&"a".repeat(129)));
        assert!(!is_well_formed(&format!("{}+", "a".repeat(43))));
    }
}
