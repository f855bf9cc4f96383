// ABOUTME: JWKS (JSON Web Key Set) types and RSA key pairs for RS256 signing
// ABOUTME: Converts RSA public keys to JWK form and builds jsonwebtoken encoding/decoding keys
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

//! JWKS (JSON Web Key Set) material
//!
//! - RSA key pair generation for RS256 JWT signing
//! - PKCS#8 PEM import/export for persistence
//! - JWK conversion for the `/.well-known/jwks.json` endpoint
//!
//! Private keys never leave the server. Only [`JsonWebKey`] values are published.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use tollgate_core::constants::keys::SIGNING_ALGORITHM;
use tollgate_core::errors::AppError;
use zeroize::Zeroizing;

/// JWK (JSON Web Key) representation for the JWKS endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    /// Key type (always "RSA")
    pub kty: String,
    /// Public key use (always "sig")
    #[serde(rename = "use")]
    pub key_use: String,
    /// Key ID matching the `kid` JWT header
    pub kid: String,
    /// Algorithm (RS256)
    pub alg: String,
    /// RSA modulus (base64url)
    pub n: String,
    /// RSA exponent (base64url)
    pub e: String,
}

/// JWKS (JSON Web Key Set) container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    /// Published public keys
    pub keys: Vec<JsonWebKey>,
}

impl JsonWebKeySet {
    /// Find a key by id
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&JsonWebKey> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

/// RSA key pair with precomputed jsonwebtoken keys
#[derive(Clone)]
pub struct RsaKeyPair {
    kid: String,
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl RsaKeyPair {
    /// Generate an RSA key pair.
    ///
    /// This is CPU-heavy; async callers should run it on a blocking thread.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or key encoding fails
    pub fn generate(kid: &str, key_size_bits: usize) -> Result<Self, AppError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, key_size_bits)
            .map_err(|e| AppError::crypto(format!("Failed to generate RSA private key: {e}")))?;
        Self::from_private_key(kid, private_key)
    }

    /// Import a PKCS#8 PEM private key
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM cannot be parsed
    pub fn from_pkcs8_pem(kid: &str, pem: &str) -> Result<Self, AppError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| AppError::crypto(format!("Failed to parse private key for {kid}: {e}")))?;
        Self::from_private_key(kid, private_key)
    }

    fn from_private_key(kid: &str, private_key: RsaPrivateKey) -> Result<Self, AppError> {
        let public_key = RsaPublicKey::from(&private_key);

        let pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AppError::crypto(format!("Failed to encode private key: {e}")))?;
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AppError::crypto(format!("Failed to build encoding key: {e}")))?;

        let (n, e) = encode_components(&public_key);
        let decoding_key = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|e| AppError::crypto(format!("Failed to build decoding key: {e}")))?;

        Ok(Self {
            kid: kid.to_owned(),
            private_key,
            public_key,
            encoding_key,
            decoding_key,
        })
    }

    /// Key identifier
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Export the private key as PKCS#8 PEM
    ///
    /// # Errors
    ///
    /// Returns an error if PEM encoding fails
    pub fn export_private_key_pem(&self) -> Result<Zeroizing<String>, AppError> {
        self.private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AppError::crypto(format!("Failed to export private key as PEM: {e}")))
    }

    /// Public key in JWK form
    #[must_use]
    pub fn to_jwk(&self) -> JsonWebKey {
        let (n, e) = encode_components(&self.public_key);
        JsonWebKey {
            kty: "RSA".to_owned(),
            key_use: "sig".to_owned(),
            kid: self.kid.clone(),
            alg: SIGNING_ALGORITHM.to_owned(),
            n,
            e,
        }
    }

    /// Key used to sign JWTs
    #[must_use]
    pub const fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// Key used to verify JWTs
    #[must_use]
    pub const fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

fn encode_components(public_key: &RsaPublicKey) -> (String, String) {
    (
        URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
        URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwk_shape_and_pem_round_trip() {
        let pair = RsaKeyPair::generate("kid-1", 2048).unwrap();
        let jwk = pair.to_jwk();
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.key_use, "sig");
        assert_eq!(jwk.alg, "RS256");
        assert_eq!(jwk.kid, "kid-1");
        assert_eq!(jwk.e, "AQAB");

        let pem = pair.export_private_key_pem().unwrap();
        let imported = RsaKeyPair::from_pkcs8_pem("kid-1", &pem).unwrap();
        assert_eq!(imported.to_jwk(), jwk);
    }

    #[test]
    fn test_jwk_serializes_use_field() {
        let set = JsonWebKeySet {
            keys: vec![JsonWebKey {
                kty: "RSA".to_owned(),
                key_use: "sig".to_owned(),
                kid: "k".to_owned(),
                alg: "RS256".to_owned(),
                n: "n".to_owned(),
                e: "AQAB".to_owned(),
            }],
        };
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["keys"][0]["use"], "sig");
        assert!(set.find("k").is_some());
    }
}
