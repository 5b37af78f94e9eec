// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Crypto boundary.
//!
//! The core only calls these primitives; key generation, signing and
//! verification are provided by an infrastructure adapter
//! (`crate::infrastructure::crypto::Ed25519CryptoProvider`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Public half of a content-protection key pair.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub Vec<u8>);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Short hex fingerprint for logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0[..self.0.len().min(8)])
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

/// Signing key pair whose public half is registered against a stored location.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub public: PublicKey,
    secret: Vec<u8>,
}

impl KeyPair {
    pub fn from_parts(public: PublicKey, secret: Vec<u8>) -> Self {
        Self { public, secret }
    }

    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

pub trait CryptoProvider: Send + Sync {
    fn generate_key_pair(&self) -> KeyPair;

    fn sign(&self, keys: &KeyPair, bytes: &[u8]) -> Result<Signature, CryptoError>;

    fn verify(&self, public: &PublicKey, bytes: &[u8], signature: &Signature) -> bool;
}
