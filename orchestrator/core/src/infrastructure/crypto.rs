// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;

use crate::domain::crypto::{CryptoError, CryptoProvider, KeyPair, PublicKey, Signature};

/// Ed25519 signatures for content protection.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519CryptoProvider;

impl Ed25519CryptoProvider {
    pub fn new() -> Self {
        Self
    }

    fn signing_key(keys: &KeyPair) -> Result<SigningKey, CryptoError> {
        let secret: [u8; 32] = keys.secret_bytes().try_into().map_err(|_| {
            CryptoError::InvalidKey("Invalid secret key length (must be 32 bytes)".to_string())
        })?;
        let signing_key = SigningKey::from_bytes(&secret);
        if signing_key.verifying_key().as_bytes() != keys.public.as_bytes() {
            return Err(CryptoError::InvalidKey(
                "Public key does not belong to the secret key".to_string(),
            ));
        }
        Ok(signing_key)
    }
}

impl CryptoProvider for Ed25519CryptoProvider {
    fn generate_key_pair(&self) -> KeyPair {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        KeyPair::from_parts(
            PublicKey(signing_key.verifying_key().to_bytes().to_vec()),
            signing_key.to_bytes().to_vec(),
        )
    }

    fn sign(&self, keys: &KeyPair, bytes: &[u8]) -> Result<Signature, CryptoError> {
        let signing_key = Self::signing_key(keys)?;
        Ok(Signature(signing_key.sign(bytes).to_bytes().to_vec()))
    }

    fn verify(&self, public: &PublicKey, bytes: &[u8], signature: &Signature) -> bool {
        let Ok(public_key_bytes) = <[u8; 32]>::try_from(public.as_bytes()) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key_bytes) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(signature.0.as_slice()) else {
            return false;
        };
        verifying_key
            .verify(bytes, &ed25519_dalek::Signature::from_bytes(&sig_bytes))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let crypto = Ed25519CryptoProvider::new();
        let keys = crypto.generate_key_pair();

        let signature = crypto.sign(&keys, b"profile bytes").unwrap();

        assert!(crypto.verify(&keys.public, b"profile bytes", &signature));
        assert!(!crypto.verify(&keys.public, b"tampered", &signature));
    }

    #[test]
    fn test_verification_with_other_key_fails() {
        let crypto = Ed25519CryptoProvider::new();
        let keys1 = crypto.generate_key_pair();
        let keys2 = crypto.generate_key_pair();

        let signature = crypto.sign(&keys1, b"bytes").unwrap();
        assert!(!crypto.verify(&keys2.public, b"bytes", &signature));
    }

    #[test]
    fn test_mismatched_key_pair_is_rejected() {
        let crypto = Ed25519CryptoProvider::new();
        let keys1 = crypto.generate_key_pair();
        let keys2 = crypto.generate_key_pair();
        let mixed = KeyPair::from_parts(keys2.public.clone(), keys1.secret_bytes().to_vec());

        assert!(matches!(
            crypto.sign(&mixed, b"bytes"),
            Err(CryptoError::InvalidKey(_))
        ));
    }
}
