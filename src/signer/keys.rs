// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! secp256k1 key material and public key encodings.

use std::fmt;

use alloy::primitives::keccak256;
use k256::ecdsa::{signature::hazmat::PrehashVerifier, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::rand_core::OsRng;
use k256::pkcs8::{DecodePrivateKey, DecodePublicKey};
use k256::SecretKey;
use zeroize::Zeroizing;

use super::SigningError;
use crate::ledger::types::EvmAddress;

/// DER prefix of an ECDSA secp256k1 SubjectPublicKeyInfo with a compressed point.
const DER_PREFIX: [u8; 14] = [
    0x30, 0x2d, 0x30, 0x07, 0x06, 0x05, 0x2b, 0x81, 0x04, 0x00, 0x0a, 0x03, 0x22, 0x00,
];

/// Digest the ledger expects signatures over: keccak-256 of the frozen bytes.
pub fn ledger_digest(bytes: &[u8]) -> [u8; 32] {
    keccak256(bytes).0
}

/// Public half of a secp256k1 key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }

    /// `302d...` DER form with the compressed point, hex encoded.
    pub fn to_der_hex(&self) -> String {
        let point = self.0.to_encoded_point(true);
        let mut der = Vec::with_capacity(DER_PREFIX.len() + point.len());
        der.extend_from_slice(&DER_PREFIX);
        der.extend_from_slice(point.as_bytes());
        alloy::hex::encode(der)
    }

    /// Parse the DER hex form produced by [`PublicKey::to_der_hex`] or a bare
    /// SEC1 point in hex.
    pub fn from_der_hex(hex: &str) -> Result<Self, SigningError> {
        let hex = hex.trim();
        let bytes = alloy::hex::decode(hex.strip_prefix("0x").unwrap_or(hex))
            .map_err(|_| SigningError::InvalidKey("public key is not hex".to_string()))?;
        let point = bytes.strip_prefix(&DER_PREFIX[..]).unwrap_or(&bytes);
        VerifyingKey::from_sec1_bytes(point)
            .map(Self)
            .map_err(|_| SigningError::InvalidKey("not a secp256k1 public key".to_string()))
    }

    /// Parse SubjectPublicKeyInfo DER as returned by a key-custody service.
    pub fn from_spki_der(der: &[u8]) -> Result<Self, SigningError> {
        VerifyingKey::from_public_key_der(der)
            .map(Self)
            .map_err(|_| SigningError::InvalidKey("not a secp256k1 SPKI public key".to_string()))
    }

    /// EVM address alias: last 20 bytes of keccak-256 over the uncompressed point.
    pub fn evm_alias(&self) -> EvmAddress {
        let uncompressed = self.0.to_encoded_point(false);
        let hash = keccak256(&uncompressed.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);
        EvmAddress::from_bytes(&address)
    }

    /// Verify a raw `r‖s` signature over the ledger digest of `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        self.0
            .verify_prehash(&ledger_digest(message), &signature)
            .is_ok()
    }
}

impl From<VerifyingKey> for PublicKey {
    fn from(value: VerifyingKey) -> Self {
        Self(value)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_der_hex())
    }
}

/// A private scalar and its public key.
///
/// Only exists inside provisioning and a local signer's scope. The signing
/// key zeroizes itself on drop.
pub struct KeyMaterial {
    signing_key: SigningKey,
}

impl KeyMaterial {
    /// Fresh random key pair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Decode key bytes: a raw 32-byte scalar, or PEM (SEC1 or PKCS#8).
    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self, SigningError> {
        if bytes.len() == 32 {
            return SigningKey::from_slice(bytes)
                .map(|signing_key| Self { signing_key })
                .map_err(|_| SigningError::InvalidKey("scalar out of range".to_string()));
        }

        let text = std::str::from_utf8(bytes)
            .map_err(|_| SigningError::InvalidKey("unrecognized key encoding".to_string()))?;
        let der = pem::parse(text)
            .map(|pem| Zeroizing::new(pem.into_contents()))
            .map_err(|_| SigningError::InvalidKey("invalid PEM".to_string()))?;
        let secret = SecretKey::from_sec1_der(&der)
            .or_else(|_| SecretKey::from_pkcs8_der(&der))
            .map_err(|_| SigningError::InvalidKey("invalid key format".to_string()))?;
        Ok(Self {
            signing_key: SigningKey::from(secret),
        })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().clone())
    }

    /// Raw 32-byte scalar, for handing to the envelope service.
    pub fn secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        let scalar = Zeroizing::new(self.signing_key.to_bytes());
        Zeroizing::new(scalar.to_vec())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

    #[test]
    fn der_hex_round_trip() {
        let key = KeyMaterial::generate();
        let public = key.public_key();
        let der_hex = public.to_der_hex();

        assert!(der_hex.starts_with("302d300706052b8104000a032200"));
        assert_eq!(der_hex.len(), (14 + 33) * 2);
        assert_eq!(PublicKey::from_der_hex(&der_hex).unwrap(), public);
        assert!(PublicKey::from_der_hex("302d").is_err());
    }

    #[test]
    fn alias_matches_evm_address_derivation() {
        // Well-known vector: private key 1 maps to this address.
        let mut scalar = [0u8; 32];
        scalar[31] = 1;
        let key = KeyMaterial::from_key_bytes(&scalar).unwrap();
        assert_eq!(
            key.public_key().evm_alias().as_str(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn spki_der_parses() {
        let key = KeyMaterial::generate();
        let der = key
            .signing_key()
            .verifying_key()
            .to_public_key_der()
            .unwrap();
        assert_eq!(
            PublicKey::from_spki_der(der.as_bytes()).unwrap(),
            key.public_key()
        );
    }

    #[test]
    fn pem_keys_decode() {
        let key = KeyMaterial::generate();
        let pem = key
            .signing_key()
            .to_pkcs8_pem(LineEnding::LF)
            .unwrap();
        let decoded = KeyMaterial::from_key_bytes(pem.as_bytes()).unwrap();
        assert_eq!(decoded.public_key(), key.public_key());

        let sec1 = SecretKey::from_slice(&key.secret_bytes())
            .unwrap()
            .to_sec1_pem(LineEnding::LF)
            .unwrap();
        let decoded = KeyMaterial::from_key_bytes(sec1.as_bytes()).unwrap();
        assert_eq!(decoded.public_key(), key.public_key());

        assert!(KeyMaterial::from_key_bytes(b"not a key").is_err());
        assert!(KeyMaterial::from_key_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn secret_bytes_round_trip() {
        let key = KeyMaterial::generate();
        let bytes = key.secret_bytes();
        assert_eq!(bytes.len(), 32);
        let restored = KeyMaterial::from_key_bytes(&bytes).unwrap();
        assert_eq!(restored.public_key(), key.public_key());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let key = KeyMaterial::generate();
        let hex_secret = alloy::hex::encode(key.secret_bytes().as_slice());
        assert!(!format!("{key:?}").contains(&hex_secret));
    }
}
