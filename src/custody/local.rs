// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Process-held AES-256-GCM root key.
//!
//! Ciphertext layout (base64): `version(1) | nonce(12) | ciphertext | tag(16)`.
//! The canonical encryption context is the AEAD associated data, so a
//! ciphertext only opens under the context it was sealed with.

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use super::{CustodyError, EncryptionContext, KeyCustody};

const CIPHERTEXT_VERSION: u8 = 1;
const TAG_LEN: usize = 16;

/// AES-256-GCM root key.
pub struct LocalRootKey {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for LocalRootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LocalRootKey(..)")
    }
}

impl LocalRootKey {
    /// Build from 32 raw key bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CustodyError> {
        let unbound = UnboundKey::new(&AES_256_GCM, bytes)
            .map_err(|_| CustodyError::Config("root key must be 32 bytes".to_string()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Build from a 64-character hex string (optionally `0x`-prefixed).
    pub fn from_hex(hex: &str) -> Result<Self, CustodyError> {
        let hex = hex.trim();
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes = Zeroizing::new(
            alloy::hex::decode(hex)
                .map_err(|_| CustodyError::Config("root key is not valid hex".to_string()))?,
        );
        Self::from_bytes(&bytes)
    }

    /// Fresh random root key.
    pub fn generate() -> Result<Self, CustodyError> {
        let rng = SystemRandom::new();
        let mut bytes = Zeroizing::new([0u8; 32]);
        rng.fill(&mut *bytes)
            .map_err(|_| CustodyError::Unavailable("system randomness".to_string()))?;
        Self::from_bytes(&*bytes)
    }

    fn seal(&self, plaintext: &[u8], context: &EncryptionContext) -> Result<String, CustodyError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CustodyError::Unavailable("system randomness".to_string()))?;

        let aad = context.canonical_bytes();
        let mut in_out = Zeroizing::new(Vec::with_capacity(plaintext.len() + TAG_LEN));
        in_out.extend_from_slice(plaintext);
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(aad.as_slice()),
                &mut *in_out,
            )
            .map_err(|_| CustodyError::Rejected("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + in_out.len());
        out.push(CIPHERTEXT_VERSION);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(Base64::encode_string(&out))
    }

    fn open(
        &self,
        ciphertext: &str,
        context: &EncryptionContext,
    ) -> Result<Zeroizing<Vec<u8>>, CustodyError> {
        let raw = Base64::decode_vec(ciphertext.trim())
            .map_err(|_| CustodyError::MalformedCiphertext("not base64".to_string()))?;
        if raw.len() < 1 + NONCE_LEN + TAG_LEN {
            return Err(CustodyError::MalformedCiphertext("too short".to_string()));
        }
        if raw[0] != CIPHERTEXT_VERSION {
            return Err(CustodyError::MalformedCiphertext(format!(
                "unsupported version {}",
                raw[0]
            )));
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(&raw[1..1 + NONCE_LEN]);

        let aad = context.canonical_bytes();
        let mut in_out = Zeroizing::new(raw[1 + NONCE_LEN..].to_vec());
        let plaintext_len = self
            .key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(aad.as_slice()),
                &mut in_out,
            )
            .map_err(|_| CustodyError::ContextMismatch)?
            .len();

        Ok(Zeroizing::new(in_out[..plaintext_len].to_vec()))
    }
}

#[async_trait]
impl KeyCustody for LocalRootKey {
    async fn encrypt(
        &self,
        plaintext: &[u8],
        context: &EncryptionContext,
    ) -> Result<String, CustodyError> {
        self.seal(plaintext, context)
    }

    async fn decrypt(
        &self,
        ciphertext: &str,
        context: &EncryptionContext,
    ) -> Result<Zeroizing<Vec<u8>>, CustodyError> {
        self.open(ciphertext, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[tokio::test]
    async fn round_trip_under_same_context() {
        let root = LocalRootKey::from_hex(ROOT_HEX).unwrap();
        let ctx = EncryptionContext::user_wallet("alice");

        let ciphertext = root.encrypt(b"secret key bytes", &ctx).await.unwrap();
        assert!(!ciphertext.contains("secret"));

        let plaintext = root.decrypt(&ciphertext, &ctx).await.unwrap();
        assert_eq!(plaintext.as_slice(), b"secret key bytes");
    }

    #[tokio::test]
    async fn different_context_fails() {
        let root = LocalRootKey::from_hex(ROOT_HEX).unwrap();
        let ciphertext = root
            .encrypt(b"k", &EncryptionContext::user_wallet("alice"))
            .await
            .unwrap();

        let err = root
            .decrypt(&ciphertext, &EncryptionContext::user_wallet("bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::ContextMismatch));

        let err = root
            .decrypt(&ciphertext, &EncryptionContext::operator("0.0.2"))
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::ContextMismatch));
    }

    #[tokio::test]
    async fn nonces_are_fresh() {
        let root = LocalRootKey::generate().unwrap();
        let ctx = EncryptionContext::user_wallet("alice");
        let a = root.encrypt(b"same", &ctx).await.unwrap();
        let b = root.encrypt(b"same", &ctx).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn other_root_key_cannot_open() {
        let a = LocalRootKey::generate().unwrap();
        let b = LocalRootKey::generate().unwrap();
        let ctx = EncryptionContext::user_wallet("alice");
        let ciphertext = a.encrypt(b"k", &ctx).await.unwrap();
        assert!(b.decrypt(&ciphertext, &ctx).await.is_err());
    }

    #[tokio::test]
    async fn malformed_ciphertext() {
        let root = LocalRootKey::generate().unwrap();
        let ctx = EncryptionContext::user_wallet("alice");
        assert!(matches!(
            root.decrypt("%%%", &ctx).await.unwrap_err(),
            CustodyError::MalformedCiphertext(_)
        ));
        assert!(matches!(
            root.decrypt("AQID", &ctx).await.unwrap_err(),
            CustodyError::MalformedCiphertext(_)
        ));
    }

    #[test]
    fn rejects_short_root_key() {
        assert!(LocalRootKey::from_hex("abcd").is_err());
        assert!(LocalRootKey::from_hex("zz").is_err());
    }
}
