// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key custody: envelope encryption of private keys and remote signing.
//!
//! ## Backends
//!
//! - [`KmsClient`]: AWS-KMS-compatible root of trust (Encrypt/Decrypt with an
//!   encryption context, Sign over a digest, GetPublicKey).
//! - [`LocalRootKey`]: AES-256-GCM root key held by the process, for
//!   development and single-host deployments.
//!
//! Both implement [`KeyCustody`]; [`EnvelopeService`] wraps one of them with
//! per-step timeouts and the zeroization rules for plaintext buffers.
//!
//! Plaintext key material never leaves this module except inside
//! [`zeroize::Zeroizing`] buffers.

pub mod envelope;
pub mod kms;
pub mod local;
pub mod sigv4;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use zeroize::Zeroizing;

pub use envelope::EnvelopeService;
pub use kms::{KmsClient, KmsConfig};
pub use local::LocalRootKey;

/// Purpose tag bound into user wallet ciphertexts.
pub const USER_KEY_PURPOSE: &str = "user-private-key-encryption";

/// Purpose tag bound into the operator key ciphertext.
pub const OPERATOR_KEY_PURPOSE: &str = "operator-private-key-encryption";

// =============================================================================
// Errors
// =============================================================================

/// Failure of the root of trust or of the envelope contract.
///
/// Messages never contain key identifiers or ciphertext.
#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    /// The root of trust could not be reached (transport error, 5xx).
    #[error("key custody service unavailable: {0}")]
    Unavailable(String),

    /// The root of trust refused the request (access denied, disabled key).
    #[error("key custody service rejected the request: {0}")]
    Rejected(String),

    /// Ciphertext does not open under the supplied encryption context.
    #[error("ciphertext does not match the encryption context")]
    ContextMismatch,

    /// Ciphertext is structurally invalid.
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// A custody step exceeded its time budget.
    #[error("key custody {0} timed out")]
    Timeout(&'static str),

    /// Backend misconfiguration (bad root key, missing key id).
    #[error("key custody misconfigured: {0}")]
    Config(String),
}

// =============================================================================
// Encryption context
// =============================================================================

/// String map bound at encryption time and required again at decryption.
///
/// Backed by a `BTreeMap` so its canonical form (sorted keys) is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EncryptionContext(BTreeMap<String, String>);

impl EncryptionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Context for a user's wallet key.
    pub fn user_wallet(user_id: &str) -> Self {
        Self::new()
            .with("purpose", USER_KEY_PURPOSE)
            .with("user_id", user_id)
    }

    /// Context for the operator account key.
    pub fn operator(account_id: &str) -> Self {
        Self::new()
            .with("purpose", OPERATOR_KEY_PURPOSE)
            .with("account_id", account_id)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// Canonical byte form: JSON object with sorted keys.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        // BTreeMap<String, String> serialization cannot fail.
        serde_json::to_vec(&self.0).unwrap_or_default()
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// Root-of-trust encrypt/decrypt bound to an [`EncryptionContext`].
#[async_trait]
pub trait KeyCustody: Send + Sync {
    /// Encrypt key bytes. Returns an opaque, printable ciphertext.
    async fn encrypt(
        &self,
        plaintext: &[u8],
        context: &EncryptionContext,
    ) -> Result<String, CustodyError>;

    /// Decrypt a ciphertext produced by [`KeyCustody::encrypt`] under the same context.
    async fn decrypt(
        &self,
        ciphertext: &str,
        context: &EncryptionContext,
    ) -> Result<Zeroizing<Vec<u8>>, CustodyError>;
}

/// Remote asymmetric key that signs digests without exposing the private key.
#[async_trait]
pub trait RemoteKeyService: Send + Sync {
    /// Sign a 32-byte digest. Returns the service's native (DER) signature encoding.
    async fn sign_digest(&self, key_id: &str, digest: &[u8; 32]) -> Result<Vec<u8>, CustodyError>;

    /// SubjectPublicKeyInfo DER of the key.
    async fn public_key(&self, key_id: &str) -> Result<Vec<u8>, CustodyError>;
}
