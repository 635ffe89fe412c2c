// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signing capability.
//!
//! A [`Signer`] exposes its identity and signs frozen transaction bytes,
//! returning the ledger's raw 64-byte `r‖s` signature over
//! [`ledger_digest`]. Two implementations exist:
//!
//! - [`LocalSigner`]: holds a decrypted key for the lifetime of one operation.
//! - [`RemoteSigner`]: delegates digest signing to a key-custody service.
//!
//! [`SignerFactory::resolve`] is the only place that picks between them.

pub mod keys;
pub mod local;
pub mod remote;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::custody::{CustodyError, EncryptionContext, EnvelopeService, RemoteKeyService};
use crate::ledger::types::AccountId;

pub use keys::{ledger_digest, KeyMaterial, PublicKey};
pub use local::LocalSigner;
pub use remote::RemoteSigner;

/// Raw fixed-width `r‖s` signature, low-S normalized.
pub type RawSignature = [u8; 64];

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The wallet holds no custodial key (non-custodial wallet).
    #[error("no key material available for this wallet")]
    NoKeyMaterial,

    /// The remote service returned a signature that could not be normalized
    /// or does not verify against the key.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Decrypting the key or reaching the remote signer failed.
    #[error(transparent)]
    Custody(#[from] CustodyError),

    #[error("signing timed out")]
    Timeout,

    #[error("signing failed: {0}")]
    Failed(String),
}

/// Who a signer signs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerIdentity {
    pub public_key: PublicKey,
    pub account_id: Option<AccountId>,
}

#[async_trait]
pub trait Signer: Send + Sync {
    fn identity(&self) -> &SignerIdentity;

    /// Sign frozen transaction bytes.
    async fn sign(&self, transaction_bytes: &[u8]) -> Result<RawSignature, SigningError>;
}

/// Where a signing key lives.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Envelope-encrypted private key: decrypted fresh for every resolution.
    Envelope {
        ciphertext: String,
        context: EncryptionContext,
    },
    /// Key held by a remote custody service.
    Remote {
        key_id: String,
        public_key: PublicKey,
    },
}

/// Turns a [`KeySource`] into a ready [`Signer`].
#[derive(Clone)]
pub struct SignerFactory {
    envelope: EnvelopeService,
    remote: Option<Arc<dyn RemoteKeyService>>,
    remote_timeout: Duration,
}

impl SignerFactory {
    pub fn new(
        envelope: EnvelopeService,
        remote: Option<Arc<dyn RemoteKeyService>>,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            envelope,
            remote,
            remote_timeout,
        }
    }

    pub async fn resolve(
        &self,
        source: &KeySource,
        account_id: Option<AccountId>,
    ) -> Result<Box<dyn Signer>, SigningError> {
        match source {
            KeySource::Envelope {
                ciphertext,
                context,
            } => {
                let plaintext = self.envelope.decrypt(ciphertext, context).await?;
                let signer = LocalSigner::from_key_bytes(&plaintext, account_id)?;
                Ok(Box::new(signer))
            }
            KeySource::Remote { key_id, public_key } => {
                let service = self.remote.clone().ok_or_else(|| {
                    SigningError::Custody(CustodyError::Config(
                        "no remote key service configured".to_string(),
                    ))
                })?;
                Ok(Box::new(RemoteSigner::new(
                    service,
                    key_id.clone(),
                    SignerIdentity {
                        public_key: public_key.clone(),
                        account_id,
                    },
                    self.remote_timeout,
                )))
            }
        }
    }
}
