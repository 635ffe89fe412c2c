// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process signer over a decrypted key.

use async_trait::async_trait;
use k256::ecdsa::{signature::hazmat::PrehashSigner, Signature};

use super::keys::{ledger_digest, KeyMaterial};
use super::{RawSignature, Signer, SignerIdentity, SigningError};
use crate::ledger::types::AccountId;

/// Signs with a key held in memory. The key is wiped when the signer drops.
pub struct LocalSigner {
    key: KeyMaterial,
    identity: SignerIdentity,
}

impl LocalSigner {
    pub fn new(key: KeyMaterial, account_id: Option<AccountId>) -> Self {
        let identity = SignerIdentity {
            public_key: key.public_key(),
            account_id,
        };
        Self { key, identity }
    }

    pub fn from_key_bytes(bytes: &[u8], account_id: Option<AccountId>) -> Result<Self, SigningError> {
        KeyMaterial::from_key_bytes(bytes).map(|key| Self::new(key, account_id))
    }
}

#[async_trait]
impl Signer for LocalSigner {
    fn identity(&self) -> &SignerIdentity {
        &self.identity
    }

    async fn sign(&self, transaction_bytes: &[u8]) -> Result<RawSignature, SigningError> {
        let digest = ledger_digest(transaction_bytes);
        let signature: Signature = self
            .key
            .signing_key()
            .sign_prehash(&digest)
            .map_err(|e| SigningError::Failed(e.to_string()))?;
        let signature = signature.normalize_s().unwrap_or(signature);

        let mut raw = [0u8; 64];
        raw.copy_from_slice(&signature.to_bytes());
        Ok(raw)
    }
}
