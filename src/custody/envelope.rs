// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Envelope crypto service.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use zeroize::Zeroizing;

use super::{CustodyError, EncryptionContext, KeyCustody};

/// Encrypts and decrypts private key bytes through the configured root of trust.
///
/// Plaintext is taken by value as a [`Zeroizing`] buffer, so it is wiped when
/// the call returns on every path. Decrypted keys are never cached.
#[derive(Clone)]
pub struct EnvelopeService {
    custody: Arc<dyn KeyCustody>,
    timeout: Duration,
}

impl EnvelopeService {
    pub fn new(custody: Arc<dyn KeyCustody>, timeout: Duration) -> Self {
        Self { custody, timeout }
    }

    pub async fn encrypt(
        &self,
        plaintext: Zeroizing<Vec<u8>>,
        context: &EncryptionContext,
    ) -> Result<String, CustodyError> {
        let result = tokio::time::timeout(self.timeout, self.custody.encrypt(&plaintext, context))
            .await
            .map_err(|_| CustodyError::Timeout("encrypt"))?;
        drop(plaintext);
        debug!(purpose = context.get("purpose"), ok = result.is_ok(), "envelope encrypt");
        result
    }

    pub async fn decrypt(
        &self,
        ciphertext: &str,
        context: &EncryptionContext,
    ) -> Result<Zeroizing<Vec<u8>>, CustodyError> {
        let result = tokio::time::timeout(self.timeout, self.custody.decrypt(ciphertext, context))
            .await
            .map_err(|_| CustodyError::Timeout("decrypt"))?;
        debug!(purpose = context.get("purpose"), ok = result.is_ok(), "envelope decrypt");
        result
    }
}
