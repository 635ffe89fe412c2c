// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signer backed by a remote key-custody service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k256::ecdsa::{signature::hazmat::PrehashVerifier, Signature};
use tracing::warn;

use super::keys::{ledger_digest, PublicKey};
use super::{RawSignature, Signer, SignerIdentity, SigningError};
use crate::custody::RemoteKeyService;

/// Computes the ledger digest locally and asks the remote service to sign it.
///
/// The private key never enters this process.
pub struct RemoteSigner {
    service: Arc<dyn RemoteKeyService>,
    key_id: String,
    identity: SignerIdentity,
    timeout: Duration,
}

impl RemoteSigner {
    pub fn new(
        service: Arc<dyn RemoteKeyService>,
        key_id: String,
        identity: SignerIdentity,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            key_id,
            identity,
            timeout,
        }
    }
}

#[async_trait]
impl Signer for RemoteSigner {
    fn identity(&self) -> &SignerIdentity {
        &self.identity
    }

    async fn sign(&self, transaction_bytes: &[u8]) -> Result<RawSignature, SigningError> {
        let digest = ledger_digest(transaction_bytes);
        let der = tokio::time::timeout(self.timeout, self.service.sign_digest(&self.key_id, &digest))
            .await
            .map_err(|_| SigningError::Timeout)??;

        normalize_signature(&der, &digest, &self.identity.public_key).inspect_err(|e| {
            warn!(error = %e, "remote signer returned an unusable signature");
        })
    }
}

/// Convert a DER (or already raw) ECDSA signature into the ledger's low-S
/// `r‖s` form and check it against `public_key`.
pub fn normalize_signature(
    encoded: &[u8],
    digest: &[u8; 32],
    public_key: &PublicKey,
) -> Result<RawSignature, SigningError> {
    let signature = Signature::from_der(encoded)
        .or_else(|_| Signature::from_slice(encoded))
        .map_err(|_| SigningError::MalformedSignature("not a DER ECDSA signature".to_string()))?;
    let signature = signature.normalize_s().unwrap_or(signature);

    public_key
        .verifying_key()
        .verify_prehash(digest, &signature)
        .map_err(|_| {
            SigningError::MalformedSignature("signature does not verify against key".to_string())
        })?;

    let mut raw = [0u8; 64];
    raw.copy_from_slice(&signature.to_bytes());
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use k256::ecdsa::signature::hazmat::PrehashSigner;
    use k256::elliptic_curve::scalar::IsHigh;
    use k256::pkcs8::EncodePublicKey;

    use super::*;
    use crate::custody::CustodyError;
    use crate::signer::KeyMaterial;

    /// Remote service double: signs with a local key and hands back DER, or a
    /// canned response.
    struct FakeKms {
        key: KeyMaterial,
        canned: Mutex<Option<Vec<u8>>>,
        high_s: bool,
        hang: bool,
    }

    impl FakeKms {
        fn new() -> Self {
            Self {
                key: KeyMaterial::generate(),
                canned: Mutex::new(None),
                high_s: false,
                hang: false,
            }
        }
    }

    #[async_trait]
    impl RemoteKeyService for FakeKms {
        async fn sign_digest(&self, _key_id: &str, digest: &[u8; 32]) -> Result<Vec<u8>, CustodyError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if let Some(canned) = self.canned.lock().unwrap().clone() {
                return Ok(canned);
            }
            let signature: Signature = self.key.signing_key().sign_prehash(digest).unwrap();
            let signature = if self.high_s {
                let (r, s) = signature.split_scalars();
                Signature::from_scalars(r, -s).unwrap()
            } else {
                signature
            };
            Ok(signature.to_der().as_bytes().to_vec())
        }

        async fn public_key(&self, _key_id: &str) -> Result<Vec<u8>, CustodyError> {
            Ok(self
                .key
                .signing_key()
                .verifying_key()
                .to_public_key_der()
                .unwrap()
                .as_bytes()
                .to_vec())
        }
    }

    fn signer_for(kms: FakeKms) -> (RemoteSigner, PublicKey) {
        let public = kms.key.public_key();
        let signer = RemoteSigner::new(
            Arc::new(kms),
            "alias/operator".to_string(),
            SignerIdentity {
                public_key: public.clone(),
                account_id: None,
            },
            Duration::from_millis(200),
        );
        (signer, public)
    }

    #[tokio::test]
    async fn der_signature_is_normalized_to_raw() {
        let (signer, public) = signer_for(FakeKms::new());
        let raw = signer.sign(b"frozen body").await.unwrap();
        assert!(public.verify(b"frozen body", &raw));
    }

    #[tokio::test]
    async fn high_s_signature_is_flipped_to_low_s() {
        let mut kms = FakeKms::new();
        kms.high_s = true;
        let (signer, public) = signer_for(kms);

        let raw = signer.sign(b"frozen body").await.unwrap();
        let parsed = Signature::from_slice(&raw).unwrap();
        assert!(!bool::from(parsed.s().is_high()));
        assert!(public.verify(b"frozen body", &raw));
    }

    #[tokio::test]
    async fn garbage_response_is_malformed() {
        let kms = FakeKms::new();
        *kms.canned.lock().unwrap() = Some(vec![0x30, 0x02, 0x01]);
        let (signer, _) = signer_for(kms);

        let err = signer.sign(b"frozen body").await.unwrap_err();
        assert!(matches!(err, SigningError::MalformedSignature(_)));
    }

    #[tokio::test]
    async fn signature_from_other_key_is_malformed() {
        let other = KeyMaterial::generate();
        let digest = ledger_digest(b"frozen body");
        let foreign: Signature = other.signing_key().sign_prehash(&digest).unwrap();

        let kms = FakeKms::new();
        *kms.canned.lock().unwrap() = Some(foreign.to_der().as_bytes().to_vec());
        let (signer, _) = signer_for(kms);

        let err = signer.sign(b"frozen body").await.unwrap_err();
        assert!(matches!(err, SigningError::MalformedSignature(_)));
    }

    #[tokio::test]
    async fn hung_service_times_out() {
        let mut kms = FakeKms::new();
        kms.hang = true;
        let (signer, _) = signer_for(kms);
        assert!(matches!(
            signer.sign(b"x").await.unwrap_err(),
            SigningError::Timeout
        ));
    }

    #[tokio::test]
    async fn spki_from_service_matches_identity() {
        let kms = FakeKms::new();
        let expected = kms.key.public_key();
        let der = kms.public_key("alias/operator").await.unwrap();
        assert_eq!(PublicKey::from_spki_der(&der).unwrap(), expected);
    }
}
