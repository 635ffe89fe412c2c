// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction construction, freezing and signing.
//!
//! ```text
//! TransactionBody ──freeze()──► FrozenTransaction ──sign()──► SignedTransaction
//! ```
//!
//! The frozen bytes are the canonical JSON of the body. Struct fields
//! serialize in declaration order and there are no unordered maps, so the
//! same logical body always freezes to the same bytes.

use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};

use super::types::{AccountId, AccountRef, AssetKind, EvmAddress, TransactionId};
use crate::signer::{RawSignature, Signer, SigningError};

/// Default validity window of a transaction.
pub const DEFAULT_VALID_DURATION_SECS: u64 = 120;

/// Default maximum fee the payer is willing to pay (2 HBAR).
pub const DEFAULT_MAX_TRANSACTION_FEE: u64 = 200_000_000;

/// What the transaction does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionData {
    /// Move `amount` subunits of `asset` from `sender` to `recipient`.
    Transfer {
        asset: AssetKind,
        sender: AccountId,
        recipient: AccountRef,
        amount: u64,
    },
    /// Create an account controlled by `public_key`, funded by the payer.
    AccountCreate {
        public_key: String,
        alias: Option<EvmAddress>,
        initial_balance: u64,
    },
}

/// Everything the signature covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBody {
    pub transaction_id: TransactionId,
    pub node_account_id: AccountId,
    pub max_transaction_fee: u64,
    pub valid_duration_seconds: u64,
    pub memo: String,
    pub data: TransactionData,
}

impl TransactionBody {
    pub fn new(
        transaction_id: TransactionId,
        node_account_id: AccountId,
        data: TransactionData,
    ) -> Self {
        Self {
            transaction_id,
            node_account_id,
            max_transaction_fee: DEFAULT_MAX_TRANSACTION_FEE,
            valid_duration_seconds: DEFAULT_VALID_DURATION_SECS,
            memo: String::new(),
            data,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }

    pub fn payer(&self) -> AccountId {
        self.transaction_id.payer
    }

    /// Fix the byte representation.
    pub fn freeze(self) -> Result<FrozenTransaction, serde_json::Error> {
        let bytes = serde_json::to_vec(&self)?;
        Ok(FrozenTransaction { body: self, bytes })
    }
}

/// A body whose bytes can no longer change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrozenTransaction {
    body: TransactionBody,
    bytes: Vec<u8>,
}

impl FrozenTransaction {
    pub fn body(&self) -> &TransactionBody {
        &self.body
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.body.transaction_id
    }

    /// Sign the frozen bytes with `signer`.
    pub async fn sign(self, signer: &dyn Signer) -> Result<SignedTransaction, SigningError> {
        let signature = signer.sign(&self.bytes).await?;
        Ok(SignedTransaction {
            transaction_id: self.body.transaction_id,
            body_bytes: self.bytes,
            signatures: vec![SignaturePair::new(
                signer.identity().public_key.to_der_hex(),
                &signature,
            )],
        })
    }
}

/// Public key and the signature it made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePair {
    /// DER hex public key
    pub public_key: String,
    /// Hex `r‖s`
    pub signature: String,
}

impl SignaturePair {
    pub fn new(public_key: String, signature: &RawSignature) -> Self {
        Self {
            public_key,
            signature: alloy::hex::encode(signature),
        }
    }

    pub fn raw_signature(&self) -> Option<RawSignature> {
        let bytes = alloy::hex::decode(&self.signature).ok()?;
        bytes.try_into().ok()
    }
}

/// The payload submitted to the network. Resubmitting it is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction_id: TransactionId,
    #[serde(with = "base64_bytes")]
    pub body_bytes: Vec<u8>,
    pub signatures: Vec<SignaturePair>,
}

impl SignedTransaction {
    /// Decode the body back out of the signed bytes.
    pub fn body(&self) -> Result<TransactionBody, serde_json::Error> {
        serde_json::from_slice(&self.body_bytes)
    }
}

mod base64_bytes {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Base64::decode_vec(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Base64 of the body bytes, as carried on the wire.
pub fn encode_body(bytes: &[u8]) -> String {
    Base64::encode_string(bytes)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::signer::{KeyMaterial, LocalSigner};

    fn transfer_body() -> TransactionBody {
        let payer = AccountId::new(0, 0, 1001);
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        TransactionBody::new(
            TransactionId::new(payer, start),
            AccountId::new(0, 0, 3),
            TransactionData::Transfer {
                asset: AssetKind::Native,
                sender: payer,
                recipient: AccountRef::Id(AccountId::new(0, 0, 999)),
                amount: 500_000_000,
            },
        )
    }

    #[test]
    fn freezing_is_byte_deterministic() {
        let a = transfer_body().freeze().unwrap();
        let b = transfer_body().freeze().unwrap();
        assert_eq!(a.bytes(), b.bytes());

        let text = std::str::from_utf8(a.bytes()).unwrap();
        assert!(text.starts_with(r#"{"transaction_id":"0.0.1001@"#));
        assert!(text.contains(r#""type":"transfer""#));
        assert!(text.contains(r#""recipient":"0.0.999""#));
    }

    #[test]
    fn valid_start_changes_bytes() {
        let a = transfer_body().freeze().unwrap();
        let mut body = transfer_body();
        body.transaction_id.valid_start_nanos += 1;
        let b = body.freeze().unwrap();
        assert_ne!(a.bytes(), b.bytes());
    }

    #[tokio::test]
    async fn signed_payload_carries_verifiable_signature() {
        let key = KeyMaterial::generate();
        let public = key.public_key();
        let signer = LocalSigner::new(key, Some(AccountId::new(0, 0, 1001)));

        let frozen = transfer_body().freeze().unwrap();
        let bytes = frozen.bytes().to_vec();
        let signed = frozen.sign(&signer).await.unwrap();

        assert_eq!(signed.body_bytes, bytes);
        assert_eq!(signed.signatures.len(), 1);
        assert_eq!(signed.signatures[0].public_key, public.to_der_hex());
        let raw = signed.signatures[0].raw_signature().unwrap();
        assert!(public.verify(&signed.body_bytes, &raw));

        assert_eq!(signed.body().unwrap(), transfer_body());
    }

    #[test]
    fn signed_transaction_wire_form_uses_base64_body() {
        let signed = SignedTransaction {
            transaction_id: transfer_body().transaction_id,
            body_bytes: b"{}".to_vec(),
            signatures: vec![],
        };
        let json = serde_json::to_value(&signed).unwrap();
        assert_eq!(json["body_bytes"], "e30=");
        assert_eq!(encode_body(b"{}"), "e30=");
    }
}
