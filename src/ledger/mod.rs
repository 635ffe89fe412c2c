// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger network adapter.
//!
//! [`LedgerNetwork`] is the client-side view of the ledger: submit a signed
//! transaction, poll for its receipt, read balances and resolve aliases.
//!
//! - [`HttpLedger`]: mirror-node REST reads plus a submission gateway.
//! - [`SimulatedLedger`]: in-memory ledger for tests and the `dev` feature.

pub mod http;
#[cfg(any(test, feature = "dev"))]
pub mod simulated;
pub mod transaction;
pub mod types;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpLedger;
#[cfg(any(test, feature = "dev"))]
pub use simulated::SimulatedLedger;
pub use transaction::{
    FrozenTransaction, SignedTransaction, TransactionBody, TransactionData,
};
pub use types::{
    AccountBalance, AccountId, AccountRef, AssetKind, EvmAddress, NetworkConfig, TokenId,
    TransactionId,
};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Transport failure, timeout, 5xx or a busy node. Safe to retry reads
    /// and resubmission of the same signed payload.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// The ledger answered with something we could not interpret.
    #[error("unexpected ledger response: {0}")]
    Protocol(String),
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

/// Node precheck response to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitAck {
    pub precheck: String,
}

/// How the engine should treat a precheck code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecheckOutcome {
    Accepted,
    Transient,
    Rejected(FailureReason),
}

impl SubmitAck {
    pub fn ok() -> Self {
        Self {
            precheck: "OK".to_string(),
        }
    }

    pub fn outcome(&self) -> PrecheckOutcome {
        match self.precheck.as_str() {
            "OK" | "DUPLICATE_TRANSACTION" => PrecheckOutcome::Accepted,
            "BUSY" | "PLATFORM_TRANSACTION_NOT_CREATED" | "PLATFORM_NOT_ACTIVE" => {
                PrecheckOutcome::Transient
            }
            code => PrecheckOutcome::Rejected(FailureReason::from_code(code)),
        }
    }
}

/// Consensus receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub status: String,
    /// New account, for account-creation transactions.
    pub account_id: Option<AccountId>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == "SUCCESS"
    }

    /// `None` on success, otherwise why the transaction failed.
    pub fn failure(&self) -> Option<FailureReason> {
        (!self.is_success()).then(|| FailureReason::from_code(&self.status))
    }
}

/// Why the ledger refused a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    InsufficientBalance,
    UnknownRecipient,
    InvalidSignature,
    TokenNotAssociated,
    Other(String),
}

impl FailureReason {
    pub fn from_code(code: &str) -> Self {
        match code {
            "INSUFFICIENT_PAYER_BALANCE"
            | "INSUFFICIENT_ACCOUNT_BALANCE"
            | "INSUFFICIENT_TOKEN_BALANCE" => FailureReason::InsufficientBalance,
            "INVALID_ACCOUNT_ID" | "ACCOUNT_DELETED" | "INVALID_ALIAS_KEY" => {
                FailureReason::UnknownRecipient
            }
            "INVALID_SIGNATURE" => FailureReason::InvalidSignature,
            "TOKEN_NOT_ASSOCIATED_TO_ACCOUNT" => FailureReason::TokenNotAssociated,
            other => FailureReason::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::InsufficientBalance => f.write_str("insufficient balance"),
            FailureReason::UnknownRecipient => f.write_str("recipient account does not exist"),
            FailureReason::InvalidSignature => f.write_str("invalid signature"),
            FailureReason::TokenNotAssociated => {
                f.write_str("recipient is not associated with the token")
            }
            FailureReason::Other(code) => write!(f, "rejected by ledger ({code})"),
        }
    }
}

/// Client-side ledger capability.
#[async_trait]
pub trait LedgerNetwork: Send + Sync {
    fn network(&self) -> &NetworkConfig;

    async fn submit(&self, transaction: &SignedTransaction) -> Result<SubmitAck, LedgerError>;

    /// `None` until the transaction reaches consensus.
    async fn get_receipt(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<Receipt>, LedgerError>;

    async fn get_balance(&self, account: &AccountRef) -> Result<AccountBalance, LedgerError>;

    /// Account an alias was promoted into, if any.
    async fn lookup_account(&self, alias: &EvmAddress) -> Result<Option<AccountId>, LedgerError>;
}
