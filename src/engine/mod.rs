// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction engine.
//!
//! Drives one transaction through its lifecycle:
//!
//! ```text
//! Built ──freeze──► Frozen ──sign──► Signed ──submit──► Submitted ──poll──► Confirmed | Rejected
//! ```
//!
//! Only the submit step is retried, and always with the same signed payload:
//! the ledger deduplicates by transaction id, so a resubmission after a lost
//! response cannot double-spend. Anything that would need a new signature
//! restarts from `Built` at the caller's discretion.
//!
//! Cancellation is honored up to the moment of submission. After that the
//! engine reports whatever receipt the ledger produces.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::{future::retry, ExponentialBackoff};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::error::EngineError;
use crate::ledger::transaction::{TransactionData, DEFAULT_VALID_DURATION_SECS};
use crate::ledger::{
    AccountId, AccountRef, AssetKind, EvmAddress, FrozenTransaction, LedgerError, LedgerNetwork,
    PrecheckOutcome, Receipt, SignedTransaction, TransactionBody, TransactionId,
};
use crate::signer::{PublicKey, Signer, SigningError};

/// Failure reason of a transaction that can no longer reach consensus.
pub const EXPIRED_REASON: &str = "transaction expired";

/// Slack after the validity window before a missing receipt counts as final.
pub const EXPIRY_GRACE_SECS: i64 = 60;

/// The ledger refuses a transaction once its validity window has passed, so
/// a receipt still missing after that (plus [`EXPIRY_GRACE_SECS`]) never
/// will exist.
fn has_expired(transaction_id: &TransactionId, now: DateTime<Utc>) -> bool {
    let window =
        chrono::Duration::seconds(DEFAULT_VALID_DURATION_SECS as i64 + EXPIRY_GRACE_SECS);
    transaction_id
        .valid_start()
        .is_some_and(|start| now > start + window)
}

/// Bounded exponential backoff for the submit step.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total submit attempts, including the first.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(4),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub(crate) fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            // Attempts are bounded by `max_attempts`, not wall time.
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Per-step bounds.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    pub sign_timeout: Duration,
    /// Bound on each individual submit call.
    pub submit_timeout: Duration,
    /// Total time to wait for a receipt after submission.
    pub confirm_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            sign_timeout: Duration::from_secs(10),
            submit_timeout: Duration::from_secs(10),
            confirm_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// A value transfer, amounts in the asset's smallest unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub sender: AccountId,
    pub recipient: AccountRef,
    pub asset: AssetKind,
    pub amount: u64,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Succeeded,
    Failed,
}

/// Terminal outcome of a transaction that reached the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransactionResult {
    pub status: TransactionStatus,
    /// Ledger transaction id (`payer@seconds.nanos`)
    #[schema(value_type = String, example = "0.0.1001@1767268800.000000000")]
    pub transaction_id: TransactionId,
    /// Explorer link for the transaction
    pub explorer_url: String,
    /// Why the ledger rejected the transaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Account created by the transaction, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<AccountId>,
}

impl TransactionResult {
    pub fn is_success(&self) -> bool {
        self.status == TransactionStatus::Succeeded
    }
}

/// A validated transaction body, not yet frozen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltTransaction {
    body: TransactionBody,
}

impl BuiltTransaction {
    pub fn body(&self) -> &TransactionBody {
        &self.body
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.body.transaction_id
    }

    pub fn freeze(self) -> Result<FrozenTransaction, EngineError> {
        self.body
            .freeze()
            .map_err(|e| EngineError::validation(format!("transaction could not be encoded: {e}")))
    }
}

#[derive(Clone)]
pub struct TransactionEngine {
    ledger: Arc<dyn LedgerNetwork>,
    config: EngineConfig,
}

impl TransactionEngine {
    pub fn new(ledger: Arc<dyn LedgerNetwork>, config: EngineConfig) -> Self {
        Self { ledger, config }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerNetwork> {
        &self.ledger
    }

    pub fn explorer_link(&self, transaction_id: &TransactionId) -> String {
        self.ledger.network().explorer_link(transaction_id)
    }

    // =========================================================================
    // Built
    // =========================================================================

    pub fn build_transfer(&self, request: &TransferRequest) -> Result<BuiltTransaction, EngineError> {
        if request.amount == 0 {
            return Err(EngineError::validation("amount must be greater than zero"));
        }
        if i64::try_from(request.amount).is_err() {
            return Err(EngineError::validation("amount is too large"));
        }
        if request.recipient == AccountRef::Id(request.sender) {
            return Err(EngineError::validation("cannot transfer to the sending account"));
        }

        let data = TransactionData::Transfer {
            asset: request.asset,
            sender: request.sender,
            recipient: request.recipient.clone(),
            amount: request.amount,
        };
        let mut body = self.new_body(request.sender, data);
        if let Some(memo) = &request.memo {
            body = body.with_memo(memo.clone());
        }
        Ok(BuiltTransaction { body })
    }

    /// Account creation paid for by `payer`, funded with `initial_balance`.
    pub fn build_account_create(
        &self,
        payer: AccountId,
        public_key: &PublicKey,
        initial_balance: u64,
    ) -> Result<BuiltTransaction, EngineError> {
        if i64::try_from(initial_balance).is_err() {
            return Err(EngineError::validation("initial balance is too large"));
        }
        let data = TransactionData::AccountCreate {
            public_key: public_key.to_der_hex(),
            alias: Some(public_key.evm_alias()),
            initial_balance,
        };
        Ok(BuiltTransaction {
            body: self.new_body(payer, data),
        })
    }

    fn new_body(&self, payer: AccountId, data: TransactionData) -> TransactionBody {
        TransactionBody::new(
            TransactionId::new(payer, Utc::now()),
            self.ledger.network().node_account_id,
            data,
        )
    }

    // =========================================================================
    // Frozen -> Signed -> Submitted -> Confirmed | Rejected
    // =========================================================================

    /// Freeze, sign, submit and wait for the receipt.
    ///
    /// `Ok` carries a terminal result, including ledger rejections. `Err`
    /// means no outcome is known: before submission nothing reached the
    /// network; after submission a [`EngineError::Network`] carries the
    /// transaction id so the caller can [`requery`](Self::requery) it.
    pub async fn execute(
        &self,
        built: BuiltTransaction,
        signer: &dyn Signer,
        cancel: &CancellationToken,
    ) -> Result<TransactionResult, EngineError> {
        let payer = built.body.payer();
        if let Some(account) = signer.identity().account_id {
            if account != payer {
                return Err(EngineError::validation(format!(
                    "signer account {account} does not match payer {payer}"
                )));
            }
        }

        let frozen = built.freeze()?;
        let transaction_id = frozen.transaction_id();

        if cancel.is_cancelled() {
            info!(%transaction_id, "transaction cancelled before signing");
            return Err(EngineError::Cancelled);
        }

        let signed = match tokio::time::timeout(self.config.sign_timeout, frozen.sign(signer)).await
        {
            Ok(Ok(signed)) => signed,
            Ok(Err(e)) => return Err(EngineError::Signing(e)),
            Err(_) => return Err(EngineError::Signing(SigningError::Timeout)),
        };
        debug!(%transaction_id, "transaction signed");

        if cancel.is_cancelled() {
            info!(%transaction_id, "transaction cancelled before submission");
            return Err(EngineError::Cancelled);
        }

        match self.submit(&signed).await? {
            PrecheckOutcome::Rejected(reason) => {
                warn!(%transaction_id, %reason, "transaction rejected at precheck");
                return Ok(self.failed(transaction_id, reason.to_string()));
            }
            PrecheckOutcome::Accepted | PrecheckOutcome::Transient => {}
        }
        info!(%transaction_id, "transaction submitted");

        let receipt = self.await_receipt(&transaction_id).await?;
        Ok(self.result_from_receipt(transaction_id, &receipt))
    }

    /// Submit the same signed payload until the node accepts or rejects it.
    ///
    /// Never returns `Transient`: those are retried and, once attempts run
    /// out, surface as a network error.
    async fn submit(&self, signed: &SignedTransaction) -> Result<PrecheckOutcome, EngineError> {
        let transaction_id = signed.transaction_id;
        let max_attempts = self.config.retry.max_attempts.max(1);
        let attempts = AtomicU32::new(0);

        let outcome = retry(self.config.retry.backoff(), || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let err = match tokio::time::timeout(self.config.submit_timeout, self.ledger.submit(signed))
                .await
            {
                Ok(Ok(ack)) => match ack.outcome() {
                    PrecheckOutcome::Transient => {
                        LedgerError::Unavailable(format!("node busy ({})", ack.precheck))
                    }
                    outcome => return Ok(outcome),
                },
                Ok(Err(e)) => e,
                Err(_) => LedgerError::Unavailable("submit timed out".to_string()),
            };

            if err.is_transient() && attempt < max_attempts {
                warn!(%transaction_id, attempt, error = %err, "submit failed, retrying");
                Err(backoff::Error::transient(err))
            } else {
                warn!(%transaction_id, attempt, error = %err, "submit failed");
                Err(backoff::Error::permanent(err))
            }
        })
        .await;

        outcome.map_err(|e| self.ambiguous(transaction_id, format!("submission failed: {e}")))
    }

    async fn await_receipt(&self, transaction_id: &TransactionId) -> Result<Receipt, EngineError> {
        let poll = async {
            loop {
                match self.ledger.get_receipt(transaction_id).await {
                    Ok(Some(receipt)) => return Ok(receipt),
                    Ok(None) => {}
                    Err(e) if e.is_transient() => {
                        debug!(%transaction_id, error = %e, "receipt poll failed");
                    }
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.config.confirm_timeout, poll).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(e)) => Err(self.ambiguous(*transaction_id, e.to_string())),
            Err(_) => {
                warn!(
                    %transaction_id,
                    timeout_secs = self.config.confirm_timeout.as_secs(),
                    "no receipt before deadline"
                );
                Err(self.ambiguous(*transaction_id, "confirmation timed out".to_string()))
            }
        }
    }

    /// Ask the ledger once more for the outcome of a submitted transaction.
    pub async fn requery(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<TransactionResult, EngineError> {
        let receipt = tokio::time::timeout(
            self.config.submit_timeout,
            self.ledger.get_receipt(transaction_id),
        )
        .await
        .map_err(|_| self.ambiguous(*transaction_id, "receipt query timed out".to_string()))?
        .map_err(|e| self.ambiguous(*transaction_id, e.to_string()))?;

        match receipt {
            Some(receipt) => Ok(self.result_from_receipt(*transaction_id, &receipt)),
            None if has_expired(transaction_id, Utc::now()) => {
                warn!(%transaction_id, "no receipt after the validity window closed");
                Ok(self.failed(*transaction_id, EXPIRED_REASON.to_string()))
            }
            None => Err(self.ambiguous(
                *transaction_id,
                "transaction not yet confirmed".to_string(),
            )),
        }
    }

    /// Account the ledger has bound to `alias`, if any.
    pub async fn lookup_alias(&self, alias: &EvmAddress) -> Result<Option<AccountId>, EngineError> {
        tokio::time::timeout(self.config.submit_timeout, self.ledger.lookup_account(alias))
            .await
            .map_err(|_| EngineError::network("alias lookup timed out"))?
            .map_err(EngineError::from)
    }

    fn result_from_receipt(&self, transaction_id: TransactionId, receipt: &Receipt) -> TransactionResult {
        match receipt.failure() {
            None => {
                info!(%transaction_id, "transaction confirmed");
                TransactionResult {
                    status: TransactionStatus::Succeeded,
                    transaction_id,
                    explorer_url: self.explorer_link(&transaction_id),
                    failure_reason: None,
                    account_id: receipt.account_id,
                }
            }
            Some(reason) => {
                warn!(%transaction_id, status = %receipt.status, "transaction rejected");
                self.failed(transaction_id, reason.to_string())
            }
        }
    }

    fn failed(&self, transaction_id: TransactionId, reason: String) -> TransactionResult {
        TransactionResult {
            status: TransactionStatus::Failed,
            transaction_id,
            explorer_url: self.explorer_link(&transaction_id),
            failure_reason: Some(reason),
            account_id: None,
        }
    }

    fn ambiguous(&self, transaction_id: TransactionId, reason: String) -> EngineError {
        EngineError::Network {
            reason,
            explorer_url: Some(self.explorer_link(&transaction_id)),
            transaction_id: Some(transaction_id),
        }
    }
}
