// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet persistence.
//!
//! The Wallet record is the only state shared across requests. Creating one
//! is a single-writer-wins conditional insert, never read-then-write.
//!
//! - [`RedbWalletStore`]: embedded ACID database for deployments.
//! - [`MemoryWalletStore`]: same semantics, in memory.

pub mod database;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::engine::{TransactionResult, TransactionStatus};
use crate::ledger::{AccountId, AccountRef, AssetKind, EvmAddress, TransactionId};

pub use database::RedbWalletStore;
pub use memory::MemoryWalletStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("wallet {wallet_id} is already bound to account {existing}")]
    AccountAlreadyAttached {
        wallet_id: Uuid,
        existing: AccountId,
    },

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Persisted wallet. The encrypted key never leaves the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub wallet_id: Uuid,
    pub user_id: String,
    /// DER hex secp256k1 public key
    pub public_key: String,
    pub alias: EvmAddress,
    /// Set once the ledger has a concrete account for this key.
    pub account_id: Option<AccountId>,
    /// Envelope ciphertext; `None` for non-custodial wallets.
    pub encrypted_private_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating a wallet.
#[derive(Debug, Clone)]
pub struct NewWallet {
    pub public_key: String,
    pub alias: EvmAddress,
    pub encrypted_private_key: Option<String>,
}

impl NewWallet {
    pub(crate) fn into_wallet(self, user_id: &str) -> Wallet {
        Wallet {
            wallet_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            public_key: self.public_key,
            alias: self.alias,
            account_id: None,
            encrypted_private_key: self.encrypted_private_key,
            created_at: Utc::now(),
        }
    }
}

/// Attach `account` to `wallet`, enforcing set-once semantics.
///
/// Returns `false` when the same value was already present.
pub(crate) fn bind_account(wallet: &mut Wallet, account: AccountId) -> StorageResult<bool> {
    match wallet.account_id {
        Some(existing) if existing == account => Ok(false),
        Some(existing) => Err(StorageError::AccountAlreadyAttached {
            wallet_id: wallet.wallet_id,
            existing,
        }),
        None => {
            wallet.account_id = Some(account);
            Ok(true)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Succeeded,
    Failed,
    /// Submitted but not confirmed in time.
    Unconfirmed,
}

impl From<TransactionStatus> for TransferState {
    fn from(status: TransactionStatus) -> Self {
        match status {
            TransactionStatus::Succeeded => TransferState::Succeeded,
            TransactionStatus::Failed => TransferState::Failed,
        }
    }
}

/// Audit entry for a transfer that reached the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransferRecord {
    #[schema(value_type = String)]
    pub transaction_id: TransactionId,
    pub user_id: String,
    pub recipient: AccountRef,
    pub asset: AssetKind,
    /// Amount in the asset's smallest unit
    pub amount: u64,
    pub state: TransferState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub explorer_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRecord {
    /// Fold a terminal result into this record.
    pub fn settle(&mut self, result: &TransactionResult) {
        self.state = result.status.into();
        self.failure_reason = result.failure_reason.clone();
        self.explorer_url = result.explorer_url.clone();
        self.updated_at = Utc::now();
    }
}

/// Persistence collaborator.
#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn find_by_user(&self, user_id: &str) -> StorageResult<Option<Wallet>>;

    /// Atomic create-if-absent. Fails with [`StorageError::Conflict`] if the
    /// user already has a wallet.
    async fn create_if_absent(&self, user_id: &str, fields: NewWallet) -> StorageResult<Wallet>;

    /// Idempotent for the same value; a different value is an error.
    async fn attach_account_identity(
        &self,
        wallet_id: Uuid,
        account: AccountId,
    ) -> StorageResult<Wallet>;

    /// Insert or replace a transfer record.
    async fn record_transfer(&self, record: &TransferRecord) -> StorageResult<()>;

    async fn get_transfer(&self, transaction_id: &TransactionId)
        -> StorageResult<Option<TransferRecord>>;

    /// Most recent transfers of a user, newest first.
    async fn list_transfers(&self, user_id: &str, limit: usize)
        -> StorageResult<Vec<TransferRecord>>;
}
