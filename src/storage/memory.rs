// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory wallet store for tests and development.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    bind_account, NewWallet, StorageError, StorageResult, TransferRecord, Wallet, WalletStore,
};
use crate::ledger::{AccountId, TransactionId};

#[derive(Default)]
struct Tables {
    wallets: HashMap<String, Wallet>,
    owners: HashMap<Uuid, String>,
    transfers: HashMap<TransactionId, TransferRecord>,
}

/// Mutex-guarded maps with the same semantics as [`super::RedbWalletStore`].
#[derive(Default)]
pub struct MemoryWalletStore {
    tables: Mutex<Tables>,
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wallet_count(&self) -> usize {
        self.tables().wallets.len()
    }
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    async fn find_by_user(&self, user_id: &str) -> StorageResult<Option<Wallet>> {
        Ok(self.tables().wallets.get(user_id).cloned())
    }

    async fn create_if_absent(&self, user_id: &str, fields: NewWallet) -> StorageResult<Wallet> {
        let mut tables = self.tables();
        if tables.wallets.contains_key(user_id) {
            return Err(StorageError::Conflict(format!(
                "user {user_id} already has a wallet"
            )));
        }
        let wallet = fields.into_wallet(user_id);
        tables.owners.insert(wallet.wallet_id, user_id.to_string());
        tables.wallets.insert(user_id.to_string(), wallet.clone());
        Ok(wallet)
    }

    async fn attach_account_identity(
        &self,
        wallet_id: Uuid,
        account: AccountId,
    ) -> StorageResult<Wallet> {
        let mut tables = self.tables();
        let user_id = tables
            .owners
            .get(&wallet_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("wallet {wallet_id}")))?;
        let wallet = tables
            .wallets
            .get_mut(&user_id)
            .ok_or_else(|| StorageError::NotFound(format!("wallet {wallet_id}")))?;
        bind_account(wallet, account)?;
        Ok(wallet.clone())
    }

    async fn record_transfer(&self, record: &TransferRecord) -> StorageResult<()> {
        self.tables()
            .transfers
            .insert(record.transaction_id, record.clone());
        Ok(())
    }

    async fn get_transfer(
        &self,
        transaction_id: &TransactionId,
    ) -> StorageResult<Option<TransferRecord>> {
        Ok(self.tables().transfers.get(transaction_id).cloned())
    }

    async fn list_transfers(
        &self,
        user_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<TransferRecord>> {
        let mut records: Vec<_> = self
            .tables()
            .transfers
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }
}
