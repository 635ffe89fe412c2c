// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `wallets`: user_id → serialized Wallet
//! - `wallet_owners`: wallet_id → user_id
//! - `transfers`: transaction id → serialized TransferRecord
//! - `user_transfer_index`: composite key (user|!created_at|tx id) → tx id
//!
//! redb serializes write transactions, so the existence check and the insert
//! in [`WalletStore::create_if_absent`] cannot interleave with another writer.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::debug;
use uuid::Uuid;

use super::{
    bind_account, NewWallet, StorageError, StorageResult, TransferRecord, Wallet, WalletStore,
};
use crate::ledger::{AccountId, TransactionId};

const WALLETS: TableDefinition<&str, &[u8]> = TableDefinition::new("wallets");

const WALLET_OWNERS: TableDefinition<&str, &str> = TableDefinition::new("wallet_owners");

const TRANSFERS: TableDefinition<&str, &[u8]> = TableDefinition::new("transfers");

/// Key format: `len(user) | user | inverted_micros_be | tx_id`, so a forward
/// scan over one user's prefix yields newest first.
const USER_TRANSFER_INDEX: TableDefinition<&[u8], &str> =
    TableDefinition::new("user_transfer_index");

fn user_prefix(user_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(4 + user_id.len());
    prefix.extend_from_slice(&(user_id.len() as u32).to_be_bytes());
    prefix.extend_from_slice(user_id.as_bytes());
    prefix
}

fn index_key(record: &TransferRecord) -> Vec<u8> {
    let tx_id = record.transaction_id.to_string();
    let mut key = user_prefix(&record.user_id);
    key.extend_from_slice(&(!(record.created_at.timestamp_micros() as u64)).to_be_bytes());
    key.extend_from_slice(tx_id.as_bytes());
    key
}

fn prefix_end(user_id: &str) -> Vec<u8> {
    let mut end = user_prefix(user_id);
    end.extend_from_slice(&[0xFF; 9]);
    end
}

fn storage_task_failed(err: tokio::task::JoinError) -> StorageError {
    StorageError::Backend(format!("storage task failed: {err}"))
}

/// Embedded wallet database.
#[derive(Clone)]
pub struct RedbWalletStore {
    db: Arc<Database>,
}

impl RedbWalletStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Backend(format!("cannot create data dir: {e}")))?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(WALLETS)?;
            let _ = write_txn.open_table(WALLET_OWNERS)?;
            let _ = write_txn.open_table(TRANSFERS)?;
            let _ = write_txn.open_table(USER_TRANSFER_INDEX)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    async fn run<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> StorageResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(storage_task_failed)?
    }
}

#[async_trait]
impl WalletStore for RedbWalletStore {
    async fn find_by_user(&self, user_id: &str) -> StorageResult<Option<Wallet>> {
        let user_id = user_id.to_string();
        self.run(move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(WALLETS)?;
            match table.get(user_id.as_str())? {
                Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn create_if_absent(&self, user_id: &str, fields: NewWallet) -> StorageResult<Wallet> {
        let user_id = user_id.to_string();
        self.run(move |db| {
            let wallet = fields.into_wallet(&user_id);
            let json = serde_json::to_vec(&wallet)?;
            let wallet_id = wallet.wallet_id.to_string();

            let write_txn = db.begin_write()?;
            {
                let mut wallets = write_txn.open_table(WALLETS)?;
                if wallets.get(user_id.as_str())?.is_some() {
                    return Err(StorageError::Conflict(format!(
                        "user {user_id} already has a wallet"
                    )));
                }
                wallets.insert(user_id.as_str(), json.as_slice())?;

                let mut owners = write_txn.open_table(WALLET_OWNERS)?;
                owners.insert(wallet_id.as_str(), user_id.as_str())?;
            }
            write_txn.commit()?;

            debug!(wallet_id = %wallet.wallet_id, "wallet record created");
            Ok(wallet)
        })
        .await
    }

    async fn attach_account_identity(
        &self,
        wallet_id: Uuid,
        account: AccountId,
    ) -> StorageResult<Wallet> {
        self.run(move |db| {
            let key = wallet_id.to_string();
            let write_txn = db.begin_write()?;
            let wallet = {
                let owners = write_txn.open_table(WALLET_OWNERS)?;
                let user_id = owners
                    .get(key.as_str())?
                    .map(|v| v.value().to_string())
                    .ok_or_else(|| StorageError::NotFound(format!("wallet {wallet_id}")))?;

                let mut wallets = write_txn.open_table(WALLETS)?;
                let mut wallet: Wallet = {
                    let value = wallets
                        .get(user_id.as_str())?
                        .ok_or_else(|| StorageError::NotFound(format!("wallet {wallet_id}")))?;
                    serde_json::from_slice(value.value())?
                };
                if bind_account(&mut wallet, account)? {
                    let json = serde_json::to_vec(&wallet)?;
                    wallets.insert(user_id.as_str(), json.as_slice())?;
                }
                wallet
            };
            write_txn.commit()?;
            Ok(wallet)
        })
        .await
    }

    async fn record_transfer(&self, record: &TransferRecord) -> StorageResult<()> {
        let record = record.clone();
        self.run(move |db| {
            let tx_id = record.transaction_id.to_string();
            let json = serde_json::to_vec(&record)?;

            let write_txn = db.begin_write()?;
            {
                let mut transfers = write_txn.open_table(TRANSFERS)?;
                transfers.insert(tx_id.as_str(), json.as_slice())?;

                let mut index = write_txn.open_table(USER_TRANSFER_INDEX)?;
                index.insert(index_key(&record).as_slice(), tx_id.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_transfer(
        &self,
        transaction_id: &TransactionId,
    ) -> StorageResult<Option<TransferRecord>> {
        let tx_id = transaction_id.to_string();
        self.run(move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(TRANSFERS)?;
            match table.get(tx_id.as_str())? {
                Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list_transfers(
        &self,
        user_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<TransferRecord>> {
        let user_id = user_id.to_string();
        self.run(move |db| {
            let read_txn = db.begin_read()?;
            let index = read_txn.open_table(USER_TRANSFER_INDEX)?;
            let transfers = read_txn.open_table(TRANSFERS)?;

            let start = user_prefix(&user_id);
            let end = prefix_end(&user_id);
            let mut results = Vec::with_capacity(limit.min(64));
            for entry in index.range(start.as_slice()..end.as_slice())? {
                if results.len() >= limit {
                    break;
                }
                let (_, tx_id) = entry?;
                if let Some(value) = transfers.get(tx_id.value())? {
                    results.push(serde_json::from_slice(value.value())?);
                }
            }
            Ok(results)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::storage::testing;

    fn open() -> (TempDir, RedbWalletStore) {
        let dir = TempDir::new().unwrap();
        let store = RedbWalletStore::open(&dir.path().join("custody.redb")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn create_then_conflict() {
        let (_dir, store) = open();
        testing::create_then_conflict(&store).await;
    }

    #[tokio::test]
    async fn attach_is_set_once() {
        let (_dir, store) = open();
        testing::attach_is_set_once(&store).await;
    }

    #[tokio::test]
    async fn concurrent_creates_have_one_winner() {
        let (_dir, store) = open();
        testing::concurrent_creates_have_one_winner(Arc::new(store)).await;
    }

    #[tokio::test]
    async fn transfers_list_newest_first() {
        let (_dir, store) = open();
        testing::transfers_list_newest_first(&store).await;
    }

    #[tokio::test]
    async fn wallets_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("custody.redb");

        let created = {
            let store = RedbWalletStore::open(&path).unwrap();
            let wallet = store
                .create_if_absent("alice", testing::new_wallet(1))
                .await
                .unwrap();
            store
                .attach_account_identity(wallet.wallet_id, AccountId::new(0, 0, 4242))
                .await
                .unwrap()
        };

        let reopened = RedbWalletStore::open(&path).unwrap();
        let found = reopened.find_by_user("alice").await.unwrap().unwrap();
        assert_eq!(found, created);
        assert_eq!(found.account_id, Some(AccountId::new(0, 0, 4242)));
    }

    #[test]
    fn index_keys_sort_newest_first() {
        let tx = TransactionId {
            payer: AccountId::new(0, 0, 1001),
            valid_start_seconds: 0,
            valid_start_nanos: 0,
        };
        let mut older = testing::transfer("u", tx);
        older.created_at = chrono::DateTime::from_timestamp(100, 0).unwrap();
        let mut newer = older.clone();
        newer.created_at = chrono::DateTime::from_timestamp(200, 0).unwrap();

        assert!(index_key(&newer) < index_key(&older));
        assert!(index_key(&older) < prefix_end("u"));
        assert!(index_key(&older).starts_with(&user_prefix("u")));
    }
}
