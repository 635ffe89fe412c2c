// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory ledger for tests and local development.
//!
//! Behaves like the real network where the engine can observe it:
//! signatures are verified against the payer's key, fees are charged even
//! when the transaction fails, resubmitting a known transaction id answers
//! `DUPLICATE_TRANSACTION`, and a transfer to an unseen alias creates a
//! hollow account that is completed the first time it signs.
//!
//! Failure injection and call counters let tests drive the retry and
//! confirmation paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::transaction::{SignedTransaction, TransactionBody, TransactionData};
use super::types::{
    AccountBalance, AccountId, AccountRef, AssetKind, EvmAddress, NetworkConfig, TokenId,
    TransactionId, HEDERA_TESTNET,
};
use super::{LedgerError, LedgerNetwork, Receipt, SubmitAck};
use crate::signer::PublicKey;

/// Flat fee charged per transaction (0.001 HBAR).
pub const SIM_TRANSACTION_FEE: u64 = 100_000;

const FIRST_ACCOUNT_NUM: u64 = 1001;

#[derive(Debug, Default)]
struct SimAccount {
    public_key: Option<PublicKey>,
    alias: Option<EvmAddress>,
    balance: u64,
    tokens: BTreeMap<TokenId, u64>,
}

#[derive(Debug, Default)]
struct SimState {
    accounts: BTreeMap<AccountId, SimAccount>,
    aliases: HashMap<EvmAddress, AccountId>,
    receipts: HashMap<TransactionId, Receipt>,
    polls: HashMap<TransactionId, u32>,
    submitted: Vec<TransactionId>,
    next_num: u64,
}

impl SimState {
    fn allocate(&mut self, account: SimAccount) -> AccountId {
        let id = AccountId::new(0, 0, self.next_num);
        self.next_num += 1;
        if let Some(alias) = &account.alias {
            self.aliases.insert(alias.clone(), id);
        }
        self.accounts.insert(id, account);
        id
    }

    fn resolve(&self, account: &AccountRef) -> Option<AccountId> {
        match account {
            AccountRef::Id(id) => self.accounts.contains_key(id).then_some(*id),
            AccountRef::Alias(alias) => self.aliases.get(alias).copied(),
        }
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    submits: AtomicUsize,
    receipts: AtomicUsize,
    balances: AtomicUsize,
    lookups: AtomicUsize,
}

/// In-memory ledger.
#[derive(Debug)]
pub struct SimulatedLedger {
    network: NetworkConfig,
    fee: u64,
    state: Mutex<SimState>,
    confirm_after_polls: AtomicU32,
    failing_submits: AtomicU32,
    lost_submit_responses: AtomicU32,
    failing_reads: AtomicU32,
    calls: CallCounters,
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self {
            network: HEDERA_TESTNET,
            fee: SIM_TRANSACTION_FEE,
            state: Mutex::new(SimState {
                next_num: FIRST_ACCOUNT_NUM,
                ..SimState::default()
            }),
            confirm_after_polls: AtomicU32::new(1),
            failing_submits: AtomicU32::new(0),
            lost_submit_responses: AtomicU32::new(0),
            failing_reads: AtomicU32::new(0),
            calls: CallCounters::default(),
        }
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Fixtures
    // =========================================================================

    /// Create an account controlled by `public_key` holding `balance` tinybars.
    pub fn create_account(&self, public_key: &PublicKey, balance: u64) -> AccountId {
        self.state().allocate(SimAccount {
            public_key: Some(public_key.clone()),
            alias: Some(public_key.evm_alias()),
            balance,
            tokens: BTreeMap::new(),
        })
    }

    /// Open a keyless account at a fixed id, e.g. a well-known recipient.
    pub fn open_account(&self, id: AccountId, balance: u64) {
        self.state().accounts.entry(id).or_insert(SimAccount {
            balance,
            ..SimAccount::default()
        });
    }

    /// Add tinybars to an existing account.
    pub fn fund(&self, account: AccountId, amount: u64) {
        if let Some(acc) = self.state().accounts.get_mut(&account) {
            acc.balance += amount;
        }
    }

    /// Associate `token` with `account` and credit `amount` of it.
    pub fn associate_token(&self, account: AccountId, token: TokenId, amount: u64) {
        if let Some(acc) = self.state().accounts.get_mut(&account) {
            *acc.tokens.entry(token).or_insert(0) += amount;
        }
    }

    pub fn native_balance(&self, account: AccountId) -> Option<u64> {
        self.state().accounts.get(&account).map(|a| a.balance)
    }

    // =========================================================================
    // Failure injection
    // =========================================================================

    /// Receipts become visible on the `n`th poll of a transaction.
    pub fn confirm_after_polls(&self, n: u32) {
        self.confirm_after_polls.store(n.max(1), Ordering::SeqCst);
    }

    /// The next `n` submissions fail with a transport error before reaching the ledger.
    pub fn fail_next_submissions(&self, n: u32) {
        self.failing_submits.store(n, Ordering::SeqCst);
    }

    /// The next `n` submissions are processed but their responses are lost.
    pub fn lose_next_submit_responses(&self, n: u32) {
        self.lost_submit_responses.store(n, Ordering::SeqCst);
    }

    /// The next `n` balance reads fail with a transport error.
    pub fn fail_next_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Total calls across every network operation.
    pub fn network_calls(&self) -> usize {
        self.submit_calls()
            + self.calls.receipts.load(Ordering::SeqCst)
            + self.balance_calls()
            + self.calls.lookups.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> usize {
        self.calls.submits.load(Ordering::SeqCst)
    }

    pub fn balance_calls(&self) -> usize {
        self.calls.balances.load(Ordering::SeqCst)
    }

    /// Distinct transactions the ledger has accepted for processing.
    pub fn processed_transactions(&self) -> Vec<TransactionId> {
        self.state().submitted.clone()
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn precheck(&self, state: &mut SimState, tx: &SignedTransaction) -> Result<TransactionBody, &'static str> {
        let body = tx.body().map_err(|_| "INVALID_TRANSACTION_BODY")?;
        if body.transaction_id != tx.transaction_id {
            return Err("INVALID_TRANSACTION_ID");
        }

        let payer = state
            .accounts
            .get_mut(&body.payer())
            .ok_or("PAYER_ACCOUNT_NOT_FOUND")?;

        let signed_by_payer = tx.signatures.iter().find_map(|pair| {
            let key = PublicKey::from_der_hex(&pair.public_key).ok()?;
            let signature = pair.raw_signature()?;
            let authorized = match &payer.public_key {
                Some(existing) => *existing == key,
                // Hollow account: completed by the first key matching its alias.
                None => payer.alias.as_ref() == Some(&key.evm_alias()),
            };
            (authorized && key.verify(&tx.body_bytes, &signature)).then_some(key)
        });
        let key = signed_by_payer.ok_or("INVALID_SIGNATURE")?;
        if payer.public_key.is_none() {
            payer.public_key = Some(key);
        }

        if payer.balance < self.fee {
            return Err("INSUFFICIENT_PAYER_BALANCE");
        }
        Ok(body)
    }

    fn execute(&self, state: &mut SimState, body: &TransactionBody) -> Receipt {
        let payer = body.payer();
        if let Some(acc) = state.accounts.get_mut(&payer) {
            acc.balance -= self.fee;
        }

        let outcome = match &body.data {
            TransactionData::Transfer {
                asset,
                sender,
                recipient,
                amount,
            } => Self::transfer(state, payer, *asset, *sender, recipient, *amount).map(|_| None),
            TransactionData::AccountCreate {
                public_key,
                alias,
                initial_balance,
            } => Self::account_create(state, payer, public_key, alias.clone(), *initial_balance)
                .map(Some),
        };

        match outcome {
            Ok(account_id) => Receipt {
                status: "SUCCESS".to_string(),
                account_id,
            },
            Err(code) => Receipt {
                status: code.to_string(),
                account_id: None,
            },
        }
    }

    fn transfer(
        state: &mut SimState,
        payer: AccountId,
        asset: AssetKind,
        sender: AccountId,
        recipient: &AccountRef,
        amount: u64,
    ) -> Result<(), &'static str> {
        if sender != payer {
            return Err("INVALID_SIGNATURE");
        }

        let sender_acc = state.accounts.get(&sender).ok_or("INVALID_ACCOUNT_ID")?;
        match asset {
            AssetKind::Native if sender_acc.balance < amount => {
                return Err("INSUFFICIENT_ACCOUNT_BALANCE")
            }
            AssetKind::Token(token) => match sender_acc.tokens.get(&token) {
                None => return Err("TOKEN_NOT_ASSOCIATED_TO_ACCOUNT"),
                Some(held) if *held < amount => return Err("INSUFFICIENT_TOKEN_BALANCE"),
                Some(_) => {}
            },
            AssetKind::Native => {}
        }

        let recipient_id = match (state.resolve(recipient), recipient, asset) {
            (Some(id), _, _) => id,
            (None, AccountRef::Alias(alias), AssetKind::Native) => state.allocate(SimAccount {
                alias: Some(alias.clone()),
                ..SimAccount::default()
            }),
            (None, AccountRef::Alias(_), AssetKind::Token(_)) => return Err("INVALID_ALIAS_KEY"),
            (None, AccountRef::Id(_), _) => return Err("INVALID_ACCOUNT_ID"),
        };

        if let AssetKind::Token(token) = asset {
            let associated = state
                .accounts
                .get(&recipient_id)
                .is_some_and(|acc| acc.tokens.contains_key(&token));
            if !associated {
                return Err("TOKEN_NOT_ASSOCIATED_TO_ACCOUNT");
            }
        }

        let debit = |acc: &mut SimAccount| match asset {
            AssetKind::Native => acc.balance -= amount,
            AssetKind::Token(token) => *acc.tokens.entry(token).or_insert(0) -= amount,
        };
        let credit = |acc: &mut SimAccount| match asset {
            AssetKind::Native => acc.balance += amount,
            AssetKind::Token(token) => *acc.tokens.entry(token).or_insert(0) += amount,
        };
        if let Some(acc) = state.accounts.get_mut(&sender) {
            debit(acc);
        }
        if let Some(acc) = state.accounts.get_mut(&recipient_id) {
            credit(acc);
        }
        Ok(())
    }

    fn account_create(
        state: &mut SimState,
        payer: AccountId,
        public_key: &str,
        alias: Option<EvmAddress>,
        initial_balance: u64,
    ) -> Result<AccountId, &'static str> {
        let key = PublicKey::from_der_hex(public_key).map_err(|_| "BAD_ENCODING")?;
        if let Some(alias) = &alias {
            if state.aliases.contains_key(alias) {
                return Err("ALIAS_ALREADY_ASSIGNED");
            }
        }
        let payer_acc = state.accounts.get_mut(&payer).ok_or("INVALID_ACCOUNT_ID")?;
        if payer_acc.balance < initial_balance {
            return Err("INSUFFICIENT_PAYER_BALANCE");
        }
        payer_acc.balance -= initial_balance;

        Ok(state.allocate(SimAccount {
            public_key: Some(key),
            alias,
            balance: initial_balance,
            tokens: BTreeMap::new(),
        }))
    }
}

#[async_trait]
impl LedgerNetwork for SimulatedLedger {
    fn network(&self) -> &NetworkConfig {
        &self.network
    }

    async fn submit(&self, transaction: &SignedTransaction) -> Result<SubmitAck, LedgerError> {
        self.calls.submits.fetch_add(1, Ordering::SeqCst);
        if Self::take_one(&self.failing_submits) {
            return Err(LedgerError::Unavailable("connection reset".to_string()));
        }

        let ack = {
            let mut state = self.state();
            if state.receipts.contains_key(&transaction.transaction_id) {
                SubmitAck {
                    precheck: "DUPLICATE_TRANSACTION".to_string(),
                }
            } else {
                match self.precheck(&mut state, transaction) {
                    Ok(body) => {
                        let receipt = self.execute(&mut state, &body);
                        debug!(
                            transaction_id = %transaction.transaction_id,
                            status = %receipt.status,
                            "simulated ledger executed transaction"
                        );
                        state.receipts.insert(transaction.transaction_id, receipt);
                        state.submitted.push(transaction.transaction_id);
                        SubmitAck::ok()
                    }
                    Err(code) => SubmitAck {
                        precheck: code.to_string(),
                    },
                }
            }
        };

        if Self::take_one(&self.lost_submit_responses) {
            return Err(LedgerError::Unavailable("response lost".to_string()));
        }
        Ok(ack)
    }

    async fn get_receipt(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<Receipt>, LedgerError> {
        self.calls.receipts.fetch_add(1, Ordering::SeqCst);
        let threshold = self.confirm_after_polls.load(Ordering::SeqCst);

        let mut state = self.state();
        let Some(receipt) = state.receipts.get(transaction_id).cloned() else {
            return Ok(None);
        };
        let polls = state.polls.entry(*transaction_id).or_insert(0);
        *polls += 1;
        Ok((*polls >= threshold).then_some(receipt))
    }

    async fn get_balance(&self, account: &AccountRef) -> Result<AccountBalance, LedgerError> {
        self.calls.balances.fetch_add(1, Ordering::SeqCst);
        if Self::take_one(&self.failing_reads) {
            return Err(LedgerError::Unavailable("mirror node timeout".to_string()));
        }

        let state = self.state();
        let id = state
            .resolve(account)
            .ok_or_else(|| LedgerError::AccountNotFound(account.to_string()))?;
        let acc = state
            .accounts
            .get(&id)
            .ok_or_else(|| LedgerError::AccountNotFound(account.to_string()))?;
        Ok(AccountBalance {
            native: acc.balance,
            tokens: acc.tokens.clone(),
        })
    }

    async fn lookup_account(&self, alias: &EvmAddress) -> Result<Option<AccountId>, LedgerError> {
        self.calls.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.state().aliases.get(alias).copied())
    }
}
