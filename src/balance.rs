// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Balance reader.
//!
//! Balance queries have no side effects, so transient failures are retried
//! transparently with the same bounded backoff the engine uses for submits.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::future::retry;
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::engine::RetryPolicy;
use crate::error::EngineError;
use crate::ledger::types::{format_amount, TokenInfo, NATIVE_DECIMALS, NATIVE_SYMBOL};
use crate::ledger::{AccountBalance, AccountId, AccountRef, LedgerError, LedgerNetwork, TokenId};

/// Balance of one asset, raw and human-readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AssetBalance {
    /// `native` or a token id
    pub asset: String,
    pub symbol: String,
    pub decimals: u8,
    /// Amount in the smallest unit
    pub amount: u64,
    /// Amount as a decimal string
    pub formatted: String,
}

/// What the caller sees for `getBalance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BalanceView {
    /// Account the balance was read from; `None` while an alias has not
    /// been promoted to an account yet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountId>,
    pub native: AssetBalance,
    /// Token balances, including tokens that are not registered
    pub tokens: Vec<AssetBalance>,
}

impl BalanceView {
    pub fn from_balance(
        account: Option<AccountId>,
        balance: &AccountBalance,
        registry: &TokenRegistry,
    ) -> Self {
        let native = AssetBalance {
            asset: "native".to_string(),
            symbol: NATIVE_SYMBOL.to_string(),
            decimals: NATIVE_DECIMALS,
            amount: balance.native,
            formatted: format_amount(balance.native, NATIVE_DECIMALS),
        };
        let tokens = balance
            .tokens
            .iter()
            .map(|(token_id, amount)| {
                let (symbol, decimals) = registry
                    .get(token_id)
                    .map(|info| (info.symbol.clone(), info.decimals))
                    .unwrap_or_else(|| (token_id.to_string(), 0));
                AssetBalance {
                    asset: token_id.to_string(),
                    symbol,
                    decimals,
                    amount: *amount,
                    formatted: format_amount(*amount, decimals),
                }
            })
            .collect();
        Self {
            account,
            native,
            tokens,
        }
    }

    pub fn native_tinybars(&self) -> u64 {
        self.native.amount
    }
}

/// Known fungible tokens and their decimals.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: Vec<TokenInfo>,
}

impl TokenRegistry {
    pub fn new(tokens: Vec<TokenInfo>) -> Self {
        Self { tokens }
    }

    pub fn get(&self, token_id: &TokenId) -> Option<&TokenInfo> {
        self.tokens.iter().find(|t| &t.token_id == token_id)
    }

    /// Match by token id or case-insensitive symbol.
    pub fn find(&self, query: &str) -> Option<&TokenInfo> {
        let query = query.trim();
        self.tokens
            .iter()
            .find(|t| t.token_id.to_string() == query || t.symbol.eq_ignore_ascii_case(query))
    }
}

#[derive(Clone)]
pub struct BalanceReader {
    ledger: Arc<dyn LedgerNetwork>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl BalanceReader {
    pub fn new(ledger: Arc<dyn LedgerNetwork>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            ledger,
            retry,
            timeout,
        }
    }

    /// Read an account balance, retrying transient failures.
    pub async fn get_balance(&self, account: &AccountRef) -> Result<AccountBalance, EngineError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let attempts = AtomicU32::new(0);

        retry(self.retry.backoff(), || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let err = match tokio::time::timeout(self.timeout, self.ledger.get_balance(account)).await
            {
                Ok(Ok(balance)) => return Ok(balance),
                Ok(Err(e)) => e,
                Err(_) => LedgerError::Unavailable("balance query timed out".to_string()),
            };
            if err.is_transient() && attempt < max_attempts {
                warn!(%account, attempt, error = %err, "balance query failed, retrying");
                Err(backoff::Error::transient(err))
            } else {
                Err(backoff::Error::permanent(err))
            }
        })
        .await
        .map_err(EngineError::from)
    }
}
