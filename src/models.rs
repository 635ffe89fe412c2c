// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the command API. All types derive
//! `ToSchema` for the OpenAPI document.
//!
//! ## Amounts
//!
//! Callers send amounts in whole units (e.g. `"5"` HBAR, `"2.5"` USDC). A
//! decimal string is preferred; a JSON number is accepted and converted via
//! its shortest round-trip decimal form. Either way, precision beyond the
//! asset's decimals is rejected, never rounded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::ledger::types::{amount_from_f64, parse_amount, AmountError};
use crate::ledger::{AccountId, EvmAddress};
use crate::storage::{TransferRecord, Wallet};

// =============================================================================
// Amount
// =============================================================================

/// Amount in whole units of the asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum Amount {
    /// Decimal string, e.g. `"5.25"`
    Decimal(String),
    /// JSON number
    Number(f64),
}

impl Amount {
    /// Convert to the asset's smallest unit.
    pub fn to_subunits(&self, decimals: u8) -> Result<u64, AmountError> {
        match self {
            Amount::Decimal(text) => parse_amount(text, decimals),
            Amount::Number(value) => amount_from_f64(*value, decimals),
        }
    }
}

impl From<&str> for Amount {
    fn from(value: &str) -> Self {
        Amount::Decimal(value.to_string())
    }
}

// =============================================================================
// Wallet Models
// =============================================================================

/// Wallet as returned to callers. Never carries key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct WalletView {
    pub wallet_id: Uuid,
    pub user_id: String,
    /// DER hex public key
    pub public_key: String,
    /// EVM address alias derived from the public key
    pub alias: EvmAddress,
    /// Ledger account, once one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<AccountId>,
    /// Whether the service holds the (encrypted) private key
    pub custodial: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Wallet> for WalletView {
    fn from(wallet: &Wallet) -> Self {
        Self {
            wallet_id: wallet.wallet_id,
            user_id: wallet.user_id.clone(),
            public_key: wallet.public_key.clone(),
            alias: wallet.alias.clone(),
            account_id: wallet.account_id,
            custodial: wallet.encrypted_private_key.is_some(),
            created_at: wallet.created_at,
        }
    }
}

// =============================================================================
// Transfer Models
// =============================================================================

/// Request to send a transfer.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SendTransferRequest {
    /// Account id (`0.0.999`) or EVM alias (`0x…`)
    pub recipient: String,
    pub amount: Amount,
    /// `native`, `HBAR`, a registered token id or token symbol
    #[serde(default = "default_asset")]
    pub asset: String,
    #[serde(default)]
    pub memo: Option<String>,
}

/// First step of the interactive flow: choose recipient and asset.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StageTransferRequest {
    pub recipient: String,
    #[serde(default = "default_asset")]
    pub asset: String,
}

/// Second step of the interactive flow: supply the amount.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ConfirmTransferRequest {
    pub amount: Amount,
}

fn default_asset() -> String {
    "native".to_string()
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransferListResponse {
    pub transfers: Vec<TransferRecord>,
}

#[derive(Debug, Clone, Deserialize, utoipa::IntoParams)]
pub struct ListTransfersQuery {
    /// Maximum number of transfers to return (default 20, max 100)
    pub limit: Option<usize>,
}
