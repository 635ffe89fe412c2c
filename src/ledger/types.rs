// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger types and constants.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Hashgraph network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Network name used in explorer links and logs
    pub name: &'static str,
    /// Mirror node REST base URL
    pub mirror_url: &'static str,
    /// Block explorer base URL
    pub explorer_url: &'static str,
    /// Consensus node that receives submissions
    pub node_account_id: AccountId,
}

/// Hedera Testnet configuration.
pub const HEDERA_TESTNET: NetworkConfig = NetworkConfig {
    name: "testnet",
    mirror_url: "https://testnet.mirrornode.hedera.com",
    explorer_url: "https://hashscan.io/testnet",
    node_account_id: AccountId::new(0, 0, 3),
};

/// Hedera Previewnet configuration.
pub const HEDERA_PREVIEWNET: NetworkConfig = NetworkConfig {
    name: "previewnet",
    mirror_url: "https://previewnet.mirrornode.hedera.com",
    explorer_url: "https://hashscan.io/previewnet",
    node_account_id: AccountId::new(0, 0, 3),
};

/// Hedera Mainnet configuration.
pub const HEDERA_MAINNET: NetworkConfig = NetworkConfig {
    name: "mainnet",
    mirror_url: "https://mainnet-public.mirrornode.hedera.com",
    explorer_url: "https://hashscan.io/mainnet",
    node_account_id: AccountId::new(0, 0, 3),
};

impl NetworkConfig {
    /// Look up a network by name.
    pub fn by_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "testnet" => Some(HEDERA_TESTNET),
            "previewnet" => Some(HEDERA_PREVIEWNET),
            "mainnet" => Some(HEDERA_MAINNET),
            _ => None,
        }
    }

    /// Human-followable explorer link for a transaction.
    pub fn explorer_link(&self, transaction_id: &TransactionId) -> String {
        format!("{}/transaction/{}", self.explorer_url, transaction_id)
    }
}

/// Decimal places of the native coin (1 HBAR = 10^8 tinybars).
pub const NATIVE_DECIMALS: u8 = 8;

/// Native coin symbol.
pub const NATIVE_SYMBOL: &str = "HBAR";

// =============================================================================
// Entity identifiers
// =============================================================================

/// A `shard.realm.num` ledger entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId {
    pub shard: u64,
    pub realm: u64,
    pub num: u64,
}

impl EntityId {
    pub const fn new(shard: u64, realm: u64, num: u64) -> Self {
        Self { shard, realm, num }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.shard, self.realm, self.num)
    }
}

impl FromStr for EntityId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(IdentifierError(format!(
                "`{s}` is not of the form shard.realm.num"
            )));
        }

        let mut nums = [0u64; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(IdentifierError(format!(
                    "`{s}` is not of the form shard.realm.num"
                )));
            }
            *slot = part
                .parse()
                .map_err(|_| IdentifierError(format!("`{s}` component out of range")))?;
        }

        Ok(Self::new(nums[0], nums[1], nums[2]))
    }
}

/// Error parsing an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identifier: {0}")]
pub struct IdentifierError(pub String);

macro_rules! entity_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
        #[serde(try_from = "String", into = "String")]
        #[schema(value_type = String)]
        pub struct $name(pub EntityId);

        impl $name {
            pub const fn new(shard: u64, realm: u64, num: u64) -> Self {
                Self(EntityId::new(shard, realm, num))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = IdentifierError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                EntityId::from_str(s).map(Self)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdentifierError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.to_string()
            }
        }
    };
}

entity_newtype!(
    /// Ledger-native account identity (e.g. `0.0.999`).
    AccountId
);

entity_newtype!(
    /// Fungible token identifier (e.g. `0.0.429274`).
    TokenId
);

/// EVM address alias derived from a public key (`0x` + 40 lowercase hex).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String)]
pub struct EvmAddress(String);

impl EvmAddress {
    /// Build from raw 20 address bytes.
    pub fn from_bytes(bytes: &[u8; 20]) -> Self {
        Self(format!("0x{}", alloy::hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EvmAddress {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let hex = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| IdentifierError("address must start with 0x".to_string()))?;
        if hex.len() != 40 {
            return Err(IdentifierError(
                "address must be 42 characters (0x + 40 hex)".to_string(),
            ));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IdentifierError(
                "address must contain only hex characters".to_string(),
            ));
        }
        Ok(Self(format!("0x{}", hex.to_ascii_lowercase())))
    }
}

impl TryFrom<String> for EvmAddress {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EvmAddress> for String {
    fn from(value: EvmAddress) -> Self {
        value.0
    }
}

/// Documents a string-encoded enum as a plain string in the OpenAPI schema.
macro_rules! string_schema {
    ($name:ident, $example:literal, $description:literal) => {
        impl utoipa::PartialSchema for $name {
            fn schema() -> utoipa::openapi::RefOr<utoipa::openapi::schema::Schema> {
                let object = utoipa::openapi::ObjectBuilder::new()
                    .schema_type(utoipa::openapi::schema::Type::String)
                    .description(Some($description))
                    .examples([serde_json::json!($example)])
                    .build();
                utoipa::openapi::RefOr::T(utoipa::openapi::schema::Schema::Object(object))
            }
        }

        impl ToSchema for $name {}
    };
}

/// Either a concrete account identity or an address alias.
///
/// Transfers to an alias that the ledger has not seen yet auto-create the
/// account on consensus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AccountRef {
    Id(AccountId),
    Alias(EvmAddress),
}

string_schema!(AccountRef, "0.0.1234", "Account id or 0x-prefixed EVM alias");

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountRef::Id(id) => id.fmt(f),
            AccountRef::Alias(alias) => alias.fmt(f),
        }
    }
}

impl FromStr for AccountRef {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
            EvmAddress::from_str(trimmed).map(AccountRef::Alias)
        } else {
            AccountId::from_str(trimmed).map(AccountRef::Id)
        }
    }
}

impl TryFrom<String> for AccountRef {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountRef> for String {
    fn from(value: AccountRef) -> Self {
        value.to_string()
    }
}

impl From<AccountId> for AccountRef {
    fn from(value: AccountId) -> Self {
        AccountRef::Id(value)
    }
}

impl From<EvmAddress> for AccountRef {
    fn from(value: EvmAddress) -> Self {
        AccountRef::Alias(value)
    }
}

/// Asset being transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AssetKind {
    /// The ledger's native coin
    Native,
    /// A fungible token
    Token(TokenId),
}

string_schema!(AssetKind, "native", "`native` or a token id");

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Native => f.write_str("native"),
            AssetKind::Token(id) => id.fmt(f),
        }
    }
}

impl FromStr for AssetKind {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("native") || s.eq_ignore_ascii_case(NATIVE_SYMBOL) {
            Ok(AssetKind::Native)
        } else {
            TokenId::from_str(s).map(AssetKind::Token)
        }
    }
}

impl TryFrom<String> for AssetKind {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AssetKind> for String {
    fn from(value: AssetKind) -> Self {
        value.to_string()
    }
}

// =============================================================================
// Transaction identifier
// =============================================================================

/// Transaction identifier: payer account plus valid-start timestamp.
///
/// Rendered as `0.0.123@1700000000.000000042`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId {
    pub payer: AccountId,
    pub valid_start_seconds: i64,
    pub valid_start_nanos: u32,
}

impl TransactionId {
    pub fn new(payer: AccountId, valid_start: DateTime<Utc>) -> Self {
        Self {
            payer,
            valid_start_seconds: valid_start.timestamp(),
            valid_start_nanos: valid_start.timestamp_subsec_nanos(),
        }
    }

    pub fn valid_start(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.valid_start_seconds, self.valid_start_nanos)
    }

    /// Mirror node path form: `0.0.123-1700000000-000000042`.
    pub fn to_mirror_form(&self) -> String {
        format!(
            "{}-{}-{:09}",
            self.payer, self.valid_start_seconds, self.valid_start_nanos
        )
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}.{:09}",
            self.payer, self.valid_start_seconds, self.valid_start_nanos
        )
    }
}

impl FromStr for TransactionId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IdentifierError(format!("`{s}` is not a transaction id"));

        let (payer, start) = match s.trim().split_once('@') {
            Some(parts) => parts,
            None => {
                // Mirror form: payer-seconds-nanos
                let mut parts = s.trim().rsplitn(3, '-');
                let nanos = parts.next().ok_or_else(invalid)?;
                let seconds = parts.next().ok_or_else(invalid)?;
                let payer = parts.next().ok_or_else(invalid)?;
                return Ok(Self {
                    payer: payer.parse()?,
                    valid_start_seconds: seconds.parse().map_err(|_| invalid())?,
                    valid_start_nanos: nanos.parse().map_err(|_| invalid())?,
                });
            }
        };

        let (seconds, nanos) = start.split_once('.').ok_or_else(invalid)?;
        let nanos: u32 = nanos.parse().map_err(|_| invalid())?;
        if nanos >= 1_000_000_000 {
            return Err(invalid());
        }

        Ok(Self {
            payer: payer.parse()?,
            valid_start_seconds: seconds.parse().map_err(|_| invalid())?,
            valid_start_nanos: nanos,
        })
    }
}

impl TryFrom<String> for TransactionId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TransactionId> for String {
    fn from(value: TransactionId) -> Self {
        value.to_string()
    }
}

// =============================================================================
// Balances
// =============================================================================

/// Raw account balance as reported by the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Native balance in tinybars
    pub native: u64,
    /// Token balances in each token's smallest unit
    pub tokens: BTreeMap<TokenId, u64>,
}

/// A registered fungible token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub token_id: TokenId,
    pub symbol: String,
    pub decimals: u8,
}

/// USDC on Hedera Testnet.
pub const USDC_TESTNET_TOKEN: TokenId = TokenId::new(0, 0, 429274);

/// USDC on Hedera Mainnet.
pub const USDC_MAINNET_TOKEN: TokenId = TokenId::new(0, 0, 456858);

// =============================================================================
// Amounts
// =============================================================================

/// Error converting a user-facing amount into ledger subunits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid amount: {0}")]
pub struct AmountError(pub String);

/// Parse a human-readable decimal amount into the asset's integer subunit.
///
/// Excess precision is rejected rather than rounded.
///
/// # Arguments
/// * `amount` - Amount as a string (e.g., "1.5")
/// * `decimals` - Number of decimals (8 for HBAR, 6 for USDC)
pub fn parse_amount(amount: &str, decimals: u8) -> Result<u64, AmountError> {
    let amount = amount.trim();
    if amount.starts_with('-') {
        return Err(AmountError("amount must be greater than zero".to_string()));
    }
    let amount = amount.strip_prefix('+').unwrap_or(amount);

    let parts: Vec<&str> = amount.split('.').collect();
    if parts.len() > 2 || parts.iter().all(|p| p.is_empty()) {
        return Err(AmountError("invalid amount format".to_string()));
    }
    if !parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit())) {
        return Err(AmountError("amount must be a decimal number".to_string()));
    }

    let whole: u64 = if parts[0].is_empty() {
        0
    } else {
        parts[0]
            .parse()
            .map_err(|_| AmountError("amount too large".to_string()))?
    };

    let fraction: u64 = match parts.get(1) {
        Some(dec) if !dec.is_empty() => {
            let significant = dec.trim_end_matches('0');
            if significant.len() > decimals as usize {
                return Err(AmountError(format!(
                    "too many decimal places (max {decimals})"
                )));
            }
            let padded = format!("{:0<width$}", significant, width = decimals as usize);
            if padded.is_empty() {
                0
            } else {
                padded
                    .parse()
                    .map_err(|_| AmountError("invalid decimal part".to_string()))?
            }
        }
        _ => 0,
    };

    let multiplier = 10u64
        .checked_pow(decimals as u32)
        .ok_or_else(|| AmountError("unsupported decimals".to_string()))?;
    let total = whole
        .checked_mul(multiplier)
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(|| AmountError("amount overflow".to_string()))?;

    if total == 0 {
        return Err(AmountError("amount must be greater than zero".to_string()));
    }
    if total > i64::MAX as u64 {
        return Err(AmountError("amount overflow".to_string()));
    }

    Ok(total)
}

/// Convert a floating-point amount into the asset's integer subunit.
///
/// Goes through the shortest decimal representation that round-trips to the
/// same `f64`, so `0.1` means exactly one tenth. Anything finer than the
/// subunit is rejected.
pub fn amount_from_f64(amount: f64, decimals: u8) -> Result<u64, AmountError> {
    if !amount.is_finite() {
        return Err(AmountError("amount must be a finite number".to_string()));
    }
    if amount <= 0.0 {
        return Err(AmountError("amount must be greater than zero".to_string()));
    }
    parse_amount(&format!("{amount}"), decimals)
}

/// Format subunits as a human-readable amount.
pub fn format_amount(amount: u64, decimals: u8) -> String {
    if amount == 0 {
        return "0".to_string();
    }

    let divisor = 10u64.pow(decimals as u32);
    let whole = amount / divisor;
    let remainder = amount % divisor;

    if remainder == 0 {
        whole.to_string()
    } else {
        let decimal_str = format!("{:0>width$}", remainder, width = decimals as usize);
        let trimmed = decimal_str.trim_end_matches('0');
        format!("{}.{}", whole, trimmed)
    }
}
