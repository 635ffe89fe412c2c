// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Production ledger client.
//!
//! Reads go to the mirror node REST API; signed transactions are posted to a
//! submission gateway that relays them to a consensus node and returns the
//! node's precheck code.
//!
//! | Call                                  | Endpoint                                   |
//! |---------------------------------------|--------------------------------------------|
//! | [`LedgerNetwork::get_balance`]        | `GET {mirror}/api/v1/accounts/{idOrAlias}` |
//! | [`LedgerNetwork::lookup_account`]     | `GET {mirror}/api/v1/accounts/{alias}`     |
//! | [`LedgerNetwork::get_receipt`]        | `GET {mirror}/api/v1/transactions/{id}`    |
//! | [`LedgerNetwork::submit`]             | `POST {gateway}/api/v1/transactions`       |

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use super::transaction::SignedTransaction;
use super::types::{
    AccountBalance, AccountId, AccountRef, EvmAddress, NetworkConfig, TokenId, TransactionId,
};
use super::{LedgerError, LedgerNetwork, Receipt, SubmitAck};

/// Mirror node + gateway client.
#[derive(Debug, Clone)]
pub struct HttpLedger {
    network: NetworkConfig,
    http: reqwest::Client,
    mirror_url: String,
    gateway_url: String,
}

#[derive(Debug, Deserialize)]
struct MirrorAccount {
    account: AccountId,
    balance: MirrorBalance,
}

#[derive(Debug, Deserialize)]
struct MirrorBalance {
    balance: u64,
    #[serde(default)]
    tokens: Vec<MirrorTokenBalance>,
}

#[derive(Debug, Deserialize)]
struct MirrorTokenBalance {
    token_id: TokenId,
    balance: u64,
}

#[derive(Debug, Deserialize)]
struct MirrorTransactions {
    #[serde(default)]
    transactions: Vec<MirrorTransaction>,
}

#[derive(Debug, Deserialize)]
struct MirrorTransaction {
    result: String,
    #[serde(default)]
    entity_id: Option<String>,
}

impl HttpLedger {
    /// Create a client. `mirror_url` defaults to the network's public mirror node.
    pub fn new(
        network: NetworkConfig,
        mirror_url: Option<String>,
        gateway_url: String,
        request_timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LedgerError::Protocol(format!("http client: {e}")))?;
        let mirror_url = mirror_url.unwrap_or_else(|| network.mirror_url.to_string());

        Ok(Self {
            network,
            http,
            mirror_url: mirror_url.trim_end_matches('/').to_string(),
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, LedgerError> {
        let response = self.http.get(url).send().await.map_err(|e| {
            warn!(url, error = %e, "mirror node request failed");
            LedgerError::Unavailable(format!("mirror node: {e}"))
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<T>()
                .await
                .map(Some)
                .map_err(|e| LedgerError::Protocol(format!("mirror node response: {e}"))),
            status if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => Err(
                LedgerError::Unavailable(format!("mirror node returned {status}")),
            ),
            status => Err(LedgerError::Protocol(format!(
                "mirror node returned {status}"
            ))),
        }
    }

    async fn fetch_account(&self, id_or_alias: &str) -> Result<Option<MirrorAccount>, LedgerError> {
        let url = format!("{}/api/v1/accounts/{}", self.mirror_url, id_or_alias);
        self.get_json(&url).await
    }
}

#[async_trait]
impl LedgerNetwork for HttpLedger {
    fn network(&self) -> &NetworkConfig {
        &self.network
    }

    async fn submit(&self, transaction: &SignedTransaction) -> Result<SubmitAck, LedgerError> {
        let url = format!("{}/api/v1/transactions", self.gateway_url);
        let response = self
            .http
            .post(&url)
            .json(transaction)
            .send()
            .await
            .map_err(|e| {
                warn!(
                    transaction_id = %transaction.transaction_id,
                    error = %e,
                    "submission transport failure"
                );
                LedgerError::Unavailable(format!("gateway: {e}"))
            })?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(LedgerError::Unavailable(format!("gateway returned {status}")));
        }

        let ack: SubmitAck = response
            .json()
            .await
            .map_err(|e| LedgerError::Protocol(format!("gateway response ({status}): {e}")))?;
        debug!(
            transaction_id = %transaction.transaction_id,
            precheck = %ack.precheck,
            "transaction submitted"
        );
        Ok(ack)
    }

    async fn get_receipt(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<Receipt>, LedgerError> {
        let url = format!(
            "{}/api/v1/transactions/{}",
            self.mirror_url,
            transaction_id.to_mirror_form()
        );
        let Some(found) = self.get_json::<MirrorTransactions>(&url).await? else {
            return Ok(None);
        };
        let Some(first) = found.transactions.into_iter().next() else {
            return Ok(None);
        };

        let account_id = match first.entity_id.as_deref() {
            Some(entity) if first.result == "SUCCESS" => Some(
                entity
                    .parse()
                    .map_err(|_| LedgerError::Protocol(format!("bad entity id `{entity}`")))?,
            ),
            _ => None,
        };

        Ok(Some(Receipt {
            status: first.result,
            account_id,
        }))
    }

    async fn get_balance(&self, account: &AccountRef) -> Result<AccountBalance, LedgerError> {
        let found = self
            .fetch_account(&account.to_string())
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account.to_string()))?;

        let tokens: BTreeMap<TokenId, u64> = found
            .balance
            .tokens
            .into_iter()
            .map(|t| (t.token_id, t.balance))
            .collect();

        Ok(AccountBalance {
            native: found.balance.balance,
            tokens,
        })
    }

    async fn lookup_account(&self, alias: &EvmAddress) -> Result<Option<AccountId>, LedgerError> {
        Ok(self.fetch_account(alias.as_str()).await?.map(|a| a.account))
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        extract::Path,
        http::StatusCode as AxumStatus,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};

    use super::*;
    use crate::ledger::types::{HEDERA_TESTNET, USDC_TESTNET_TOKEN};

    async fn account(Path(id): Path<String>) -> (AxumStatus, Json<Value>) {
        match id.as_str() {
            "0.0.1001" | "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa" => (
                AxumStatus::OK,
                Json(json!({
                    "account": "0.0.1001",
                    "balance": {
                        "balance": 1_000_000_000u64,
                        "timestamp": "1700000000.000000000",
                        "tokens": [{"token_id": "0.0.429274", "balance": 2_500_000u64}]
                    }
                })),
            ),
            "0.0.503" => (AxumStatus::SERVICE_UNAVAILABLE, Json(json!({}))),
            _ => (
                AxumStatus::NOT_FOUND,
                Json(json!({"_status": {"messages": [{"message": "Not found"}]}})),
            ),
        }
    }

    async fn transaction(Path(id): Path<String>) -> (AxumStatus, Json<Value>) {
        match id.as_str() {
            "0.0.2-100-000000001" => (
                AxumStatus::OK,
                Json(json!({"transactions": [{
                    "transaction_id": id,
                    "result": "SUCCESS",
                    "entity_id": "0.0.5005",
                    "name": "CRYPTOCREATEACCOUNT"
                }]})),
            ),
            "0.0.2-100-000000002" => (
                AxumStatus::OK,
                Json(json!({"transactions": [{
                    "transaction_id": id,
                    "result": "INSUFFICIENT_ACCOUNT_BALANCE",
                    "entity_id": null
                }]})),
            ),
            _ => (AxumStatus::NOT_FOUND, Json(json!({}))),
        }
    }

    async fn gateway(Json(body): Json<Value>) -> (AxumStatus, Json<Value>) {
        let precheck = if body["signatures"].as_array().is_some_and(|s| !s.is_empty()) {
            "OK"
        } else {
            "INVALID_SIGNATURE"
        };
        (AxumStatus::OK, Json(json!({"precheck": precheck})))
    }

    async fn spawn() -> HttpLedger {
        let app = Router::new()
            .route("/api/v1/accounts/{id}", get(account))
            .route("/api/v1/transactions/{id}", get(transaction))
            .route("/api/v1/transactions", post(gateway));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let base = format!("http://{addr}/");
        HttpLedger::new(HEDERA_TESTNET, Some(base.clone()), base, Duration::from_secs(5)).unwrap()
    }

    fn tx_id(nanos: u32) -> TransactionId {
        TransactionId {
            payer: AccountId::new(0, 0, 2),
            valid_start_seconds: 100,
            valid_start_nanos: nanos,
        }
    }

    #[tokio::test]
    async fn balance_and_tokens_from_mirror() {
        let ledger = spawn().await;
        let balance = ledger
            .get_balance(&AccountRef::Id(AccountId::new(0, 0, 1001)))
            .await
            .unwrap();
        assert_eq!(balance.native, 1_000_000_000);
        assert_eq!(balance.tokens.get(&USDC_TESTNET_TOKEN), Some(&2_500_000));
    }

    #[tokio::test]
    async fn missing_account_and_server_errors() {
        let ledger = spawn().await;
        let err = ledger
            .get_balance(&AccountRef::Id(AccountId::new(0, 0, 77)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));

        let err = ledger
            .get_balance(&AccountRef::Id(AccountId::new(0, 0, 503)))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn alias_lookup() {
        let ledger = spawn().await;
        let known: EvmAddress = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().unwrap();
        let unknown: EvmAddress = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".parse().unwrap();
        assert_eq!(
            ledger.lookup_account(&known).await.unwrap(),
            Some(AccountId::new(0, 0, 1001))
        );
        assert_eq!(ledger.lookup_account(&unknown).await.unwrap(), None);
    }

    #[tokio::test]
    async fn receipts_from_mirror() {
        let ledger = spawn().await;

        let created = ledger.get_receipt(&tx_id(1)).await.unwrap().unwrap();
        assert!(created.is_success());
        assert_eq!(created.account_id, Some(AccountId::new(0, 0, 5005)));

        let failed = ledger.get_receipt(&tx_id(2)).await.unwrap().unwrap();
        assert_eq!(failed.status, "INSUFFICIENT_ACCOUNT_BALANCE");
        assert_eq!(failed.account_id, None);

        assert!(ledger.get_receipt(&tx_id(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn submit_returns_precheck() {
        let ledger = spawn().await;
        let tx = SignedTransaction {
            transaction_id: tx_id(9),
            body_bytes: b"{}".to_vec(),
            signatures: vec![],
        };
        assert_eq!(
            ledger.submit(&tx).await.unwrap().precheck,
            "INVALID_SIGNATURE"
        );
    }

    #[tokio::test]
    async fn unreachable_gateway_is_transient() {
        let ledger = HttpLedger::new(
            HEDERA_TESTNET,
            Some("http://127.0.0.1:1".to_string()),
            "http://127.0.0.1:1".to_string(),
            Duration::from_secs(2),
        )
        .unwrap();
        let tx = SignedTransaction {
            transaction_id: tx_id(9),
            body_bytes: vec![],
            signatures: vec![],
        };
        assert!(ledger.submit(&tx).await.unwrap_err().is_transient());
    }
}
