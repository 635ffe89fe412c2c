// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Command API consumed by the chat transport.
//!
//! [`WalletService`] wires provisioning, signing, the transaction engine and
//! the balance reader together. It is the only place that knows about users:
//! everything below works on keys, accounts and transactions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::balance::{BalanceReader, BalanceView, TokenRegistry};
use crate::conversation::{ConversationState, PendingTransfer};
use crate::custody::EncryptionContext;
use crate::engine::{
    EngineConfig, TransactionEngine, TransactionResult, TransactionStatus, TransferRequest,
};
use crate::error::EngineError;
use crate::ledger::types::NATIVE_DECIMALS;
use crate::ledger::{
    AccountBalance, AccountId, AccountRef, AssetKind, LedgerError, LedgerNetwork, TransactionId,
};
use crate::models::{Amount, WalletView};
use crate::provisioning::Provisioner;
use crate::signer::{KeySource, SignerFactory, SigningError};
use crate::storage::{TransferRecord, TransferState, Wallet, WalletStore};

/// Upper bound on transfers returned by one listing.
pub const MAX_TRANSFER_PAGE: usize = 100;

/// Never a valid user id (see [`validate_user_id`]), so the probe cannot hit
/// a real wallet.
const READINESS_PROBE_USER: &str = "\u{0}readiness";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyStatus {
    pub storage: bool,
    pub ledger: bool,
}

/// Everything a [`WalletService`] is built from.
pub struct ServiceParts {
    pub store: Arc<dyn WalletStore>,
    pub ledger: Arc<dyn LedgerNetwork>,
    pub signers: SignerFactory,
    pub provisioner: Provisioner,
    pub engine: EngineConfig,
    /// Bound on each balance or alias lookup.
    pub read_timeout: Duration,
    pub tokens: TokenRegistry,
    pub conversations: ConversationState,
}

pub struct WalletService {
    store: Arc<dyn WalletStore>,
    ledger: Arc<dyn LedgerNetwork>,
    signers: SignerFactory,
    provisioner: Provisioner,
    engine: TransactionEngine,
    balances: BalanceReader,
    read_timeout: Duration,
    tokens: TokenRegistry,
    conversations: ConversationState,
}

impl WalletService {
    pub fn new(parts: ServiceParts) -> Self {
        let balances = BalanceReader::new(
            parts.ledger.clone(),
            parts.engine.retry.clone(),
            parts.read_timeout,
        );
        Self {
            engine: TransactionEngine::new(parts.ledger.clone(), parts.engine),
            store: parts.store,
            ledger: parts.ledger,
            signers: parts.signers,
            provisioner: parts.provisioner,
            balances,
            read_timeout: parts.read_timeout,
            tokens: parts.tokens,
            conversations: parts.conversations,
        }
    }

    pub fn provisioning_mode(&self) -> &'static str {
        self.provisioner.mode().name()
    }

    pub fn network_name(&self) -> &'static str {
        self.ledger.network().name
    }

    /// Probe the wallet store and the ledger. The ledger counts as reachable
    /// when it answers at all, including "account not found".
    pub async fn check_dependencies(&self) -> DependencyStatus {
        let storage = self.store.find_by_user(READINESS_PROBE_USER).await.is_ok();
        let node = AccountRef::Id(self.ledger.network().node_account_id);
        let ledger = matches!(
            tokio::time::timeout(self.read_timeout, self.ledger.get_balance(&node)).await,
            Ok(Ok(_)) | Ok(Err(LedgerError::AccountNotFound(_)))
        );
        DependencyStatus { storage, ledger }
    }

    // =========================================================================
    // Wallets
    // =========================================================================

    pub async fn provision_wallet(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<WalletView, EngineError> {
        validate_user_id(user_id)?;
        let wallet = self.provisioner.provision(user_id, cancel).await?;
        Ok(WalletView::from(&wallet))
    }

    pub async fn get_wallet(&self, user_id: &str) -> Result<WalletView, EngineError> {
        let wallet = self.require_wallet(user_id).await?;
        Ok(WalletView::from(&wallet))
    }

    async fn require_wallet(&self, user_id: &str) -> Result<Wallet, EngineError> {
        validate_user_id(user_id)?;
        self.store
            .find_by_user(user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("no wallet exists for this user".to_string()))
    }

    /// Account id of the wallet, looking the alias up on the ledger when the
    /// wallet has none yet. A discovered id is attached to the wallet.
    async fn resolve_account(&self, wallet: &Wallet) -> Result<Option<AccountId>, EngineError> {
        if let Some(account) = wallet.account_id {
            return Ok(Some(account));
        }

        let found = tokio::time::timeout(self.read_timeout, self.ledger.lookup_account(&wallet.alias))
            .await
            .map_err(|_| EngineError::network("alias lookup timed out"))??;
        let Some(account) = found else {
            return Ok(None);
        };

        self.store
            .attach_account_identity(wallet.wallet_id, account)
            .await?;
        info!(wallet_id = %wallet.wallet_id, %account, "alias promoted to account");
        Ok(Some(account))
    }

    // =========================================================================
    // Balances
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn get_balance(&self, user_id: &str) -> Result<BalanceView, EngineError> {
        let wallet = self.require_wallet(user_id).await?;
        match self.resolve_account(&wallet).await? {
            Some(account) => {
                let balance = self.balances.get_balance(&AccountRef::Id(account)).await?;
                Ok(BalanceView::from_balance(Some(account), &balance, &self.tokens))
            }
            // An alias the ledger has not seen holds nothing yet.
            None => Ok(BalanceView::from_balance(
                None,
                &AccountBalance::default(),
                &self.tokens,
            )),
        }
    }

    // =========================================================================
    // Transfers
    // =========================================================================

    /// Send `amount` (whole units) of `asset` to `recipient`.
    #[instrument(skip(self, amount, memo, cancel))]
    pub async fn send_transfer(
        &self,
        user_id: &str,
        recipient: &str,
        amount: &Amount,
        asset: &str,
        memo: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<TransactionResult, EngineError> {
        let recipient = parse_recipient(recipient)?;
        let (asset, decimals) = self.parse_asset(asset)?;
        let amount = amount
            .to_subunits(decimals)
            .map_err(|e| EngineError::validation(e.to_string()))?;

        self.execute_transfer(user_id, recipient, asset, amount, memo, cancel)
            .await
    }

    async fn execute_transfer(
        &self,
        user_id: &str,
        recipient: AccountRef,
        asset: AssetKind,
        amount: u64,
        memo: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<TransactionResult, EngineError> {
        if amount == 0 {
            return Err(EngineError::validation("amount must be greater than zero"));
        }

        let wallet = self.require_wallet(user_id).await?;
        if recipient == AccountRef::Alias(wallet.alias.clone()) {
            return Err(EngineError::validation("cannot transfer to your own wallet"));
        }
        let Some(ciphertext) = wallet.encrypted_private_key.clone() else {
            return Err(EngineError::Signing(SigningError::NoKeyMaterial));
        };
        let sender = self.resolve_account(&wallet).await?.ok_or_else(|| {
            EngineError::validation(
                "this wallet has no ledger account yet, fund its address first",
            )
        })?;

        let request = TransferRequest {
            sender,
            recipient: recipient.clone(),
            asset,
            amount,
            memo,
        };
        let built = self.engine.build_transfer(&request)?;

        let signer = self
            .signers
            .resolve(
                &KeySource::Envelope {
                    ciphertext,
                    context: EncryptionContext::user_wallet(user_id),
                },
                Some(sender),
            )
            .await
            .map_err(EngineError::from_signer_resolution)?;

        let now = Utc::now();
        let mut record = TransferRecord {
            transaction_id: built.transaction_id(),
            user_id: user_id.to_string(),
            recipient,
            asset,
            amount,
            state: TransferState::Unconfirmed,
            failure_reason: None,
            explorer_url: self.engine.explorer_link(&built.transaction_id()),
            created_at: now,
            updated_at: now,
        };

        match self.engine.execute(built, signer.as_ref(), cancel).await {
            Ok(result) => {
                record.settle(&result);
                self.log_transfer(&record).await;
                info!(
                    transaction_id = %result.transaction_id,
                    status = ?result.status,
                    "transfer finished"
                );
                Ok(result)
            }
            Err(err) => {
                if let EngineError::Network {
                    transaction_id: Some(_),
                    ..
                } = &err
                {
                    self.log_transfer(&record).await;
                }
                Err(err)
            }
        }
    }

    /// Append to the transfer log. Write failures are logged only.
    async fn log_transfer(&self, record: &TransferRecord) {
        if let Err(e) = self.store.record_transfer(record).await {
            error!(
                transaction_id = %record.transaction_id,
                error = %e,
                "failed to record transfer"
            );
        }
    }

    /// Outcome of an earlier transfer, re-querying the ledger if it was
    /// left unconfirmed.
    pub async fn transfer_status(
        &self,
        user_id: &str,
        transaction_id: &TransactionId,
    ) -> Result<TransactionResult, EngineError> {
        validate_user_id(user_id)?;
        let mut record = self
            .store
            .get_transfer(transaction_id)
            .await?
            .filter(|r| r.user_id == user_id)
            .ok_or_else(|| EngineError::NotFound("unknown transfer".to_string()))?;

        let status = match record.state {
            TransferState::Succeeded => TransactionStatus::Succeeded,
            TransferState::Failed => TransactionStatus::Failed,
            TransferState::Unconfirmed => {
                let result = self.engine.requery(transaction_id).await?;
                record.settle(&result);
                self.log_transfer(&record).await;
                return Ok(result);
            }
        };

        Ok(TransactionResult {
            status,
            transaction_id: record.transaction_id,
            explorer_url: record.explorer_url,
            failure_reason: record.failure_reason,
            account_id: None,
        })
    }

    pub async fn list_transfers(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, EngineError> {
        validate_user_id(user_id)?;
        Ok(self
            .store
            .list_transfers(user_id, limit.clamp(1, MAX_TRANSFER_PAGE))
            .await?)
    }

    // =========================================================================
    // Interactive flow
    // =========================================================================

    /// Remember the recipient until the user replies with an amount.
    pub async fn stage_transfer(
        &self,
        user_id: &str,
        recipient: &str,
        asset: &str,
    ) -> Result<PendingTransfer, EngineError> {
        let recipient = parse_recipient(recipient)?;
        let (asset, _) = self.parse_asset(asset)?;
        let wallet = self.require_wallet(user_id).await?;
        if recipient == AccountRef::Alias(wallet.alias) {
            return Err(EngineError::validation("cannot transfer to your own wallet"));
        }
        Ok(self.conversations.stage(user_id, recipient, asset))
    }

    pub fn pending_transfer(&self, user_id: &str) -> Option<PendingTransfer> {
        self.conversations.peek(user_id)
    }

    pub fn cancel_staged_transfer(&self, user_id: &str) {
        self.conversations.clear(user_id);
    }

    /// Execute the staged transfer with `amount`. The staged entry is
    /// consumed whether or not the transfer succeeds.
    pub async fn confirm_staged_transfer(
        &self,
        user_id: &str,
        amount: &Amount,
        cancel: &CancellationToken,
    ) -> Result<TransactionResult, EngineError> {
        let pending = self.conversations.take(user_id).ok_or_else(|| {
            EngineError::validation("no pending transfer, or it has expired")
        })?;
        let decimals = self.decimals_of(&pending.asset)?;
        let amount = amount
            .to_subunits(decimals)
            .map_err(|e| EngineError::validation(e.to_string()))?;

        self.execute_transfer(user_id, pending.recipient, pending.asset, amount, None, cancel)
            .await
    }

    // =========================================================================
    // Input parsing
    // =========================================================================

    fn parse_asset(&self, asset: &str) -> Result<(AssetKind, u8), EngineError> {
        let trimmed = asset.trim();
        if trimmed.is_empty() {
            return Err(EngineError::validation("asset is required"));
        }
        if let Some(info) = self.tokens.find(trimmed) {
            return Ok((AssetKind::Token(info.token_id), info.decimals));
        }
        match trimmed.parse::<AssetKind>() {
            Ok(AssetKind::Native) => Ok((AssetKind::Native, NATIVE_DECIMALS)),
            Ok(AssetKind::Token(token)) => Err(EngineError::validation(format!(
                "token {token} is not supported"
            ))),
            Err(_) => Err(EngineError::validation(format!(
                "unknown asset '{trimmed}'"
            ))),
        }
    }

    fn decimals_of(&self, asset: &AssetKind) -> Result<u8, EngineError> {
        match asset {
            AssetKind::Native => Ok(NATIVE_DECIMALS),
            AssetKind::Token(token) => self
                .tokens
                .get(token)
                .map(|info| info.decimals)
                .ok_or_else(|| EngineError::validation(format!("token {token} is not supported"))),
        }
    }
}

fn validate_user_id(user_id: &str) -> Result<(), EngineError> {
    if user_id.trim().is_empty()
        || user_id.len() > 128
        || user_id.chars().any(char::is_control)
    {
        return Err(EngineError::validation("invalid user id"));
    }
    Ok(())
}

fn parse_recipient(recipient: &str) -> Result<AccountRef, EngineError> {
    recipient
        .trim()
        .parse()
        .map_err(|_| EngineError::validation("recipient must be an account id like 0.0.1234 or a 0x address"))
}

#[cfg(test)]
pub(crate) mod testing {
    //! A fully wired service over the simulated ledger.

    use super::*;
    use crate::custody::envelope::testing::FlakyCustody;
    use crate::custody::EnvelopeService;
    use crate::engine::RetryPolicy;
    use crate::ledger::types::{TokenInfo, USDC_TESTNET_TOKEN};
    use crate::ledger::SimulatedLedger;
    use crate::provisioning::{OperatorConfig, ProvisioningMode};
    use crate::signer::KeyMaterial;
    use crate::storage::MemoryWalletStore;

    pub const HBAR: u64 = 100_000_000;
    pub const INITIAL_BALANCE: u64 = 20 * HBAR;

    pub struct TestService {
        pub service: WalletService,
        pub ledger: Arc<SimulatedLedger>,
        pub store: Arc<MemoryWalletStore>,
        pub custody: Arc<FlakyCustody>,
        pub operator: AccountId,
    }

    pub fn engine_config() -> EngineConfig {
        EngineConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(2),
                multiplier: 2.0,
            },
            sign_timeout: Duration::from_millis(500),
            submit_timeout: Duration::from_millis(500),
            confirm_timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(5),
        }
    }

    pub async fn funded() -> TestService {
        build(true).await
    }

    pub async fn alias_only() -> TestService {
        build(false).await
    }

    async fn build(funded: bool) -> TestService {
        let ledger = Arc::new(SimulatedLedger::new());
        ledger.open_account(AccountId::new(0, 0, 999), 0);
        let store = Arc::new(MemoryWalletStore::new());
        let custody = Arc::new(FlakyCustody::new());
        let envelope = EnvelopeService::new(custody.clone(), Duration::from_millis(500));
        let signers = SignerFactory::new(envelope.clone(), None, Duration::from_millis(500));
        let engine = TransactionEngine::new(ledger.clone(), engine_config());

        let operator_key = KeyMaterial::generate();
        let operator = ledger.create_account(&operator_key.public_key(), 10_000 * HBAR);
        let context = EncryptionContext::operator(&operator.to_string());
        let ciphertext = envelope
            .encrypt(operator_key.secret_bytes(), &context)
            .await
            .unwrap();

        let mode = if funded {
            ProvisioningMode::Funded {
                operator: OperatorConfig {
                    account_id: operator,
                    key: KeySource::Envelope {
                        ciphertext,
                        context,
                    },
                },
                initial_balance: INITIAL_BALANCE,
            }
        } else {
            ProvisioningMode::Alias
        };
        let provisioner = Provisioner::new(
            store.clone(),
            envelope,
            signers.clone(),
            engine,
            mode,
            true,
        );

        let service = WalletService::new(ServiceParts {
            store: store.clone(),
            ledger: ledger.clone(),
            signers,
            provisioner,
            engine: engine_config(),
            read_timeout: Duration::from_millis(500),
            tokens: TokenRegistry::new(vec![TokenInfo {
                token_id: USDC_TESTNET_TOKEN,
                symbol: "USDC".to_string(),
                decimals: 6,
            }]),
            conversations: ConversationState::new(100, Duration::from_secs(60)),
        });

        TestService {
            service,
            ledger,
            store,
            custody,
            operator,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::*;
    use super::*;
    use crate::custody::CustodyError;
    use crate::error::ErrorKind;
    use crate::ledger::types::USDC_TESTNET_TOKEN;
    use crate::signer::KeyMaterial;

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn provision_send_and_read_balance_end_to_end() {
        let t = funded().await;
        let wallet = t.service.provision_wallet("alice", &cancel()).await.unwrap();
        let account = wallet.account_id.expect("funded wallet has an account");
        assert_eq!(
            t.ledger.native_balance(t.operator),
            Some(10_000 * HBAR - INITIAL_BALANCE - t.ledger.fee())
        );

        let before = t.service.get_balance("alice").await.unwrap();
        assert_eq!(before.account, Some(account));
        assert_eq!(before.native_tinybars(), INITIAL_BALANCE);
        assert!(before.native_tinybars() > 0);

        let result = t
            .service
            .send_transfer("alice", "0.0.999", &Amount::from("5"), "native", None, &cancel())
            .await
            .unwrap();
        assert_eq!(result.status, TransactionStatus::Succeeded);
        assert_eq!(result.transaction_id.payer, account);
        assert!(result.explorer_url.contains("/transaction/"));

        let after = t.service.get_balance("alice").await.unwrap();
        assert_eq!(
            after.native_tinybars(),
            INITIAL_BALANCE - 5 * HBAR - t.ledger.fee()
        );
        assert_eq!(t.ledger.native_balance(AccountId::new(0, 0, 999)), Some(5 * HBAR));

        let logged = t.service.list_transfers("alice", 10).await.unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].state, TransferState::Succeeded);
        assert_eq!(logged[0].amount, 5 * HBAR);
    }

    #[tokio::test]
    async fn zero_or_negative_amount_never_reaches_the_ledger() {
        let t = funded().await;
        t.service.provision_wallet("alice", &cancel()).await.unwrap();
        let calls = t.ledger.network_calls();

        for amount in [Amount::from("0"), Amount::from("-3"), Amount::Number(0.0)] {
            let err = t
                .service
                .send_transfer("alice", "0.0.999", &amount, "native", None, &cancel())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert_eq!(t.ledger.network_calls(), calls);
    }

    #[tokio::test]
    async fn malformed_input_is_validation() {
        let t = funded().await;
        t.service.provision_wallet("alice", &cancel()).await.unwrap();

        let cases = [
            ("0.0", "1", "native"),
            ("0.0.999", "1.000000001", "native"),
            ("0.0.999", "1", "DOGE"),
            ("0.0.999", "1", "0.0.1234"),
            ("0.0.999", "0.0000001", "USDC"),
        ];
        for (recipient, amount, asset) in cases {
            let err = t
                .service
                .send_transfer("alice", recipient, &Amount::from(amount), asset, None, &cancel())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{recipient} {amount} {asset}");
        }
    }

    #[tokio::test]
    async fn self_transfer_is_rejected() {
        let t = funded().await;
        let wallet = t.service.provision_wallet("alice", &cancel()).await.unwrap();

        for recipient in [
            wallet.account_id.unwrap().to_string(),
            wallet.alias.to_string(),
        ] {
            let err = t
                .service
                .send_transfer("alice", &recipient, &Amount::from("1"), "native", None, &cancel())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let t = funded().await;
        let err = t.service.get_balance("nobody").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = t.service.get_wallet("nobody").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn rejected_transfer_is_logged_with_link() {
        let t = funded().await;
        t.service.provision_wallet("alice", &cancel()).await.unwrap();

        let result = t
            .service
            .send_transfer("alice", "0.0.999", &Amount::from("500"), "native", None, &cancel())
            .await
            .unwrap();
        assert_eq!(result.status, TransactionStatus::Failed);
        assert_eq!(result.failure_reason.as_deref(), Some("insufficient balance"));

        let status = t
            .service
            .transfer_status("alice", &result.transaction_id)
            .await
            .unwrap();
        assert_eq!(status, TransactionResult { account_id: None, ..result });
    }

    #[tokio::test]
    async fn unconfirmed_transfer_resolves_on_status_query() {
        let t = funded().await;
        t.service.provision_wallet("alice", &cancel()).await.unwrap();
        t.ledger.confirm_after_polls(10_000);

        let err = t
            .service
            .send_transfer("alice", "0.0.999", &Amount::from("1"), "native", None, &cancel())
            .await
            .unwrap_err();
        let EngineError::Network {
            transaction_id: Some(id),
            ..
        } = err
        else {
            panic!("expected ambiguous outcome, got {err:?}");
        };
        let logged = t.store.get_transfer(&id).await.unwrap().unwrap();
        assert_eq!(logged.state, TransferState::Unconfirmed);

        t.ledger.confirm_after_polls(1);
        let result = t.service.transfer_status("alice", &id).await.unwrap();
        assert_eq!(result.status, TransactionStatus::Succeeded);
        let logged = t.store.get_transfer(&id).await.unwrap().unwrap();
        assert_eq!(logged.state, TransferState::Succeeded);

        // Another user cannot see it.
        let err = t.service.transfer_status("mallory", &id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn unaccepted_transfer_settles_as_expired() {
        let t = funded().await;
        let wallet = t.service.provision_wallet("alice", &cancel()).await.unwrap();
        let sender = wallet.account_id.unwrap();

        t.ledger.fail_next_submissions(100);
        let err = t
            .service
            .send_transfer("alice", "0.0.999", &Amount::from("1"), "native", None, &cancel())
            .await
            .unwrap_err();
        let EngineError::Network {
            transaction_id: Some(id),
            ..
        } = err
        else {
            panic!("expected ambiguous outcome, got {err:?}");
        };
        t.ledger.fail_next_submissions(0);

        // Still inside the validity window: not decided yet.
        let err = t.service.transfer_status("alice", &id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);

        // The same situation once the window has long closed.
        let mut logged = t.store.get_transfer(&id).await.unwrap().unwrap();
        let stale = TransactionId::new(sender, Utc::now() - chrono::Duration::minutes(10));
        logged.transaction_id = stale;
        t.store.record_transfer(&logged).await.unwrap();

        let result = t.service.transfer_status("alice", &stale).await.unwrap();
        assert_eq!(result.status, TransactionStatus::Failed);
        assert_eq!(result.failure_reason.as_deref(), Some("transaction expired"));
        let settled = t.store.get_transfer(&stale).await.unwrap().unwrap();
        assert_eq!(settled.state, TransferState::Failed);

        // Terminal from here on, without asking the ledger again.
        let calls = t.ledger.network_calls();
        let again = t.service.transfer_status("alice", &stale).await.unwrap();
        assert_eq!(again.status, TransactionStatus::Failed);
        assert_eq!(t.ledger.network_calls(), calls);
    }

    #[tokio::test]
    async fn alias_wallet_is_promoted_by_incoming_transfer() {
        let t = alias_only().await;
        let wallet = t.service.provision_wallet("alice", &cancel()).await.unwrap();
        assert!(wallet.account_id.is_none());

        // Nothing on the ledger yet: zero balance, transfers refused.
        let empty = t.service.get_balance("alice").await.unwrap();
        assert_eq!(empty.account, None);
        assert_eq!(empty.native_tinybars(), 0);
        let err = t
            .service
            .send_transfer("alice", "0.0.999", &Amount::from("1"), "native", None, &cancel())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        // Someone sends HBAR to the alias: the ledger creates a hollow account.
        let funder_key = KeyMaterial::generate();
        let funder = t.ledger.create_account(&funder_key.public_key(), 100 * HBAR);
        let funder_signer = crate::signer::LocalSigner::new(funder_key, Some(funder));
        let engine = TransactionEngine::new(t.ledger.clone(), engine_config());
        let built = engine
            .build_transfer(&TransferRequest {
                sender: funder,
                recipient: AccountRef::Alias(wallet.alias.clone()),
                asset: AssetKind::Native,
                amount: 10 * HBAR,
                memo: None,
            })
            .unwrap();
        engine.execute(built, &funder_signer, &cancel()).await.unwrap();

        let balance = t.service.get_balance("alice").await.unwrap();
        let account = balance.account.expect("alias promoted");
        assert_eq!(balance.native_tinybars(), 10 * HBAR);
        assert_eq!(
            t.service.get_wallet("alice").await.unwrap().account_id,
            Some(account)
        );

        // The first signed transfer completes the hollow account.
        let result = t
            .service
            .send_transfer("alice", "0.0.999", &Amount::from("1"), "native", None, &cancel())
            .await
            .unwrap();
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn token_transfer_uses_registered_decimals() {
        let t = funded().await;
        let wallet = t.service.provision_wallet("alice", &cancel()).await.unwrap();
        let account = wallet.account_id.unwrap();
        t.ledger.associate_token(account, USDC_TESTNET_TOKEN, 10_000_000);
        t.ledger
            .associate_token(AccountId::new(0, 0, 999), USDC_TESTNET_TOKEN, 0);

        let result = t
            .service
            .send_transfer("alice", "0.0.999", &Amount::from("2.5"), "usdc", None, &cancel())
            .await
            .unwrap();
        assert!(result.is_success());

        let balance = t.service.get_balance("alice").await.unwrap();
        let usdc = balance.tokens.iter().find(|b| b.symbol == "USDC").unwrap();
        assert_eq!(usdc.amount, 7_500_000);
        assert_eq!(usdc.formatted, "7.5");
    }

    #[tokio::test]
    async fn staged_transfer_flow() {
        let t = funded().await;
        t.service.provision_wallet("alice", &cancel()).await.unwrap();

        let err = t
            .service
            .confirm_staged_transfer("alice", &Amount::from("1"), &cancel())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let pending = t
            .service
            .stage_transfer("alice", "0.0.999", "native")
            .await
            .unwrap();
        assert_eq!(pending.recipient, AccountRef::Id(AccountId::new(0, 0, 999)));
        assert_eq!(t.service.pending_transfer("alice"), Some(pending));
        assert!(t.service.pending_transfer("bob").is_none());

        let result = t
            .service
            .confirm_staged_transfer("alice", &Amount::from("2"), &cancel())
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(t.ledger.native_balance(AccountId::new(0, 0, 999)), Some(2 * HBAR));

        // Consumed.
        assert!(t.service.pending_transfer("alice").is_none());
    }

    #[tokio::test]
    async fn custody_outage_during_transfer_keeps_custody_kind() {
        let t = funded().await;
        t.service.provision_wallet("alice", &cancel()).await.unwrap();
        t.custody.hang.store(true, Ordering::SeqCst);

        let err = t
            .service
            .send_transfer("alice", "0.0.999", &Amount::from("1"), "native", None, &cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Custody(CustodyError::Timeout(_))));
        // Only the account creation reached the ledger.
        assert_eq!(t.ledger.processed_transactions().len(), 1);
    }

    #[tokio::test]
    async fn every_transfer_decrypts_afresh() {
        let t = funded().await;
        t.service.provision_wallet("alice", &cancel()).await.unwrap();
        let before = t.custody.decrypts.load(Ordering::SeqCst);

        for _ in 0..2 {
            t.service
                .send_transfer("alice", "0.0.999", &Amount::from("1"), "native", None, &cancel())
                .await
                .unwrap();
        }
        assert_eq!(t.custody.decrypts.load(Ordering::SeqCst), before + 2);
    }

    #[tokio::test]
    async fn dependency_probe_reports_unreachable_ledger() {
        let t = alias_only().await;
        let healthy = t.service.check_dependencies().await;
        assert!(healthy.storage);
        assert!(healthy.ledger);

        t.ledger.fail_next_reads(1);
        let degraded = t.service.check_dependencies().await;
        assert!(degraded.storage);
        assert!(!degraded.ledger);
    }

    #[tokio::test]
    async fn control_characters_are_not_user_ids() {
        let t = alias_only().await;
        let err = t.service.get_wallet("bob\n").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
