// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account provisioning.
//!
//! ## Order of operations
//!
//! 1. Generate a secp256k1 key pair.
//! 2. If custodial, encrypt the private key through the envelope service.
//!    Failure aborts before anything is written.
//! 3. Conditionally insert the Wallet record. A concurrent duplicate loses
//!    here with a conflict and its key material is dropped (zeroized).
//! 4. Funded mode only: the operator pays for an account-creation
//!    transaction and the resulting account id is attached to the wallet.
//!
//! Persisting before touching the ledger means two racing requests can never
//! both spend operator funds. If step 4 fails, the wallet keeps its alias.
//! Provisioning the same user again in funded mode resumes step 4: an
//! account the ledger already bound to the alias is attached, otherwise a
//! new account-creation transaction is submitted.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::custody::{EncryptionContext, EnvelopeService};
use crate::engine::TransactionEngine;
use crate::error::EngineError;
use crate::ledger::AccountId;
use crate::signer::{KeyMaterial, KeySource, PublicKey, SignerFactory};
use crate::storage::{NewWallet, Wallet, WalletStore};

/// Privileged identity that pays for account creation.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub account_id: AccountId,
    pub key: KeySource,
}

#[derive(Debug, Clone)]
pub enum ProvisioningMode {
    /// Derive an address alias; the ledger creates the account on first
    /// incoming transfer.
    Alias,
    /// The operator creates and funds the account up front.
    Funded {
        operator: OperatorConfig,
        initial_balance: u64,
    },
}

impl ProvisioningMode {
    pub fn name(&self) -> &'static str {
        match self {
            ProvisioningMode::Alias => "alias",
            ProvisioningMode::Funded { .. } => "funded",
        }
    }
}

#[derive(Clone)]
pub struct Provisioner {
    store: Arc<dyn WalletStore>,
    envelope: EnvelopeService,
    signers: SignerFactory,
    engine: TransactionEngine,
    mode: ProvisioningMode,
    custodial: bool,
    /// Users with a funded-mode provisioning in flight.
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Held for the duration of one funded-mode provisioning of a user.
struct ProvisioningClaim {
    in_flight: Arc<Mutex<HashSet<String>>>,
    user_id: String,
}

impl Drop for ProvisioningClaim {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.user_id);
    }
}

impl Provisioner {
    pub fn new(
        store: Arc<dyn WalletStore>,
        envelope: EnvelopeService,
        signers: SignerFactory,
        engine: TransactionEngine,
        mode: ProvisioningMode,
        custodial: bool,
    ) -> Self {
        Self {
            store,
            envelope,
            signers,
            engine,
            mode,
            custodial,
            in_flight: Arc::default(),
        }
    }

    pub fn mode(&self) -> &ProvisioningMode {
        &self.mode
    }

    #[instrument(skip(self, cancel), fields(mode = self.mode.name()))]
    pub async fn provision(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Wallet, EngineError> {
        let _claim = match self.mode {
            ProvisioningMode::Alias => None,
            ProvisioningMode::Funded { .. } => Some(self.claim(user_id).ok_or_else(|| {
                EngineError::Conflict(format!("provisioning of user {user_id} is in progress"))
            })?),
        };

        if let Some(existing) = self.store.find_by_user(user_id).await? {
            return match (&self.mode, existing.account_id) {
                (ProvisioningMode::Funded { .. }, None) => self.resume(existing, cancel).await,
                _ => Err(EngineError::Conflict(format!(
                    "user {user_id} already has a wallet"
                ))),
            };
        }

        let key = KeyMaterial::generate();
        let public_key = key.public_key();

        let encrypted_private_key = if self.custodial {
            let context = EncryptionContext::user_wallet(user_id);
            Some(self.envelope.encrypt(key.secret_bytes(), &context).await?)
        } else {
            None
        };
        drop(key);

        let wallet = self
            .store
            .create_if_absent(
                user_id,
                NewWallet {
                    public_key: public_key.to_der_hex(),
                    alias: public_key.evm_alias(),
                    encrypted_private_key,
                },
            )
            .await?;
        info!(wallet_id = %wallet.wallet_id, alias = %wallet.alias, "wallet created");

        self.create_account(wallet, &public_key, cancel).await
    }

    /// Finish funded-mode provisioning of a wallet left without an account.
    async fn resume(&self, wallet: Wallet, cancel: &CancellationToken) -> Result<Wallet, EngineError> {
        // An earlier attempt with an ambiguous outcome may have landed.
        if let Some(account_id) = self.engine.lookup_alias(&wallet.alias).await? {
            info!(wallet_id = %wallet.wallet_id, %account_id, "account found by alias");
            return self.attach(wallet, account_id).await;
        }

        let public_key =
            PublicKey::from_der_hex(&wallet.public_key).map_err(EngineError::Signing)?;
        info!(wallet_id = %wallet.wallet_id, "resuming account creation");
        self.create_account(wallet, &public_key, cancel).await
    }

    fn claim(&self, user_id: &str) -> Option<ProvisioningClaim> {
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id.to_string());
        inserted.then(|| ProvisioningClaim {
            in_flight: self.in_flight.clone(),
            user_id: user_id.to_string(),
        })
    }

    /// Operator-paid account creation for `wallet`. Alias mode returns the
    /// wallet unchanged.
    async fn create_account(
        &self,
        wallet: Wallet,
        public_key: &PublicKey,
        cancel: &CancellationToken,
    ) -> Result<Wallet, EngineError> {
        let ProvisioningMode::Funded {
            operator,
            initial_balance,
        } = &self.mode
        else {
            return Ok(wallet);
        };

        let signer = self
            .signers
            .resolve(&operator.key, Some(operator.account_id))
            .await
            .map_err(EngineError::from_signer_resolution)?;
        let built =
            self.engine
                .build_account_create(operator.account_id, public_key, *initial_balance)?;
        let result = self.engine.execute(built, signer.as_ref(), cancel).await?;

        let account_id = match (result.is_success(), result.account_id) {
            (true, Some(account_id)) => account_id,
            (true, None) => {
                return Err(EngineError::Network {
                    reason: "account creation receipt carried no account id".to_string(),
                    transaction_id: Some(result.transaction_id),
                    explorer_url: Some(result.explorer_url),
                })
            }
            (false, _) => {
                let reason = result.failure_reason.unwrap_or_default();
                warn!(
                    wallet_id = %wallet.wallet_id,
                    transaction_id = %result.transaction_id,
                    %reason,
                    "account creation rejected"
                );
                return Err(EngineError::Rejected {
                    reason,
                    transaction_id: result.transaction_id,
                    explorer_url: result.explorer_url,
                });
            }
        };

        info!(
            wallet_id = %wallet.wallet_id,
            %account_id,
            transaction_id = %result.transaction_id,
            "ledger account created"
        );
        self.attach(wallet, account_id).await
    }

    async fn attach(&self, wallet: Wallet, account_id: AccountId) -> Result<Wallet, EngineError> {
        Ok(self
            .store
            .attach_account_identity(wallet.wallet_id, account_id)
            .await?)
    }
}
