// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Assemble the service from a [`ServiceConfig`].

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::auth::ServiceToken;
use crate::balance::TokenRegistry;
use crate::config::{
    ConfigError, EnvelopeBackend, LedgerBackend, OperatorSigner, ProvisioningSettings,
    ServiceConfig,
};
use crate::conversation::ConversationState;
use crate::custody::{
    CustodyError, EncryptionContext, EnvelopeService, KeyCustody, KmsClient, LocalRootKey,
    RemoteKeyService,
};
use crate::engine::TransactionEngine;
use crate::ledger::{AccountId, HttpLedger, LedgerError, LedgerNetwork};
use crate::provisioning::{OperatorConfig, ProvisioningMode, Provisioner};
use crate::service::{ServiceParts, WalletService};
use crate::signer::{KeyMaterial, KeySource, SignerFactory, SigningError};
use crate::state::AppState;
use crate::storage::{RedbWalletStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Custody(#[from] CustodyError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Key(#[from] SigningError),

    #[error("cannot create data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to initialise the service token")]
    Token,
}

/// Custody handles shared by the envelope service and the signer factory.
struct Custody {
    envelope: EnvelopeService,
    remote: Option<Arc<dyn RemoteKeyService>>,
}

fn build_custody(config: &ServiceConfig) -> Result<Custody, StartupError> {
    let kms = config
        .kms
        .clone()
        .map(KmsClient::new)
        .transpose()?
        .map(Arc::new);

    let root: Arc<dyn KeyCustody> = match &config.envelope {
        EnvelopeBackend::Kms => match &kms {
            Some(client) => client.clone(),
            None => {
                return Err(CustodyError::Config("KMS envelope backend without KMS settings".into()).into())
            }
        },
        EnvelopeBackend::Local { root_key_hex } => {
            warn!("using a local envelope root key; not for production");
            Arc::new(LocalRootKey::from_hex(root_key_hex)?)
        }
    };

    Ok(Custody {
        envelope: EnvelopeService::new(root, config.custody_timeout),
        remote: kms.map(|client| client as Arc<dyn RemoteKeyService>),
    })
}

fn build_ledger(config: &ServiceConfig) -> Result<Arc<dyn LedgerNetwork>, StartupError> {
    match &config.ledger {
        LedgerBackend::Http { gateway_url } => Ok(Arc::new(HttpLedger::new(
            config.network.clone(),
            config.mirror_url.clone(),
            gateway_url.clone(),
            config.read_timeout,
        )?)),
        #[cfg(any(test, feature = "dev"))]
        LedgerBackend::Simulated => {
            warn!("using the in-memory simulated ledger");
            Ok(Arc::new(crate::ledger::SimulatedLedger::new()))
        }
        #[cfg(not(any(test, feature = "dev")))]
        LedgerBackend::Simulated => Err(ConfigError::Invalid {
            name: crate::config::LEDGER_BACKEND_ENV,
            reason: "the simulated ledger needs a build with the `dev` feature".to_string(),
        }
        .into()),
    }
}

fn provisioning_mode(config: &ServiceConfig) -> ProvisioningMode {
    match &config.provisioning {
        ProvisioningSettings::Alias => ProvisioningMode::Alias,
        ProvisioningSettings::Funded {
            operator,
            initial_balance,
        } => {
            let key = match &operator.signer {
                OperatorSigner::Local { encrypted_key } => KeySource::Envelope {
                    ciphertext: encrypted_key.clone(),
                    context: EncryptionContext::operator(&operator.account_id.to_string()),
                },
                OperatorSigner::Kms { key_id, public_key } => KeySource::Remote {
                    key_id: key_id.clone(),
                    public_key: public_key.clone(),
                },
            };
            ProvisioningMode::Funded {
                operator: OperatorConfig {
                    account_id: operator.account_id,
                    key,
                },
                initial_balance: *initial_balance,
            }
        }
    }
}

pub fn build_service(config: &ServiceConfig) -> Result<WalletService, StartupError> {
    std::fs::create_dir_all(&config.data_dir).map_err(|source| StartupError::DataDir {
        path: config.data_dir.clone(),
        source,
    })?;
    let store = Arc::new(RedbWalletStore::open(&config.database_path())?);

    let custody = build_custody(config)?;
    let ledger = build_ledger(config)?;
    let signers = SignerFactory::new(
        custody.envelope.clone(),
        custody.remote,
        config.custody_timeout,
    );
    let mode = provisioning_mode(config);
    info!(
        network = config.network.name,
        mode = mode.name(),
        custodial = config.custodial,
        "wallet service configured"
    );

    let provisioner = Provisioner::new(
        store.clone(),
        custody.envelope,
        signers.clone(),
        TransactionEngine::new(ledger.clone(), config.engine.clone()),
        mode,
        config.custodial,
    );

    Ok(WalletService::new(ServiceParts {
        store,
        ledger,
        signers,
        provisioner,
        engine: config.engine.clone(),
        read_timeout: config.read_timeout,
        tokens: TokenRegistry::new(config.tokens.clone()),
        conversations: ConversationState::new(config.pending_capacity, config.pending_ttl),
    }))
}

pub fn build_state(config: &ServiceConfig) -> Result<AppState, StartupError> {
    let service = build_service(config)?;
    let token = match &config.service_token {
        Some(token) => Some(ServiceToken::new(token).map_err(|_| StartupError::Token)?),
        None => {
            warn!("SERVICE_TOKEN not set; the API is unauthenticated");
            None
        }
    };
    Ok(AppState::new(Arc::new(service), token))
}

/// Envelope-encrypt an operator private key (hex scalar or PEM) under the
/// operator encryption context, producing the `OPERATOR_ENCRYPTED_KEY` value.
pub async fn seal_operator_key(
    config: &ServiceConfig,
    account_id: AccountId,
    secret: &str,
) -> Result<String, StartupError> {
    let secret = secret.trim();
    let bytes = match alloy::hex::decode(secret.strip_prefix("0x").unwrap_or(secret)) {
        Ok(raw) => Zeroizing::new(raw),
        Err(_) => Zeroizing::new(secret.as_bytes().to_vec()),
    };
    let key = KeyMaterial::from_key_bytes(&bytes)?;
    let custody = build_custody(config)?;
    let context = EncryptionContext::operator(&account_id.to_string());
    Ok(custody.envelope.encrypt(key.secret_bytes(), &context).await?)
}
