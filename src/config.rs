// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the [`ServiceConfig`] parsed
//! from them once at startup. Invalid or missing required values fail
//! startup with a [`ConfigError`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding the wallet database | `/data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `SERVICE_TOKEN` | Bearer token required from the chat transport | Optional |
//! | `LEDGER_NETWORK` | `testnet`, `previewnet` or `mainnet` | `testnet` |
//! | `LEDGER_BACKEND` | `http` or `simulated` (`dev` builds only) | `http` |
//! | `MIRROR_NODE_URL` | Mirror node REST base URL | Network default |
//! | `LEDGER_GATEWAY_URL` | Transaction submission gateway | Required for `http` |
//! | `PROVISIONING_MODE` | `alias` or `funded` | `alias` |
//! | `INITIAL_BALANCE_TINYBARS` | Funding for new accounts in `funded` mode | `100000000` |
//! | `CUSTODIAL_KEYS` | Keep envelope-encrypted user keys | `true` |
//! | `ENVELOPE_BACKEND` | `kms` or `local` | `kms` |
//! | `ENVELOPE_ROOT_KEY` | Hex AES-256 root key for the `local` backend | Required for `local` |
//! | `KMS_REGION` | AWS region of the KMS keys | Required for KMS |
//! | `KMS_ENDPOINT` | KMS endpoint override | Regional endpoint |
//! | `KMS_USER_KEY_ID` | KMS key wrapping user private keys | Required for `kms` |
//! | `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN` | KMS credentials | Required for KMS |
//! | `OPERATOR_ACCOUNT_ID` | Operator account paying for account creation | Required for `funded` |
//! | `OPERATOR_SIGNER` | `local` (encrypted key) or `kms` (remote key) | `local` |
//! | `OPERATOR_ENCRYPTED_KEY` | Envelope ciphertext of the operator key | Required for `local` operator |
//! | `OPERATOR_KMS_KEY_ID` | KMS asymmetric key id of the operator | Required for `kms` operator |
//! | `OPERATOR_PUBLIC_KEY` | DER hex public key of the KMS operator key | Required for `kms` operator |
//! | `SUBMIT_MAX_ATTEMPTS` | Submit attempts before giving up | `5` |
//! | `SUBMIT_TIMEOUT_SECS` | Bound on each submit call | `10` |
//! | `CONFIRM_TIMEOUT_SECS` | Wait for a receipt after submission | `30` |
//! | `CUSTODY_TIMEOUT_SECS` | Bound on encrypt, decrypt and remote sign | `10` |
//! | `PENDING_TRANSFER_TTL_SECS` | Lifetime of a staged transfer | `300` |
//! | `USDC_TOKEN_ID` | Override the USDC token id | Network default |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;
use zeroize::Zeroizing;

use crate::conversation::{DEFAULT_PENDING_CAPACITY, DEFAULT_PENDING_TTL};
use crate::custody::sigv4::Credentials;
use crate::custody::KmsConfig;
use crate::engine::{EngineConfig, RetryPolicy};
use crate::ledger::types::{TokenInfo, USDC_MAINNET_TOKEN, USDC_TESTNET_TOKEN};
use crate::ledger::{AccountId, NetworkConfig, TokenId};
use crate::signer::PublicKey;

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const SERVICE_TOKEN_ENV: &str = "SERVICE_TOKEN";

pub const LEDGER_NETWORK_ENV: &str = "LEDGER_NETWORK";
pub const LEDGER_BACKEND_ENV: &str = "LEDGER_BACKEND";
pub const MIRROR_NODE_URL_ENV: &str = "MIRROR_NODE_URL";
pub const LEDGER_GATEWAY_URL_ENV: &str = "LEDGER_GATEWAY_URL";

pub const PROVISIONING_MODE_ENV: &str = "PROVISIONING_MODE";
pub const INITIAL_BALANCE_ENV: &str = "INITIAL_BALANCE_TINYBARS";
pub const CUSTODIAL_KEYS_ENV: &str = "CUSTODIAL_KEYS";

pub const ENVELOPE_BACKEND_ENV: &str = "ENVELOPE_BACKEND";
/// Hex-encoded 32-byte key. Development and single-host deployments only.
pub const ENVELOPE_ROOT_KEY_ENV: &str = "ENVELOPE_ROOT_KEY";

pub const KMS_REGION_ENV: &str = "KMS_REGION";
pub const KMS_ENDPOINT_ENV: &str = "KMS_ENDPOINT";
pub const KMS_USER_KEY_ID_ENV: &str = "KMS_USER_KEY_ID";
pub const AWS_ACCESS_KEY_ID_ENV: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_SESSION_TOKEN_ENV: &str = "AWS_SESSION_TOKEN";

pub const OPERATOR_ACCOUNT_ID_ENV: &str = "OPERATOR_ACCOUNT_ID";
pub const OPERATOR_SIGNER_ENV: &str = "OPERATOR_SIGNER";
pub const OPERATOR_ENCRYPTED_KEY_ENV: &str = "OPERATOR_ENCRYPTED_KEY";
pub const OPERATOR_KMS_KEY_ID_ENV: &str = "OPERATOR_KMS_KEY_ID";
pub const OPERATOR_PUBLIC_KEY_ENV: &str = "OPERATOR_PUBLIC_KEY";

pub const SUBMIT_MAX_ATTEMPTS_ENV: &str = "SUBMIT_MAX_ATTEMPTS";
pub const SUBMIT_TIMEOUT_SECS_ENV: &str = "SUBMIT_TIMEOUT_SECS";
pub const CONFIRM_TIMEOUT_SECS_ENV: &str = "CONFIRM_TIMEOUT_SECS";
pub const CUSTODY_TIMEOUT_SECS_ENV: &str = "CUSTODY_TIMEOUT_SECS";
pub const PENDING_TRANSFER_TTL_SECS_ENV: &str = "PENDING_TRANSFER_TTL_SECS";
pub const USDC_TOKEN_ID_ENV: &str = "USDC_TOKEN_ID";

pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

/// 1 HBAR.
pub const DEFAULT_INITIAL_BALANCE: u64 = 100_000_000;

/// Name of the wallet database file inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "custody.redb";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

fn invalid(name: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerBackend {
    Http { gateway_url: String },
    /// In-memory ledger. Only honored by `dev` builds.
    Simulated,
}

#[derive(Clone)]
pub enum EnvelopeBackend {
    Kms,
    Local { root_key_hex: Zeroizing<String> },
}

impl std::fmt::Debug for EnvelopeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeBackend::Kms => f.write_str("Kms"),
            EnvelopeBackend::Local { .. } => f.debug_struct("Local").finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum OperatorSigner {
    /// Envelope-encrypted key, decrypted for each account creation.
    Local { encrypted_key: String },
    /// Asymmetric KMS key; the private half never leaves KMS.
    Kms { key_id: String, public_key: PublicKey },
}

#[derive(Debug, Clone)]
pub struct OperatorSettings {
    pub account_id: AccountId,
    pub signer: OperatorSigner,
}

#[derive(Debug, Clone)]
pub enum ProvisioningSettings {
    Alias,
    Funded {
        operator: OperatorSettings,
        initial_balance: u64,
    },
}

/// Fully parsed service configuration.
#[derive(Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub log_format: LogFormat,
    pub service_token: Option<Zeroizing<String>>,
    pub network: NetworkConfig,
    pub mirror_url: Option<String>,
    pub ledger: LedgerBackend,
    pub provisioning: ProvisioningSettings,
    pub custodial: bool,
    pub envelope: EnvelopeBackend,
    /// Present whenever a KMS backend or KMS operator is configured.
    pub kms: Option<KmsConfig>,
    pub engine: EngineConfig,
    pub custody_timeout: Duration,
    pub read_timeout: Duration,
    pub pending_ttl: Duration,
    pub pending_capacity: usize,
    pub tokens: Vec<TokenInfo>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Parse from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let host = env.or(HOST_ENV, DEFAULT_HOST);
        let port: u16 = env.parse_or(PORT_ENV, DEFAULT_PORT)?;
        let bind_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| invalid(HOST_ENV, e))?;

        let log_format = match env.or(LOG_FORMAT_ENV, "pretty").to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" | "text" => LogFormat::Pretty,
            other => return Err(invalid(LOG_FORMAT_ENV, format!("unknown format '{other}'"))),
        };

        let network_name = env.or(LEDGER_NETWORK_ENV, "testnet");
        let network = NetworkConfig::by_name(&network_name)
            .ok_or_else(|| invalid(LEDGER_NETWORK_ENV, format!("unknown network '{network_name}'")))?;
        let mirror_url = env.get(MIRROR_NODE_URL_ENV).map(|u| env.url(MIRROR_NODE_URL_ENV, u)).transpose()?;

        let ledger = match env.or(LEDGER_BACKEND_ENV, "http").to_ascii_lowercase().as_str() {
            "http" => {
                let gateway = env.require(LEDGER_GATEWAY_URL_ENV)?;
                LedgerBackend::Http {
                    gateway_url: env.url(LEDGER_GATEWAY_URL_ENV, gateway)?,
                }
            }
            "simulated" => LedgerBackend::Simulated,
            other => return Err(invalid(LEDGER_BACKEND_ENV, format!("unknown backend '{other}'"))),
        };

        let envelope = match env.or(ENVELOPE_BACKEND_ENV, "kms").to_ascii_lowercase().as_str() {
            "kms" => EnvelopeBackend::Kms,
            "local" => EnvelopeBackend::Local {
                root_key_hex: Zeroizing::new(env.require(ENVELOPE_ROOT_KEY_ENV)?),
            },
            other => return Err(invalid(ENVELOPE_BACKEND_ENV, format!("unknown backend '{other}'"))),
        };

        let provisioning = match env.or(PROVISIONING_MODE_ENV, "alias").to_ascii_lowercase().as_str() {
            "alias" => ProvisioningSettings::Alias,
            "funded" => ProvisioningSettings::Funded {
                operator: parse_operator(&env)?,
                initial_balance: env.parse_or(INITIAL_BALANCE_ENV, DEFAULT_INITIAL_BALANCE)?,
            },
            other => {
                return Err(invalid(PROVISIONING_MODE_ENV, format!("unknown mode '{other}'")))
            }
        };

        let custody_timeout = Duration::from_secs(env.parse_or(CUSTODY_TIMEOUT_SECS_ENV, 10)?);
        let kms_needed = matches!(envelope, EnvelopeBackend::Kms)
            || matches!(
                &provisioning,
                ProvisioningSettings::Funded {
                    operator: OperatorSettings {
                        signer: OperatorSigner::Kms { .. },
                        ..
                    },
                    ..
                }
            );
        let kms = if kms_needed {
            Some(parse_kms(&env, &envelope, custody_timeout)?)
        } else {
            None
        };

        let max_attempts: u32 = env.parse_or(SUBMIT_MAX_ATTEMPTS_ENV, 5)?;
        if max_attempts == 0 {
            return Err(invalid(SUBMIT_MAX_ATTEMPTS_ENV, "must be at least 1"));
        }
        let submit_timeout = Duration::from_secs(env.parse_or(SUBMIT_TIMEOUT_SECS_ENV, 10)?);
        let engine = EngineConfig {
            retry: RetryPolicy {
                max_attempts,
                ..RetryPolicy::default()
            },
            sign_timeout: custody_timeout,
            submit_timeout,
            confirm_timeout: Duration::from_secs(env.parse_or(CONFIRM_TIMEOUT_SECS_ENV, 30)?),
            ..EngineConfig::default()
        };

        let usdc_default = if network.name == "mainnet" {
            USDC_MAINNET_TOKEN
        } else {
            USDC_TESTNET_TOKEN
        };
        let usdc: TokenId = env.parse_or(USDC_TOKEN_ID_ENV, usdc_default)?;

        Ok(Self {
            bind_addr,
            data_dir: PathBuf::from(env.or(DATA_DIR_ENV, DEFAULT_DATA_DIR)),
            log_format,
            service_token: env
                .get(SERVICE_TOKEN_ENV)
                .filter(|t| !t.is_empty())
                .map(Zeroizing::new),
            network,
            mirror_url,
            ledger,
            provisioning,
            custodial: env.parse_bool_or(CUSTODIAL_KEYS_ENV, true)?,
            envelope,
            kms,
            engine,
            custody_timeout,
            read_timeout: submit_timeout,
            pending_ttl: Duration::from_secs(
                env.parse_or(PENDING_TRANSFER_TTL_SECS_ENV, DEFAULT_PENDING_TTL.as_secs())?,
            ),
            pending_capacity: DEFAULT_PENDING_CAPACITY,
            tokens: vec![TokenInfo {
                token_id: usdc,
                symbol: "USDC".to_string(),
                decimals: 6,
            }],
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("bind_addr", &self.bind_addr)
            .field("data_dir", &self.data_dir)
            .field("network", &self.network.name)
            .field("ledger", &self.ledger)
            .field("provisioning", &self.provisioning)
            .field("custodial", &self.custodial)
            .field("envelope", &self.envelope)
            .field("service_token", &self.service_token.is_some())
            .finish_non_exhaustive()
    }
}

fn parse_operator<F>(env: &Env<F>) -> Result<OperatorSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let account_id: AccountId = env
        .require(OPERATOR_ACCOUNT_ID_ENV)?
        .parse()
        .map_err(|e| invalid(OPERATOR_ACCOUNT_ID_ENV, e))?;

    let signer = match env.or(OPERATOR_SIGNER_ENV, "local").to_ascii_lowercase().as_str() {
        "local" => OperatorSigner::Local {
            encrypted_key: env.require(OPERATOR_ENCRYPTED_KEY_ENV)?,
        },
        "kms" => OperatorSigner::Kms {
            key_id: env.require(OPERATOR_KMS_KEY_ID_ENV)?,
            public_key: PublicKey::from_der_hex(&env.require(OPERATOR_PUBLIC_KEY_ENV)?)
                .map_err(|e| invalid(OPERATOR_PUBLIC_KEY_ENV, e))?,
        },
        other => return Err(invalid(OPERATOR_SIGNER_ENV, format!("unknown signer '{other}'"))),
    };

    Ok(OperatorSettings { account_id, signer })
}

fn parse_kms<F>(
    env: &Env<F>,
    envelope: &EnvelopeBackend,
    request_timeout: Duration,
) -> Result<KmsConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let endpoint = env
        .get(KMS_ENDPOINT_ENV)
        .map(|raw| Url::parse(&raw).map_err(|e| invalid(KMS_ENDPOINT_ENV, e)))
        .transpose()?;
    let encryption_key_id = match envelope {
        EnvelopeBackend::Kms => Some(env.require(KMS_USER_KEY_ID_ENV)?),
        EnvelopeBackend::Local { .. } => env.get(KMS_USER_KEY_ID_ENV),
    };

    Ok(KmsConfig {
        region: env.require(KMS_REGION_ENV)?,
        endpoint,
        credentials: Credentials {
            access_key_id: env.require(AWS_ACCESS_KEY_ID_ENV)?,
            secret_access_key: env.require(AWS_SECRET_ACCESS_KEY_ENV)?,
            session_token: env.get(AWS_SESSION_TOKEN_ENV),
        },
        encryption_key_id,
        request_timeout,
    })
}

/// Variable source with typed accessors.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn require(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn parse_or<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            Some(raw) => raw.parse().map_err(|e| invalid(name, e)),
            None => Ok(default),
        }
    }

    fn parse_bool_or(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(invalid(name, format!("expected a boolean, got '{other}'"))),
        }
    }

    fn url(&self, name: &'static str, raw: String) -> Result<String, ConfigError> {
        Url::parse(&raw).map_err(|e| invalid(name, e))?;
        Ok(raw.trim_end_matches('/').to_string())
    }
}
