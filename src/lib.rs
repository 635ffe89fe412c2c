// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Custody - Custodial Key Management & Ledger Transaction Engine
//!
//! Backs the chat wallet assistant: every chat user gets a secp256k1 wallet
//! whose private key is envelope-encrypted under a KMS (or local) root key,
//! and value transfers are built, signed and submitted to a hashgraph-style
//! ledger with bounded retries and honest reporting of unknown outcomes.
//!
//! ## Modules
//!
//! - `custody` - Envelope encryption and the KMS client
//! - `signer` - Local and remote signers behind one trait
//! - `ledger` - Ledger identifiers, transaction bodies and network adapters
//! - `engine` - Build, sign, submit and confirm transactions
//! - `provisioning` - Wallet creation in alias or funded mode
//! - `service` - Command API used by the chat transport
//! - `storage` - Wallet and transfer persistence (redb)
//! - `api` - HTTP API handlers (Axum)

pub mod api;
pub mod auth;
pub mod balance;
pub mod bootstrap;
pub mod config;
pub mod conversation;
pub mod custody;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod models;
pub mod provisioning;
pub mod service;
pub mod signer;
pub mod state;
pub mod storage;
