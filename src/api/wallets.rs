// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet provisioning and lookup.
//!
//! One wallet per user. Provisioning is not idempotent: a second call for
//! the same user answers 409 and leaves the first wallet untouched. The
//! exception is a funded-mode wallet still without an account, where the
//! second call finishes the account creation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::{auth::ServiceAuth, error::ApiError, models::WalletView, state::AppState};

/// Provision a wallet for a user.
///
/// Generates a secp256k1 key, stores it envelope-encrypted and, in funded
/// mode, creates and funds a ledger account from the operator account.
#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/wallet",
    tag = "Wallets",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Chat user id")),
    responses(
        (status = 201, description = "Wallet provisioned", body = WalletView),
        (status = 401, description = "Unauthorized", body = crate::error::ErrorBody),
        (status = 409, description = "User already has a wallet", body = crate::error::ErrorBody),
        (status = 502, description = "Ledger rejected the account creation", body = crate::error::ErrorBody),
        (status = 503, description = "Ledger unavailable during account creation", body = crate::error::ErrorBody)
    )
)]
pub async fn provision_wallet(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<(StatusCode, Json<WalletView>), ApiError> {
    let cancel = state.operation_token();
    let wallet = state.service.provision_wallet(&user_id, &cancel).await?;
    Ok((StatusCode::CREATED, Json(wallet)))
}

/// Get a user's wallet.
#[utoipa::path(
    get,
    path = "/v1/users/{user_id}/wallet",
    tag = "Wallets",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Chat user id")),
    responses(
        (status = 200, description = "Wallet found", body = WalletView),
        (status = 401, description = "Unauthorized", body = crate::error::ErrorBody),
        (status = 404, description = "No wallet for this user", body = crate::error::ErrorBody)
    )
)]
pub async fn get_wallet(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<WalletView>, ApiError> {
    Ok(Json(state.service.get_wallet(&user_id).await?))
}
