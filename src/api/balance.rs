// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Balance query endpoint.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{auth::ServiceAuth, balance::BalanceView, error::ApiError, state::AppState};

/// Get the native and token balances of a user's wallet.
///
/// A wallet whose alias has not received funds yet reports zero balances and
/// no account id.
#[utoipa::path(
    get,
    path = "/v1/users/{user_id}/balance",
    tag = "Wallets",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Chat user id")),
    responses(
        (status = 200, description = "Balance retrieved", body = BalanceView),
        (status = 401, description = "Unauthorized", body = crate::error::ErrorBody),
        (status = 404, description = "No wallet for this user", body = crate::error::ErrorBody),
        (status = 503, description = "Ledger unavailable", body = crate::error::ErrorBody)
    )
)]
pub async fn get_balance(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<BalanceView>, ApiError> {
    Ok(Json(state.service.get_balance(&user_id).await?))
}
