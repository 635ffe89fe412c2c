// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transfer endpoints: one-shot sends, status lookups, the transfer log and
//! the two-step interactive flow (recipient first, amount later).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    auth::ServiceAuth,
    conversation::PendingTransfer,
    engine::TransactionResult,
    error::ApiError,
    ledger::TransactionId,
    models::{
        ConfirmTransferRequest, ListTransfersQuery, SendTransferRequest, StageTransferRequest,
        TransferListResponse,
    },
    state::AppState,
};

const DEFAULT_PAGE: usize = 20;

// =============================================================================
// One-shot transfers
// =============================================================================

/// Send a transfer from the user's wallet.
///
/// Returns 200 once the ledger has decided: `status` is `succeeded` or
/// `failed` (with `failure_reason`). A 503 carrying a transaction id means
/// the outcome is unknown; query it again with the status endpoint.
#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/transfers",
    tag = "Transfers",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Chat user id")),
    request_body = SendTransferRequest,
    responses(
        (status = 200, description = "Transfer decided by the ledger", body = TransactionResult),
        (status = 400, description = "Invalid amount, recipient or asset", body = crate::error::ErrorBody),
        (status = 401, description = "Unauthorized", body = crate::error::ErrorBody),
        (status = 404, description = "No wallet for this user", body = crate::error::ErrorBody),
        (status = 502, description = "Signing failed", body = crate::error::ErrorBody),
        (status = 503, description = "Ledger unavailable or outcome unknown", body = crate::error::ErrorBody)
    )
)]
pub async fn send_transfer(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<SendTransferRequest>,
) -> Result<Json<TransactionResult>, ApiError> {
    let cancel = state.operation_token();
    let result = state
        .service
        .send_transfer(
            &user_id,
            &request.recipient,
            &request.amount,
            &request.asset,
            request.memo,
            &cancel,
        )
        .await?;
    Ok(Json(result))
}

/// List the user's transfers, newest first.
#[utoipa::path(
    get,
    path = "/v1/users/{user_id}/transfers",
    tag = "Transfers",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Chat user id"), ListTransfersQuery),
    responses(
        (status = 200, description = "Transfer log", body = TransferListResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ErrorBody)
    )
)]
pub async fn list_transfers(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ListTransfersQuery>,
) -> Result<Json<TransferListResponse>, ApiError> {
    let transfers = state
        .service
        .list_transfers(&user_id, query.limit.unwrap_or(DEFAULT_PAGE))
        .await?;
    Ok(Json(TransferListResponse { transfers }))
}

/// Outcome of an earlier transfer.
///
/// Unconfirmed transfers are re-queried on the ledger.
#[utoipa::path(
    get,
    path = "/v1/users/{user_id}/transfers/{transaction_id}",
    tag = "Transfers",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = String, Path, description = "Chat user id"),
        ("transaction_id" = String, Path, description = "Transaction id, e.g. 0.0.1001@1767268800.000000000")
    ),
    responses(
        (status = 200, description = "Transfer outcome", body = TransactionResult),
        (status = 400, description = "Malformed transaction id", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown transfer", body = crate::error::ErrorBody),
        (status = 503, description = "Still unconfirmed or ledger unavailable", body = crate::error::ErrorBody)
    )
)]
pub async fn transfer_status(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Path((user_id, transaction_id)): Path<(String, String)>,
) -> Result<Json<TransactionResult>, ApiError> {
    let transaction_id: TransactionId = transaction_id
        .parse()
        .map_err(|_| ApiError::bad_request("malformed transaction id"))?;
    Ok(Json(
        state
            .service
            .transfer_status(&user_id, &transaction_id)
            .await?,
    ))
}

// =============================================================================
// Interactive flow
// =============================================================================

/// Stage a transfer: remember the recipient and asset until the amount
/// arrives. Replaces any earlier staged transfer.
#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/transfers/pending",
    tag = "Transfers",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Chat user id")),
    request_body = StageTransferRequest,
    responses(
        (status = 201, description = "Transfer staged", body = PendingTransfer),
        (status = 400, description = "Invalid recipient or asset", body = crate::error::ErrorBody),
        (status = 404, description = "No wallet for this user", body = crate::error::ErrorBody)
    )
)]
pub async fn stage_transfer(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<StageTransferRequest>,
) -> Result<(StatusCode, Json<PendingTransfer>), ApiError> {
    let pending = state
        .service
        .stage_transfer(&user_id, &request.recipient, &request.asset)
        .await?;
    Ok((StatusCode::CREATED, Json(pending)))
}

/// The staged transfer, if one is waiting.
#[utoipa::path(
    get,
    path = "/v1/users/{user_id}/transfers/pending",
    tag = "Transfers",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Chat user id")),
    responses(
        (status = 200, description = "Staged transfer", body = PendingTransfer),
        (status = 404, description = "Nothing staged or it expired", body = crate::error::ErrorBody)
    )
)]
pub async fn get_pending_transfer(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<PendingTransfer>, ApiError> {
    state
        .service
        .pending_transfer(&user_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("no pending transfer"))
}

/// Drop the staged transfer.
#[utoipa::path(
    delete,
    path = "/v1/users/{user_id}/transfers/pending",
    tag = "Transfers",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Chat user id")),
    responses((status = 204, description = "Staged transfer cleared"))
)]
pub async fn cancel_pending_transfer(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> StatusCode {
    state.service.cancel_staged_transfer(&user_id);
    StatusCode::NO_CONTENT
}

/// Execute the staged transfer with the supplied amount.
#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/transfers/pending/confirm",
    tag = "Transfers",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Chat user id")),
    request_body = ConfirmTransferRequest,
    responses(
        (status = 200, description = "Transfer decided by the ledger", body = TransactionResult),
        (status = 400, description = "No staged transfer or invalid amount", body = crate::error::ErrorBody),
        (status = 503, description = "Ledger unavailable or outcome unknown", body = crate::error::ErrorBody)
    )
)]
pub async fn confirm_pending_transfer(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<ConfirmTransferRequest>,
) -> Result<Json<TransactionResult>, ApiError> {
    let cancel = state.operation_token();
    let result = state
        .service
        .confirm_staged_transfer(&user_id, &request.amount, &cancel)
        .await?;
    Ok(Json(result))
}
