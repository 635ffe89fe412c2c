// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    balance::{AssetBalance, BalanceView},
    conversation::PendingTransfer,
    engine::{TransactionResult, TransactionStatus},
    error::{ErrorBody, ErrorKind},
    models::{
        Amount, ConfirmTransferRequest, SendTransferRequest, StageTransferRequest,
        TransferListResponse, WalletView,
    },
    state::AppState,
    storage::{TransferRecord, TransferState},
};

pub mod balance;
pub mod health;
pub mod transfers;
pub mod wallets;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route(
            "/users/{user_id}/wallet",
            get(wallets::get_wallet).post(wallets::provision_wallet),
        )
        .route("/users/{user_id}/balance", get(balance::get_balance))
        .route(
            "/users/{user_id}/transfers",
            get(transfers::list_transfers).post(transfers::send_transfer),
        )
        .route(
            "/users/{user_id}/transfers/pending",
            get(transfers::get_pending_transfer)
                .post(transfers::stage_transfer)
                .delete(transfers::cancel_pending_transfer),
        )
        .route(
            "/users/{user_id}/transfers/pending/confirm",
            post(transfers::confirm_pending_transfer),
        )
        .route(
            "/users/{user_id}/transfers/{transaction_id}",
            get(transfers::transfer_status),
        );

    Router::new()
        .route("/health", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        wallets::provision_wallet,
        wallets::get_wallet,
        balance::get_balance,
        transfers::send_transfer,
        transfers::list_transfers,
        transfers::transfer_status,
        transfers::stage_transfer,
        transfers::get_pending_transfer,
        transfers::cancel_pending_transfer,
        transfers::confirm_pending_transfer,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            WalletView,
            BalanceView,
            AssetBalance,
            Amount,
            SendTransferRequest,
            StageTransferRequest,
            ConfirmTransferRequest,
            TransactionResult,
            TransactionStatus,
            TransferRecord,
            TransferState,
            TransferListResponse,
            PendingTransfer,
            ErrorBody,
            ErrorKind
        )
    ),
    tags(
        (name = "Wallets", description = "Wallet provisioning and balances"),
        (name = "Transfers", description = "Value transfers and the interactive transfer flow"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::ServiceToken;
    use crate::ledger::SimulatedLedger;
    use crate::service::testing::{funded, HBAR, INITIAL_BALANCE};

    struct Harness {
        app: Router,
        ledger: Arc<SimulatedLedger>,
    }

    async fn harness(token: Option<&str>) -> Harness {
        let t = funded().await;
        let ledger = t.ledger.clone();
        let token = token.map(|t| ServiceToken::new(t).unwrap());
        let state = AppState::new(Arc::new(t.service), token);
        Harness {
            app: router(state),
            ledger,
        }
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        auth: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = auth {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let h = harness(None).await;
        let _ = h.app.into_make_service();
    }

    #[tokio::test]
    async fn openapi_document_lists_command_routes() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let paths = doc["paths"].as_object().unwrap();
        assert!(paths.contains_key("/v1/users/{user_id}/wallet"));
        assert!(paths.contains_key("/v1/users/{user_id}/transfers/pending/confirm"));
    }

    #[tokio::test]
    async fn provision_twice_conflicts() {
        let h = harness(None).await;

        let (status, wallet) = call(&h.app, Method::POST, "/v1/users/alice/wallet", None, None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(wallet["account_id"].is_string());
        assert!(wallet["alias"].as_str().unwrap().starts_with("0x"));
        assert!(wallet.get("encrypted_private_key").is_none());

        let (status, body) = call(&h.app, Method::POST, "/v1/users/alice/wallet", None, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "conflict");

        let (status, fetched) = call(&h.app, Method::GET, "/v1/users/alice/wallet", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["wallet_id"], wallet["wallet_id"]);
    }

    #[tokio::test]
    async fn send_transfer_then_read_balance_and_log() {
        let h = harness(None).await;
        call(&h.app, Method::POST, "/v1/users/alice/wallet", None, None).await;

        let (status, result) = call(
            &h.app,
            Method::POST,
            "/v1/users/alice/transfers",
            None,
            Some(json!({ "recipient": "0.0.999", "amount": "5" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["status"], "succeeded");
        assert!(result["explorer_url"]
            .as_str()
            .unwrap()
            .contains("/transaction/"));

        let (status, balance) = call(&h.app, Method::GET, "/v1/users/alice/balance", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            balance["native"]["amount"].as_u64().unwrap(),
            INITIAL_BALANCE - 5 * HBAR - h.ledger.fee()
        );

        let (status, list) =
            call(&h.app, Method::GET, "/v1/users/alice/transfers?limit=5", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["transfers"].as_array().unwrap().len(), 1);

        let id = result["transaction_id"].as_str().unwrap();
        let (status, looked_up) = call(
            &h.app,
            Method::GET,
            &format!("/v1/users/alice/transfers/{id}"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(looked_up["status"], "succeeded");
    }

    #[tokio::test]
    async fn invalid_amount_is_a_validation_error() {
        let h = harness(None).await;
        call(&h.app, Method::POST, "/v1/users/alice/wallet", None, None).await;
        let submits = h.ledger.submit_calls();

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/v1/users/alice/transfers",
            None,
            Some(json!({ "recipient": "0.0.999", "amount": "0" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");
        assert_eq!(h.ledger.submit_calls(), submits);
    }

    #[tokio::test]
    async fn malformed_transaction_id_is_rejected() {
        let h = harness(None).await;
        let (status, body) = call(
            &h.app,
            Method::GET,
            "/v1/users/alice/transfers/not-a-tx",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");
    }

    #[tokio::test]
    async fn staged_transfer_flow() {
        let h = harness(None).await;
        call(&h.app, Method::POST, "/v1/users/alice/wallet", None, None).await;

        let (status, staged) = call(
            &h.app,
            Method::POST,
            "/v1/users/alice/transfers/pending",
            None,
            Some(json!({ "recipient": "0.0.999" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(staged["recipient"], "0.0.999");
        assert_eq!(staged["asset"], "native");

        let (status, _) =
            call(&h.app, Method::GET, "/v1/users/alice/transfers/pending", None, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, result) = call(
            &h.app,
            Method::POST,
            "/v1/users/alice/transfers/pending/confirm",
            None,
            Some(json!({ "amount": 1.5 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["status"], "succeeded");

        let (status, _) =
            call(&h.app, Method::GET, "/v1/users/alice/transfers/pending", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/v1/users/alice/transfers/pending/confirm",
            None,
            Some(json!({ "amount": "1" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");
    }

    #[tokio::test]
    async fn cancelled_staged_transfer_is_gone() {
        let h = harness(None).await;
        call(&h.app, Method::POST, "/v1/users/alice/wallet", None, None).await;
        call(
            &h.app,
            Method::POST,
            "/v1/users/alice/transfers/pending",
            None,
            Some(json!({ "recipient": "0.0.999" })),
        )
        .await;

        let (status, _) =
            call(&h.app, Method::DELETE, "/v1/users/alice/transfers/pending", None, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) =
            call(&h.app, Method::GET, "/v1/users/alice/transfers/pending", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn service_token_is_enforced() {
        let h = harness(Some("transport-token")).await;

        let (status, body) = call(&h.app, Method::GET, "/v1/users/alice/wallet", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "unauthorized");

        let (status, _) = call(
            &h.app,
            Method::GET,
            "/v1/users/alice/wallet",
            Some("wrong-token"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(
            &h.app,
            Method::GET,
            "/v1/users/alice/wallet",
            Some("transport-token"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");

        let (status, _) = call(&h.app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_reports_components() {
        let h = harness(None).await;
        let (status, body) = call(&h.app, Method::GET, "/health/ready", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["storage"], "ok");
        assert_eq!(body["checks"]["ledger"], "ok");
        assert_eq!(body["provisioning_mode"], "funded");

        h.ledger.fail_next_reads(1);
        let (status, body) = call(&h.app, Method::GET, "/health/ready", None, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["checks"]["ledger"], "unavailable");
    }
}
