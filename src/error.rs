// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Caller-facing error taxonomy.
//!
//! Lower layers keep their own error types ([`CustodyError`],
//! [`SigningError`], [`LedgerError`], [`StorageError`]); they surface here
//! with their kind preserved. [`EngineError::user_message`] is the only text
//! that leaves the service.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::custody::CustodyError;
use crate::ledger::types::TransactionId;
use crate::ledger::LedgerError;
use crate::signer::SigningError;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad input. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Duplicate wallet. The caller should fetch the existing one.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Custody(CustodyError),

    #[error(transparent)]
    Signing(SigningError),

    /// Ambiguous outcome: safe to re-query, not to re-sign and resubmit.
    #[error("network error: {reason}")]
    Network {
        reason: String,
        transaction_id: Option<TransactionId>,
        explorer_url: Option<String>,
    },

    /// The ledger decided against the transaction. Terminal: re-querying
    /// returns the same answer.
    #[error("rejected by the ledger: {reason}")]
    Rejected {
        reason: String,
        transaction_id: TransactionId,
        explorer_url: String,
    },

    #[error(transparent)]
    Storage(StorageError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled before submission")]
    Cancelled,
}

/// Stable error kind exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Conflict,
    Custody,
    Signing,
    Network,
    Rejected,
    Storage,
    NotFound,
    Cancelled,
    Unauthorized,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Custody => "custody",
            ErrorKind::Signing => "signing",
            ErrorKind::Network => "network",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Storage => "storage",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unauthorized => "unauthorized",
        }
    }
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network {
            reason: reason.into(),
            transaction_id: None,
            explorer_url: None,
        }
    }

    /// A failure while turning a key source into a signer. Decryption
    /// problems stay custody errors; everything else is a signing error.
    pub fn from_signer_resolution(err: SigningError) -> Self {
        match err {
            SigningError::Custody(custody) => Self::Custody(custody),
            other => Self::Signing(other),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::Custody(_) => ErrorKind::Custody,
            EngineError::Signing(_) => ErrorKind::Signing,
            EngineError::Network { .. } => ErrorKind::Network,
            EngineError::Rejected { .. } => ErrorKind::Rejected,
            EngineError::Storage(_) => ErrorKind::Storage,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Short reason safe to show to an end user. Never contains key ids,
    /// ciphertext or internal error chains.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Validation(message) | EngineError::NotFound(message) => message.clone(),
            EngineError::Conflict(_) => "a wallet already exists for this user".to_string(),
            EngineError::Custody(_) => {
                "key custody is temporarily unavailable, please try again later".to_string()
            }
            EngineError::Signing(SigningError::NoKeyMaterial) => {
                "this wallet is not custodial and cannot sign transfers".to_string()
            }
            EngineError::Signing(_) => "the transaction could not be signed".to_string(),
            EngineError::Network {
                transaction_id: Some(id),
                ..
            } => format!(
                "the ledger did not confirm transaction {id} in time, check its status later"
            ),
            EngineError::Network { .. } => {
                "the ledger network is unavailable, please try again later".to_string()
            }
            EngineError::Rejected {
                reason,
                transaction_id,
                ..
            } => format!("the ledger rejected transaction {transaction_id}: {reason}"),
            EngineError::Storage(_) => "internal storage error".to_string(),
            EngineError::Cancelled => "the transfer was cancelled before submission".to_string(),
        }
    }

    /// Ledger transaction and explorer link of the attempt, when one reached
    /// the network.
    pub fn attempt(&self) -> Option<(TransactionId, &str)> {
        match self {
            EngineError::Network {
                transaction_id: Some(id),
                explorer_url,
                ..
            } => Some((*id, explorer_url.as_deref().unwrap_or_default())),
            EngineError::Rejected {
                transaction_id,
                explorer_url,
                ..
            } => Some((*transaction_id, explorer_url.as_str())),
            _ => None,
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Conflict(message) => EngineError::Conflict(message),
            other => EngineError::Storage(other),
        }
    }
}

impl From<CustodyError> for EngineError {
    fn from(value: CustodyError) -> Self {
        EngineError::Custody(value)
    }
}

impl From<LedgerError> for EngineError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::AccountNotFound(account) => {
                EngineError::NotFound(format!("account {account} not found on the ledger"))
            }
            other => EngineError::network(other.to_string()),
        }
    }
}

// =============================================================================
// HTTP mapping
// =============================================================================

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub message: String,
    pub transaction_id: Option<String>,
    pub explorer_url: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    /// Short human-readable reason
    error: String,
    /// Error category
    kind: ErrorKind,
    /// Ledger transaction of the failed attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction_id: Option<String>,
    /// Explorer link for that transaction
    #[serde(skip_serializing_if = "Option::is_none")]
    explorer_url: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            transaction_id: None,
            explorer_url: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorKind::NotFound, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, ErrorKind::Unauthorized, message)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Signing => StatusCode::BAD_GATEWAY,
            ErrorKind::Network => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Rejected => StatusCode::BAD_GATEWAY,
            ErrorKind::Cancelled => StatusCode::CONFLICT,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Custody | ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(kind = kind.as_str(), error = %err, "request failed");
        }
        let mut api = Self::new(status, kind, err.user_message());
        if let Some((transaction_id, explorer_url)) = err.attempt() {
            api.transaction_id = Some(transaction_id.to_string());
            api.explorer_url = Some(explorer_url.to_string()).filter(|url| !url.is_empty());
        }
        api
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            kind: self.kind,
            transaction_id: self.transaction_id,
            explorer_url: self.explorer_url,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    fn rejected() -> EngineError {
        EngineError::Rejected {
            reason: "insufficient balance".to_string(),
            transaction_id: "0.0.1001@1767268800.000000000".parse().unwrap(),
            explorer_url: "https://hashscan.io/testnet/transaction/1767268800.000000000".to_string(),
        }
    }

    #[test]
    fn kinds_map_to_status_codes() {
        let cases = [
            (EngineError::validation("bad"), StatusCode::BAD_REQUEST),
            (EngineError::Conflict("dup".into()), StatusCode::CONFLICT),
            (EngineError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                EngineError::Custody(CustodyError::ContextMismatch),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                EngineError::Signing(SigningError::NoKeyMaterial),
                StatusCode::BAD_GATEWAY,
            ),
            (EngineError::network("down"), StatusCode::SERVICE_UNAVAILABLE),
            (rejected(), StatusCode::BAD_GATEWAY),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }

    #[test]
    fn user_messages_are_redacted() {
        let custody = EngineError::Custody(CustodyError::Rejected(
            "Decrypt: arn:aws:kms:us-east-1:123:key/abc".to_string(),
        ));
        assert!(!custody.user_message().contains("arn:aws"));

        let signing = EngineError::Signing(SigningError::MalformedSignature(
            "304402...".to_string(),
        ));
        assert!(!signing.user_message().contains("3044"));

        let storage = EngineError::Storage(StorageError::Backend("/data/custody.redb".into()));
        assert!(!storage.user_message().contains("/data"));
    }

    #[test]
    fn resolution_errors_keep_custody_kind() {
        let err =
            EngineError::from_signer_resolution(SigningError::Custody(CustodyError::ContextMismatch));
        assert_eq!(err.kind(), ErrorKind::Custody);

        let err = EngineError::from_signer_resolution(SigningError::NoKeyMaterial);
        assert_eq!(err.kind(), ErrorKind::Signing);
    }

    #[test]
    fn storage_conflict_becomes_conflict() {
        let err: EngineError = StorageError::Conflict("wallet exists".into()).into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn rejection_is_reported_as_decided() {
        let err = rejected();
        assert_eq!(err.kind(), ErrorKind::Rejected);
        let message = err.user_message();
        assert!(message.contains("0.0.1001@1767268800.000000000"));
        assert!(message.contains("insufficient balance"));
        assert!(!message.contains("check its status later"));
    }

    #[tokio::test]
    async fn rejection_body_carries_the_attempt() {
        let response = ApiError::from(rejected()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["kind"], "rejected");
        assert_eq!(body["transaction_id"], "0.0.1001@1767268800.000000000");
        assert_eq!(
            body["explorer_url"],
            "https://hashscan.io/testnet/transaction/1767268800.000000000"
        );
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::from(EngineError::validation("amount must be greater than zero"))
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(
            body,
            r#"{"error":"amount must be greater than zero","kind":"validation"}"#
        );
    }
}
