// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::path::Path;
use utoipa::ToSchema;

use crate::config::DATA_DIR_ENV;
use crate::state::AppState;

/// Readiness response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall status ("ok" or "degraded").
    pub status: String,
    /// Ledger network name.
    pub network: String,
    /// `alias` or `funded`.
    pub provisioning_mode: String,
    pub checks: HealthChecks,
}

/// Individual check results.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    pub service: String,
    /// Wallet database reachable.
    pub storage: String,
    /// Mirror node answering.
    pub ledger: String,
    /// Data directory availability (if configured).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

/// Liveness response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

fn check_data_dir() -> Option<String> {
    let dir = std::env::var(DATA_DIR_ENV).ok()?;
    let status = if Path::new(&dir).exists() {
        "ok"
    } else {
        "missing"
    };
    Some(status.to_string())
}

fn verdict(ok: bool) -> String {
    if ok {
        "ok".to_string()
    } else {
        "unavailable".to_string()
    }
}

/// Liveness probe.
///
/// Always returns 200 while the process is running.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe.
///
/// Returns 200 only if storage and the ledger are reachable.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Service is not ready", body = ReadyResponse)
    )
)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let deps = state.service.check_dependencies().await;
    let data_dir = check_data_dir();

    let data_ok = data_dir.as_ref().map(|s| s == "ok").unwrap_or(true);
    let all_ok = deps.storage && deps.ledger && data_ok;

    let overall = if all_ok { "ok" } else { "degraded" };
    let response = ReadyResponse {
        status: overall.to_string(),
        network: state.service.network_name().to_string(),
        provisioning_mode: state.service.provisioning_mode().to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            storage: verdict(deps.storage),
            ledger: verdict(deps.ledger),
            data_dir,
        },
    };

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_names_dependency_state() {
        assert_eq!(verdict(true), "ok");
        assert_eq!(verdict(false), "unavailable");
    }
}
