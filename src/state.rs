// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::ServiceToken;
use crate::service::WalletService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WalletService>,
    /// `None` disables authentication (local development only).
    pub token: Option<Arc<ServiceToken>>,
    /// Cancelled on shutdown; in-flight operations get a child token so an
    /// unsubmitted transfer is abandoned rather than raced.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(service: Arc<WalletService>, token: Option<ServiceToken>) -> Self {
        Self {
            service,
            token: token.map(Arc::new),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn operation_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}
