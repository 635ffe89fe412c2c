// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-user conversation state for multi-step transfers.
//!
//! The chat flow asks for a recipient first and an amount in a later
//! message. The recipient is staged here, keyed by user, until the amount
//! arrives or the entry expires.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::Serialize;
use utoipa::ToSchema;

use crate::ledger::{AccountRef, AssetKind};

/// Default lifetime of a staged transfer.
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(5 * 60);

/// Default number of users with a staged transfer at once.
pub const DEFAULT_PENDING_CAPACITY: usize = 10_000;

/// A transfer waiting for its amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PendingTransfer {
    pub recipient: AccountRef,
    pub asset: AssetKind,
    pub staged_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

struct Entry {
    pending: PendingTransfer,
    inserted_at: Instant,
}

pub struct ConversationState {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl ConversationState {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Stage a transfer, replacing any earlier one for the same user.
    pub fn stage(&self, user_id: &str, recipient: AccountRef, asset: AssetKind) -> PendingTransfer {
        let staged_at = Utc::now();
        let expires_at = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| staged_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let pending = PendingTransfer {
            recipient,
            asset,
            staged_at,
            expires_at,
        };

        self.entries().put(
            user_id.to_string(),
            Entry {
                pending: pending.clone(),
                inserted_at: Instant::now(),
            },
        );
        pending
    }

    /// Remove and return the user's staged transfer if it has not expired.
    pub fn take(&self, user_id: &str) -> Option<PendingTransfer> {
        let entry = self.entries().pop(user_id)?;
        (entry.inserted_at.elapsed() < self.ttl).then_some(entry.pending)
    }

    /// Look at the staged transfer without consuming it.
    pub fn peek(&self, user_id: &str) -> Option<PendingTransfer> {
        let mut entries = self.entries();
        match entries.peek(user_id) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.pending.clone()),
            Some(_) => {
                entries.pop(user_id);
                None
            }
            None => None,
        }
    }

    pub fn clear(&self, user_id: &str) {
        self.entries().pop(user_id);
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_CAPACITY, DEFAULT_PENDING_TTL)
    }
}
