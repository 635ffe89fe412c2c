// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Service authentication.
//!
//! The chat transport is the only caller. It authenticates with a shared
//! bearer token; end-user identity arrives as the `user_id` path segment and
//! is trusted once the transport is authenticated.
//!
//! ```rust,ignore
//! async fn handler(_: ServiceAuth, State(state): State<AppState>) -> impl IntoResponse {
//!     // only reached with a valid token
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Expected bearer token, held as a keyed MAC so comparison is constant time
/// and the token itself is not kept in memory.
pub struct ServiceToken {
    key: Zeroizing<[u8; 32]>,
    expected: [u8; 32],
}

impl ServiceToken {
    pub fn new(token: &str) -> Result<Self, ring::error::Unspecified> {
        let mut key = Zeroizing::new([0u8; 32]);
        SystemRandom::new().fill(&mut key[..])?;
        let expected = mac(&key, token.as_bytes())?.finalize().into_bytes().into();
        Ok(Self { key, expected })
    }

    pub fn verify(&self, presented: &str) -> bool {
        mac(&self.key, presented.as_bytes())
            .is_ok_and(|mac| mac.verify_slice(&self.expected).is_ok())
    }
}

impl std::fmt::Debug for ServiceToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ServiceToken(..)")
    }
}

fn mac(key: &[u8; 32], message: &[u8]) -> Result<HmacSha256, ring::error::Unspecified> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| ring::error::Unspecified)?;
    mac.update(message);
    Ok(mac)
}

/// Extractor that requires the service bearer token.
///
/// Without a configured token every request is accepted. That mode exists
/// for local development and is logged loudly at startup.
pub struct ServiceAuth;

impl FromRequestParts<AppState> for ServiceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.token.as_deref() else {
            return Ok(ServiceAuth);
        };

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ApiError::unauthorized("missing authorization header"))?
            .to_str()
            .map_err(|_| ApiError::unauthorized("invalid authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("invalid authorization header"))?;

        if expected.verify(token.trim()) {
            Ok(ServiceAuth)
        } else {
            Err(ApiError::unauthorized("invalid service token"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_only_the_configured_token() {
        let token = ServiceToken::new("s3cret-transport-token").unwrap();
        assert!(token.verify("s3cret-transport-token"));
        assert!(!token.verify("s3cret-transport-tokeN"));
        assert!(!token.verify(""));
        assert!(!token.verify("s3cret-transport-token "));
    }

    #[test]
    fn debug_does_not_leak() {
        let token = ServiceToken::new("abc").unwrap();
        assert_eq!(format!("{token:?}"), "ServiceToken(..)");
    }
}
