// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Short-lived credential handling: the in-memory store and the
//! single-flight renewal coordinator.
//!
//! The long-lived renewal proof never passes through this module. It lives
//! server side (an HTTP-only cookie) and rides along on the renewal exchange.

pub mod renewal;

use std::fmt;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use tokio::time::Instant;

/// Bearer credential plus its validity hint.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<Instant>,
    identity: Option<String>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into(), expires_at: None, identity: None }
    }

    /// A validity too large to represent as an instant counts as no hint.
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.expires_at = Instant::now().checked_add(validity);
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// The opaque bearer value. Never log it.
    pub fn bearer(&self) -> &str {
        &self.token
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Seconds of validity left, if the issuer gave a hint.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// True when the validity hint says the credential expires within `margin`.
    /// Credentials without a hint never need proactive renewal.
    pub fn needs_renewal(&self, margin: Duration) -> bool {
        self.remaining().is_some_and(|left| left <= margin)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("identity", &self.identity)
            .finish()
    }
}

/// Body of a successful login or renewal exchange.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthGrant {
    #[serde(alias = "accessToken", alias = "access_token")]
    pub new_credential: String,
    #[serde(default, alias = "expiresIn", alias = "expires_in")]
    pub validity_seconds: Option<u64>,
    #[serde(default, alias = "user")]
    pub identity: Option<serde_json::Value>,
}

impl AuthGrant {
    pub fn into_credential(self) -> Credential {
        let mut credential = Credential::new(self.new_credential);
        if let Some(secs) = self.validity_seconds {
            credential = credential.with_validity(Duration::from_secs(secs));
        }
        match self.identity {
            Some(serde_json::Value::String(s)) => credential.with_identity(s),
            Some(serde_json::Value::Null) | None => credential,
            Some(other) => credential.with_identity(other.to_string()),
        }
    }
}

/// Process-wide holder of the current credential.
///
/// Constructed once by the session and shared by reference. Only the renewal
/// coordinator writes to it; everything else reads.
#[derive(Default)]
pub struct CredentialStore {
    current: RwLock<Option<Credential>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Credential> {
        self.current.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.read().is_some()
    }

    pub(crate) fn set(&self, credential: Credential) {
        *self.current.write() = Some(credential);
    }

    pub(crate) fn clear(&self) {
        *self.current.write() = None;
    }

    /// Whether the stored credential has a different bearer value than `seen`.
    pub(crate) fn differs_from(&self, seen: Option<&Credential>) -> Option<Credential> {
        let current = self.current.read();
        match (current.as_ref(), seen) {
            (Some(now), Some(old)) if now.bearer() != old.bearer() => Some(now.clone()),
            (Some(now), None) => Some(now.clone()),
            _ => None,
        }
    }
}
