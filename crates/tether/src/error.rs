// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes surfaced by the session layer.
///
/// Duplicate notifications are not represented here: they are dropped
/// silently by the channel's de-dup record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The call requires a credential and none is held.
    CredentialMissing,
    /// A downstream service rejected the credential.
    CredentialInvalid,
    /// The renewal exchange failed, or the session was logged out while the
    /// call was waiting on one.
    RenewalFailed,
    /// The push transport dropped.
    TransportLost,
    /// All reconnect attempts were used up.
    ReconnectExhausted,
    /// A topic subscription was refused by the notification endpoint.
    SubscriptionFailed,
    /// A business call could not be sent or its response could not be read.
    Transport,
    /// A login or renewal response body was not a valid grant.
    BadResponse,
    /// The session or channel has shut down.
    Closed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CredentialMissing => "CREDENTIAL_MISSING",
            Self::CredentialInvalid => "CREDENTIAL_INVALID",
            Self::RenewalFailed => "RENEWAL_FAILED",
            Self::TransportLost => "TRANSPORT_LOST",
            Self::ReconnectExhausted => "RECONNECT_EXHAUSTED",
            Self::SubscriptionFailed => "SUBSCRIPTION_FAILED",
            Self::Transport => "TRANSPORT",
            Self::BadResponse => "BAD_RESPONSE",
            Self::Closed => "CLOSED",
        }
    }

    /// Whether the layer has given up on this failure. Terminal codes are
    /// never retried internally.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::RenewalFailed | Self::ReconnectExhausted | Self::Closed => true,
            Self::CredentialInvalid | Self::TransportLost => false,
            Self::CredentialMissing
            | Self::SubscriptionFailed
            | Self::Transport
            | Self::BadResponse => false,
        }
    }

    pub fn with_message(self, message: impl Into<String>) -> SessionError {
        SessionError { code: self, message: message.into() }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const LOGGED_OUT: &str = "session logged out";

/// Error returned by every public session operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub code: ErrorCode,
    pub message: String,
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Released by an explicit logout rather than a failed renewal. Carries
    /// `RenewalFailed` like an expiry.
    pub fn logged_out() -> Self {
        ErrorCode::RenewalFailed.with_message(LOGGED_OUT)
    }

    pub fn is_logged_out(&self) -> bool {
        self.code == ErrorCode::RenewalFailed && self.message == LOGGED_OUT
    }

    /// The session ended because renewal failed. False for a logout.
    pub fn is_session_expired(&self) -> bool {
        self.code == ErrorCode::RenewalFailed && !self.is_logged_out()
    }

    /// Wrap a transport-level `anyhow` error.
    pub fn transport(err: &anyhow::Error) -> Self {
        ErrorCode::Transport.with_message(format!("{err:#}"))
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for SessionError {}
