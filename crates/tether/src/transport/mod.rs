// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound business calls: request/response descriptors, the transport seam,
//! and the credential-aware pipeline wrapped around it.

pub mod http;
pub mod pipeline;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::credential::Credential;
use crate::error::{ErrorCode, SessionError};

/// How a call relates to the renewal protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Attaches the credential and is renewed-and-retried once on rejection.
    Standard,
    /// Issued before authentication exists (login, public lookups). A
    /// rejection is surfaced as-is.
    PreAuth,
    /// The renewal exchange itself. Never re-enters the protocol.
    RenewalExchange,
}

impl AuthMode {
    pub fn is_exempt(&self) -> bool {
        !matches!(self, Self::Standard)
    }
}

/// A single outbound call as issued by the application.
#[derive(Debug, Clone)]
pub struct CallRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    auth: AuthMode,
    require_credential: bool,
}

impl CallRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            auth: AuthMode::Standard,
            require_credential: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Mark the call as issued before authentication exists.
    pub fn pre_auth(mut self) -> Self {
        self.auth = AuthMode::PreAuth;
        self
    }

    /// Fail with `CredentialMissing` instead of sending unauthenticated.
    pub fn require_credential(mut self) -> Self {
        self.require_credential = true;
        self
    }

    pub(crate) fn renewal_exchange(path: impl Into<String>) -> Self {
        Self { auth: AuthMode::RenewalExchange, ..Self::post(path) }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    pub fn auth(&self) -> AuthMode {
        self.auth
    }

    pub fn requires_credential(&self) -> bool {
        self.require_credential
    }
}

/// Response of a call that reached the server.
#[derive(Debug, Clone)]
pub struct CallResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl CallResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, headers: Vec::new(), body: body.into() }
    }

    pub fn json_body(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The downstream service rejected the attached credential.
    pub fn is_credential_invalid(&self) -> bool {
        self.status == 401
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ErrorCode::BadResponse.with_message(format!("invalid JSON body ({}): {e}", self.status))
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends one request with an optional credential attached.
///
/// Object-safe for use as `Arc<dyn CallTransport>`. Implementations must not
/// interpret status codes: a 401 is a successful send with a 401 response.
pub trait CallTransport: Send + Sync + 'static {
    fn send<'a>(
        &'a self,
        request: &'a CallRequest,
        credential: Option<&'a Credential>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CallResponse>> + Send + 'a>>;
}
