// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential-aware request pipeline.
//!
//! Attaches the current credential to every call and turns a credential
//! rejection into at most one renew-and-reissue round through the
//! [`RenewalCoordinator`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::credential::renewal::RenewalCoordinator;
use crate::credential::{Credential, CredentialStore};
use crate::error::{ErrorCode, SessionError};
use crate::transport::{AuthMode, CallRequest, CallResponse, CallTransport};

/// One-shot marker guarding the single permitted reissue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMarker {
    Fresh,
    Retried,
}

/// A call in flight through the pipeline.
#[derive(Debug)]
pub struct PendingCall {
    request: CallRequest,
    marker: RetryMarker,
}

impl PendingCall {
    pub fn new(request: CallRequest) -> Self {
        Self { request, marker: RetryMarker::Fresh }
    }

    pub fn marker(&self) -> RetryMarker {
        self.marker
    }

    /// Consume the retry allowance. Returns false if it was already spent.
    fn claim_retry(&mut self) -> bool {
        match self.marker {
            RetryMarker::Fresh => {
                self.marker = RetryMarker::Retried;
                true
            }
            RetryMarker::Retried => false,
        }
    }
}

pub struct RequestPipeline {
    transport: Arc<dyn CallTransport>,
    store: Arc<CredentialStore>,
    coordinator: Arc<RenewalCoordinator>,
    renew_margin: Duration,
}

impl RequestPipeline {
    pub fn new(
        transport: Arc<dyn CallTransport>,
        store: Arc<CredentialStore>,
        coordinator: Arc<RenewalCoordinator>,
        config: &PipelineConfig,
    ) -> Self {
        Self { transport, store, coordinator, renew_margin: config.renew_margin }
    }

    pub fn coordinator(&self) -> &Arc<RenewalCoordinator> {
        &self.coordinator
    }

    /// Issue a call. Non-2xx responses other than a credential rejection are
    /// returned as-is for the caller to interpret.
    pub async fn call(&self, request: CallRequest) -> Result<CallResponse, SessionError> {
        let mut call = PendingCall::new(request);
        let mut credential = self.credential_for(&call.request).await?;

        loop {
            let resp = self
                .transport
                .send(&call.request, credential.as_ref())
                .await
                .map_err(|e| SessionError::transport(&e))?;

            if !resp.is_credential_invalid() {
                return Ok(resp);
            }

            if call.request.auth().is_exempt() {
                return Err(rejected(&call.request, "exempt call"));
            }
            if !call.claim_retry() {
                tracing::debug!(path = call.request.path(), "rejected again after renewal");
                return Err(rejected(&call.request, "already retried"));
            }

            tracing::debug!(path = call.request.path(), "credential rejected, renewing");
            credential = Some(self.coordinator.renew(credential.as_ref()).await?);
        }
    }

    /// Credential to attach on the first attempt, renewing ahead of expiry.
    async fn credential_for(&self, request: &CallRequest) -> Result<Option<Credential>, SessionError> {
        if request.auth() == AuthMode::RenewalExchange {
            return Ok(None);
        }
        let current = self.store.get();
        if request.auth() == AuthMode::PreAuth {
            return Ok(current);
        }
        match current {
            Some(credential) if credential.needs_renewal(self.renew_margin) => {
                tracing::debug!(path = request.path(), "credential near expiry, renewing first");
                self.coordinator.renew(Some(&credential)).await.map(Some)
            }
            Some(credential) => Ok(Some(credential)),
            None if request.requires_credential() => Err(ErrorCode::CredentialMissing
                .with_message(format!("{} {} requires a credential", request.method(), request.path()))),
            None => Ok(None),
        }
    }
}

fn rejected(request: &CallRequest, why: &str) -> SessionError {
    ErrorCode::CredentialInvalid.with_message(format!(
        "{} {} rejected the credential ({why})",
        request.method(),
        request.path()
    ))
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
