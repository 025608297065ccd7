// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session facade: builds the store, bus, pipeline, coordinator and
//! notification channel, and is the only thing applications hold.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::credential::renewal::RenewalCoordinator;
use crate::credential::{AuthGrant, Credential, CredentialStore};
use crate::error::{ErrorCode, SessionError};
use crate::events::{EventBus, InvalidationReason, SessionEvent};
use crate::notify::ws::WsConnector;
use crate::notify::{Notification, NotificationChannel, NotifyConnector, SubscriptionHandle};
use crate::transport::http::HttpTransport;
use crate::transport::pipeline::RequestPipeline;
use crate::transport::{CallRequest, CallResponse, CallTransport};

pub struct Session {
    config: SessionConfig,
    store: Arc<CredentialStore>,
    bus: EventBus,
    pipeline: RequestPipeline,
    channel: NotificationChannel,
    shutdown: CancellationToken,
}

impl Session {
    /// Session over reqwest and tokio-tungstenite.
    pub fn new(config: SessionConfig) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(config.api_url.clone(), config.request_timeout())?;
        Ok(Self::with_transports(config, Arc::new(transport), Arc::new(WsConnector)))
    }

    pub fn with_transports(
        config: SessionConfig,
        transport: Arc<dyn CallTransport>,
        connector: Arc<dyn NotifyConnector>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let store = Arc::new(CredentialStore::new());
        let bus = EventBus::new();
        let pipeline_config = config.pipeline();

        let coordinator = RenewalCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            bus.clone(),
            &pipeline_config,
            shutdown.clone(),
        );
        let pipeline = RequestPipeline::new(transport, Arc::clone(&store), coordinator, &pipeline_config);
        let channel = NotificationChannel::spawn(
            connector,
            Arc::clone(&store),
            &bus,
            config.channel(),
            shutdown.clone(),
        );

        Self { config, store, bus, pipeline, channel, shutdown }
    }

    /// Issue a business call through the credential-aware pipeline.
    pub async fn call(&self, request: CallRequest) -> Result<CallResponse, SessionError> {
        self.ensure_open()?;
        self.pipeline.call(request).await
    }

    /// Register a notification callback for `topic`.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.channel.subscribe(topic, callback)
    }

    /// Connect to the configured notification endpoint.
    pub fn connect_notifications(&self) -> Result<(), SessionError> {
        self.ensure_open()?;
        let Some(url) = self.config.notify_url.as_deref() else {
            return Err(ErrorCode::Transport.with_message("no notification endpoint configured"));
        };
        self.channel.connect(url);
        Ok(())
    }

    pub fn notifications(&self) -> &NotificationChannel {
        &self.channel
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    /// Authenticate with a login call. The request is sent exempt from the
    /// renewal protocol and its body must be an [`AuthGrant`].
    pub async fn login(&self, request: CallRequest) -> Result<(), SessionError> {
        self.ensure_open()?;
        let resp = self.pipeline.call(request.pre_auth()).await?;
        if !resp.is_success() {
            return Err(ErrorCode::BadResponse
                .with_message(format!("login failed ({}): {}", resp.status, resp.text())));
        }
        let grant: AuthGrant = resp.json()?;
        self.login_with(grant);
        Ok(())
    }

    /// Install a grant obtained out of band.
    pub fn login_with(&self, grant: AuthGrant) {
        self.establish(grant.into_credential());
    }

    /// Install a bare bearer value.
    pub fn establish(&self, credential: Credential) {
        self.pipeline.coordinator().establish(credential);
    }

    /// Recover a session after restart with a renewal exchange, if the
    /// server still holds a renewal proof for us.
    pub async fn restore(&self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.pipeline.coordinator().renew(None).await.map(|_| ())
    }

    /// Destroy the credential. Waiting calls fail and the notification
    /// channel is torn down.
    pub fn logout(&self) {
        self.pipeline.coordinator().invalidate(InvalidationReason::Logout);
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    pub fn identity(&self) -> Option<String> {
        self.store.get().and_then(|c| c.identity().map(str::to_owned))
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Log out, stop the notification channel and cancel background work.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        tracing::info!("session shutting down");
        self.logout();
        self.channel.shutdown();
        self.shutdown.cancel();
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.shutdown.is_cancelled() {
            return Err(ErrorCode::Closed.with_message("session shut down"));
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
