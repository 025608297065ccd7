// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notification channel: one persistent connection multiplexing topic
//! subscriptions, with de-duplication and automatic reconnect.
//!
//! All channel state lives in a single actor task (see [`actor`]). The
//! [`NotificationChannel`] handle only sends it commands and observes its
//! [`ConnectionState`].

pub mod actor;
pub mod backoff;
pub mod dedup;
pub mod frames;
pub mod registry;
pub mod ws;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::config::ChannelConfig;
use crate::credential::{Credential, CredentialStore};
use crate::error::{ErrorCode, SessionError};
use crate::events::EventBus;
use actor::{ChannelActor, Command};
use registry::SubscriptionId;

pub use frames::{ControlFrame, InboundFrame, Notification};

/// Subscriber callback. Runs on the channel task, so keep it short.
pub type Callback = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Why the channel is not connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Never asked to connect.
    Idle,
    /// Asked to connect, waiting for a credential to appear.
    AwaitingCredential,
    /// Gave up after the configured number of reconnect attempts.
    Exhausted,
    /// The session was invalidated; subscriptions were dropped.
    Invalidated,
    /// Explicit disconnect or shutdown.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected { reason: DisconnectReason },
    /// Attempt 0 is the initial connect, later numbers are reconnects.
    Connecting { attempt: u32 },
    Connected,
    Reconnecting { attempt: u32, #[serde(with = "millis")] backoff: Duration },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

mod millis {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// A topic subscription the server refused. The topic's callbacks have been
/// dropped; other topics are unaffected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFailure {
    pub topic: String,
    pub error: String,
}

impl SubscriptionFailure {
    pub fn to_error(&self) -> SessionError {
        ErrorCode::SubscriptionFailed.with_message(format!("{}: {}", self.topic, self.error))
    }
}

/// Point-in-time view of the actor's registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub state: ConnectionState,
    /// Subscribed topics in registration order.
    pub topics: Vec<String>,
    pub callbacks: usize,
}

/// Both halves of an open notification connection, as seen by the actor.
///
/// Dropping the link closes the connection. The connection is considered
/// lost once `inbound` yields `None`.
pub struct NotifyLink {
    pub outbound: mpsc::UnboundedSender<ControlFrame>,
    pub inbound: mpsc::Receiver<InboundFrame>,
}

/// Opens notification connections.
///
/// Object-safe for use as `Arc<dyn NotifyConnector>`.
pub trait NotifyConnector: Send + Sync + 'static {
    fn connect<'a>(
        &'a self,
        endpoint: &'a str,
        credential: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<NotifyLink>> + Send + 'a>>;
}

/// Cloneable handle to the notification channel actor.
#[derive(Clone)]
pub struct NotificationChannel {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    failures: broadcast::Sender<SubscriptionFailure>,
    next_id: Arc<AtomicU64>,
}

impl NotificationChannel {
    /// Spawn the channel actor. It runs until `shutdown` fires or every
    /// handle is dropped.
    pub fn spawn(
        connector: Arc<dyn NotifyConnector>,
        store: Arc<CredentialStore>,
        bus: &EventBus,
        config: ChannelConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) =
            watch::channel(ConnectionState::Disconnected { reason: DisconnectReason::Idle });
        let (failures, _) = broadcast::channel(32);

        let actor = ChannelActor::new(
            config,
            connector,
            store,
            bus.subscribe(),
            cmd_rx,
            state_tx,
            failures.clone(),
            shutdown,
        );
        tokio::spawn(actor.run());

        Self { commands: cmd_tx, state: state_rx, failures, next_id: Arc::new(AtomicU64::new(1)) }
    }

    /// Open the connection to `endpoint`. If no credential is present yet the
    /// connect is deferred until the next renewal.
    pub fn connect(&self, endpoint: impl Into<String>) {
        self.send(Command::Connect { endpoint: endpoint.into() });
    }

    /// Close the connection. Subscriptions are kept and replayed on the next
    /// connect.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Register `callback` for `topic`. The first callback on a topic sends
    /// the upstream subscribe; later ones share it.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.send(Command::Subscribe { id, topic: topic.clone(), callback: Arc::new(callback) });
        SubscriptionHandle { topic, id, commands: self.commands.clone() }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the channel is connected.
    ///
    /// Fails as soon as the channel reaches a state it will not leave on its
    /// own: reconnects exhausted, session invalidated, or closed. That
    /// includes a terminal state already current when called.
    pub async fn wait_connected(&self) -> Result<(), SessionError> {
        let mut rx = self.state.clone();
        loop {
            match &*rx.borrow_and_update() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected { reason: DisconnectReason::Exhausted } => {
                    return Err(ErrorCode::ReconnectExhausted.with_message("reconnect attempts exhausted"));
                }
                ConnectionState::Disconnected { reason: DisconnectReason::Invalidated } => {
                    return Err(ErrorCode::RenewalFailed.with_message("session invalidated"));
                }
                ConnectionState::Disconnected { reason: DisconnectReason::Closed } => {
                    return Err(ErrorCode::Closed.with_message("notification channel closed"));
                }
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(ErrorCode::Closed.with_message("notification channel stopped"));
            }
        }
    }

    /// Subscriptions refused by the server.
    pub fn subscription_failures(&self) -> broadcast::Receiver<SubscriptionFailure> {
        self.failures.subscribe()
    }

    /// Inspect the actor. `None` once it has stopped.
    pub async fn snapshot(&self) -> Option<ChannelSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx));
        rx.await.ok()
    }

    /// Stop the actor. Equivalent to dropping every handle.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("notification channel already stopped");
        }
    }
}

/// Returned by [`NotificationChannel::subscribe`].
///
/// Not tied to the callback's lifetime: dropping the handle leaves the
/// subscription in place.
pub struct SubscriptionHandle {
    topic: String,
    id: SubscriptionId,
    commands: mpsc::UnboundedSender<Command>,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove this callback. The upstream unsubscribe is sent only when it
    /// was the topic's last one.
    pub fn unsubscribe(self) {
        let _ = self.commands.send(Command::Unsubscribe { id: self.id, topic: self.topic });
    }
}
