// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The channel actor: sole owner of the link, the topic registry, the
//! de-dup record and the reconnect timer.
//!
//! Inputs are polled with bias: shutdown, then session events, then handle
//! commands, then link frames, then the backoff timer. An invalidation
//! therefore tears the channel down before any frame or timer queued in the
//! same tick is looked at.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ChannelConfig;
use crate::credential::CredentialStore;
use crate::error::ErrorCode;
use crate::events::SessionEvent;
use crate::notify::backoff::Backoff;
use crate::notify::dedup::DedupRecord;
use crate::notify::registry::{Removal, SubscriptionId, TopicRegistry};
use crate::notify::{
    Callback, ChannelSnapshot, ConnectionState, ControlFrame, DisconnectReason, InboundFrame,
    Notification, NotifyConnector, NotifyLink, SubscriptionFailure,
};

pub(crate) enum Command {
    Connect { endpoint: String },
    Disconnect,
    Subscribe { id: SubscriptionId, topic: String, callback: Callback },
    Unsubscribe { id: SubscriptionId, topic: String },
    Snapshot(oneshot::Sender<ChannelSnapshot>),
    Shutdown,
}

enum Phase {
    Idle,
    AwaitingCredential,
    Live(NotifyLink),
    Backoff { attempt: u32, wake: Instant },
}

enum Step {
    Shutdown,
    Event(Result<SessionEvent, broadcast::error::RecvError>),
    Command(Option<Command>),
    Frame(Option<InboundFrame>),
    Wake(u32),
}

/// Outcome of a single connect attempt.
enum Attempt {
    Open(NotifyLink),
    Failed(String),
    Invalidated,
    Stopped,
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub(crate) struct ChannelActor {
    connector: Arc<dyn NotifyConnector>,
    store: Arc<CredentialStore>,
    events: broadcast::Receiver<SessionEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    failures: broadcast::Sender<SubscriptionFailure>,
    shutdown: CancellationToken,
    config: ChannelConfig,
    backoff: Backoff,
    registry: TopicRegistry,
    dedup: DedupRecord,
    endpoint: Option<String>,
    phase: Phase,
}

impl ChannelActor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: ChannelConfig,
        connector: Arc<dyn NotifyConnector>,
        store: Arc<CredentialStore>,
        events: broadcast::Receiver<SessionEvent>,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
        failures: broadcast::Sender<SubscriptionFailure>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            backoff: Backoff::new(config.reconnect_initial, config.reconnect_max),
            dedup: DedupRecord::new(config.dedup_capacity, config.dedup_ttl),
            registry: TopicRegistry::new(),
            endpoint: None,
            phase: Phase::Idle,
            connector,
            store,
            events,
            commands,
            state_tx,
            failures,
            shutdown,
            config,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let step = match &mut self.phase {
                Phase::Live(link) => tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => Step::Shutdown,
                    event = self.events.recv() => Step::Event(event),
                    cmd = self.commands.recv() => Step::Command(cmd),
                    frame = link.inbound.recv() => Step::Frame(frame),
                },
                Phase::Backoff { attempt, wake } => {
                    let (attempt, wake) = (*attempt, *wake);
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => Step::Shutdown,
                        event = self.events.recv() => Step::Event(event),
                        cmd = self.commands.recv() => Step::Command(cmd),
                        _ = tokio::time::sleep_until(wake) => Step::Wake(attempt),
                    }
                }
                Phase::Idle | Phase::AwaitingCredential => tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => Step::Shutdown,
                    event = self.events.recv() => Step::Event(event),
                    cmd = self.commands.recv() => Step::Command(cmd),
                },
            };

            let flow = match step {
                Step::Shutdown | Step::Command(None) => Flow::Stop,
                Step::Event(event) => self.on_event(event).await,
                Step::Command(Some(cmd)) => self.on_command(cmd).await,
                Step::Frame(Some(frame)) => self.on_frame(frame).await,
                Step::Frame(None) => {
                    let err = ErrorCode::TransportLost.with_message("notification link closed");
                    tracing::info!(err = %err, "notification link lost");
                    self.phase = Phase::Idle;
                    self.schedule_reconnect(1);
                    Flow::Continue
                }
                Step::Wake(attempt) => self.open(attempt).await,
            };

            if flow == Flow::Stop {
                break;
            }
        }

        self.phase = Phase::Idle;
        self.set_state(ConnectionState::Disconnected { reason: DisconnectReason::Closed });
        tracing::debug!("notification channel stopped");
    }

    async fn on_event(&mut self, event: Result<SessionEvent, broadcast::error::RecvError>) -> Flow {
        match event {
            Ok(SessionEvent::Invalidated { reason }) => {
                tracing::info!(?reason, "session invalidated");
                self.on_invalidated();
                Flow::Continue
            }
            Ok(SessionEvent::Renewed { .. }) => {
                // A live link keeps its connection; the endpoint asks for
                // re-auth explicitly when it needs the new credential.
                if matches!(self.phase, Phase::AwaitingCredential) {
                    tracing::debug!("credential available, resuming deferred connect");
                    return self.open(0).await;
                }
                Flow::Continue
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "session events lagged");
                // A skipped invalidation shows up as an empty store.
                if !self.store.is_authenticated() {
                    self.on_invalidated();
                } else if matches!(self.phase, Phase::AwaitingCredential) {
                    return self.open(0).await;
                }
                Flow::Continue
            }
            Err(broadcast::error::RecvError::Closed) => Flow::Stop,
        }
    }

    async fn on_command(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::Connect { endpoint } => {
                if matches!(self.phase, Phase::Live(_)) && self.endpoint.as_deref() == Some(endpoint.as_str()) {
                    tracing::debug!("already connected");
                    return Flow::Continue;
                }
                self.phase = Phase::Idle;
                self.endpoint = Some(endpoint);
                self.open(0).await
            }
            Command::Disconnect => {
                self.phase = Phase::Idle;
                self.endpoint = None;
                self.set_state(ConnectionState::Disconnected { reason: DisconnectReason::Closed });
                Flow::Continue
            }
            Command::Subscribe { id, topic, callback } => {
                if self.registry.add(&topic, id, callback) {
                    tracing::debug!(topic = %topic, "subscribing");
                    self.send_control(ControlFrame::Subscribe { topic });
                }
                Flow::Continue
            }
            Command::Unsubscribe { id, topic } => {
                if self.registry.remove(&topic, id) == Removal::LastForTopic {
                    tracing::debug!(topic = %topic, "unsubscribing");
                    self.dedup.forget(&topic);
                    self.send_control(ControlFrame::Unsubscribe { topic });
                }
                Flow::Continue
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(ChannelSnapshot {
                    state: self.state_tx.borrow().clone(),
                    topics: self.registry.topics().map(str::to_owned).collect(),
                    callbacks: self.registry.callback_count(),
                });
                Flow::Continue
            }
            Command::Shutdown => Flow::Stop,
        }
    }

    async fn on_frame(&mut self, frame: InboundFrame) -> Flow {
        match frame {
            InboundFrame::Message(notification) => {
                self.deliver(&notification);
                Flow::Continue
            }
            InboundFrame::ReauthRequired => {
                tracing::info!("notification endpoint requested re-auth, reconnecting");
                self.phase = Phase::Idle;
                self.open(0).await
            }
            InboundFrame::SubscribeError { topic, error } => {
                let dropped = self.registry.remove_topic(&topic);
                self.dedup.forget(&topic);
                let failure = SubscriptionFailure { topic, error };
                tracing::warn!(err = %failure.to_error(), dropped, "subscription refused");
                let _ = self.failures.send(failure);
                Flow::Continue
            }
        }
    }

    fn deliver(&mut self, notification: &Notification) {
        let topic = notification.topic_id.as_str();
        if !self.registry.has_topic(topic) {
            tracing::debug!(topic, "notification for unsubscribed topic");
            return;
        }
        if !self.dedup.record(topic, &notification.message_id, Instant::now()) {
            tracing::debug!(topic, message_id = %notification.message_id, "duplicate notification dropped");
            return;
        }
        for callback in self.registry.callbacks(topic) {
            callback(notification);
        }
    }

    /// Make connect attempt `attempt`. With no credential the connect is
    /// parked until one is renewed.
    async fn open(&mut self, attempt: u32) -> Flow {
        let Some(endpoint) = self.endpoint.clone() else {
            self.phase = Phase::Idle;
            return Flow::Continue;
        };
        let Some(credential) = self.store.get() else {
            tracing::info!("no credential yet, deferring notification connect");
            self.phase = Phase::AwaitingCredential;
            self.set_state(ConnectionState::Disconnected { reason: DisconnectReason::AwaitingCredential });
            return Flow::Continue;
        };

        self.set_state(ConnectionState::Connecting { attempt });
        let outcome = {
            let connect =
                tokio::time::timeout(self.config.connect_timeout, self.connector.connect(&endpoint, &credential));
            tokio::pin!(connect);
            loop {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break Attempt::Stopped,
                    event = self.events.recv() => match event {
                        Ok(SessionEvent::Invalidated { .. }) => break Attempt::Invalidated,
                        Ok(SessionEvent::Renewed { .. }) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) if !self.store.is_authenticated() => {
                            break Attempt::Invalidated
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break Attempt::Stopped,
                    },
                    result = &mut connect => break match result {
                        Ok(Ok(link)) => Attempt::Open(link),
                        Ok(Err(e)) => Attempt::Failed(format!("{e:#}")),
                        Err(_) => Attempt::Failed("connect timed out".to_owned()),
                    },
                }
            }
        };

        match outcome {
            Attempt::Open(link) => {
                tracing::info!(attempt, topics = self.registry.topics().count(), "notification channel connected");
                self.phase = Phase::Live(link);
                self.set_state(ConnectionState::Connected);
                let replay: Vec<String> = self.registry.topics().map(str::to_owned).collect();
                for topic in replay {
                    self.send_control(ControlFrame::Subscribe { topic });
                }
                Flow::Continue
            }
            Attempt::Failed(err) => {
                tracing::debug!(attempt, err = %err, "notification connect failed");
                self.schedule_reconnect(attempt + 1);
                Flow::Continue
            }
            Attempt::Invalidated => {
                tracing::info!("session invalidated during notification connect");
                self.teardown();
                Flow::Continue
            }
            Attempt::Stopped => Flow::Stop,
        }
    }

    fn schedule_reconnect(&mut self, attempt: u32) {
        if attempt > self.config.max_reconnect_attempts {
            tracing::info!(attempts = attempt - 1, "notification reconnect attempts exhausted");
            self.phase = Phase::Idle;
            self.set_state(ConnectionState::Disconnected { reason: DisconnectReason::Exhausted });
            return;
        }
        let backoff = self.backoff.delay(attempt);
        tracing::debug!(attempt, backoff_ms = backoff.as_millis() as u64, "scheduling notification reconnect");
        self.phase = Phase::Backoff { attempt, wake: Instant::now() + backoff };
        self.set_state(ConnectionState::Reconnecting { attempt, backoff });
    }

    /// A live link or pending reconnect is torn down. A connect parked on a
    /// missing credential keeps its endpoint and subscriptions and goes ahead
    /// once a credential is established.
    fn on_invalidated(&mut self) {
        match self.phase {
            Phase::Live(_) | Phase::Backoff { .. } => {
                tracing::info!("tearing down notification channel");
                self.teardown();
            }
            Phase::Idle | Phase::AwaitingCredential => {
                tracing::debug!(topics = self.registry.topics().count(), "not connected, keeping subscriptions");
                self.dedup.clear();
            }
        }
    }

    /// Drop the link, any pending reconnect, every subscription and the
    /// de-dup record.
    fn teardown(&mut self) {
        self.phase = Phase::Idle;
        self.endpoint = None;
        self.registry.clear();
        self.dedup.clear();
        self.set_state(ConnectionState::Disconnected { reason: DisconnectReason::Invalidated });
    }

    fn send_control(&self, frame: ControlFrame) {
        if let Phase::Live(link) = &self.phase {
            if link.outbound.send(frame).is_err() {
                tracing::debug!("notification link closed while sending control frame");
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        tracing::debug!(state = ?state, "notification channel state");
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
#[path = "actor_tests.rs"]
mod tests;
