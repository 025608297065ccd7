// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{ChannelConfig, PipelineConfig};
use crate::credential::renewal::RenewalCoordinator;
use crate::credential::{Credential, CredentialStore};
use crate::error::ErrorCode;
use crate::events::{EventBus, InvalidationReason};
use crate::notify::{
    ConnectionState, ControlFrame, DisconnectReason, InboundFrame, Notification, NotificationChannel,
    SubscriptionFailure,
};
use crate::test_support::{MockConnector, MockPeer, MockTransport};

const ENDPOINT: &str = "ws://notify.test/ws";

struct Harness {
    connector: Arc<MockConnector>,
    peers: mpsc::UnboundedReceiver<MockPeer>,
    store: Arc<CredentialStore>,
    coordinator: Arc<RenewalCoordinator>,
    channel: NotificationChannel,
    shutdown: CancellationToken,
}

impl Harness {
    async fn next_peer(&mut self) -> anyhow::Result<MockPeer> {
        self.peers.recv().await.ok_or_else(|| anyhow::anyhow!("connector dropped"))
    }
}

fn config() -> ChannelConfig {
    ChannelConfig {
        max_reconnect_attempts: 5,
        reconnect_initial: Duration::from_millis(100),
        reconnect_max: Duration::from_secs(1),
        connect_timeout: Duration::from_secs(5),
        dedup_capacity: 16,
        dedup_ttl: Duration::from_secs(60),
    }
}

fn harness_with(config: ChannelConfig) -> Harness {
    let (connector, peers) = MockConnector::new();
    let store = Arc::new(CredentialStore::new());
    let bus = EventBus::new();
    let shutdown = CancellationToken::new();
    let coordinator = RenewalCoordinator::new(
        MockTransport::new(),
        Arc::clone(&store),
        bus.clone(),
        &PipelineConfig::default(),
        shutdown.clone(),
    );
    let channel =
        NotificationChannel::spawn(connector.clone(), Arc::clone(&store), &bus, config, shutdown.clone());
    Harness { connector, peers, store, coordinator, channel, shutdown }
}

fn harness() -> Harness {
    harness_with(config())
}

/// Callback that forwards each delivered message id.
fn collector() -> (impl Fn(&Notification) + Send + Sync + 'static, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (move |n: &Notification| { let _ = tx.send(n.message_id.clone()); }, rx)
}

fn message(topic: &str, id: &str) -> InboundFrame {
    InboundFrame::Message(Notification {
        topic_id: topic.into(),
        message_id: id.into(),
        payload: serde_json::json!({"seq": id}),
    })
}

fn subscribe(topic: &str) -> ControlFrame {
    ControlFrame::Subscribe { topic: topic.into() }
}

async fn until_state(
    channel: &NotificationChannel,
    want: impl Fn(&ConnectionState) -> bool,
) -> anyhow::Result<()> {
    channel.watch_state().wait_for(|s| want(s)).await?;
    Ok(())
}

#[tokio::test]
async fn two_callbacks_share_a_topic_and_duplicates_are_dropped() -> anyhow::Result<()> {
    let mut h = harness();
    h.store.set(Credential::new("tok-1"));
    let (first, mut first_rx) = collector();
    let (second, mut second_rx) = collector();

    h.channel.subscribe("A", first);
    h.channel.subscribe("A", second);
    h.channel.connect(ENDPOINT);

    let mut peer = h.next_peer().await?;
    assert_eq!(peer.next_control().await, Some(subscribe("A")));

    peer.push(message("A", "m1")).await?;
    peer.push(message("A", "m1")).await?;
    peer.push(message("A", "m2")).await?;

    for rx in [&mut first_rx, &mut second_rx] {
        assert_eq!(rx.recv().await.as_deref(), Some("m1"));
        assert_eq!(rx.recv().await.as_deref(), Some("m2"));
    }

    let snapshot = h.channel.snapshot().await.ok_or_else(|| anyhow::anyhow!("actor stopped"))?;
    assert_eq!(snapshot.topics, vec!["A"]);
    assert_eq!(snapshot.callbacks, 2);
    assert!(peer.drain_controls().is_empty(), "second callback must not resubscribe");
    Ok(())
}

#[tokio::test]
async fn unsubscribe_goes_upstream_only_for_last_callback() -> anyhow::Result<()> {
    let mut h = harness();
    h.store.set(Credential::new("tok-1"));
    let (cb, _rx) = collector();
    let (cb2, _rx2) = collector();
    let one = h.channel.subscribe("A", cb);
    let two = h.channel.subscribe("A", cb2);
    h.channel.connect(ENDPOINT);
    let mut peer = h.next_peer().await?;
    assert_eq!(peer.next_control().await, Some(subscribe("A")));

    one.unsubscribe();
    let snapshot = h.channel.snapshot().await.ok_or_else(|| anyhow::anyhow!("actor stopped"))?;
    assert_eq!(snapshot.callbacks, 1);
    assert!(peer.drain_controls().is_empty());

    assert_eq!(two.topic(), "A");
    two.unsubscribe();
    assert_eq!(peer.next_control().await, Some(ControlFrame::Unsubscribe { topic: "A".into() }));
    Ok(())
}

#[tokio::test]
async fn messages_for_unknown_topics_are_ignored() -> anyhow::Result<()> {
    let mut h = harness();
    h.store.set(Credential::new("tok-1"));
    let (cb, mut rx) = collector();
    h.channel.subscribe("A", cb);
    h.channel.connect(ENDPOINT);
    let peer = h.next_peer().await?;

    peer.push(message("Z", "stray")).await?;
    peer.push(message("A", "m1")).await?;
    assert_eq!(rx.recv().await.as_deref(), Some("m1"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reconnect_backs_off_then_replays_subscriptions_in_order() -> anyhow::Result<()> {
    let mut h = harness();
    h.store.set(Credential::new("tok-1"));
    let (on_b, _b_rx) = collector();
    let (on_a, mut a_rx) = collector();
    h.channel.subscribe("B", on_b);
    h.channel.subscribe("A", on_a);
    h.channel.connect(ENDPOINT);

    let mut first = h.next_peer().await?;
    assert_eq!(first.next_control().await, Some(subscribe("B")));
    assert_eq!(first.next_control().await, Some(subscribe("A")));
    first.push(message("A", "m1")).await?;
    assert_eq!(a_rx.recv().await.as_deref(), Some("m1"));

    h.connector.refuse_next(3);
    drop(first);

    let mut second = h.next_peer().await?;
    assert_eq!(second.next_control().await, Some(subscribe("B")));
    assert_eq!(second.next_control().await, Some(subscribe("A")));
    assert!(h.channel.state().is_connected());

    let attempts = h.connector.attempts();
    assert_eq!(attempts.len(), 5);
    assert_eq!(
        attempts.iter().map(|a| a.accepted).collect::<Vec<_>>(),
        vec![true, false, false, false, true]
    );
    let gaps: Vec<u64> =
        attempts.windows(2).map(|w| (w[1].at - w[0].at).as_millis() as u64).collect();
    assert_eq!(gaps, vec![100, 200, 400, 800]);

    // The replayed backlog repeats m1; only m2 is new.
    second.push(message("A", "m1")).await?;
    second.push(message("A", "m2")).await?;
    assert_eq!(a_rx.recv().await.as_deref(), Some("m2"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_attempts() -> anyhow::Result<()> {
    let h = harness_with(ChannelConfig { max_reconnect_attempts: 3, ..config() });
    h.store.set(Credential::new("tok-1"));
    h.connector.refuse_next(10);

    h.channel.connect(ENDPOINT);
    let err = h.channel.wait_connected().await.err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::ReconnectExhausted));
    assert_eq!(
        h.channel.state(),
        ConnectionState::Disconnected { reason: DisconnectReason::Exhausted }
    );
    assert_eq!(h.connector.attempt_count(), 4);

    let attempts = h.connector.attempts();
    let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1].at - w[0].at).collect();
    assert!(gaps.windows(2).all(|g| g[1] >= g[0]));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.attempt_count(), 4);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn invalidation_cancels_pending_reconnect() -> anyhow::Result<()> {
    let mut h = harness();
    h.store.set(Credential::new("tok-1"));
    let (cb, _rx) = collector();
    h.channel.subscribe("A", cb);
    h.channel.connect(ENDPOINT);
    drop(h.next_peer().await?);

    until_state(&h.channel, |s| matches!(s, ConnectionState::Reconnecting { attempt: 1, .. })).await?;
    h.coordinator.invalidate(InvalidationReason::Logout);
    until_state(&h.channel, |s| {
        *s == ConnectionState::Disconnected { reason: DisconnectReason::Invalidated }
    })
    .await?;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.connector.attempt_count(), 1);
    assert!(h.peers.try_recv().is_err());
    let snapshot = h.channel.snapshot().await.ok_or_else(|| anyhow::anyhow!("actor stopped"))?;
    assert!(snapshot.topics.is_empty());
    assert_eq!(snapshot.callbacks, 0);
    Ok(())
}

#[tokio::test]
async fn invalidation_closes_live_link() -> anyhow::Result<()> {
    let mut h = harness();
    h.store.set(Credential::new("tok-1"));
    let (cb, _rx) = collector();
    h.channel.subscribe("A", cb);
    h.channel.connect(ENDPOINT);
    let mut peer = h.next_peer().await?;
    assert_eq!(peer.next_control().await, Some(subscribe("A")));

    h.coordinator.invalidate(InvalidationReason::RenewalFailed);

    assert_eq!(peer.next_control().await, None);
    assert!(peer.push(message("A", "late")).await.is_err());
    let err = h.channel.wait_connected().await.err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::RenewalFailed));
    Ok(())
}

#[tokio::test]
async fn connect_is_deferred_until_credential_renewed() -> anyhow::Result<()> {
    let mut h = harness();
    h.channel.connect(ENDPOINT);
    until_state(&h.channel, |s| {
        *s == ConnectionState::Disconnected { reason: DisconnectReason::AwaitingCredential }
    })
    .await?;
    assert_eq!(h.connector.attempt_count(), 0);

    h.coordinator.establish(Credential::new("tok-login"));
    let _peer = h.next_peer().await?;
    h.channel.wait_connected().await?;
    assert_eq!(h.connector.attempts()[0].bearer, "tok-login");
    assert_eq!(h.connector.attempts()[0].endpoint, ENDPOINT);
    Ok(())
}

#[tokio::test]
async fn deferred_connect_survives_failed_restore_and_connects_on_login() -> anyhow::Result<()> {
    let mut h = harness();
    let (cb, mut rx) = collector();
    h.channel.subscribe("A", cb);
    h.channel.connect(ENDPOINT);
    until_state(&h.channel, |s| {
        *s == ConnectionState::Disconnected { reason: DisconnectReason::AwaitingCredential }
    })
    .await?;

    // Restoring without a server-held proof fails and invalidates.
    h.coordinator.invalidate(InvalidationReason::RenewalFailed);
    let snapshot = h.channel.snapshot().await.ok_or_else(|| anyhow::anyhow!("actor stopped"))?;
    assert_eq!(snapshot.state, ConnectionState::Disconnected { reason: DisconnectReason::AwaitingCredential });
    assert_eq!(snapshot.topics, vec!["A".to_owned()]);
    assert_eq!(h.connector.attempt_count(), 0);

    h.coordinator.establish(Credential::new("tok-login"));
    let mut peer = h.next_peer().await?;
    h.channel.wait_connected().await?;
    assert_eq!(peer.next_control().await, Some(subscribe("A")));
    assert_eq!(h.connector.attempts()[0].bearer, "tok-login");

    peer.push(message("A", "m1")).await?;
    assert_eq!(rx.recv().await.as_deref(), Some("m1"));
    Ok(())
}

#[tokio::test]
async fn renewal_leaves_live_link_alone() -> anyhow::Result<()> {
    let mut h = harness();
    h.store.set(Credential::new("tok-1"));
    h.channel.connect(ENDPOINT);
    let _peer = h.next_peer().await?;
    h.channel.wait_connected().await?;

    h.coordinator.establish(Credential::new("tok-2"));
    // Round-trip through the actor so the event has been handled.
    h.channel.snapshot().await;
    assert_eq!(h.connector.attempt_count(), 1);
    assert!(h.channel.state().is_connected());
    Ok(())
}

#[tokio::test]
async fn reauth_required_reconnects_with_current_credential() -> anyhow::Result<()> {
    let mut h = harness();
    h.store.set(Credential::new("tok-1"));
    let (a, _a_rx) = collector();
    let (b, _b_rx) = collector();
    h.channel.subscribe("A", a);
    h.channel.subscribe("B", b);
    h.channel.connect(ENDPOINT);

    let mut first = h.next_peer().await?;
    assert_eq!(first.next_control().await, Some(subscribe("A")));
    assert_eq!(first.next_control().await, Some(subscribe("B")));

    h.store.set(Credential::new("tok-2"));
    first.push(InboundFrame::ReauthRequired).await?;
    assert_eq!(first.next_control().await, None);

    let mut second = h.next_peer().await?;
    assert_eq!(second.next_control().await, Some(subscribe("A")));
    assert_eq!(second.next_control().await, Some(subscribe("B")));
    let bearers: Vec<_> = h.connector.attempts().into_iter().map(|a| a.bearer).collect();
    assert_eq!(bearers, vec!["tok-1", "tok-2"]);
    Ok(())
}

#[tokio::test]
async fn refused_subscription_leaves_other_topics_working() -> anyhow::Result<()> {
    let mut h = harness();
    h.store.set(Credential::new("tok-1"));
    let mut failures = h.channel.subscription_failures();
    let (a, mut a_rx) = collector();
    let (b, mut b_rx) = collector();
    h.channel.subscribe("A", a);
    h.channel.subscribe("B", b);
    h.channel.connect(ENDPOINT);
    let peer = h.next_peer().await?;

    peer.push(InboundFrame::SubscribeError { topic: "A".into(), error: "forbidden".into() }).await?;
    let failure = failures.recv().await?;
    assert_eq!(failure, SubscriptionFailure { topic: "A".into(), error: "forbidden".into() });
    assert_eq!(failure.to_error().code, ErrorCode::SubscriptionFailed);

    peer.push(message("A", "m1")).await?;
    peer.push(message("B", "m2")).await?;
    assert_eq!(b_rx.recv().await.as_deref(), Some("m2"));
    assert!(a_rx.try_recv().is_err());

    let snapshot = h.channel.snapshot().await.ok_or_else(|| anyhow::anyhow!("actor stopped"))?;
    assert_eq!(snapshot.topics, vec!["B"]);
    assert!(snapshot.state.is_connected());
    Ok(())
}

#[tokio::test]
async fn disconnect_keeps_subscriptions_for_next_connect() -> anyhow::Result<()> {
    let mut h = harness();
    h.store.set(Credential::new("tok-1"));
    let (cb, _rx) = collector();
    h.channel.subscribe("A", cb);
    h.channel.connect(ENDPOINT);
    let mut first = h.next_peer().await?;
    assert_eq!(first.next_control().await, Some(subscribe("A")));

    h.channel.disconnect();
    assert_eq!(first.next_control().await, None);
    assert_eq!(
        h.channel.state(),
        ConnectionState::Disconnected { reason: DisconnectReason::Closed }
    );

    h.channel.connect(ENDPOINT);
    let mut second = h.next_peer().await?;
    assert_eq!(second.next_control().await, Some(subscribe("A")));
    Ok(())
}

#[tokio::test]
async fn shutdown_stops_the_actor() -> anyhow::Result<()> {
    let h = harness();
    h.shutdown.cancel();

    until_state(&h.channel, |s| {
        *s == ConnectionState::Disconnected { reason: DisconnectReason::Closed }
    })
    .await?;
    assert!(h.channel.snapshot().await.is_none());
    let err = h.channel.wait_connected().await.err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::Closed));
    Ok(())
}
