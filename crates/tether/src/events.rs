// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session event bus.
//!
//! The only path by which credential changes reach the notification channel
//! and the application shell. Publishing never blocks; slow receivers lag and
//! skip rather than stall the coordinator.

use serde::Serialize;
use tokio::sync::broadcast;

/// Why the session's credential was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    /// Explicit logout or session shutdown.
    Logout,
    /// The renewal exchange failed. This is the session-expired signal.
    RenewalFailed,
}

/// Events published by the renewal coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A new credential is in the store (login or successful renewal).
    Renewed {
        #[serde(skip_serializing_if = "Option::is_none")]
        identity: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        validity_secs: Option<u64>,
    },
    /// The credential was cleared.
    Invalidated { reason: InvalidationReason },
}

impl SessionEvent {
    /// True for the event the application shell uses to force re-authentication.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::Invalidated { reason: InvalidationReason::RenewalFailed })
    }
}

/// Broadcast hub for [`SessionEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        tracing::debug!(event = ?event, receivers = self.tx.receiver_count(), "session event");
        // No receivers is fine: nobody is listening yet.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_publish_order() -> anyhow::Result<()> {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(SessionEvent::Renewed { identity: None, validity_secs: Some(60) });
        bus.publish(SessionEvent::Invalidated { reason: InvalidationReason::Logout });

        assert!(matches!(rx.recv().await?, SessionEvent::Renewed { validity_secs: Some(60), .. }));
        assert_eq!(
            rx.recv().await?,
            SessionEvent::Invalidated { reason: InvalidationReason::Logout }
        );
        Ok(())
    }

    #[test]
    fn publish_without_receivers_is_harmless() {
        EventBus::new().publish(SessionEvent::Invalidated { reason: InvalidationReason::Logout });
    }

    #[test]
    fn session_expired_only_on_renewal_failure() {
        assert!(SessionEvent::Invalidated { reason: InvalidationReason::RenewalFailed }
            .is_session_expired());
        assert!(!SessionEvent::Invalidated { reason: InvalidationReason::Logout }
            .is_session_expired());
    }

    #[test]
    fn wire_shape_is_tagged() -> anyhow::Result<()> {
        let json = serde_json::to_value(SessionEvent::Invalidated {
            reason: InvalidationReason::RenewalFailed,
        })?;
        assert_eq!(json, serde_json::json!({"type": "invalidated", "reason": "renewal_failed"}));
        Ok(())
    }
}
