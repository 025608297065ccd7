// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notification endpoint wire frames (JSON, tagged by `type`).

use serde::{Deserialize, Serialize};

/// Frames sent to the notification endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
}

/// A data frame delivered on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub topic_id: String,
    pub message_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Frames received from the notification endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Message(Notification),
    /// The endpoint wants the connection re-established with a fresh credential.
    ReauthRequired,
    SubscribeError { topic: String, error: String },
}

impl InboundFrame {
    /// Parse a text frame. Unknown or malformed frames yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::debug!(err = %e, "ignoring unrecognised notification frame");
                None
            }
        }
    }
}
