// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tether: client-side session resilience. Single-flight credential renewal
//! behind a request pipeline, and a self-healing notification channel.

pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod notify;
pub mod session;
pub mod test_support;
pub mod transport;

use tokio::sync::{broadcast, mpsc};

use crate::config::SessionConfig;
use crate::credential::Credential;
use crate::notify::{ConnectionState, DisconnectReason, Notification};
use crate::session::Session;

/// What the `tether` binary watches, beyond the session config.
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub topics: Vec<String>,
    /// Use this bearer instead of restoring the session from the server.
    pub token: Option<String>,
}

/// Establish a session, subscribe to `options.topics` and print each
/// notification as a JSON line until interrupted.
///
/// Returns an error when the session expires or the channel gives up.
pub async fn run(config: SessionConfig, options: WatchOptions) -> anyhow::Result<()> {
    let session = Session::new(config)?;
    let mut events = session.events();
    let mut state = session.notifications().watch_state();

    match options.token {
        Some(token) => session.establish(Credential::new(token)),
        None => session.restore().await?,
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
    for topic in &options.topics {
        let tx = tx.clone();
        session.subscribe(topic.clone(), move |n| {
            let _ = tx.send(n.clone());
        });
    }
    drop(tx);
    session.connect_notifications()?;
    tracing::info!(topics = options.topics.len(), "watching notifications");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let result = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Ok(()),
            Some(notification) = rx.recv() => {
                println!("{}", serde_json::to_string(&notification)?);
            }
            event = events.recv() => match event {
                Ok(event) if event.is_session_expired() => break Err(anyhow::anyhow!("session expired")),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = state.borrow_and_update().clone();
                if current == (ConnectionState::Disconnected { reason: DisconnectReason::Exhausted }) {
                    break Err(anyhow::anyhow!("notification reconnect attempts exhausted"));
                }
            }
        }
    };

    session.shutdown();
    result
}
