// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight credential renewal.
//!
//! Any number of callers may ask for a renewal at once; exactly one renewal
//! exchange is issued and every caller is released with its outcome. The
//! exchange runs in its own task so an abandoned initiator cannot strand the
//! queue.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::credential::{AuthGrant, Credential, CredentialStore};
use crate::error::{ErrorCode, SessionError};
use crate::events::{EventBus, InvalidationReason, SessionEvent};
use crate::transport::{CallRequest, CallTransport};

/// Completion handle of a caller suspended on an in-flight renewal.
type Waiter = oneshot::Sender<Result<Credential, SessionError>>;

/// Renewal progress. Only the coordinator touches it.
pub enum RenewalState {
    Idle,
    Renewing {
        /// Exchange sequence number, so a late result from a cancelled
        /// exchange is recognised and discarded.
        epoch: u64,
        /// Released in push order.
        waiters: Vec<Waiter>,
        cancel: CancellationToken,
    },
}

/// Owns the credential store's write side and the renewal state.
pub struct RenewalCoordinator {
    state: Mutex<RenewalState>,
    store: Arc<CredentialStore>,
    bus: EventBus,
    transport: Arc<dyn CallTransport>,
    renewal_path: String,
    exchanges: AtomicU64,
    shutdown: CancellationToken,
}

impl RenewalCoordinator {
    pub fn new(
        transport: Arc<dyn CallTransport>,
        store: Arc<CredentialStore>,
        bus: EventBus,
        config: &PipelineConfig,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RenewalState::Idle),
            store,
            bus,
            transport,
            renewal_path: config.renewal_path.clone(),
            exchanges: AtomicU64::new(0),
            shutdown,
        })
    }

    /// Obtain a credential newer than `stale`.
    ///
    /// Joins the in-flight exchange if there is one. When idle and the store
    /// already holds something other than `stale`, that credential is returned
    /// without an exchange: somebody renewed while the caller's request was in
    /// flight.
    pub async fn renew(self: &Arc<Self>, stale: Option<&Credential>) -> Result<Credential, SessionError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            match &mut *state {
                RenewalState::Renewing { waiters, .. } => {
                    tracing::debug!(queued = waiters.len() + 1, "joining in-flight renewal");
                    waiters.push(tx);
                }
                RenewalState::Idle => {
                    if let Some(current) = self.store.differs_from(stale) {
                        tracing::debug!("credential renewed concurrently, reusing it");
                        return Ok(current);
                    }
                    let epoch = self.exchanges.fetch_add(1, Ordering::Relaxed) + 1;
                    let cancel = self.shutdown.child_token();
                    *state = RenewalState::Renewing { epoch, waiters: vec![tx], cancel: cancel.clone() };
                    self.spawn_exchange(epoch, cancel);
                }
            }
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ErrorCode::RenewalFailed.with_message("renewal abandoned")),
        }
    }

    /// Store a credential obtained by login. Any callers waiting on a renewal
    /// are released with it.
    pub fn establish(&self, credential: Credential) {
        let waiters = {
            let mut state = self.state.lock();
            self.store.set(credential.clone());
            take_waiters(&mut state)
        };
        tracing::info!(identity = credential.identity().unwrap_or("-"), "credential established");
        for waiter in waiters {
            let _ = waiter.send(Ok(credential.clone()));
        }
        self.bus.publish(renewed_event(&credential));
    }

    /// Destroy the credential. Every waiter is failed before this returns and
    /// an in-flight exchange is cancelled; its result, should it still land,
    /// is discarded.
    pub fn invalidate(&self, reason: InvalidationReason) {
        let waiters = {
            let mut state = self.state.lock();
            self.store.clear();
            take_waiters(&mut state)
        };
        let err = match reason {
            InvalidationReason::Logout => SessionError::logged_out(),
            InvalidationReason::RenewalFailed => ErrorCode::RenewalFailed.with_message("session expired"),
        };
        tracing::info!(?reason, released = waiters.len(), "credential invalidated");
        for waiter in waiters {
            let _ = waiter.send(Err(err.clone()));
        }
        self.bus.publish(SessionEvent::Invalidated { reason });
    }

    /// Number of renewal exchanges issued so far.
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }

    pub fn is_renewing(&self) -> bool {
        matches!(*self.state.lock(), RenewalState::Renewing { .. })
    }

    /// Callers currently suspended on the in-flight renewal.
    pub fn pending_waiters(&self) -> usize {
        match &*self.state.lock() {
            RenewalState::Renewing { waiters, .. } => waiters.len(),
            RenewalState::Idle => 0,
        }
    }

    fn spawn_exchange(self: &Arc<Self>, epoch: u64, cancel: CancellationToken) {
        let this = Arc::clone(self);
        let guard = ExchangeGuard { coordinator: Some(Arc::clone(self)), epoch };
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(epoch, "renewal exchange cancelled");
                    guard.disarm();
                    this.abandon(epoch);
                    return;
                }
                outcome = this.exchange() => outcome,
            };
            guard.disarm();
            this.settle(epoch, outcome);
        });
    }

    /// Fail the waiters of a cancelled exchange that nobody else released
    /// (session shutdown). The store is left untouched.
    fn abandon(&self, epoch: u64) {
        let waiters = {
            let mut state = self.state.lock();
            match &*state {
                RenewalState::Renewing { epoch: current, .. } if *current == epoch => take_waiters(&mut state),
                _ => return,
            }
        };
        for waiter in waiters {
            let _ = waiter.send(Err(ErrorCode::RenewalFailed.with_message("renewal abandoned")));
        }
    }

    /// Perform one renewal exchange. Exempt from the renewal protocol: a
    /// rejection here is a plain failure.
    async fn exchange(&self) -> Result<Credential, SessionError> {
        let request = CallRequest::renewal_exchange(&self.renewal_path);
        let resp = self.transport.send(&request, None).await.map_err(|e| {
            ErrorCode::RenewalFailed.with_message(format!("renewal exchange failed: {e:#}"))
        })?;

        if !resp.is_success() {
            return Err(ErrorCode::RenewalFailed
                .with_message(format!("renewal rejected ({}): {}", resp.status, resp.text())));
        }

        let grant: AuthGrant =
            resp.json().map_err(|e| ErrorCode::RenewalFailed.with_message(e.message))?;
        Ok(grant.into_credential())
    }

    fn settle(&self, epoch: u64, outcome: Result<Credential, SessionError>) {
        let waiters = {
            let mut state = self.state.lock();
            match &*state {
                RenewalState::Renewing { epoch: current, .. } if *current == epoch => {}
                _ => {
                    tracing::debug!(epoch, "discarding result of superseded renewal");
                    return;
                }
            }
            match &outcome {
                Ok(credential) => self.store.set(credential.clone()),
                Err(_) => self.store.clear(),
            }
            take_waiters(&mut state)
        };

        match outcome {
            Ok(credential) => {
                tracing::info!(epoch, released = waiters.len(), "credential renewed");
                for waiter in waiters {
                    let _ = waiter.send(Ok(credential.clone()));
                }
                self.bus.publish(renewed_event(&credential));
            }
            Err(err) => {
                tracing::warn!(epoch, released = waiters.len(), err = %err, "credential renewal failed");
                for waiter in waiters {
                    let _ = waiter.send(Err(err.clone()));
                }
                self.bus.publish(SessionEvent::Invalidated { reason: InvalidationReason::RenewalFailed });
            }
        }
    }
}

/// Settles its exchange as failed when dropped armed, i.e. when the exchange
/// task unwound or was dropped before reaching `settle` or `abandon`.
struct ExchangeGuard {
    coordinator: Option<Arc<RenewalCoordinator>>,
    epoch: u64,
}

impl ExchangeGuard {
    fn disarm(mut self) {
        self.coordinator = None;
    }
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            tracing::warn!(epoch = self.epoch, "renewal exchange aborted");
            coordinator.settle(self.epoch, Err(ErrorCode::RenewalFailed.with_message("renewal exchange aborted")));
        }
    }
}

/// Reset the state to idle, cancelling any exchange, and hand back its waiters.
fn take_waiters(state: &mut RenewalState) -> Vec<Waiter> {
    match mem::replace(state, RenewalState::Idle) {
        RenewalState::Renewing { waiters, cancel, .. } => {
            cancel.cancel();
            waiters
        }
        RenewalState::Idle => Vec::new(),
    }
}

fn renewed_event(credential: &Credential) -> SessionEvent {
    SessionEvent::Renewed {
        identity: credential.identity().map(str::to_owned),
        validity_secs: credential.remaining().map(|d| d.as_secs()),
    }
}

#[cfg(test)]
#[path = "renewal_tests.rs"]
mod tests;
