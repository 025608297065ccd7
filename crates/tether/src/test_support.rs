// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: scripted transports and connectors.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::Method;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;

use crate::credential::Credential;
use crate::notify::{ControlFrame, InboundFrame, NotifyConnector, NotifyLink};
use crate::transport::{AuthMode, CallRequest, CallResponse, CallTransport};

type Handler =
    Arc<dyn Fn(&CallRequest, Option<&Credential>) -> anyhow::Result<CallResponse> + Send + Sync>;

/// One request as seen by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCall {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub auth: AuthMode,
}

/// In-memory [`CallTransport`] with per-path handlers.
///
/// Unrouted paths answer 404. A path can be gated so its requests block until
/// the test releases them.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, Handler>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    sent: Mutex<Vec<SentCall>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route<F>(&self, path: &str, handler: F)
    where
        F: Fn(&CallRequest, Option<&Credential>) -> anyhow::Result<CallResponse> + Send + Sync + 'static,
    {
        self.routes.lock().insert(path.to_owned(), Arc::new(handler));
    }

    /// Answer 200 with `body` when the bearer is `token`, 401 otherwise.
    pub fn accepting(&self, path: &str, token: &str, body: serde_json::Value) {
        let token = token.to_owned();
        self.route(path, move |_, credential| {
            Ok(match credential {
                Some(c) if c.bearer() == token => CallResponse::json_body(200, &body),
                _ => CallResponse::new(401, "credential rejected"),
            })
        });
    }

    /// Renewal endpoint that always issues `token`.
    pub fn renewal_issues(&self, path: &str, token: &str) {
        let body = serde_json::json!({ "newCredential": token, "validitySeconds": 900 });
        self.route(path, move |_, _| Ok(CallResponse::json_body(200, &body)));
    }

    /// Renewal endpoint that always refuses.
    pub fn renewal_rejects(&self, path: &str) {
        self.route(path, |_, _| Ok(CallResponse::new(401, "renewal proof expired")));
    }

    /// Hold requests to `path` until [`MockTransport::release`] is called.
    pub fn gate(&self, path: &str) {
        self.gates.lock().insert(path.to_owned(), Arc::new(Semaphore::new(0)));
    }

    /// Let `n` gated requests to `path` through.
    pub fn release(&self, path: &str, n: usize) {
        if let Some(gate) = self.gates.lock().get(path) {
            gate.add_permits(n);
        }
    }

    pub fn sent(&self) -> Vec<SentCall> {
        self.sent.lock().clone()
    }

    /// Requests sent to `path` so far, gated or not.
    pub fn count(&self, path: &str) -> usize {
        self.sent.lock().iter().filter(|c| c.path == path).count()
    }
}

impl CallTransport for MockTransport {
    fn send<'a>(
        &'a self,
        request: &'a CallRequest,
        credential: Option<&'a Credential>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CallResponse>> + Send + 'a>> {
        Box::pin(async move {
            self.sent.lock().push(SentCall {
                method: request.method().clone(),
                path: request.path().to_owned(),
                bearer: credential.map(|c| c.bearer().to_owned()),
                auth: request.auth(),
            });

            let gate = self.gates.lock().get(request.path()).cloned();
            if let Some(gate) = gate {
                gate.acquire().await?.forget();
            }

            let handler = self.routes.lock().get(request.path()).cloned();
            match handler {
                Some(handler) => handler(request, credential),
                None => Ok(CallResponse::new(404, "no route")),
            }
        })
    }
}

/// One connect attempt as seen by [`MockConnector`].
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub endpoint: String,
    pub bearer: String,
    pub at: Instant,
    pub accepted: bool,
}

/// Server side of a link accepted by [`MockConnector`]. Dropping it makes
/// the client see the connection as lost.
pub struct MockPeer {
    pub inbound: mpsc::Sender<InboundFrame>,
    pub outbound: mpsc::UnboundedReceiver<ControlFrame>,
}

impl MockPeer {
    pub async fn push(&self, frame: InboundFrame) -> anyhow::Result<()> {
        self.inbound.send(frame).await.map_err(|_| anyhow::anyhow!("client dropped the link"))
    }

    /// Next control frame sent by the client, or `None` once it closed the link.
    pub async fn next_control(&mut self) -> Option<ControlFrame> {
        self.outbound.recv().await
    }

    /// Control frames already sent by the client, without waiting.
    pub fn drain_controls(&mut self) -> Vec<ControlFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Scripted [`NotifyConnector`]. Accepts by default; [`MockConnector::refuse_next`]
/// queues failures. Every accepted link is handed to the test as a [`MockPeer`].
pub struct MockConnector {
    refusals: Mutex<VecDeque<String>>,
    attempts: Mutex<Vec<ConnectAttempt>>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector =
            Arc::new(Self { refusals: Mutex::new(VecDeque::new()), attempts: Mutex::new(Vec::new()), peers });
        (connector, rx)
    }

    /// Fail the next `n` connect attempts.
    pub fn refuse_next(&self, n: usize) {
        let mut refusals = self.refusals.lock();
        for _ in 0..n {
            refusals.push_back("connection refused".to_owned());
        }
    }

    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }
}

impl NotifyConnector for MockConnector {
    fn connect<'a>(
        &'a self,
        endpoint: &'a str,
        credential: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<NotifyLink>> + Send + 'a>> {
        Box::pin(async move {
            let refusal = self.refusals.lock().pop_front();
            self.attempts.lock().push(ConnectAttempt {
                endpoint: endpoint.to_owned(),
                bearer: credential.bearer().to_owned(),
                at: Instant::now(),
                accepted: refusal.is_none(),
            });
            if let Some(reason) = refusal {
                anyhow::bail!(reason);
            }

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::channel(64);
            let _ = self.peers.send(MockPeer { inbound: in_tx, outbound: out_rx });
            Ok(NotifyLink { outbound: out_tx, inbound: in_rx })
        })
    }
}
