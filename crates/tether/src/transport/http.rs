// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! reqwest-backed [`CallTransport`] for one API base URL.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;

use crate::credential::Credential;
use crate::transport::{CallRequest, CallResponse, CallTransport};

/// HTTP transport for business calls and the renewal exchange.
///
/// Keeps a cookie store so the server-held renewal proof set at login is
/// replayed on the renewal exchange without this layer ever reading it.
pub struct HttpTransport {
    base_url: String,
    client: Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).cookie_store(true).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { base_url, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn build(&self, request: &CallRequest, credential: Option<&Credential>) -> reqwest::RequestBuilder {
        let mut req = self.client.request(request.method().clone(), self.url(request.path()));
        if !request.query_pairs().is_empty() {
            req = req.query(request.query_pairs());
        }
        for (name, value) in request.headers() {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            req = req.json(body);
        }
        match credential {
            Some(credential) => req.bearer_auth(credential.bearer()),
            None => req,
        }
    }
}

impl CallTransport for HttpTransport {
    fn send<'a>(
        &'a self,
        request: &'a CallRequest,
        credential: Option<&'a Credential>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CallResponse>> + Send + 'a>> {
        Box::pin(async move {
            let resp = self.build(request, credential).send().await?;
            let status = resp.status().as_u16();
            let headers = resp
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_owned(), v.to_owned())))
                .collect();
            let body = resp.bytes().await?;
            Ok(CallResponse { status, headers, body })
        })
    }
}
