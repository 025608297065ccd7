// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket [`NotifyConnector`] over tokio-tungstenite.

use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::credential::Credential;
use crate::notify::{ControlFrame, InboundFrame, NotifyConnector, NotifyLink};

/// Opens one WebSocket per connect and pumps JSON frames between it and the
/// returned [`NotifyLink`]. The credential rides on the `token` query param.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl NotifyConnector for WsConnector {
    fn connect<'a>(
        &'a self,
        endpoint: &'a str,
        credential: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<NotifyLink>> + Send + 'a>> {
        Box::pin(async move {
            let url = build_ws_url(endpoint, credential.bearer())?;
            let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
            tracing::debug!(host = url.host_str().unwrap_or("-"), "notification WS connected");

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::channel(256);
            tokio::spawn(pump(stream, out_rx, in_tx));

            Ok(NotifyLink { outbound: out_tx, inbound: in_rx })
        })
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Runs until either side closes. Dropping `in_tx` on exit is what tells the
/// actor the link was lost.
async fn pump(
    stream: WsStream,
    mut out_rx: mpsc::UnboundedReceiver<ControlFrame>,
    in_tx: mpsc::Sender<InboundFrame>,
) {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = out_rx.recv() => {
                let Some(frame) = frame else {
                    // Link dropped by the actor.
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(err = %e, "failed to encode control frame");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    tracing::debug!(err = %e, "notification WS send failed");
                    break;
                }
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(frame) = InboundFrame::parse(text.as_str()) {
                        if in_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!("notification WS closed");
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(err = %e, "notification WS error");
                    break;
                }
                Some(Ok(_)) => {} // ping/pong/binary ignored
            },
        }
    }
}

/// Build the notification URL: `http(s)` becomes `ws(s)` and the bearer is
/// appended as `token`.
pub fn build_ws_url(endpoint: &str, token: &str) -> anyhow::Result<Url> {
    let ws = if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        endpoint.to_owned()
    };
    let mut url = Url::parse(&ws)?;
    if !matches!(url.scheme(), "ws" | "wss") {
        anyhow::bail!("unsupported notification endpoint scheme: {}", url.scheme());
    }
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}
