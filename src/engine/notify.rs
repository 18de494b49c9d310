//! aria2 WebSocket notifications
//!
//! aria2 pushes JSON-RPC notifications such as
//! `{"jsonrpc":"2.0","method":"aria2.onDownloadComplete","params":[{"gid":"..."}]}`
//! over its WebSocket endpoint. The listener turns them into
//! [`StatusEvent`]s and publishes them to the dispatcher.

use crate::config::NotifyConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::{MonitorError, NetworkErrorKind, Result};
use crate::protocol::{StatusEvent, StatusEventKind};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct Notification {
    method: String,
    #[serde(default)]
    params: Vec<NotificationParam>,
}

#[derive(Debug, Deserialize)]
struct NotificationParam {
    #[serde(default)]
    gid: String,
}

/// Parse one notification frame into wake events.
///
/// Responses, unknown methods and malformed frames yield no events.
pub fn parse_notification(text: &str) -> Vec<StatusEvent> {
    let Ok(notification) = serde_json::from_str::<Notification>(text) else {
        return Vec::new();
    };
    let Some(kind) = StatusEventKind::from_method(&notification.method) else {
        return Vec::new();
    };

    notification
        .params
        .into_iter()
        .filter(|p| !p.gid.is_empty())
        .map(|p| StatusEvent::new(p.gid, kind))
        .collect()
}

/// Long-running WebSocket client publishing engine notifications
pub struct NotificationListener {
    endpoint: String,
    reconnect_delay: Duration,
    dispatcher: Arc<EventDispatcher>,
}

impl NotificationListener {
    pub fn new(config: &NotifyConfig, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            dispatcher,
        }
    }

    /// Publish every event carried by one frame; returns the number of
    /// inboxes woken
    pub fn handle_text(&self, text: &str) -> usize {
        parse_notification(text)
            .into_iter()
            .map(|event| {
                tracing::debug!("Engine notification {:?} for {}", event.kind, event.gid);
                self.dispatcher.publish(&event.gid, event.clone())
            })
            .sum()
    }

    /// Listen until `shutdown` fires, reconnecting after each dropped session
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.session(&shutdown) => match result {
                    Ok(()) => break,
                    Err(e) => tracing::warn!(
                        "Notification stream from {} dropped: {}",
                        self.endpoint,
                        e
                    ),
                },
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
        tracing::debug!("Notification listener stopped");
    }

    /// One connection; `Ok` only when shut down cleanly
    async fn session(&self, shutdown: &CancellationToken) -> Result<()> {
        let (mut stream, _) = connect_async(self.endpoint.as_str()).await.map_err(|e| {
            MonitorError::network(
                NetworkErrorKind::ConnectionRefused,
                format!("WebSocket connection failed: {}", e),
            )
        })?;
        tracing::info!("Listening for engine notifications on {}", self.endpoint);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_text(text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(MonitorError::network(
                            NetworkErrorKind::WebSocket,
                            "WebSocket closed by engine",
                        ));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
            }
        }
    }
}
