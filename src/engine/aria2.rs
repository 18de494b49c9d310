//! aria2 JSON-RPC client
//!
//! Speaks JSON-RPC 2.0 over HTTP POST. When a secret is configured it is
//! sent as the first positional parameter in the form `token:<secret>`.
//! aria2 answers failed calls with an HTTP error status *and* a JSON-RPC
//! error object, so the body is decoded before the status is looked at.

use super::DownloadEngine;
use crate::config::RpcConfig;
use crate::error::{MonitorError, NetworkErrorKind, Result};
use crate::protocol::{Gid, StatusInfo};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: String,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Client for an aria2 JSON-RPC endpoint
pub struct Aria2Client {
    http: reqwest::Client,
    endpoint: Url,
    secret: Option<String>,
    next_id: AtomicU64,
}

impl Aria2Client {
    /// Create a client from the RPC configuration
    pub fn new(config: &RpcConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                MonitorError::network(
                    NetworkErrorKind::Other,
                    format!("Failed to create HTTP client: {}", e),
                )
            })?;

        Ok(Self {
            http,
            endpoint,
            secret: config.secret.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Endpoint this client posts to
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// `aria2.tellStatus`
    pub async fn tell_status(&self, gid: &Gid) -> Result<StatusInfo> {
        self.call("aria2.tellStatus", vec![Value::from(gid.as_str())]).await
    }

    /// `aria2.forceRemove`, returning the GID of the removed task
    pub async fn force_remove(&self, gid: &Gid) -> Result<Gid> {
        let removed: String = self
            .call("aria2.forceRemove", vec![Value::from(gid.as_str())])
            .await?;
        Ok(Gid::new(removed))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<T> {
        let mut params = Vec::with_capacity(args.len() + 1);
        if let Some(secret) = &self.secret {
            params.push(Value::from(format!("token:{}", secret)));
        }
        params.extend(args);

        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed).to_string(),
            method,
            params,
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        let decoded: RpcResponse<T> = match serde_json::from_slice(&body) {
            Ok(decoded) => decoded,
            Err(_) if !status.is_success() => {
                return Err(MonitorError::network(
                    NetworkErrorKind::HttpStatus(status.as_u16()),
                    format!("{} returned HTTP {}", method, status),
                ));
            }
            Err(e) => {
                return Err(MonitorError::network(
                    NetworkErrorKind::InvalidResponse,
                    format!("Malformed {} response: {}", method, e),
                ));
            }
        };

        if let Some(err) = decoded.error {
            return Err(MonitorError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        decoded.result.ok_or_else(|| {
            MonitorError::network(
                NetworkErrorKind::InvalidResponse,
                format!("{} response carried neither result nor error", method),
            )
        })
    }
}

#[async_trait]
impl DownloadEngine for Aria2Client {
    async fn status(&self, gid: &Gid) -> Result<StatusInfo> {
        self.tell_status(gid).await
    }

    async fn cancel(&self, gid: &Gid) -> Result<()> {
        self.force_remove(gid).await?;
        tracing::debug!("Engine task {} removed", gid);
        Ok(())
    }
}
