//! Download engine adapters
//!
//! The monitor talks to the engine through [`DownloadEngine`]. The aria2
//! JSON-RPC client implements it over HTTP; the notification listener feeds
//! the engine's WebSocket push events into the dispatcher.

#[cfg(feature = "rpc")]
pub mod aria2;
#[cfg(feature = "notify")]
pub mod notify;

#[cfg(feature = "rpc")]
pub use aria2::Aria2Client;
#[cfg(feature = "notify")]
pub use notify::{parse_notification, NotificationListener};

use crate::error::Result;
use crate::protocol::{Gid, StatusInfo};
use async_trait::async_trait;

/// Query and control contract of the external download engine
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Current status of an engine task
    async fn status(&self, gid: &Gid) -> Result<StatusInfo>;

    /// Abort an engine task
    async fn cancel(&self, gid: &Gid) -> Result<()>;
}
