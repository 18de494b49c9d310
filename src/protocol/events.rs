//! Status-change events
//!
//! Events pushed by the engine to wake a sleeping monitor. They carry no
//! authoritative state: the monitor always re-queries the engine.

use super::types::Gid;
use serde::{Deserialize, Serialize};

/// Kind of status change the engine announced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusEventKind {
    Started,
    Paused,
    Stopped,
    Completed,
    Failed,
    /// BitTorrent payload finished (seeding may continue)
    BtCompleted,
}

impl StatusEventKind {
    /// Map an aria2 notification method name to an event kind
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "aria2.onDownloadStart" => Some(Self::Started),
            "aria2.onDownloadPause" => Some(Self::Paused),
            "aria2.onDownloadStop" => Some(Self::Stopped),
            "aria2.onDownloadComplete" => Some(Self::Completed),
            "aria2.onDownloadError" => Some(Self::Failed),
            "aria2.onBtDownloadComplete" => Some(Self::BtCompleted),
            _ => None,
        }
    }
}

/// Wake signal addressed to the monitor of one GID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub gid: Gid,
    pub kind: StatusEventKind,
}

impl StatusEvent {
    pub fn new(gid: impl Into<Gid>, kind: StatusEventKind) -> Self {
        Self {
            gid: gid.into(),
            kind,
        }
    }
}
