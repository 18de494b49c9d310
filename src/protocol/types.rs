//! Core protocol types
//!
//! Identifiers and the two state enums: the engine-reported state (parsed
//! once at the boundary) and the persisted task status.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Engine-assigned download handle (aria2 GID)
///
/// A GID names one engine task and may be replaced mid-flight when the
/// engine redirects the logical download (magnet metadata resolving into the
/// real transfer, for example).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gid(String);

impl Gid {
    pub fn new(gid: impl Into<String>) -> Self {
        Self(gid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Gid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Gid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a submitted transfer job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferJobId(Uuid);

impl TransferJobId {
    /// Create a new random job ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransferJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State reported by the engine, parsed once from its status string
///
/// Anything outside the known aria2 vocabulary is kept verbatim in
/// `Unknown` so it can be logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Active,
    Waiting,
    Paused,
    Complete,
    Error,
    Removed,
    Unknown(String),
}

impl EngineState {
    /// Parse an engine status string
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "waiting" => Self::Waiting,
            "paused" => Self::Paused,
            "complete" => Self::Complete,
            "error" => Self::Error,
            "removed" => Self::Removed,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Engine wire representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Waiting => "waiting",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Removed => "removed",
            Self::Unknown(raw) => raw,
        }
    }

    /// Whether the monitor stops polling once this state is observed
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active | Self::Waiting | Self::Paused)
    }
}

impl Default for EngineState {
    /// A response without a status is treated as an anomaly
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EngineState {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<EngineState> for String {
    fn from(state: EngineState) -> Self {
        state.as_str().to_string()
    }
}

impl Serialize for EngineState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EngineState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

/// Persisted lifecycle status of a download task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Waiting,
    Active,
    Paused,
    Complete,
    Error,
    Removed,
    Unknown,
}

impl TaskStatus {
    /// Statuses that may still cycle among themselves
    pub fn is_unfinished(&self) -> bool {
        matches!(self, Self::Waiting | Self::Active | Self::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Removed => "removed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "complete" => Ok(Self::Complete),
            "error" => Ok(Self::Error),
            "removed" => Ok(Self::Removed),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

impl From<&EngineState> for TaskStatus {
    fn from(state: &EngineState) -> Self {
        match state {
            EngineState::Active => Self::Active,
            EngineState::Waiting => Self::Waiting,
            EngineState::Paused => Self::Paused,
            EngineState::Complete => Self::Complete,
            EngineState::Error => Self::Error,
            EngineState::Removed => Self::Removed,
            EngineState::Unknown(_) => Self::Unknown,
        }
    }
}
