//! Engine status types
//!
//! The status response of an aria2-compatible engine (`aria2.tellStatus`).
//! Numeric fields arrive as decimal strings and may be malformed; they are
//! kept as strings here and parsed defensively by the reconciler.

use super::types::EngineState;
use serde::{Deserialize, Serialize};

/// One file of an engine task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileInfo {
    pub index: String,
    pub path: String,
    pub length: String,
    pub completed_length: String,
    pub selected: String,
}

/// Status of an engine task as reported by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusInfo {
    pub gid: String,
    pub status: EngineState,
    pub total_length: String,
    pub completed_length: String,
    pub download_speed: String,
    /// Temp-storage directory of the task
    pub dir: String,
    /// Files of the task; the first entry is the primary file
    pub files: Vec<FileInfo>,
    /// Identifiers the engine moved this task to
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub followed_by: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_code: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

impl StatusInfo {
    /// First non-empty redirect target, if the engine moved this task
    pub fn redirect_target(&self) -> Option<&str> {
        self.followed_by
            .first()
            .map(String::as_str)
            .filter(|gid| !gid.is_empty())
    }

    /// Path of the primary file, if any file is reported
    pub fn primary_path(&self) -> Option<&str> {
        self.files.first().map(|f| f.path.as_str())
    }
}

/// Parse an engine byte/byte-per-second count; malformed input yields zero.
pub fn parse_count(raw: &str) -> u64 {
    raw.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_aria2_tell_status() {
        let json = r#"{
            "gid": "2089b05ecca3d829",
            "status": "active",
            "totalLength": "1000",
            "completedLength": "500",
            "downloadSpeed": "42",
            "dir": "/tmp/x",
            "files": [{"index": "1", "path": "/tmp/x/file.iso", "length": "1000", "selected": "true"}],
            "connections": "4"
        }"#;
        let status: StatusInfo = serde_json::from_str(json).unwrap();
        assert_eq!(status.gid, "2089b05ecca3d829");
        assert_eq!(status.status, EngineState::Active);
        assert_eq!(status.primary_path(), Some("/tmp/x/file.iso"));
        assert_eq!(status.redirect_target(), None);
    }

    #[test]
    fn empty_followed_by_entry_is_not_a_redirect() {
        let status = StatusInfo {
            followed_by: vec![String::new()],
            ..Default::default()
        };
        assert_eq!(status.redirect_target(), None);

        let status = StatusInfo {
            followed_by: vec!["abc".to_string(), "def".to_string()],
            ..Default::default()
        };
        assert_eq!(status.redirect_target(), Some("abc"));
    }

    #[test]
    fn malformed_counts_are_zero() {
        assert_eq!(parse_count("1024"), 1024);
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("-5"), 0);
        assert_eq!(parse_count("12.5"), 0);
        assert_eq!(parse_count("1e9"), 0);
        assert_eq!(parse_count("99999999999999999999999"), 0);
    }
}
