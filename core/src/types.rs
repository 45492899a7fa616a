//! Decoded response shapes.
//!
//! # Design
//! These types are defined independently from the mock-server crate;
//! integration tests catch any drift between the two.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IdsError;

/// Availability of a data selection across the storage tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Online,
    Restoring,
    Archived,
    /// Part of the selection is online and part is not.
    Incomplete,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Online => "ONLINE",
            Status::Restoring => "RESTORING",
            Status::Archived => "ARCHIVED",
            Status::Incomplete => "INCOMPLETE",
        }
    }
}

impl FromStr for Status {
    type Err = IdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONLINE" => Ok(Status::Online),
            "RESTORING" => Ok(Status::Restoring),
            "ARCHIVED" => Ok(Status::Archived),
            "INCOMPLETE" => Ok(Status::Incomplete),
            other => Err(IdsError::internal(format!("unknown status {other}"))),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque token returned by `prepare_data`. The server alone decides how
/// long it stays valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreparedId(String);

impl PreparedId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PreparedId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for PreparedId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for PreparedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Queue and lock state reported by `getServiceStatus`.
///
/// Queue entries are kept as raw JSON; fields this client does not model are
/// preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(default)]
    pub ops_queue: Vec<serde_json::Value>,
    #[serde(default)]
    pub prep_queue: Vec<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Success body of `put`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    pub id: i64,
    pub checksum: u64,
}

/// Success body of `getDatafileIds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatafileIds {
    pub ids: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_words_parse() {
        for status in [Status::Online, Status::Restoring, Status::Archived, Status::Incomplete] {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("online".parse::<Status>().is_err());
    }

    #[test]
    fn service_status_keeps_unknown_fields() {
        let status: ServiceStatus = serde_json::from_str(
            r#"{"opsQueue":[{"request":"ARCHIVE","data":"ds 4"}],"prepQueue":[],"lockedDs":[4]}"#,
        )
        .unwrap();
        assert_eq!(status.ops_queue.len(), 1);
        assert!(status.prep_queue.is_empty());
        assert_eq!(status.extra["lockedDs"], serde_json::json!([4]));
    }

    #[test]
    fn service_status_tolerates_missing_queues() {
        let status: ServiceStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(status, ServiceStatus::default());
    }

    #[test]
    fn put_response_decodes() {
        let put: PutResponse = serde_json::from_str(r#"{"id":42,"checksum":3632233996}"#).unwrap();
        assert_eq!(put.id, 42);
        assert_eq!(put.checksum, 3632233996);
    }
}
