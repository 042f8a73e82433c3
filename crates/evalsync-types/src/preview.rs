//! Preview and detail projections of a log run.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tree::Node;

/// Lifecycle status of an evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Started,
    Success,
    Error,
    Cancelled,
}

impl RunStatus {
    /// A started run is still producing samples and is eligible for live
    /// streaming.
    pub fn is_running(self) -> bool {
        matches!(self, RunStatus::Started)
    }
}

/// Headline metric chosen by the server for display in listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryMetric {
    pub name: String,
    pub value: f64,
}

/// Lightweight summary of a run, cheap to fetch in batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPreview {
    pub name: String,
    pub status: RunStatus,
    pub task: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_metric: Option<PrimaryMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregate results for a completed (or partially completed) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResults {
    pub total_samples: usize,
    pub completed_samples: usize,
    #[serde(default)]
    pub metrics: Vec<PrimaryMetric>,
}

/// Full per-run detail: results plus one summary per sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogDetails {
    pub name: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<RunResults>,
    #[serde(default)]
    pub sample_summaries: Vec<SampleSummary>,
}

/// Sample identifier; the original data model allows both text and numeric
/// ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleId {
    Index(i64),
    Text(String),
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleId::Index(i) => write!(f, "{i}"),
            SampleId::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for SampleId {
    fn from(value: i64) -> Self {
        SampleId::Index(value)
    }
}

impl From<&str> for SampleId {
    fn from(value: &str) -> Self {
        SampleId::Text(value.to_string())
    }
}

/// Summary information for one sample of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub id: SampleId,
    pub epoch: u32,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub scores: BTreeMap<String, Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// True once the sample's data has been durably flushed to the log file.
    #[serde(default)]
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_id_serde_untagged() {
        let id: SampleId = serde_json::from_str("42").unwrap();
        assert_eq!(id, SampleId::Index(42));
        let id: SampleId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id, SampleId::Text("abc".to_string()));
    }

    #[test]
    fn test_run_status_serde() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Started).unwrap(),
            "\"started\""
        );
        assert!(RunStatus::Started.is_running());
        assert!(!RunStatus::Success.is_running());
    }
}
