//! Upload manifest entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable upload state of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// An attempt started and has not reported back
    Pending,
    Success,
    Failed,
}

/// Why a failed entry failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Retryable errors until the budget ran out; needs manual triage if it persists
    TransientExhausted,
    /// The backend refused the content
    Permanent,
}

impl FailureClass {
    pub fn describe(self) -> &'static str {
        match self {
            FailureClass::TransientExhausted => "retries exhausted",
            FailureClass::Permanent => "rejected",
        }
    }
}

/// Manifest record for one document key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Remote object identifier once known
    #[serde(default)]
    pub remote_id: Option<String>,
    pub display_name: String,
    pub status: UploadStatus,
    /// Time of the last state change
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub failure: Option<FailureClass>,
    /// Attempts across all runs
    #[serde(default)]
    pub attempts: u32,
    /// Hex SHA-256 of the content last sent
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl ManifestEntry {
    /// Fresh entry for a document that is about to be attempted.
    pub fn pending(display_name: impl Into<String>) -> Self {
        Self {
            remote_id: None,
            display_name: display_name.into(),
            status: UploadStatus::Pending,
            timestamp: Utc::now(),
            last_error: None,
            failure: None,
            attempts: 0,
            content_hash: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UploadStatus::Success
    }

    /// Whether the entry reached a final state for the current run.
    pub fn is_settled(&self) -> bool {
        matches!(self.status, UploadStatus::Success | UploadStatus::Failed)
    }
}
