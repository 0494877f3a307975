//! Result events: one structured record per processed job.
//!
//! These are reports for the logging collaborator, not state. Field order is
//! fixed per action kind (declaration order below).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::id::{CorrelationId, SnapshotId, VolumeId};

/// Which lifecycle operation produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateSnapshot,
    ExpireSnapshot,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreateSnapshot => "create_snapshot",
            Action::ExpireSnapshot => "expire_snapshot",
        }
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reported outcome of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Skipped,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Skipped => "skipped",
            Outcome::Error => "error",
        }
    }
}

impl core::fmt::Display for Outcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a delete request, reported on expire events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpireStatus {
    Incomplete,
    Completed,
    Skipped,
}

/// Fields specific to `create_snapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateDetail {
    pub volume_id: VolumeId,
    pub availability_zone: String,
    pub volume_tags: BTreeMap<String, String>,
    pub snapshot_tags: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<SnapshotId>,
    pub account: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fields specific to `expire_snapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpireDetail {
    pub status: ExpireStatus,
    pub region: String,
    pub snapshot_id: SnapshotId,
    pub age_days: i64,
    pub account: String,
    pub user_id: String,
    pub snapshot_tags: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EventDetail {
    Create(CreateDetail),
    Expire(ExpireDetail),
}

/// One structured record per completed or failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultEvent {
    pub action: Action,
    pub correlation_id: CorrelationId,
    pub subject_id: String,
    pub result: Outcome,
    #[serde(flatten)]
    pub detail: EventDetail,
}

impl ResultEvent {
    pub fn create(correlation_id: CorrelationId, result: Outcome, detail: CreateDetail) -> Self {
        Self {
            action: Action::CreateSnapshot,
            correlation_id,
            subject_id: detail.volume_id.to_string(),
            result,
            detail: EventDetail::Create(detail),
        }
    }

    pub fn expire(correlation_id: CorrelationId, result: Outcome, detail: ExpireDetail) -> Self {
        Self {
            action: Action::ExpireSnapshot,
            correlation_id,
            subject_id: detail.snapshot_id.to_string(),
            result,
            detail: EventDetail::Expire(detail),
        }
    }

    /// Snapshot created by this job, if any.
    pub fn created_snapshot_id(&self) -> Option<&SnapshotId> {
        match &self.detail {
            EventDetail::Create(d) => d.snapshot_id.as_ref(),
            EventDetail::Expire(_) => None,
        }
    }

    /// Error detail carried by `error` events.
    pub fn error(&self) -> Option<&str> {
        match &self.detail {
            EventDetail::Create(d) => d.error.as_deref(),
            EventDetail::Expire(d) => d.error.as_deref(),
        }
    }

    /// Compact JSON rendering, fields in declaration order.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"render_error\":\"{e}\"}}"))
    }
}
