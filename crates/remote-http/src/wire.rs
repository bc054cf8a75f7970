//! Wire payloads exchanged with the ritmo cloud API.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use ritmo_core::remote::ChangeKind;

/// Error body returned by the cloud service.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorResponse {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response to an event-log prune request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PruneResponse {
    #[serde(default)]
    pub deleted: u64,
}

/// One change row from the polling endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireChange {
    pub event_type: ChangeKind,
    #[serde(default)]
    pub new: Option<serde_json::Value>,
    #[serde(default)]
    pub old: Option<serde_json::Value>,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

/// One page of the change feed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChangeBatchResponse {
    #[serde(default)]
    pub changes: Vec<WireChange>,
    pub next_cursor: i64,
}
