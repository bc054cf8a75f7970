//! HTTP client for the ritmo cloud API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio::time::sleep;

use ritmo_core::auth::IdentityProvider;
use ritmo_core::models::{Record, SyncTable};
use ritmo_core::remote::{
    ChangeFeed, ChangeNotification, RemoteError, RemoteStore,
};
use ritmo_core::sync::SyncEvent;

use crate::wire::{ApiErrorResponse, ChangeBatchResponse, PruneResponse, WireChange};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const MAX_LOG_BODY_CHARS: usize = 512;
const DEVICE_ID_HEADER: &str = "x-ritmo-device-id";
const CHANGE_PAGE_LIMIT: usize = 200;

fn map_transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_decode() {
        RemoteError::payload(err.to_string())
    } else {
        RemoteError::transport(err.to_string())
    }
}

fn log_response(status: reqwest::StatusCode, body: &str) {
    if status.is_success() {
        log::debug!("API response status: {status}");
        return;
    }

    let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
    if body.chars().count() > MAX_LOG_BODY_CHARS {
        preview.push_str("...");
    }
    log::debug!("API response error ({status}): {preview}");
}

/// Client for the ritmo cloud record/event API.
///
/// The "realtime" subscription is a cursor poll against the table's change
/// endpoint; dropping the returned feed stops the poller.
#[derive(Clone)]
pub struct RestRemoteStore {
    client: reqwest::Client,
    base_url: String,
    identity: Arc<dyn IdentityProvider>,
    device_id: String,
    poll_interval: Duration,
}

impl RestRemoteStore {
    /// Create a client for `base_url` (e.g. "https://api.ritmo.app").
    pub fn new(
        base_url: &str,
        identity: Arc<dyn IdentityProvider>,
        device_id: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|err| RemoteError::transport(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            identity,
            device_id: device_id.into(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn headers(&self) -> Result<HeaderMap, RemoteError> {
        let session = self
            .identity
            .current_session()
            .ok_or_else(|| RemoteError::auth("No active session"))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", session.access_token))
            .map_err(|_| RemoteError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let device_value = HeaderValue::from_str(&self.device_id)
            .map_err(|_| RemoteError::auth("Invalid device id format"))?;
        headers.insert(DEVICE_ID_HEADER, device_value);

        Ok(headers)
    }

    fn records_url(&self, table: SyncTable) -> String {
        format!("{}/v1/tables/{}/records", self.base_url, table)
    }

    fn record_url(&self, table: SyncTable, record_id: &str) -> String {
        format!(
            "{}/{}",
            self.records_url(table),
            urlencoding::encode(record_id)
        )
    }

    fn events_url(&self) -> String {
        format!("{}/v1/sync-events", self.base_url)
    }

    fn changes_url(&self, table: SyncTable) -> String {
        format!("{}/v1/tables/{}/changes", self.base_url, table)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;
        log_response(status, &body);

        if !status.is_success() {
            return Err(Self::error_from_body(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|err| {
            log::error!("Failed to deserialize response. Body: {body}, Error: {err}");
            RemoteError::payload(format!("Failed to parse response: {err}"))
        })
    }

    async fn expect_success(response: reqwest::Response) -> Result<(), RemoteError> {
        let status = response.status();
        if status.is_success() {
            log::debug!("API response status: {status}");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        log_response(status, &body);
        Err(Self::error_from_body(status.as_u16(), &body))
    }

    fn error_from_body(status: u16, body: &str) -> RemoteError {
        if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(body) {
            if let Some(message) = error.message {
                let code = error.code.unwrap_or_else(|| "error".to_string());
                return RemoteError::api(status, format!("{code}: {message}"));
            }
        }
        RemoteError::api(status, format!("Request failed: {body}"))
    }

    fn decode_rows(table: SyncTable, rows: Vec<serde_json::Value>) -> Result<Vec<Record>, RemoteError> {
        rows.into_iter()
            .map(|row| {
                Record::from_row(table, row)
                    .map_err(|err| RemoteError::payload(format!("Invalid {table} row: {err}")))
            })
            .collect()
    }

    fn decode_change(
        table: SyncTable,
        wire: WireChange,
    ) -> Result<ChangeNotification, RemoteError> {
        let decode = |row: serde_json::Value| {
            Record::from_row(table, row)
                .map_err(|err| RemoteError::payload(format!("Invalid {table} change row: {err}")))
        };
        Ok(ChangeNotification {
            kind: wire.event_type,
            table,
            new: wire.new.map(decode).transpose()?,
            old: wire.old.map(decode).transpose()?,
            observed_at: wire.observed_at.unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn upsert(&self, table: SyncTable, record: &Record) -> Result<(), RemoteError> {
        let row = record
            .to_row()
            .map_err(|err| RemoteError::payload(err.to_string()))?;
        let response = self
            .client
            .put(self.record_url(table, record.id()))
            .headers(self.headers()?)
            .json(&row)
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::expect_success(response).await
    }

    async fn delete(
        &self,
        table: SyncTable,
        record_id: &str,
        user_id: &str,
    ) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(self.record_url(table, record_id))
            .headers(self.headers()?)
            .query(&[("userId", user_id)])
            .send()
            .await
            .map_err(map_transport_error)?;

        // Deleting a row that is already gone is a benign no-op.
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        Self::expect_success(response).await
    }

    async fn select(&self, table: SyncTable, user_id: &str) -> Result<Vec<Record>, RemoteError> {
        let response = self
            .client
            .get(self.records_url(table))
            .headers(self.headers()?)
            .query(&[("userId", user_id)])
            .send()
            .await
            .map_err(map_transport_error)?;

        // A table that does not exist yet reads as an empty collection.
        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        let rows: Vec<serde_json::Value> = Self::parse_response(response).await?;
        Self::decode_rows(table, rows)
    }

    async fn append_event(&self, event: &SyncEvent) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.events_url())
            .headers(self.headers()?)
            .json(event)
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::expect_success(response).await
    }

    async fn record_events(
        &self,
        table: SyncTable,
        record_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SyncEvent>, RemoteError> {
        let from_ms = from.timestamp_millis().to_string();
        let to_ms = to.timestamp_millis().to_string();
        let response = self
            .client
            .get(self.events_url())
            .headers(self.headers()?)
            .query(&[
                ("table", table.as_str()),
                ("recordId", record_id),
                ("fromMs", from_ms.as_str()),
                ("toMs", to_ms.as_str()),
            ])
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        Self::parse_response(response).await
    }

    async fn prune_events(&self, before: DateTime<Utc>) -> Result<u64, RemoteError> {
        let response = self
            .client
            .delete(self.events_url())
            .headers(self.headers()?)
            .query(&[("beforeMs", before.timestamp_millis().to_string())])
            .send()
            .await
            .map_err(map_transport_error)?;
        let pruned: PruneResponse = Self::parse_response(response).await?;
        Ok(pruned.deleted)
    }

    async fn subscribe(
        &self,
        table: SyncTable,
        user_id: &str,
    ) -> Result<ChangeFeed, RemoteError> {
        // Establish the starting cursor up front so subscription problems
        // (bad auth, unknown table) surface to the caller instead of
        // looping silently.
        let response = self
            .client
            .get(self.changes_url(table))
            .headers(self.headers()?)
            .query(&[("userId", user_id), ("limit", "0")])
            .send()
            .await
            .map_err(map_transport_error)?;
        let initial: ChangeBatchResponse = Self::parse_response(response).await?;
        let mut cursor = initial.next_cursor;

        let (tx, rx) = mpsc::channel(64);
        let store = self.clone();
        let user_id = user_id.to_string();
        let task = tokio::spawn(async move {
            loop {
                let page = async {
                    let after = cursor.to_string();
                    let limit = CHANGE_PAGE_LIMIT.to_string();
                    let response = store
                        .client
                        .get(store.changes_url(table))
                        .headers(store.headers()?)
                        .query(&[
                            ("userId", user_id.as_str()),
                            ("after", after.as_str()),
                            ("limit", limit.as_str()),
                        ])
                        .send()
                        .await
                        .map_err(map_transport_error)?;
                    Self::parse_response::<ChangeBatchResponse>(response).await
                }
                .await;

                match page {
                    Ok(batch) => {
                        cursor = batch.next_cursor;
                        for wire in batch.changes {
                            match Self::decode_change(table, wire) {
                                Ok(change) => {
                                    if tx.send(change).await.is_err() {
                                        return;
                                    }
                                }
                                Err(err) => {
                                    log::warn!("[Remote] Dropping undecodable {table} change: {err}");
                                }
                            }
                        }
                    }
                    Err(err) => {
                        log::warn!("[Remote] Change poll failed for {table}: {err}");
                    }
                }

                sleep(store.poll_interval).await;
            }
        });

        Ok(ChangeFeed::new(rx, Some(task)))
    }
}
