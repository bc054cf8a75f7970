//! In-process doubles for the external collaborators, shared by unit
//! tests across the crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};

use crate::auth::{AuthEvent, IdentityProvider, UserSession};
use crate::models::{Record, SyncTable};
use crate::remote::{ChangeFeed, ChangeNotification, RemoteError, RemoteStore};
use crate::sync::SyncEvent;

/// Remote store kept entirely in memory, with switchable failure modes.
pub(crate) struct MemoryRemoteStore {
    records: Mutex<HashMap<SyncTable, HashMap<String, Record>>>,
    events: Mutex<Vec<SyncEvent>>,
    changes: broadcast::Sender<ChangeNotification>,
    offline: AtomicBool,
    permanent_failure: AtomicBool,
    selects: AtomicUsize,
    subscriptions: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            records: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            changes,
            offline: AtomicBool::new(false),
            permanent_failure: AtomicBool::new(false),
            selects: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
        }
    }

    /// Simulate a network outage (transport errors everywhere).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Simulate the server rejecting payloads (permanent API error).
    pub fn set_permanent_failure(&self, failing: bool) {
        self.permanent_failure.store(failing, Ordering::SeqCst);
    }

    pub fn seed_record(&self, record: Record) {
        let mut records = self.records.lock().unwrap();
        records
            .entry(record.table())
            .or_default()
            .insert(record.id().to_string(), record);
    }

    pub fn seed_event(&self, event: SyncEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn records_in(&self, table: SyncTable) -> Vec<Record> {
        self.records
            .lock()
            .unwrap()
            .get(&table)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn select_count(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Push a change to every live subscription.
    pub fn push_change(&self, change: ChangeNotification) {
        let _ = self.changes.send(change);
    }

    fn check_failures(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::transport("network unreachable"));
        }
        if self.permanent_failure.load(Ordering::SeqCst) {
            return Err(RemoteError::api(422, "payload rejected"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn upsert(&self, table: SyncTable, record: &Record) -> Result<(), RemoteError> {
        self.check_failures()?;
        let mut records = self.records.lock().unwrap();
        records
            .entry(table)
            .or_default()
            .insert(record.id().to_string(), record.clone());
        Ok(())
    }

    async fn delete(
        &self,
        table: SyncTable,
        record_id: &str,
        _user_id: &str,
    ) -> Result<(), RemoteError> {
        self.check_failures()?;
        let mut records = self.records.lock().unwrap();
        if let Some(by_id) = records.get_mut(&table) {
            by_id.remove(record_id);
        }
        Ok(())
    }

    async fn select(&self, table: SyncTable, user_id: &str) -> Result<Vec<Record>, RemoteError> {
        self.check_failures()?;
        self.selects.fetch_add(1, Ordering::SeqCst);
        let records = self.records.lock().unwrap();
        Ok(records
            .get(&table)
            .map(|by_id| {
                by_id
                    .values()
                    .filter(|record| record.meta().user_id.as_deref() == Some(user_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append_event(&self, event: &SyncEvent) -> Result<(), RemoteError> {
        self.check_failures()?;
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn record_events(
        &self,
        table: SyncTable,
        record_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SyncEvent>, RemoteError> {
        self.check_failures()?;
        let events = self.events.lock().unwrap();
        Ok(events
            .iter()
            .filter(|event| {
                event.table == table
                    && event.record_id == record_id
                    && event.timestamp >= from
                    && event.timestamp <= to
            })
            .cloned()
            .collect())
    }

    async fn prune_events(&self, before: DateTime<Utc>) -> Result<u64, RemoteError> {
        self.check_failures()?;
        let mut events = self.events.lock().unwrap();
        let len_before = events.len();
        events.retain(|event| event.timestamp >= before);
        Ok((len_before - events.len()) as u64)
    }

    async fn subscribe(
        &self,
        table: SyncTable,
        _user_id: &str,
    ) -> Result<ChangeFeed, RemoteError> {
        self.check_failures()?;
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let mut source = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(change) => {
                        if change.table != table {
                            continue;
                        }
                        if tx.send(change).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(ChangeFeed::new(rx, Some(task)))
    }
}

/// Identity provider driven directly by tests.
pub(crate) struct StaticIdentity {
    session: Mutex<Option<UserSession>>,
    sender: broadcast::Sender<AuthEvent>,
}

impl StaticIdentity {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            session: Mutex::new(None),
            sender,
        }
    }

    pub fn sign_in(&self, user_id: &str) {
        let session = UserSession {
            user_id: user_id.to_string(),
            access_token: format!("token-{user_id}"),
        };
        *self.session.lock().unwrap() = Some(session.clone());
        let _ = self.sender.send(AuthEvent::SignedIn(session));
    }

    pub fn sign_out(&self) {
        *self.session.lock().unwrap() = None;
        let _ = self.sender.send(AuthEvent::SignedOut);
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_session(&self) -> Option<UserSession> {
        self.session.lock().unwrap().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.sender.subscribe()
    }
}
