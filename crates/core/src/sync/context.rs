//! Top-level owner of the sync subsystem.
//!
//! All sync components are constructed here once and injected into each
//! other; nothing in the crate is a global. The context listens to
//! identity transitions, runs the background maintenance tick (duplicate
//! window sweep + due-queue drain), and tracks connectivity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration as TokioDuration};

use crate::auth::{AuthEvent, IdentityProvider, UserSession};
use crate::cache::LocalCache;
use crate::device::load_or_create_device_id;
use crate::errors::Result;
use crate::events::{AppEvent, NotificationBus, SyncState};
use crate::remote::RemoteStore;

use super::dedup::DuplicateDetector;
use super::event_log::EventLog;
use super::initial::InitialSyncManager;
use super::metrics::{SyncMetrics, SyncMetricsSnapshot};
use super::model::{DEDUP_SWEEP_INTERVAL_SECS, EVENT_RETENTION_DAYS};
use super::persist::LocalFirstStore;
use super::queue::{DrainOutcome, OperationQueue};
use super::router::ChangeRouter;

/// Shortest pause between background ticks when retries are imminent.
const MIN_TICK_MS: i64 = 250;

pub struct SyncContext {
    remote: Arc<dyn RemoteStore>,
    identity: Arc<dyn IdentityProvider>,
    bus: NotificationBus,
    device_id: String,
    metrics: Arc<SyncMetrics>,
    queue: Arc<OperationQueue>,
    dedup: Arc<DuplicateDetector>,
    event_log: Arc<EventLog>,
    store: Arc<LocalFirstStore>,
    initial_sync: Arc<InitialSyncManager>,
    router: Arc<ChangeRouter>,
    online: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncContext {
    /// Wire up the whole subsystem over the three external collaborators.
    pub fn new(
        cache: Arc<dyn LocalCache>,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Arc<Self>> {
        let device_id = load_or_create_device_id(cache.as_ref())?;
        let bus = NotificationBus::new();
        let metrics = Arc::new(SyncMetrics::new());
        let queue = Arc::new(OperationQueue::load(cache.clone(), metrics.clone()));
        let event_log = Arc::new(EventLog::new(remote.clone()));
        let dedup = Arc::new(DuplicateDetector::new(event_log.clone()));
        let store = Arc::new(LocalFirstStore::new(
            cache.clone(),
            remote.clone(),
            queue.clone(),
            event_log.clone(),
            metrics.clone(),
            device_id.clone(),
        ));
        let initial_sync = Arc::new(InitialSyncManager::new(
            cache.clone(),
            remote.clone(),
            event_log.clone(),
            bus.clone(),
            metrics.clone(),
            device_id.clone(),
        ));
        let router = Arc::new(ChangeRouter::new(
            cache,
            dedup.clone(),
            event_log.clone(),
            bus.clone(),
            metrics.clone(),
            device_id.clone(),
        ));

        Ok(Arc::new(Self {
            remote,
            identity,
            bus,
            device_id,
            metrics,
            queue,
            dedup,
            event_log,
            store,
            initial_sync,
            router,
            online: AtomicBool::new(true),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Begin reacting to identity transitions and start the maintenance
    /// tick. If a session is already active it is handled immediately.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if let Some(session) = self.identity.current_session() {
            self.handle_sign_in(&session).await;
        }

        let auth_rx = self.identity.subscribe();
        let auth_task = tokio::spawn(auth_loop(Arc::downgrade(self), auth_rx));
        let tick_task = tokio::spawn(background_loop(Arc::downgrade(self)));

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(auth_task);
            tasks.push(tick_task);
        }
        Ok(())
    }

    /// The mutation entry point for the embedding application.
    pub fn store(&self) -> Arc<LocalFirstStore> {
        Arc::clone(&self.store)
    }

    pub fn bus(&self) -> NotificationBus {
        self.bus.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.bus.subscribe()
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn pending_operations(&self) -> usize {
        self.queue.len()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Record a connectivity transition. Coming back online drains the
    /// queue immediately.
    pub async fn set_online(&self, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            log::info!(
                "[Sync] Back online, {} pending operation(s)",
                self.queue.len()
            );
            self.drain().await;
        } else if !online && was_online {
            self.emit_status(SyncState::Offline);
        }
    }

    /// Drain due queue entries now, if online and signed in. Without a
    /// session there are no credentials to replay under, so pending
    /// retries stay parked until the next sign-in prunes or drains them.
    pub async fn drain(&self) -> DrainOutcome {
        if !self.is_online() {
            return DrainOutcome::default();
        }
        if self.identity.current_session().is_none() {
            log::debug!("[Sync] Drain skipped: no active session");
            return DrainOutcome::default();
        }
        if !self.queue.is_empty() {
            self.emit_status(SyncState::Syncing);
        }
        let outcome = self.queue.process(self.remote.as_ref()).await;
        self.emit_status(if self.queue.is_empty() {
            SyncState::Idle
        } else {
            SyncState::Syncing
        });
        outcome
    }

    /// Maintenance: drop all pending operations (and their retries).
    pub fn clear_queue(&self) -> Result<usize> {
        self.queue.clear()
    }

    /// Maintenance: drop operations that have already failed at least
    /// once.
    pub fn clear_failed_operations(&self) -> Result<usize> {
        self.queue.clear_failed()
    }

    /// Maintenance: age out old entries from the remote event log.
    pub async fn prune_event_log(&self) -> Result<u64> {
        let removed = self
            .event_log
            .prune(chrono::Duration::days(EVENT_RETENTION_DAYS))
            .await?;
        if removed > 0 {
            log::info!("[Sync] Pruned {removed} event-log entries");
        }
        Ok(removed)
    }

    /// Stop background work and subscriptions.
    pub fn shutdown(&self) {
        self.router.stop();
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }

    async fn handle_sign_in(&self, session: &UserSession) {
        log::info!("[Sync] Signed in as {}", session.user_id);
        // Tear down anything belonging to a previous identity before this
        // one initializes.
        self.router.stop();
        self.dedup.clear();
        if let Err(err) = self.queue.retain_user(&session.user_id) {
            log::warn!("[Sync] Could not prune stale queue entries: {err}");
        }

        self.emit_status(SyncState::Syncing);
        match self.initial_sync.run(&session.user_id).await {
            Ok(report) => log::debug!(
                "[Sync] Initial sync finished for {} across {} table(s)",
                session.user_id,
                report.tables.len()
            ),
            Err(err) => log::warn!("[Sync] Initial sync failed: {err}"),
        }

        if let Err(err) = self.router.start(&self.remote, &session.user_id).await {
            log::warn!("[Sync] Realtime subscriptions failed: {err}");
        }

        if self.is_online() {
            self.drain().await;
        } else {
            self.emit_status(SyncState::Offline);
        }
    }

    async fn handle_sign_out(&self) {
        log::info!("[Sync] Signed out");
        self.router.stop();
        self.dedup.clear();
        self.initial_sync.forget_all().await;
        self.emit_status(SyncState::Idle);
    }

    fn emit_status(&self, state: SyncState) {
        self.bus.emit(AppEvent::SyncStatus {
            state,
            pending_operations: self.queue.len(),
            timestamp: Utc::now(),
        });
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn auth_loop(weak: Weak<SyncContext>, mut rx: broadcast::Receiver<AuthEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let Some(context) = weak.upgrade() else {
                    break;
                };
                match event {
                    AuthEvent::SignedIn(session) => context.handle_sign_in(&session).await,
                    AuthEvent::SignedOut => context.handle_sign_out().await,
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                log::warn!("[Sync] Auth listener lagged, missed {missed} event(s)");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn background_loop(weak: Weak<SyncContext>) {
    let mut last_sweep = Instant::now();
    loop {
        let delay_ms = {
            let Some(context) = weak.upgrade() else {
                break;
            };
            let now_ms = Utc::now().timestamp_millis();
            let mut delay_ms = DEDUP_SWEEP_INTERVAL_SECS as i64 * 1_000;
            if context.is_online() {
                if let Some(due_in) = context.queue.next_due_in_ms(now_ms) {
                    delay_ms = delay_ms.min(due_in.max(MIN_TICK_MS));
                }
            }
            delay_ms
        };

        sleep(TokioDuration::from_millis(delay_ms as u64)).await;

        let Some(context) = weak.upgrade() else {
            break;
        };
        if last_sweep.elapsed().as_secs() >= DEDUP_SWEEP_INTERVAL_SECS {
            let evicted = context.dedup.sweep(Utc::now());
            if evicted > 0 {
                log::debug!("[Sync] Evicted {evicted} duplicate-window entries");
            }
            last_sweep = Instant::now();
        }
        if context.is_online() && !context.queue.is_empty() {
            context.drain().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{read_collection, MemoryCache};
    use crate::models::{HabitRecord, Record, RecordMeta, SyncTable};
    use crate::test_support::{MemoryRemoteStore, StaticIdentity};

    const HABIT_ID: &str = "c0ffee00-1111-4222-8333-444444444444";

    fn habit(id: &str, name: &str) -> Record {
        Record::Habit(HabitRecord {
            meta: RecordMeta::new(id),
            name: name.to_string(),
            icon: None,
            color: None,
            target_per_week: 4,
            archived: false,
        })
    }

    struct Fixture {
        cache: Arc<MemoryCache>,
        remote: Arc<MemoryRemoteStore>,
        identity: Arc<StaticIdentity>,
        context: Arc<SyncContext>,
    }

    fn fixture() -> Fixture {
        let cache: Arc<MemoryCache> = Arc::new(MemoryCache::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let identity = Arc::new(StaticIdentity::new());
        let context =
            SyncContext::new(cache.clone(), remote.clone(), identity.clone()).unwrap();
        Fixture {
            cache,
            remote,
            identity,
            context,
        }
    }

    #[tokio::test]
    async fn offline_writes_all_reach_remote_after_reconnect() {
        let f = fixture();
        f.identity.sign_in("u1");
        f.remote.set_offline(true);
        f.context.set_online(false).await;

        let ids = [
            "c0ffee00-1111-4222-8333-000000000001",
            "c0ffee00-1111-4222-8333-000000000002",
            "c0ffee00-1111-4222-8333-000000000003",
        ];
        for id in ids {
            f.context
                .store()
                .save(habit(id, "offline"), Some("u1"))
                .await
                .unwrap();
        }
        assert_eq!(f.context.pending_operations(), 3);
        assert!(f.remote.records_in(SyncTable::Habits).is_empty());

        f.remote.set_offline(false);
        f.context.set_online(true).await;

        assert_eq!(f.context.pending_operations(), 0);
        assert_eq!(f.remote.records_in(SyncTable::Habits).len(), 3);
    }

    #[tokio::test]
    async fn offline_edit_wins_over_older_remote_version_after_reconnect() {
        let f = fixture();
        f.identity.sign_in("u1");
        // Device A's version reached the remote first.
        let mut from_a = habit(HABIT_ID, "from-device-a");
        from_a.meta_mut().device_id = Some("dA".to_string());
        from_a.meta_mut().user_id = Some("u1".to_string());
        f.remote.seed_record(from_a);

        // This device edits the same record while offline, slightly later.
        f.remote.set_offline(true);
        f.context
            .store()
            .save(habit(HABIT_ID, "from-device-b"), Some("u1"))
            .await
            .unwrap();

        f.remote.set_offline(false);
        f.context.set_online(true).await;

        let remote_records = f.remote.records_in(SyncTable::Habits);
        assert_eq!(remote_records.len(), 1);
        let Record::Habit(remote_habit) = &remote_records[0] else {
            panic!("habit");
        };
        assert_eq!(remote_habit.name, "from-device-b");
    }

    #[tokio::test]
    async fn sign_in_runs_initial_sync_and_starts_subscriptions() {
        let f = fixture();
        f.remote.seed_record({
            let mut record = habit(HABIT_ID, "remote-only");
            record.meta_mut().user_id = Some("u1".to_string());
            record
        });

        f.context.start().await.unwrap();
        f.identity.sign_in("u1");

        // Auth events are delivered on a background task.
        for _ in 0..50 {
            if f.remote.subscription_count() == SyncTable::ALL.len() {
                break;
            }
            sleep(TokioDuration::from_millis(10)).await;
        }
        assert_eq!(f.remote.subscription_count(), SyncTable::ALL.len());
        assert_eq!(f.remote.select_count(), SyncTable::ALL.len());

        f.context.shutdown();
    }

    #[tokio::test]
    async fn sign_out_then_sign_in_resyncs_from_scratch() {
        let f = fixture();
        f.context.start().await.unwrap();

        f.identity.sign_in("u1");
        for _ in 0..50 {
            if f.remote.select_count() == SyncTable::ALL.len() {
                break;
            }
            sleep(TokioDuration::from_millis(10)).await;
        }
        let after_first = f.remote.select_count();
        assert_eq!(after_first, SyncTable::ALL.len());

        f.identity.sign_out();
        f.identity.sign_in("u1");
        for _ in 0..50 {
            if f.remote.select_count() == after_first * 2 {
                break;
            }
            sleep(TokioDuration::from_millis(10)).await;
        }
        // Sign-out ended the session, so the next sign-in reconciles again.
        assert_eq!(f.remote.select_count(), after_first * 2);

        f.context.shutdown();
    }

    #[tokio::test]
    async fn local_cache_reflects_writes_regardless_of_remote_availability() {
        let f = fixture();
        f.remote.set_offline(true);
        f.context.set_online(false).await;

        f.context
            .store()
            .save(habit(HABIT_ID, "cached"), Some("u1"))
            .await
            .unwrap();

        let cached = read_collection(f.cache.as_ref(), SyncTable::Habits).unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(f.context.pending_operations(), 1);
    }
}
