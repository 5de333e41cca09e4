//! Watchdog - resumes suspended processes whose wait conditions resolved

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::config::WatchdogConfig;
use super::handler::{HandlerOutcome, HandlerTable};
use super::resumer::{ProcessResumer, ResumeRequest};
use super::signals::SignalBoard;
use crate::domain::{ProcessKey, StoreResult, WaitCondition, WaitStore, WaitingProcess};

/// Counters for one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchdogStats {
    /// Records fetched
    pub scanned: usize,
    /// Records whose conditions were rewritten and persisted
    pub updated: usize,
    /// Resume requests accepted
    pub resumed: usize,
    /// Writes lost to a concurrent update
    pub conflicts: usize,
    /// Records that failed and were left as they were
    pub errors: usize,
    /// Short page: the next poll starts from the beginning
    pub wrapped: bool,
}

enum RecordOutcome {
    Unchanged,
    Updated,
    Resumed,
    Conflict,
}

/// Cursor-driven poller over waiting records
///
/// Each poll reads one page of waiting records above the cursor, runs every
/// condition through the handler for its kind and persists the result with a
/// version-checked write. A resume request is only sent after that write wins,
/// so two replicas racing on the same record resume it at most once.
pub struct Watchdog {
    waits: Arc<dyn WaitStore>,
    handlers: HandlerTable,
    resumer: Arc<dyn ProcessResumer>,
    signals: Option<Arc<SignalBoard>>,
    config: WatchdogConfig,
    cursor: Option<i64>,
}

impl Watchdog {
    pub fn new(
        waits: Arc<dyn WaitStore>,
        handlers: HandlerTable,
        resumer: Arc<dyn ProcessResumer>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            waits,
            handlers,
            resumer,
            signals: None,
            config,
            cursor: None,
        }
    }

    /// Clear a process's raised signals once it has been resumed
    pub fn with_signals(mut self, signals: Arc<SignalBoard>) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Highest sequence id handled so far in the current sweep
    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }

    /// Process one page of waiting records
    ///
    /// Only a failure to fetch the page is returned; per-record failures are
    /// logged and counted in `errors`.
    pub async fn poll_once(&mut self) -> StoreResult<WatchdogStats> {
        let page_size = self.config.page_size.max(1);
        debug!(cursor = ?self.cursor, page_size, "Watchdog::poll_once: called");
        let page = self.waits.next_wait_items(self.cursor, page_size).await?;

        let mut stats = WatchdogStats {
            scanned: page.len(),
            ..Default::default()
        };
        for record in &page {
            match self.process(record).await {
                Ok(RecordOutcome::Unchanged) => {}
                Ok(RecordOutcome::Updated) => stats.updated += 1,
                Ok(RecordOutcome::Resumed) => {
                    stats.updated += 1;
                    stats.resumed += 1;
                }
                Ok(RecordOutcome::Conflict) => stats.conflicts += 1,
                Err(e) => {
                    warn!(process = %record.key, error = %e, "Failed to process wait record");
                    stats.errors += 1;
                }
            }
        }

        if page.len() < page_size {
            self.cursor = None;
            stats.wrapped = true;
        } else {
            self.cursor = page.iter().map(|r| r.seq_id).max().or(self.cursor);
        }

        if stats.updated > 0 || stats.errors > 0 {
            info!(
                scanned = stats.scanned,
                updated = stats.updated,
                resumed = stats.resumed,
                conflicts = stats.conflicts,
                errors = stats.errors,
                "Watchdog poll"
            );
        }
        Ok(stats)
    }

    async fn process(&self, record: &WaitingProcess) -> StoreResult<RecordOutcome> {
        let has_exclusive = record.waits.iter().any(WaitCondition::is_exclusive);

        let mut remaining = Vec::with_capacity(record.waits.len());
        let mut events = BTreeSet::new();
        let mut resolved = false;
        for condition in &record.waits {
            if has_exclusive && !condition.is_exclusive() {
                remaining.push(condition.clone());
                continue;
            }
            match self.evaluate(&record.key, condition).await {
                HandlerOutcome::Unchanged => remaining.push(condition.clone()),
                HandlerOutcome::Rewritten(narrowed) => remaining.push(narrowed),
                HandlerOutcome::Resolved(event) => {
                    resolved = true;
                    events.extend(event);
                }
            }
        }

        if !resolved && remaining == record.waits {
            return Ok(RecordOutcome::Unchanged);
        }

        let is_waiting = !remaining.is_empty() && !resolved;
        let written = self
            .waits
            .set_wait(&record.key, remaining, is_waiting, record.version)
            .await?;
        if !written {
            debug!(process = %record.key, version = record.version, "Watchdog::process: lost update");
            return Ok(RecordOutcome::Conflict);
        }
        if !resolved {
            return Ok(RecordOutcome::Updated);
        }

        if let Err(e) = self.resume(record.key, events).await {
            self.restore(record).await;
            return Err(e);
        }
        Ok(RecordOutcome::Resumed)
    }

    /// Put back a record cleared for a resume that then failed
    ///
    /// Our own write bumped the version once, so the restore only wins if
    /// nobody else touched the record since.
    async fn restore(&self, record: &WaitingProcess) {
        match self
            .waits
            .set_wait(&record.key, record.waits.clone(), true, record.version + 1)
            .await
        {
            Ok(true) => debug!(process = %record.key, "Watchdog::restore: record waiting again"),
            Ok(false) => warn!(process = %record.key, "Record changed before it could be restored"),
            Err(e) => error!(process = %record.key, error = %e, "Failed to restore wait record"),
        }
    }

    async fn evaluate(&self, key: &ProcessKey, condition: &WaitCondition) -> HandlerOutcome {
        let Some(handler) = self.handlers.get(condition.kind()) else {
            warn!(process = %key, kind = %condition.kind(), "No handler for wait condition, keeping it");
            return HandlerOutcome::Unchanged;
        };
        match handler.evaluate(key, condition).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(process = %key, kind = %condition.kind(), error = %e, "Wait handler failed");
                HandlerOutcome::Unchanged
            }
        }
    }

    async fn resume(&self, key: ProcessKey, satisfied_events: BTreeSet<String>) -> StoreResult<()> {
        let request = ResumeRequest {
            process_key: key,
            satisfied_events,
        };
        if self.resumer.resume(&request).await? {
            info!(process = %key, events = ?request.satisfied_events, "Process resumed");
        } else {
            warn!(process = %key, "Resume rejected, process is no longer suspended");
        }
        if let Some(signals) = &self.signals {
            signals.clear(&key);
        }
        Ok(())
    }

    /// Run the polling loop until shutdown
    ///
    /// A failed poll backs off for `error-backoff-ms` plus random jitter before
    /// the next attempt.
    pub async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            period_ms = self.config.period_ms,
            page_size = self.config.page_size,
            handlers = self.handlers.len(),
            "Watchdog started"
        );
        let mut interval = tokio::time::interval(self.config.period());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        let jitter = rand::rng().random_range(0..=self.config.error_jitter_ms);
                        let backoff = self.config.error_backoff(jitter);
                        error!(error = %e, backoff_ms = backoff.as_millis() as u64, "Watchdog poll failed");
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        info!("Watchdog stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MemoryStore, NewEntry, ProcessStatus, QueueStore};
    use crate::watchdog::{QueueResumer, builtin_handlers};
    use chrono::{Duration, Utc};

    struct Fixture {
        store: Arc<MemoryStore>,
        signals: Arc<SignalBoard>,
        watchdog: Watchdog,
    }

    fn fixture(page_size: usize) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let signals = Arc::new(SignalBoard::new());
        let watchdog = Watchdog::new(
            store.clone(),
            builtin_handlers(store.clone(), signals.clone(), 100),
            Arc::new(QueueResumer::new(store.clone())),
            WatchdogConfig {
                page_size,
                ..Default::default()
            },
        )
        .with_signals(signals.clone());
        Fixture {
            store,
            signals,
            watchdog,
        }
    }

    async fn suspended(store: &MemoryStore, waits: Vec<WaitCondition>) -> ProcessKey {
        let entry = store.insert(NewEntry::new()).await.unwrap();
        store.suspend(&entry.key, waits).await.unwrap();
        entry.key
    }

    #[tokio::test]
    async fn test_expired_sleep_resumes_process() {
        let mut f = fixture(10);
        let key = suspended(
            &f.store,
            vec![WaitCondition::sleep(Utc::now() - Duration::seconds(1)).with_resume_event("timer")],
        )
        .await;

        let stats = f.watchdog.poll_once().await.unwrap();
        assert_eq!(stats.resumed, 1);
        assert!(stats.wrapped);

        let entry = f.store.get(&key).await.unwrap().unwrap();
        assert_eq!(entry.status, ProcessStatus::Enqueued);
        assert_eq!(entry.resume_events, BTreeSet::from(["timer".to_string()]));
        assert!(!f.store.get_wait(&key).await.unwrap().unwrap().is_waiting);
    }

    #[tokio::test]
    async fn test_pending_conditions_are_left_alone() {
        let mut f = fixture(10);
        let key = suspended(&f.store, vec![WaitCondition::sleep(Utc::now() + Duration::hours(1))]).await;
        let before = f.store.get_wait(&key).await.unwrap().unwrap();

        let stats = f.watchdog.poll_once().await.unwrap();
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.updated, 0);
        assert_eq!(f.store.get_wait(&key).await.unwrap().unwrap().version, before.version);
    }

    #[tokio::test]
    async fn test_exclusive_condition_evaluated_alone() {
        let mut f = fixture(10);
        let key = suspended(
            &f.store,
            vec![
                WaitCondition::sleep(Utc::now() - Duration::seconds(1)),
                WaitCondition::signal("go").exclusive(),
            ],
        )
        .await;

        // The expired sleep is ignored while an exclusive condition exists
        let stats = f.watchdog.poll_once().await.unwrap();
        assert_eq!(stats.resumed, 0);
        assert_eq!(f.store.get(&key).await.unwrap().unwrap().status, ProcessStatus::Suspended);

        f.signals.raise(&key, "go");
        let stats = f.watchdog.poll_once().await.unwrap();
        assert_eq!(stats.resumed, 1);
        assert!(f.signals.is_empty());
    }

    #[tokio::test]
    async fn test_partial_event_set_is_persisted() {
        let mut f = fixture(10);
        let key = suspended(&f.store, vec![WaitCondition::events(["a", "b"])]).await;
        f.signals.raise(&key, "a");

        let stats = f.watchdog.poll_once().await.unwrap();
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.resumed, 0);

        let record = f.store.get_wait(&key).await.unwrap().unwrap();
        assert!(record.is_waiting);
        assert_eq!(record.waits, vec![WaitCondition::events(["b"])]);
    }

    #[tokio::test]
    async fn test_missing_handler_keeps_condition() {
        let store = Arc::new(MemoryStore::new());
        let mut watchdog = Watchdog::new(
            store.clone(),
            HandlerTable::new(),
            Arc::new(QueueResumer::new(store.clone())),
            WatchdogConfig::default(),
        );
        let key = suspended(&store, vec![WaitCondition::sleep(Utc::now() - Duration::seconds(1))]).await;

        let stats = watchdog.poll_once().await.unwrap();
        assert_eq!(stats.updated, 0);
        assert_eq!(stats.errors, 0);
        assert!(store.get_wait(&key).await.unwrap().unwrap().is_waiting);
    }

    /// Fails the first `failures` resumes, then resumes through the queue
    struct FlakyResumer {
        inner: QueueResumer,
        failures: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ProcessResumer for FlakyResumer {
        async fn resume(&self, request: &ResumeRequest) -> StoreResult<bool> {
            use std::sync::atomic::Ordering;
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(crate::domain::StoreError::Unavailable("process service down".to_string()));
            }
            self.inner.resume(request).await
        }
    }

    #[tokio::test]
    async fn test_failed_resume_is_retried() {
        let store = Arc::new(MemoryStore::new());
        let mut watchdog = Watchdog::new(
            store.clone(),
            builtin_handlers(store.clone(), Arc::new(SignalBoard::new()), 100),
            Arc::new(FlakyResumer {
                inner: QueueResumer::new(store.clone()),
                failures: std::sync::atomic::AtomicUsize::new(1),
            }),
            WatchdogConfig::default(),
        );
        let key = suspended(
            &store,
            vec![WaitCondition::sleep(Utc::now() - Duration::seconds(1)).with_resume_event("timer")],
        )
        .await;

        let first = watchdog.poll_once().await.unwrap();
        assert_eq!(first.errors, 1);
        assert_eq!(first.resumed, 0);
        let record = store.get_wait(&key).await.unwrap().unwrap();
        assert!(record.is_waiting);
        assert_eq!(store.get(&key).await.unwrap().unwrap().status, ProcessStatus::Suspended);

        let second = watchdog.poll_once().await.unwrap();
        assert_eq!(second.scanned, 1);
        assert_eq!(second.resumed, 1);
        assert_eq!(store.get(&key).await.unwrap().unwrap().status, ProcessStatus::Enqueued);
        assert!(!store.get_wait(&key).await.unwrap().unwrap().is_waiting);
    }

    /// Fails on every EXTERNAL_SIGNAL condition
    struct BrokenSignalHandler;

    #[async_trait::async_trait]
    impl crate::watchdog::WaitHandler for BrokenSignalHandler {
        fn kind(&self) -> crate::domain::WaitKind {
            crate::domain::WaitKind::ExternalSignal
        }

        async fn evaluate(
            &self,
            _key: &ProcessKey,
            _condition: &WaitCondition,
        ) -> Result<HandlerOutcome, crate::watchdog::HandlerError> {
            Err(crate::domain::StoreError::Unavailable("signal service down".to_string()).into())
        }
    }

    #[tokio::test]
    async fn test_handler_failure_is_isolated() {
        let store = Arc::new(MemoryStore::new());
        let handlers =
            builtin_handlers(store.clone(), Arc::new(SignalBoard::new()), 100).with(Box::new(BrokenSignalHandler));
        let mut watchdog = Watchdog::new(
            store.clone(),
            handlers,
            Arc::new(QueueResumer::new(store.clone())),
            WatchdogConfig::default(),
        );
        let before_sleep = suspended(&store, vec![WaitCondition::sleep(Utc::now() - Duration::seconds(1))]).await;
        let broken = suspended(&store, vec![WaitCondition::signal("go")]).await;
        let after_sleep = suspended(&store, vec![WaitCondition::sleep(Utc::now() - Duration::seconds(1))]).await;
        let broken_before = store.get_wait(&broken).await.unwrap().unwrap();

        let stats = watchdog.poll_once().await.unwrap();
        assert_eq!(stats.scanned, 3);
        assert_eq!(stats.resumed, 2);

        let broken_after = store.get_wait(&broken).await.unwrap().unwrap();
        assert_eq!(broken_after, broken_before);
        assert_eq!(store.get(&broken).await.unwrap().unwrap().status, ProcessStatus::Suspended);
        for key in [before_sleep, after_sleep] {
            assert_eq!(store.get(&key).await.unwrap().unwrap().status, ProcessStatus::Enqueued);
        }
    }

    #[tokio::test]
    async fn test_cursor_pages_then_wraps() {
        let mut f = fixture(2);
        for _ in 0..3 {
            suspended(&f.store, vec![WaitCondition::signal("never")]).await;
        }

        let first = f.watchdog.poll_once().await.unwrap();
        assert_eq!(first.scanned, 2);
        assert!(!first.wrapped);
        let cursor = f.watchdog.cursor();
        assert!(cursor.is_some());

        let second = f.watchdog.poll_once().await.unwrap();
        assert_eq!(second.scanned, 1);
        assert!(second.wrapped);
        assert_eq!(f.watchdog.cursor(), None);

        let third = f.watchdog.poll_once().await.unwrap();
        assert_eq!(third.scanned, 2);
        assert_eq!(f.watchdog.cursor(), cursor);
    }
}
