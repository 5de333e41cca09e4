//! Read-through union of a legacy and a current wait store
//!
//! Used while waiting-process records move from one store to another: reads
//! see both sources (the current one wins on a key present in both), writes
//! only ever land in the current source. A legacy record is copied forward the
//! first time it is written. Once the legacy source has no waiting records left
//! the shim can be replaced by the current store.
//!
//! Both sources number their records independently, so the union reports
//! sequence ids in its own space: legacy id `n` becomes `2n`, current id `n`
//! becomes `2n + 1`. A cursor over union ids therefore never skips a record
//! that shares its raw id with one from the other source.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::error::StoreResult;
use super::key::ProcessKey;
use super::store::WaitStore;
use super::wait::{WaitCondition, WaitingProcess};

pub struct UnionWaitReader {
    legacy: Arc<dyn WaitStore>,
    current: Arc<dyn WaitStore>,
}

impl UnionWaitReader {
    pub fn new(legacy: Arc<dyn WaitStore>, current: Arc<dyn WaitStore>) -> Self {
        Self { legacy, current }
    }
}

/// Which side of the union a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Legacy,
    Current,
}

impl Source {
    fn union_id(self, seq_id: i64) -> i64 {
        match self {
            Self::Legacy => seq_id.saturating_mul(2),
            Self::Current => seq_id.saturating_mul(2).saturating_add(1),
        }
    }

    /// Largest raw id of this source at or below union id `after`
    fn raw_after(self, after: i64) -> i64 {
        match self {
            Self::Legacy => after.div_euclid(2),
            Self::Current => after.saturating_add(1).div_euclid(2) - 1,
        }
    }
}

fn relabel(source: Source, record: WaitingProcess) -> WaitingProcess {
    WaitingProcess {
        seq_id: source.union_id(record.seq_id),
        ..record
    }
}

impl UnionWaitReader {
    /// Up to `limit` legacy records after `after`, skipping ones the current store shadows
    ///
    /// Keeps reading past shadowed records so they cannot hide later ones.
    async fn legacy_page(&self, after: Option<i64>, limit: usize) -> StoreResult<Vec<WaitingProcess>> {
        let mut items = Vec::new();
        let mut cursor = after;
        loop {
            let page = self.legacy.next_wait_items(cursor, limit).await?;
            let fetched = page.len();
            cursor = page.iter().map(|r| r.seq_id).max().or(cursor);
            for record in page {
                if self.current.get_wait(&record.key).await?.is_some() {
                    continue;
                }
                items.push(record);
            }
            if items.len() >= limit || fetched < limit {
                break;
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl WaitStore for UnionWaitReader {
    async fn suspend(&self, key: &ProcessKey, waits: Vec<WaitCondition>) -> StoreResult<WaitingProcess> {
        let record = self.current.suspend(key, waits).await?;
        Ok(relabel(Source::Current, record))
    }

    async fn get_wait(&self, key: &ProcessKey) -> StoreResult<Option<WaitingProcess>> {
        match self.current.get_wait(key).await? {
            Some(record) => Ok(Some(relabel(Source::Current, record))),
            None => Ok(self
                .legacy
                .get_wait(key)
                .await?
                .map(|record| relabel(Source::Legacy, record))),
        }
    }

    async fn next_wait_items(&self, after_id: Option<i64>, limit: usize) -> StoreResult<Vec<WaitingProcess>> {
        debug!(?after_id, %limit, "UnionWaitReader::next_wait_items: called");
        let current_after = after_id.map(|a| Source::Current.raw_after(a));
        let legacy_after = after_id.map(|a| Source::Legacy.raw_after(a));

        let mut items: Vec<WaitingProcess> = self
            .current
            .next_wait_items(current_after, limit)
            .await?
            .into_iter()
            .map(|r| relabel(Source::Current, r))
            .collect();
        items.extend(
            self.legacy_page(legacy_after, limit)
                .await?
                .into_iter()
                .map(|r| relabel(Source::Legacy, r)),
        );

        items.sort_by_key(|r| r.seq_id);
        items.truncate(limit);
        Ok(items)
    }

    async fn set_wait(
        &self,
        key: &ProcessKey,
        waits: Vec<WaitCondition>,
        is_waiting: bool,
        expected_version: i64,
    ) -> StoreResult<bool> {
        debug!(%key, %expected_version, "UnionWaitReader::set_wait: called");
        if self.current.get_wait(key).await?.is_some() {
            return self.current.set_wait(key, waits, is_waiting, expected_version).await;
        }

        match self.legacy.get_wait(key).await? {
            Some(record) if record.version == expected_version => {
                let migrated = WaitingProcess {
                    waits,
                    is_waiting,
                    version: expected_version + 1,
                    ..record
                };
                self.current.import_wait(&migrated).await
            }
            _ => Ok(false),
        }
    }

    async fn import_wait(&self, record: &WaitingProcess) -> StoreResult<bool> {
        self.current.import_wait(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, NewEntry, QueueStore};
    use std::collections::HashSet;

    async fn suspended(store: &MemoryStore, signal: &str) -> WaitingProcess {
        let entry = store.insert(NewEntry::new()).await.unwrap();
        store.suspend(&entry.key, vec![WaitCondition::signal(signal)]).await.unwrap()
    }

    #[tokio::test]
    async fn test_reads_union_both_sources() {
        let legacy = Arc::new(MemoryStore::new());
        let current = Arc::new(MemoryStore::new());
        let old = suspended(&legacy, "old").await;
        let new = suspended(&current, "new").await;

        let union = UnionWaitReader::new(legacy.clone(), current.clone());
        let items = union.next_wait_items(None, 10).await.unwrap();
        let keys: HashSet<_> = items.iter().map(|r| r.key).collect();
        assert_eq!(keys, HashSet::from([old.key, new.key]));
    }

    #[tokio::test]
    async fn test_write_moves_legacy_record_forward() {
        let legacy = Arc::new(MemoryStore::new());
        let current = Arc::new(MemoryStore::new());
        let old = suspended(&legacy, "old").await;

        let union = UnionWaitReader::new(legacy.clone(), current.clone());
        assert!(union.set_wait(&old.key, vec![], false, old.version).await.unwrap());

        // Legacy untouched, current holds the cleared record, union no longer reports it
        assert!(legacy.get_wait(&old.key).await.unwrap().unwrap().is_waiting);
        let moved = current.get_wait(&old.key).await.unwrap().unwrap();
        assert!(!moved.is_waiting);
        assert_eq!(moved.version, old.version + 1);
        assert!(union.next_wait_items(None, 10).await.unwrap().is_empty());

        // Stale version loses
        assert!(!union.set_wait(&old.key, vec![], false, old.version).await.unwrap());
    }

    #[test]
    fn test_union_ids_map_back_to_each_source() {
        for raw in [0, 1, 2, 7, 100] {
            for source in [Source::Legacy, Source::Current] {
                let id = source.union_id(raw);
                assert_eq!(source.raw_after(id), raw, "{:?} {}", source, raw);
                assert_eq!(source.raw_after(id - 1), raw - 1, "{:?} {}", source, raw);
            }
        }
    }

    #[tokio::test]
    async fn test_paging_sees_records_sharing_raw_ids() {
        let legacy = Arc::new(MemoryStore::new());
        let current = Arc::new(MemoryStore::new());
        let mut expected = HashSet::new();
        for i in 0..2 {
            expected.insert(suspended(&legacy, &format!("old-{}", i)).await.key);
            expected.insert(suspended(&current, &format!("new-{}", i)).await.key);
        }
        let union = UnionWaitReader::new(legacy, current);

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = union.next_wait_items(cursor, 3).await.unwrap();
            seen.extend(page.iter().map(|r| r.key));
            if page.len() < 3 {
                break;
            }
            cursor = page.iter().map(|r| r.seq_id).max();
        }

        assert_eq!(seen.len(), 4, "each record once per sweep");
        assert_eq!(seen.into_iter().collect::<HashSet<_>>(), expected);
    }

    #[tokio::test]
    async fn test_shadowed_legacy_records_do_not_end_the_page() {
        let legacy = Arc::new(MemoryStore::new());
        let current = Arc::new(MemoryStore::new());
        let union = UnionWaitReader::new(legacy.clone(), current.clone());

        // Three legacy records already migrated and cleared, then one still waiting
        for i in 0..3 {
            let old = suspended(&legacy, &format!("moved-{}", i)).await;
            assert!(union.set_wait(&old.key, vec![], false, old.version).await.unwrap());
        }
        let waiting = suspended(&legacy, "waiting").await;

        let page = union.next_wait_items(None, 2).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].key, waiting.key);
    }
}
