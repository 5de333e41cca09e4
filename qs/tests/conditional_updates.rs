//! Conditional updates across independent store handles
//!
//! Each `SqliteStore` owns its own connection, so two handles on one file
//! behave like two coordinator replicas sharing a database.

use std::sync::Arc;

use queuestore::{NewEntry, ProcessStatus, QueueStore, SqliteStore, WaitCondition, WaitStore};
use serde_json::json;
use tempfile::TempDir;

fn open_pair(dir: &TempDir) -> (Arc<SqliteStore>, Arc<SqliteStore>) {
    let path = dir.path().join("queue.db");
    let a = SqliteStore::open(&path).expect("Failed to open first handle");
    let b = SqliteStore::open(&path).expect("Failed to open second handle");
    (Arc::new(a), Arc::new(b))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_claims_have_one_winner() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let (a, b) = open_pair(&dir);

    let mut keys = Vec::new();
    for i in 0..20 {
        let entry = a
            .insert(NewEntry::new().with_payload(json!({ "n": i })))
            .await
            .expect("insert");
        keys.push(entry.key);
    }

    let mut tasks = Vec::new();
    for (replica, store) in [("a", a.clone()), ("b", b.clone())] {
        let keys = keys.clone();
        tasks.push(tokio::spawn(async move {
            let mut won = 0;
            for key in &keys {
                if store.claim(key, replica).await.expect("claim") {
                    won += 1;
                }
            }
            won
        }));
    }

    let mut total = 0;
    for task in tasks {
        total += task.await.expect("join");
    }
    assert_eq!(total, keys.len(), "every entry claimed exactly once");

    for key in &keys {
        let entry = b.get(key).await.unwrap().unwrap();
        assert_eq!(entry.status, ProcessStatus::Starting);
        assert_eq!(entry.version, 1);
    }
}

#[tokio::test]
async fn test_second_handle_sees_first_handles_writes() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let (a, b) = open_pair(&dir);

    let entry = a.insert(NewEntry::new()).await.unwrap();
    assert!(b.claim(&entry.key, "agent-b").await.unwrap());
    assert!(!a.claim(&entry.key, "agent-a").await.unwrap());
    assert_eq!(
        a.get(&entry.key).await.unwrap().unwrap().agent_id.as_deref(),
        Some("agent-b")
    );
}

#[tokio::test]
async fn test_stale_wait_version_loses_across_handles() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let (a, b) = open_pair(&dir);

    let entry = a.insert(NewEntry::new()).await.unwrap();
    let record = a
        .suspend(&entry.key, vec![WaitCondition::signal("approved")])
        .await
        .unwrap();

    // Both replicas read the same version; only the first write lands
    assert!(a.set_wait(&entry.key, vec![], false, record.version).await.unwrap());
    assert!(!b.set_wait(&entry.key, vec![], false, record.version).await.unwrap());
    assert!(b.next_wait_items(None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("queue.db");

    let key = {
        let store = SqliteStore::open(&path).unwrap();
        store
            .insert(NewEntry::new().with_requirements(json!({"agent": {"flavor": "default"}})))
            .await
            .unwrap()
            .key
    };

    let store = SqliteStore::open(&path).unwrap();
    let entry = store.get(&key).await.unwrap().expect("entry persisted");
    assert_eq!(entry.requirements["agent"]["flavor"], "default");
    assert_eq!(store.list_by_status(ProcessStatus::Enqueued, 10).await.unwrap().len(), 1);
}
