//! Integration tests for the registry store over both backends.

use std::sync::Arc;

use agent_host_store::{
    DirFileStore, MemoryFileStore, Mutation, RegistryStore, Snapshot, StoreConfig, StoreError,
};
use serde_json::json;

fn memory_store() -> Arc<RegistryStore> {
    RegistryStore::new(Arc::new(MemoryFileStore::new()), StoreConfig::default())
}

#[tokio::test]
async fn concurrent_commits_account_for_every_success() -> anyhow::Result<()> {
    const WRITERS: usize = 16;

    let store = memory_store();
    let mut handles = Vec::new();
    for i in 0..WRITERS {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .retry_commit(
                    "models",
                    vec![Mutation::upsert(format!("model-{i}"), json!(i))],
                    64,
                )
                .await
        }));
    }

    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await??);
    }

    // No two commits produced the same version.
    versions.sort_unstable();
    versions.dedup();
    assert_eq!(versions.len(), WRITERS);

    // The final version equals the number of successful commits, and
    // every writer's record survived.
    let snapshot = store.read("models").await?;
    assert_eq!(snapshot.version, WRITERS as u64);
    assert_eq!(snapshot.records.len(), WRITERS);
    Ok(())
}

#[tokio::test]
async fn rejected_commit_contributes_nothing() -> anyhow::Result<()> {
    let store = memory_store();
    store
        .commit("models", 0, vec![Mutation::upsert("a", json!(1))])
        .await?;

    let err = store
        .commit("models", 0, vec![Mutation::upsert("loser", json!(0))])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));

    let snapshot = store.read("models").await?;
    assert_eq!(snapshot.version, 1);
    assert!(snapshot.get("loser").is_none());
    Ok(())
}

#[tokio::test]
async fn disk_round_trip_preserves_version_and_records() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;

    {
        let store = RegistryStore::new(
            Arc::new(DirFileStore::new(dir.path())?),
            StoreConfig::default(),
        );
        store
            .commit(
                "providers",
                0,
                vec![
                    Mutation::upsert("openai", json!({"base_url": "https://api.openai.com"})),
                    Mutation::upsert("local", json!({"base_url": "http://127.0.0.1:8080"})),
                ],
            )
            .await?;
    }

    // A fresh store over the same directory sees exactly what was written.
    let store = RegistryStore::new(
        Arc::new(DirFileStore::new(dir.path())?),
        StoreConfig::default(),
    );
    let snapshot = store.read("providers").await?;
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.records.len(), 2);
    assert_eq!(
        snapshot.get("openai"),
        Some(&json!({"base_url": "https://api.openai.com"}))
    );
    Ok(())
}

#[tokio::test]
async fn persisted_document_is_version_plus_records() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = RegistryStore::new(
        Arc::new(DirFileStore::new(dir.path())?),
        StoreConfig::default(),
    );
    store
        .commit("tools", 0, vec![Mutation::upsert("bash", json!({"v": 1}))])
        .await?;

    let bytes = std::fs::read(dir.path().join("tools"))?;
    let parsed: Snapshot = serde_json::from_slice(&bytes)?;
    assert_eq!(parsed.version, 1);
    assert_eq!(parsed.get("bash"), Some(&json!({"v": 1})));
    Ok(())
}

#[tokio::test]
async fn interrupted_write_leaves_target_readable() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = RegistryStore::new(
        Arc::new(DirFileStore::new(dir.path())?),
        StoreConfig::default(),
    );
    store
        .commit("tools", 0, vec![Mutation::upsert("bash", json!(1))])
        .await?;

    // Simulate a crash mid-write: a partial temp file next to the
    // target. The target must still parse as the pre-write content.
    std::fs::write(dir.path().join("tools.tmp"), br#"{"version": 2, "rec"#)?;

    let fresh = RegistryStore::new(
        Arc::new(DirFileStore::new(dir.path())?),
        StoreConfig::default(),
    );
    let snapshot = fresh.read("tools").await?;
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.get("bash"), Some(&json!(1)));
    Ok(())
}

#[tokio::test]
async fn coalesced_burst_is_one_version_increment_on_disk() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = RegistryStore::new(
        Arc::new(DirFileStore::new(dir.path())?),
        StoreConfig::default(),
    );

    for i in 0..50 {
        store.enqueue("sessions", "s1", json!({"turn": i}));
    }
    store.enqueue("sessions", "s2", json!({"turn": 0}));
    store.flush_all().await?;

    let snapshot = store.read("sessions").await?;
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.get("s1"), Some(&json!({"turn": 49})));
    assert_eq!(snapshot.get("s2"), Some(&json!({"turn": 0})));
    Ok(())
}

#[tokio::test]
async fn concurrent_enqueues_and_direct_commits_all_survive() -> anyhow::Result<()> {
    let store = memory_store();

    let enqueuer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for i in 0..20 {
                store.enqueue("sessions", format!("queued-{i}"), json!(i));
                tokio::task::yield_now().await;
            }
        })
    };
    let committer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for i in 0..10 {
                store
                    .retry_commit(
                        "sessions",
                        vec![Mutation::upsert(format!("direct-{i}"), json!(i))],
                        64,
                    )
                    .await
                    .unwrap();
            }
        })
    };

    enqueuer.await?;
    committer.await?;
    store.flush_all().await?;

    let snapshot = store.read("sessions").await?;
    assert_eq!(snapshot.records.len(), 30);
    Ok(())
}
