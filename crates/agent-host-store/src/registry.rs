//! Named, versioned record registries with optimistic-concurrency
//! commits and coalesced high-frequency writes.
//!
//! Each registry is one persisted document `{version, records}`. The
//! version counts successful commits; a commit whose base version is
//! stale is rejected as a conflict and never merged. All commits to
//! one registry pass through a single serialization point, and reads
//! observe an atomically-swapped snapshot, so a version is never seen
//! without its matching content.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, PoisonError, Weak},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Notify;

use crate::fs::{FileStore, FileStoreError};

/// Bound on internal flush retries when a flush commit races a direct
/// commit. Exhaustion surfaces the conflict to the flush caller.
const FLUSH_RETRY_LIMIT: u32 = 5;

/// Registry store error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The registry's persisted version moved past the commit's base.
    /// Re-read and retry; the store never merges on the caller's behalf.
    #[error("Conflict on registry '{name}': base version {base}, current {current}")]
    Conflict { name: String, base: u64, current: u64 },

    /// The backing file exists but does not parse. The store does not
    /// fabricate data; see [`RegistryStore::recover`].
    #[error("Registry '{name}' is corrupted: {source}")]
    Corrupted {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// Recovery asked for the backup copy, but none exists.
    #[error("No backup exists for registry '{name}'")]
    BackupMissing { name: String },

    #[error("Failed to encode registry '{name}': {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage error: {0}")]
    Backend(#[from] FileStoreError),
}

/// A registry's content generation together with its records.
///
/// This is both the in-memory snapshot handed to readers and the
/// persisted document shape. Records are kept in a `BTreeMap` so the
/// encoded form is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Content generation; strictly increases on every committed write.
    pub version: u64,
    /// Records keyed by unique string key.
    pub records: BTreeMap<String, Value>,
}

impl Snapshot {
    /// Look up a record by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.records.get(key)
    }
}

/// One proposed change within a commit.
///
/// Mutations apply in vector order; a later mutation for the same key
/// wins over an earlier one within the same commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Upsert { key: String, value: Value },
    Delete { key: String },
}

impl Mutation {
    /// Insert or replace `key`.
    #[must_use]
    pub fn upsert(key: impl Into<String>, value: Value) -> Self {
        Self::Upsert {
            key: key.into(),
            value,
        }
    }

    /// Remove `key`. Deleting a missing key is not an error.
    #[must_use]
    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }
}

/// Operator decision for a corrupted registry file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Promote the `.bak` copy; the corrupted file is moved aside first.
    RestoreBackup,
    /// Move the corrupted file to `<name>.corrupt` and reinitialize empty.
    Quarantine,
}

/// Registry store configuration, resolved at construction.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Quiet period between an `enqueue` and the coalesced flush it
    /// schedules.
    pub flush_delay: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flush_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum FlushPhase {
    #[default]
    Idle,
    /// A debounced flush is scheduled but has not started.
    Pending,
    /// A flush is draining the batch right now. Enqueues during this
    /// phase land in a fresh batch the flusher picks up before idling.
    Flushing,
}

#[derive(Default)]
struct FlushState {
    batch: BTreeMap<String, Value>,
    phase: FlushPhase,
}

struct RegistryState {
    /// Serialization point for commits and cold loads.
    commit_lock: tokio::sync::Mutex<()>,
    /// Atomically-swapped snapshot; readers clone the `Arc` and never
    /// see a version without its matching records.
    cache: Mutex<Option<Arc<Snapshot>>>,
    flush: Mutex<FlushState>,
    /// Signalled whenever a flush cycle finishes.
    flushed: Notify,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            commit_lock: tokio::sync::Mutex::new(()),
            cache: Mutex::new(None),
            flush: Mutex::new(FlushState::default()),
            flushed: Notify::new(),
        }
    }
}

/// Store owning one or more named registries, persisted through an
/// injected [`FileStore`].
///
/// The store exclusively owns every file it manages; no other
/// component reads or writes them directly.
pub struct RegistryStore {
    files: Arc<dyn FileStore>,
    config: StoreConfig,
    registries: Mutex<HashMap<String, Arc<RegistryState>>>,
    /// Self-handle for the debounced flush tasks `enqueue` spawns.
    this: Weak<RegistryStore>,
}

fn backup_name(name: &str) -> String {
    format!("{name}.bak")
}

fn quarantine_name(name: &str) -> String {
    format!("{name}.corrupt")
}

impl RegistryStore {
    /// Create a store over the given backend.
    #[must_use]
    pub fn new(files: Arc<dyn FileStore>, config: StoreConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            files,
            config,
            registries: Mutex::new(HashMap::new()),
            this: this.clone(),
        })
    }

    fn registry(&self, name: &str) -> Arc<RegistryState> {
        let mut registries = self
            .registries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            registries
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(RegistryState::new())),
        )
    }

    /// Read the current `(version, records)` snapshot as one atomic unit.
    ///
    /// A missing backing file is version 0 with no records, not an error.
    ///
    /// # Errors
    /// [`StoreError::Corrupted`] if the backing file exists but does not
    /// parse; [`StoreError::Backend`] on storage failure.
    pub async fn read(&self, name: &str) -> Result<Arc<Snapshot>, StoreError> {
        let state = self.registry(name);
        if let Some(snapshot) = state
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Ok(snapshot);
        }
        let _guard = state.commit_lock.lock().await;
        self.load_and_cache(name, &state).await
    }

    /// Load from the backend and populate the cache. Callers must hold
    /// the registry's commit lock.
    async fn load_and_cache(
        &self,
        name: &str,
        state: &RegistryState,
    ) -> Result<Arc<Snapshot>, StoreError> {
        if let Some(snapshot) = state
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Ok(snapshot);
        }
        let snapshot = match self.files.read(name).await? {
            None => Snapshot::default(),
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupted {
                    name: name.to_string(),
                    source,
                })?
            }
        };
        let snapshot = Arc::new(snapshot);
        *state.cache.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Commit `mutations` against the snapshot read at `base_version`.
    ///
    /// On success the registry's version becomes `base_version + 1`,
    /// the document is persisted atomically, and the previous content
    /// is kept as a one-generation backup.
    ///
    /// # Errors
    /// [`StoreError::Conflict`] if the current version no longer equals
    /// `base_version`; the caller must re-read and retry.
    pub async fn commit(
        &self,
        name: &str,
        base_version: u64,
        mutations: Vec<Mutation>,
    ) -> Result<u64, StoreError> {
        let state = self.registry(name);
        let _guard = state.commit_lock.lock().await;
        let current = self.load_and_cache(name, &state).await?;
        if current.version != base_version {
            return Err(StoreError::Conflict {
                name: name.to_string(),
                base: base_version,
                current: current.version,
            });
        }

        let mut records = current.records.clone();
        for mutation in mutations {
            match mutation {
                Mutation::Upsert { key, value } => {
                    records.insert(key, value);
                }
                Mutation::Delete { key } => {
                    records.remove(&key);
                }
            }
        }

        let next = Snapshot {
            version: current.version + 1,
            records,
        };
        let bytes = serde_json::to_vec_pretty(&next).map_err(|source| StoreError::Encode {
            name: name.to_string(),
            source,
        })?;

        if let Some(previous) = self.files.read(name).await? {
            self.files
                .write_atomic(&backup_name(name), &previous)
                .await?;
        }
        self.files.write_atomic(name, &bytes).await?;

        let next = Arc::new(next);
        *state.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&next));
        tracing::debug!(registry = name, version = next.version, "committed registry write");
        Ok(next.version)
    }

    /// Re-read-and-retry convenience around [`commit`](Self::commit).
    ///
    /// Retries only on [`StoreError::Conflict`], up to `max_attempts`
    /// total attempts, with a small randomized backoff between tries.
    ///
    /// # Errors
    /// The final conflict once attempts are exhausted, or any
    /// non-conflict error immediately.
    pub async fn retry_commit(
        &self,
        name: &str,
        mutations: Vec<Mutation>,
        max_attempts: u32,
    ) -> Result<u64, StoreError> {
        let mut attempt: u32 = 0;
        loop {
            let base = self.read(name).await?.version;
            match self.commit(name, base, mutations.clone()).await {
                Err(StoreError::Conflict { .. }) if attempt + 1 < max_attempts => {
                    attempt += 1;
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
                other => return other,
            }
        }
    }

    /// Stage a value for `key` into the registry's pending batch.
    ///
    /// Does not block and does not persist. A debounced flush is
    /// scheduled if none is scheduled; a burst of enqueues becomes one
    /// commit and one version increment.
    pub fn enqueue(&self, name: &str, key: impl Into<String>, value: Value) {
        let state = self.registry(name);
        let mut flush = state.flush.lock().unwrap_or_else(PoisonError::into_inner);
        flush.batch.insert(key.into(), value);
        if flush.phase == FlushPhase::Idle {
            let Some(store) = self.this.upgrade() else {
                // Store is being torn down; flush_all is the last word.
                return;
            };
            flush.phase = FlushPhase::Pending;
            let name = name.to_string();
            let delay = self.config.flush_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(error) = store.flush(&name).await {
                    tracing::warn!(registry = %name, %error, "scheduled flush failed");
                }
            });
        }
    }

    /// Flush the registry's pending batch as one commit.
    ///
    /// If a flush is already running, waits for it (and anything it
    /// picks up) to finish instead of racing it. On conflict with a
    /// direct commit the batch is retried against a freshly read base
    /// rather than dropped.
    ///
    /// # Errors
    /// Propagates the underlying commit error; the un-persisted batch
    /// entries are put back (without clobbering newer enqueues).
    pub async fn flush(&self, name: &str) -> Result<(), StoreError> {
        let state = self.registry(name);
        loop {
            let notified = state.flushed.notified();
            {
                let mut flush = state.flush.lock().unwrap_or_else(PoisonError::into_inner);
                if flush.phase != FlushPhase::Flushing {
                    if flush.batch.is_empty() {
                        flush.phase = FlushPhase::Idle;
                        return Ok(());
                    }
                    flush.phase = FlushPhase::Flushing;
                    break;
                }
            }
            // Another task is flushing; wait for its cycle and re-check.
            notified.await;
        }

        let result = self.drain(name, &state).await;
        if result.is_err() {
            state
                .flush
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .phase = FlushPhase::Idle;
        }
        state.flushed.notify_waiters();
        result
    }

    /// Drain batches until none remain. Caller holds the `Flushing`
    /// role; on success the phase goes back to `Idle` under the same
    /// lock as the final empty-batch check, so an enqueue cannot slip
    /// between the two and go unscheduled.
    async fn drain(&self, name: &str, state: &RegistryState) -> Result<(), StoreError> {
        loop {
            let batch = {
                let mut flush = state.flush.lock().unwrap_or_else(PoisonError::into_inner);
                if flush.batch.is_empty() {
                    flush.phase = FlushPhase::Idle;
                    return Ok(());
                }
                std::mem::take(&mut flush.batch)
            };
            if let Err(error) = self.commit_batch(name, &batch).await {
                Self::restore_batch(state, batch);
                return Err(error);
            }
        }
    }

    async fn commit_batch(
        &self,
        name: &str,
        batch: &BTreeMap<String, Value>,
    ) -> Result<(), StoreError> {
        let mutations: Vec<Mutation> = batch
            .iter()
            .map(|(key, value)| Mutation::upsert(key.clone(), value.clone()))
            .collect();
        let mut attempts: u32 = 0;
        loop {
            let base = self.read(name).await?.version;
            match self.commit(name, base, mutations.clone()).await {
                Ok(version) => {
                    tracing::debug!(
                        registry = name,
                        version,
                        entries = batch.len(),
                        "flushed coalesced batch"
                    );
                    return Ok(());
                }
                Err(StoreError::Conflict { .. }) if attempts < FLUSH_RETRY_LIMIT => {
                    attempts += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Put un-persisted batch entries back after a failed flush.
    /// Entries enqueued since the batch was taken win over the old ones.
    fn restore_batch(state: &RegistryState, batch: BTreeMap<String, Value>) {
        let mut flush = state.flush.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in batch {
            flush.batch.entry(key).or_insert(value);
        }
    }

    /// Drain every registry's pending batch. Call before shutdown;
    /// updates still pending when the process exits are lost.
    ///
    /// # Errors
    /// Stops at the first registry whose flush fails.
    pub async fn flush_all(&self) -> Result<(), StoreError> {
        let names: Vec<String> = self
            .registries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for name in names {
            self.flush(&name).await?;
        }
        Ok(())
    }

    /// Recover a registry whose backing file failed to parse.
    ///
    /// Never deletes the corrupted bytes: both actions move them to
    /// `<name>.corrupt` for inspection first.
    ///
    /// # Errors
    /// [`StoreError::BackupMissing`] when [`RecoveryAction::RestoreBackup`]
    /// finds no backup; [`StoreError::Corrupted`] when the backup itself
    /// does not parse.
    pub async fn recover(
        &self,
        name: &str,
        action: RecoveryAction,
    ) -> Result<Arc<Snapshot>, StoreError> {
        let state = self.registry(name);
        let _guard = state.commit_lock.lock().await;

        let snapshot = match action {
            RecoveryAction::RestoreBackup => {
                let backup = backup_name(name);
                let bytes =
                    self.files
                        .read(&backup)
                        .await?
                        .ok_or_else(|| StoreError::BackupMissing {
                            name: name.to_string(),
                        })?;
                let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|source| {
                    StoreError::Corrupted {
                        name: backup.clone(),
                        source,
                    }
                })?;
                if self.files.read(name).await?.is_some() {
                    self.files.rename(name, &quarantine_name(name)).await?;
                }
                self.files.write_atomic(name, &bytes).await?;
                tracing::warn!(
                    registry = name,
                    version = snapshot.version,
                    "restored registry from backup"
                );
                snapshot
            }
            RecoveryAction::Quarantine => {
                if self.files.read(name).await?.is_some() {
                    self.files.rename(name, &quarantine_name(name)).await?;
                }
                tracing::warn!(registry = name, "quarantined registry, reinitialized empty");
                Snapshot::default()
            }
        };

        let snapshot = Arc::new(snapshot);
        *state.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    use std::hash::{BuildHasher, Hasher};
    let mut hasher = std::collections::hash_map::RandomState::new().build_hasher();
    hasher.write_u32(attempt);
    let jitter = hasher.finish() % 8;
    Duration::from_millis(u64::from(attempt) * 5 + jitter)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::fs::MemoryFileStore;

    fn store() -> Arc<RegistryStore> {
        RegistryStore::new(Arc::new(MemoryFileStore::new()), StoreConfig::default())
    }

    #[tokio::test]
    async fn missing_registry_reads_empty_at_version_zero() {
        let store = store();
        let snapshot = store.read("models").await.unwrap();
        assert_eq!(snapshot.version, 0);
        assert!(snapshot.records.is_empty());
    }

    #[tokio::test]
    async fn commit_bumps_version_and_round_trips() {
        let store = store();
        let version = store
            .commit(
                "models",
                0,
                vec![Mutation::upsert("gpt", json!({"ctx": 128}))],
            )
            .await
            .unwrap();
        assert_eq!(version, 1);

        let snapshot = store.read("models").await.unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.get("gpt"), Some(&json!({"ctx": 128})));
    }

    #[tokio::test]
    async fn stale_base_version_conflicts() {
        let store = store();
        store
            .commit("models", 0, vec![Mutation::upsert("a", json!(1))])
            .await
            .unwrap();

        let err = store
            .commit("models", 0, vec![Mutation::upsert("b", json!(2))])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict { base: 0, current: 1, .. }
        ));

        // The rejected intent contributed nothing.
        let snapshot = store.read("models").await.unwrap();
        assert_eq!(snapshot.version, 1);
        assert!(snapshot.get("b").is_none());
    }

    #[tokio::test]
    async fn duplicate_keys_in_one_commit_are_last_write_wins() {
        let store = store();
        store
            .commit(
                "models",
                0,
                vec![
                    Mutation::upsert("k", json!("first")),
                    Mutation::upsert("k", json!("second")),
                    Mutation::delete("k"),
                    Mutation::upsert("k", json!("final")),
                ],
            )
            .await
            .unwrap();
        let snapshot = store.read("models").await.unwrap();
        assert_eq!(snapshot.get("k"), Some(&json!("final")));
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = store();
        store
            .commit("tools", 0, vec![Mutation::upsert("rg", json!({}))])
            .await
            .unwrap();
        store
            .commit("tools", 1, vec![Mutation::delete("rg")])
            .await
            .unwrap();
        let snapshot = store.read("tools").await.unwrap();
        assert_eq!(snapshot.version, 2);
        assert!(snapshot.get("rg").is_none());
    }

    #[tokio::test]
    async fn retry_commit_recovers_from_stale_base() {
        let store = store();
        store
            .commit("models", 0, vec![Mutation::upsert("a", json!(1))])
            .await
            .unwrap();
        let version = store
            .retry_commit("models", vec![Mutation::upsert("b", json!(2))], 3)
            .await
            .unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn corrupted_file_surfaces_and_quarantine_reinitializes() {
        let files = Arc::new(MemoryFileStore::new());
        files.write_atomic("models", b"{not json").await.unwrap();
        let store = RegistryStore::new(Arc::clone(&files) as _, StoreConfig::default());

        let err = store.read("models").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { .. }));

        let snapshot = store
            .recover("models", RecoveryAction::Quarantine)
            .await
            .unwrap();
        assert_eq!(snapshot.version, 0);

        // Original bytes preserved for forensics.
        let preserved = files.read("models.corrupt").await.unwrap().unwrap();
        assert_eq!(&preserved[..], b"{not json");

        // The registry is usable again.
        store
            .commit("models", 0, vec![Mutation::upsert("a", json!(1))])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn restore_backup_promotes_previous_generation() {
        let files = Arc::new(MemoryFileStore::new());
        let store = RegistryStore::new(Arc::clone(&files) as _, StoreConfig::default());

        store
            .commit("models", 0, vec![Mutation::upsert("a", json!(1))])
            .await
            .unwrap();
        store
            .commit("models", 1, vec![Mutation::upsert("b", json!(2))])
            .await
            .unwrap();

        // Corrupt the live file out from under a fresh store instance.
        files.write_atomic("models", b"garbage").await.unwrap();
        let fresh = RegistryStore::new(Arc::clone(&files) as _, StoreConfig::default());
        assert!(matches!(
            fresh.read("models").await.unwrap_err(),
            StoreError::Corrupted { .. }
        ));

        let snapshot = fresh
            .recover("models", RecoveryAction::RestoreBackup)
            .await
            .unwrap();
        // The backup holds the generation before the last commit.
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.get("a"), Some(&json!(1)));

        // Corrupted bytes were quarantined, not deleted.
        let preserved = files.read("models.corrupt").await.unwrap().unwrap();
        assert_eq!(&preserved[..], b"garbage");
    }

    #[tokio::test]
    async fn restore_backup_without_backup_is_an_error() {
        let files = Arc::new(MemoryFileStore::new());
        files.write_atomic("models", b"garbage").await.unwrap();
        let store = RegistryStore::new(files as _, StoreConfig::default());
        let err = store
            .recover("models", RecoveryAction::RestoreBackup)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BackupMissing { .. }));
    }

    #[tokio::test]
    async fn enqueue_coalesces_to_one_version_increment() {
        let store = store();
        for i in 0..100 {
            store.enqueue("sessions", "s1", json!({ "messages": i }));
        }
        store.flush("sessions").await.unwrap();

        let snapshot = store.read("sessions").await.unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.get("s1"), Some(&json!({ "messages": 99 })));
    }

    #[tokio::test]
    async fn flush_on_empty_batch_is_a_no_op() {
        let store = store();
        store.flush("sessions").await.unwrap();
        assert_eq!(store.read("sessions").await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn enqueues_across_flushes_each_persist() {
        let store = store();
        store.enqueue("sessions", "s1", json!(1));
        store.flush("sessions").await.unwrap();
        store.enqueue("sessions", "s1", json!(2));
        store.enqueue("sessions", "s2", json!(3));
        store.flush("sessions").await.unwrap();

        let snapshot = store.read("sessions").await.unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.get("s1"), Some(&json!(2)));
        assert_eq!(snapshot.get("s2"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn flush_all_drains_every_registry() {
        let store = store();
        store.enqueue("sessions", "s1", json!(1));
        store.enqueue("tools", "t1", json!(2));
        store.flush_all().await.unwrap();
        assert_eq!(store.read("sessions").await.unwrap().version, 1);
        assert_eq!(store.read("tools").await.unwrap().version, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_flush_fires_after_quiet_period() {
        let store = RegistryStore::new(
            Arc::new(MemoryFileStore::new()),
            StoreConfig {
                flush_delay: Duration::from_millis(50),
            },
        );
        store.enqueue("sessions", "s1", json!("a"));
        store.enqueue("sessions", "s1", json!("b"));

        tokio::time::sleep(Duration::from_millis(120)).await;
        // Let the spawned flush task run to completion.
        tokio::task::yield_now().await;
        store.flush("sessions").await.unwrap();

        let snapshot = store.read("sessions").await.unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.get("s1"), Some(&json!("b")));
    }
}
