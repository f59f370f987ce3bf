//! Session persistence.
//!
//! The engine is stateless between calls; every session lives in a
//! [`SessionStore`]. Writes after the first go through
//! [`SessionStore::compare_and_swap`], keyed on [`SessionState::version`], so
//! a writer holding a stale copy cannot overwrite a newer turn.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::error::ErrorCode;
use crate::session::{SessionId, SessionState};

/// Errors raised by session stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(SessionId),

    #[error("session {0} already exists")]
    AlreadyExists(SessionId),

    #[error("version conflict: expected {expected}, found {found}")]
    Conflict { expected: u64, found: u64 },

    #[error("corrupt session record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("session {0} is locked by another writer")]
    Locked(SessionId),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::NotFound(_) | StoreError::Corrupt { .. } => ErrorCode::InvalidSession,
            StoreError::AlreadyExists(_)
            | StoreError::Conflict { .. }
            | StoreError::Locked(_) => ErrorCode::SessionConflict,
            StoreError::Io(_) => ErrorCode::StorageFailure,
        }
    }
}

/// Storage for session records keyed by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session, or `None` if it does not exist.
    async fn get(&self, id: &SessionId) -> Result<Option<SessionState>, StoreError>;

    /// Store a new session. Fails if the id is taken.
    async fn put(&self, state: &SessionState) -> Result<(), StoreError>;

    /// Replace a session if its stored version equals `expected_version`.
    ///
    /// Returns the stored record with its version bumped.
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        state: &SessionState,
    ) -> Result<SessionState, StoreError>;

    /// Ids of all stored sessions.
    async fn list(&self) -> Result<Vec<SessionId>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local store, for tests and single-process deployments.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, SessionState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &SessionId) -> Result<Option<SessionState>, StoreError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn put(&self, state: &SessionState) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&state.id) {
            return Err(StoreError::AlreadyExists(state.id));
        }
        sessions.insert(state.id, state.clone());
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        state: &SessionState,
    ) -> Result<SessionState, StoreError> {
        let mut sessions = self.sessions.write().await;
        let current = sessions
            .get(&state.id)
            .ok_or(StoreError::NotFound(state.id))?;
        if current.version != expected_version {
            return Err(StoreError::Conflict {
                expected: expected_version,
                found: current.version,
            });
        }
        let mut next = state.clone();
        next.version = expected_version + 1;
        sessions.insert(next.id, next.clone());
        Ok(next)
    }

    async fn list(&self) -> Result<Vec<SessionId>, StoreError> {
        let mut ids: Vec<_> = self.sessions.read().await.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// JSON files
// ---------------------------------------------------------------------------

const LOCK_POLL: Duration = Duration::from_millis(5);
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// A lock file older than this is left over from a crashed writer.
const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

/// One pretty-printed JSON file per session in a directory.
///
/// Writes go to a temporary file that is then renamed over the record.
/// Every write holds `<id>.lock`, created exclusively, for the whole
/// read-check-rename, so stores in different processes sharing a
/// directory still serialize their writes to one session.
pub struct FileSessionStore {
    dir: PathBuf,
    lock_timeout: Duration,
}

/// Held while a session record is being written. Removes the lock file on drop.
struct RecordLock {
    path: PathBuf,
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to release session lock"
            );
        }
    }
}

impl FileSessionStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// How long a write waits for another writer's lock before giving up.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn lock_path_for(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{id}.lock"))
    }

    async fn lock(&self, id: &SessionId) -> Result<RecordLock, StoreError> {
        let path = self.lock_path_for(id);
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            let created = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match created {
                Ok(_) => return Ok(RecordLock { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path).await {
                        tracing::warn!(session = %id, "removing stale session lock");
                        match tokio::fs::remove_file(&path).await {
                            Ok(()) => continue,
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                            Err(e) => return Err(e.into()),
                        }
                    }
                    if Instant::now() >= deadline {
                        return Err(StoreError::Locked(*id));
                    }
                    tokio::time::sleep(LOCK_POLL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn read(&self, id: &SessionId) -> Result<Option<SessionState>, StoreError> {
        let path = self.path_for(id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: SessionState =
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        if state.id != *id {
            return Err(StoreError::Corrupt {
                id: id.to_string(),
                reason: format!("record holds session {}", state.id),
            });
        }
        Ok(Some(state))
    }

    async fn write(&self, state: &SessionState) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(state).map_err(|e| StoreError::Corrupt {
            id: state.id.to_string(),
            reason: e.to_string(),
        })?;
        let path = self.path_for(&state.id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

async fn lock_is_stale(path: &Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    meta.modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, id: &SessionId) -> Result<Option<SessionState>, StoreError> {
        self.read(id).await
    }

    async fn put(&self, state: &SessionState) -> Result<(), StoreError> {
        let _lock = self.lock(&state.id).await?;
        if tokio::fs::try_exists(self.path_for(&state.id)).await? {
            return Err(StoreError::AlreadyExists(state.id));
        }
        self.write(state).await
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        state: &SessionState,
    ) -> Result<SessionState, StoreError> {
        let _lock = self.lock(&state.id).await?;
        let current = self
            .read(&state.id)
            .await?
            .ok_or(StoreError::NotFound(state.id))?;
        if current.version != expected_version {
            return Err(StoreError::Conflict {
                expected: expected_version,
                found: current.version,
            });
        }
        let mut next = state.clone();
        next.version = expected_version + 1;
        self.write(&next).await?;
        Ok(next)
    }

    async fn list(&self) -> Result<Vec<SessionId>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(id) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<SessionId>().ok())
                {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LearningOutcome, Lesson, MasteryConfig};

    fn session() -> SessionState {
        let lesson = Lesson {
            id: "l".into(),
            title: "L".into(),
            topic: "T".into(),
            description: String::new(),
            mastery: MasteryConfig::default(),
            outcomes: vec![LearningOutcome::new("a", "first").with_concepts(["x"])],
        };
        SessionState::new(&lesson).unwrap()
    }

    async fn exercise(store: &dyn SessionStore) {
        let state = session();
        assert!(store.get(&state.id).await.unwrap().is_none());

        store.put(&state).await.unwrap();
        assert!(matches!(
            store.put(&state).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert_eq!(store.get(&state.id).await.unwrap().unwrap(), state);

        let mut changed = state.clone();
        changed.failed_attempts = 1;
        let stored = store.compare_and_swap(0, &changed).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(store.get(&state.id).await.unwrap().unwrap().failed_attempts, 1);

        // a writer still holding version 0 loses
        let err = store.compare_and_swap(0, &changed).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: 0,
                found: 1
            }
        ));
        assert_eq!(err.code(), ErrorCode::SessionConflict);

        let missing = session();
        assert!(matches!(
            store.compare_and_swap(0, &missing).await,
            Err(StoreError::NotFound(_))
        ));

        assert_eq!(store.list().await.unwrap(), vec![state.id]);
    }

    #[tokio::test]
    async fn in_memory_store() {
        exercise(&InMemorySessionStore::new()).await;
    }

    #[tokio::test]
    async fn file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path().join("sessions"))
            .await
            .unwrap();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let state = session();
        {
            let store = FileSessionStore::open(dir.path()).await.unwrap();
            store.put(&state).await.unwrap();
        }
        let reopened = FileSessionStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get(&state.id).await.unwrap().unwrap(), state);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).await.unwrap();
        let id = SessionId::new();
        std::fs::write(dir.path().join(format!("{id}.json")), "{ not json").unwrap();

        let err = store.get(&id).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert_eq!(err.code(), ErrorCode::InvalidSession);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stores_sharing_a_directory_allow_one_writer_per_version() {
        let dir = tempfile::tempdir().unwrap();
        let first = std::sync::Arc::new(FileSessionStore::open(dir.path()).await.unwrap());
        let second = std::sync::Arc::new(FileSessionStore::open(dir.path()).await.unwrap());

        for _ in 0..100 {
            let state = session();
            first.put(&state).await.unwrap();

            let racers = [first.clone(), second.clone()].map(|store| {
                let mut changed = state.clone();
                changed.failed_attempts = 1;
                tokio::spawn(async move { store.compare_and_swap(0, &changed).await })
            });
            let mut won = 0;
            for racer in racers {
                match racer.await.unwrap() {
                    Ok(stored) => {
                        assert_eq!(stored.version, 1);
                        won += 1;
                    }
                    Err(StoreError::Conflict {
                        expected: 0,
                        found: 1,
                    }) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            assert_eq!(won, 1, "exactly one writer may advance version 0");
            assert_eq!(second.get(&state.id).await.unwrap().unwrap().version, 1);
        }

        // no lock files left behind
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == "lock")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn held_lock_times_out_as_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path())
            .await
            .unwrap()
            .with_lock_timeout(Duration::from_millis(50));
        let state = session();
        store.put(&state).await.unwrap();
        std::fs::write(dir.path().join(format!("{}.lock", state.id)), "").unwrap();

        let err = store.compare_and_swap(0, &state).await.unwrap_err();
        assert!(matches!(err, StoreError::Locked(id) if id == state.id));
        assert_eq!(err.code(), ErrorCode::SessionConflict);
        assert_eq!(store.list().await.unwrap(), vec![state.id]);
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path())
            .await
            .unwrap()
            .with_lock_timeout(Duration::from_millis(50));
        let state = session();
        store.put(&state).await.unwrap();

        let lock = std::fs::File::create(dir.path().join(format!("{}.lock", state.id))).unwrap();
        lock.set_modified(SystemTime::now() - Duration::from_secs(120)).unwrap();
        drop(lock);

        let stored = store.compare_and_swap(0, &state).await.unwrap();
        assert_eq!(stored.version, 1);
    }
}
