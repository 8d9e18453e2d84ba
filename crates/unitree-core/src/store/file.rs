// ── JSON file store ──
//
// Whole-state snapshot persisted to a single JSON document. Every operation
// reloads the document under an advisory lock on `<path>.lock`, so several
// processes can share one state file without overwriting each other. A
// mutation is written to `<path>.tmp`, synced, then renamed over the
// original, so a crash mid-write leaves the previous snapshot intact.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{SessionStore, apply_heartbeat, ensure_mutable, newest_heartbeat_first, wifi_total};
use crate::error::CoreError;
use crate::model::{
    DeviceId, PointLedgerTransaction, SessionId, TransactionId, UserId, ValidationResult,
    WifiSession,
};
use crate::ports::LedgerBalance;

const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreState {
    version: u32,
    #[serde(default)]
    sessions: Vec<WifiSession>,
    #[serde(default)]
    transactions: Vec<PointLedgerTransaction>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            sessions: Vec::new(),
            transactions: Vec::new(),
        }
    }
}

impl StoreState {
    fn session_mut(&mut self, id: SessionId) -> Result<&mut WifiSession, CoreError> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(CoreError::SessionNotFound { id })
    }

    fn transaction_for(&self, id: SessionId) -> Option<&PointLedgerTransaction> {
        self.transactions
            .iter()
            .find(|tx| tx.source_session_id == Some(id))
    }
}

// ── On-disk layout ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

/// State file plus its lock and temp siblings. All I/O here is blocking and
/// runs on the blocking pool.
#[derive(Debug)]
struct StateFile {
    path: PathBuf,
    lock_path: PathBuf,
    tmp_path: PathBuf,
}

impl StateFile {
    fn new(path: PathBuf) -> Self {
        let sibling = |suffix: &str| {
            let mut p = path.clone().into_os_string();
            p.push(suffix);
            PathBuf::from(p)
        };
        Self {
            lock_path: sibling(".lock"),
            tmp_path: sibling(".tmp"),
            path,
        }
    }

    /// Take the advisory lock. It is released when the returned handle drops.
    fn lock(&self, mode: LockMode) -> Result<File, CoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;
        match mode {
            LockMode::Shared => FileExt::lock_shared(&file)?,
            LockMode::Exclusive => FileExt::lock_exclusive(&file)?,
        }
        Ok(file)
    }

    /// Read the current snapshot. A missing file is an empty store; a corrupt
    /// one is an error rather than silently discarded.
    fn load(&self) -> Result<StoreState, CoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreState::default());
            }
            Err(e) => return Err(e.into()),
        };
        let state: StoreState = serde_json::from_slice(&bytes)?;
        if state.version > STATE_VERSION {
            return Err(CoreError::storage(format!(
                "state file version {} is newer than supported version {STATE_VERSION}",
                state.version
            )));
        }
        Ok(state)
    }

    fn persist(&self, state: &StoreState) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let mut tmp = File::create(&self.tmp_path)?;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
        drop(tmp);
        std::fs::rename(&self.tmp_path, &self.path)?;
        debug!(
            path = %self.path.display(),
            sessions = state.sessions.len(),
            transactions = state.transactions.len(),
            "state file written"
        );
        Ok(())
    }
}

/// Durable store backed by one JSON file, safe to share between processes.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    file: Arc<StateFile>,
}

impl JsonFileStore {
    /// Open the store at `path`, creating parent directories. The existing
    /// file, if any, is checked up front so corruption surfaces at open.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let store = Self {
            file: Arc::new(StateFile::new(path)),
        };
        let (sessions, transactions) = store
            .read(|state| (state.sessions.len(), state.transactions.len()))
            .await?;
        info!(
            path = %store.path().display(),
            sessions,
            transactions,
            "opened session store"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    /// Run `f` against a fresh snapshot under a shared lock.
    async fn read<T>(
        &self,
        f: impl FnOnce(&StoreState) -> T + Send + 'static,
    ) -> Result<T, CoreError>
    where
        T: Send + 'static,
    {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || -> Result<T, CoreError> {
            let _lock = file.lock(LockMode::Shared)?;
            let state = file.load()?;
            Ok(f(&state))
        })
        .await
        .map_err(|e| CoreError::Internal(format!("store task failed: {e}")))?
    }

    /// Reload the snapshot under an exclusive lock, apply `f`, and persist.
    /// Nothing is written when `f` fails.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, CoreError> + Send + 'static,
    ) -> Result<T, CoreError>
    where
        T: Send + 'static,
    {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || -> Result<T, CoreError> {
            let _lock = file.lock(LockMode::Exclusive)?;
            let mut state = file.load()?;
            let out = f(&mut state)?;
            file.persist(&state)?;
            Ok(out)
        })
        .await
        .map_err(|e| CoreError::Internal(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn save_session(&self, session: &WifiSession) -> Result<(), CoreError> {
        let session = session.clone();
        self.mutate(move |state| {
            if let Some(existing) = state.sessions.iter_mut().find(|s| s.id == session.id) {
                ensure_mutable(existing, &session)?;
                *existing = session;
            } else {
                state.sessions.push(session);
            }
            Ok(())
        })
        .await
    }

    async fn record_heartbeat(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
        validation: &ValidationResult,
    ) -> Result<(), CoreError> {
        let validation = validation.clone();
        self.mutate(move |state| apply_heartbeat(state.session_mut(id)?, at, &validation))
            .await
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<WifiSession>, CoreError> {
        self.read(move |state| state.sessions.iter().find(|s| s.id == id).cloned())
            .await
    }

    async fn load_active(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<Vec<WifiSession>, CoreError> {
        let (user_id, device_id) = (user_id.clone(), device_id.clone());
        let mut active: Vec<WifiSession> = self
            .read(move |state| {
                state
                    .sessions
                    .iter()
                    .filter(|s| s.is_active && s.user_id == user_id && s.device_id == device_id)
                    .cloned()
                    .collect()
            })
            .await?;
        newest_heartbeat_first(&mut active);
        Ok(active)
    }

    async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<WifiSession>, CoreError> {
        let user_id = user_id.clone();
        let mut sessions: Vec<WifiSession> = self
            .read(move |state| {
                state
                    .sessions
                    .iter()
                    .filter(|s| s.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .await?;
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    async fn list_unsynced_sessions(&self) -> Result<Vec<WifiSession>, CoreError> {
        self.read(|state| {
            state
                .sessions
                .iter()
                .filter(|s| s.is_ended() && !s.synced)
                .cloned()
                .collect()
        })
        .await
    }

    async fn mark_synced(&self, id: SessionId) -> Result<(), CoreError> {
        self.mutate(move |state| {
            state.session_mut(id)?.synced = true;
            Ok(())
        })
        .await
    }

    async fn insert_transaction(
        &self,
        tx: PointLedgerTransaction,
    ) -> Result<PointLedgerTransaction, CoreError> {
        if let Some(source) = tx.source_session_id {
            let existing = self
                .read(move |state| state.transaction_for(source).cloned())
                .await?;
            if let Some(existing) = existing {
                return Ok(existing);
            }
        }

        self.mutate(move |state| {
            // Re-check under the write lock; another writer may have won.
            if let Some(existing) = tx.source_session_id.and_then(|s| state.transaction_for(s)) {
                return Ok(existing.clone());
            }
            state.transactions.push(tx.clone());
            Ok(tx)
        })
        .await
    }

    async fn transaction_for_session(
        &self,
        id: SessionId,
    ) -> Result<Option<PointLedgerTransaction>, CoreError> {
        self.read(move |state| state.transaction_for(id).cloned())
            .await
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PointLedgerTransaction>, CoreError> {
        let user_id = user_id.clone();
        let mut txs: Vec<PointLedgerTransaction> = self
            .read(move |state| {
                state
                    .transactions
                    .iter()
                    .filter(|tx| tx.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .await?;
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(txs)
    }

    async fn list_unsynced_transactions(&self) -> Result<Vec<PointLedgerTransaction>, CoreError> {
        self.read(|state| {
            state
                .transactions
                .iter()
                .filter(|tx| !tx.synced)
                .cloned()
                .collect()
        })
        .await
    }

    async fn mark_transaction_synced(&self, id: TransactionId) -> Result<(), CoreError> {
        self.mutate(move |state| {
            let tx = state
                .transactions
                .iter_mut()
                .find(|tx| tx.id == id)
                .ok_or_else(|| CoreError::Internal(format!("transaction not found: {id}")))?;
            tx.synced = true;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl LedgerBalance for JsonFileStore {
    async fn wifi_points_on(
        &self,
        user_id: &UserId,
        day: NaiveDate,
        offset: FixedOffset,
    ) -> Result<u32, CoreError> {
        let user_id = user_id.clone();
        self.read(move |state| wifi_total(state.transactions.iter(), &user_id, day, offset))
            .await
    }
}
