//! Durable record of already-processed item ids.
//!
//! Lookups and marks only touch the in-memory set. The set reaches the
//! backing [`SeenStore`] on [`SeenTracker::flush`] or an elapsed
//! [`SeenTracker::auto_flush`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::AppError;
use crate::traits::SeenStore;

/// Snapshot of tracker state.
#[derive(Debug, Clone, Serialize)]
pub struct SeenStats {
    pub total_seen: usize,
    pub dirty: bool,
    pub secs_since_flush: u64,
}

struct FlushState {
    last_flush: Instant,
    dirty: bool,
}

/// In-memory seen set mirrored to a [`SeenStore`].
pub struct SeenTracker<S: SeenStore> {
    store: S,
    ids: RwLock<HashSet<String>>,
    state: Mutex<FlushState>,
    flush_lock: tokio::sync::Mutex<()>,
}

impl<S: SeenStore> SeenTracker<S> {
    /// Build an empty tracker without reading the store.
    pub fn empty(store: S) -> Self {
        Self::with_ids(store, HashSet::new())
    }

    fn with_ids(store: S, ids: HashSet<String>) -> Self {
        Self {
            store,
            ids: RwLock::new(ids),
            state: Mutex::new(FlushState {
                last_flush: Instant::now(),
                dirty: false,
            }),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load previously persisted ids. A failed load starts from an empty set.
    pub async fn load(store: S) -> Self {
        let ids = match store.load().await {
            Ok(ids) => {
                let set: HashSet<String> = ids.into_iter().collect();
                tracing::info!(count = set.len(), "Loaded seen items");
                set
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load seen items, starting empty");
                HashSet::new()
            }
        };
        Self::with_ids(store, ids)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashSet<String>> {
        self.ids.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Seen set lock was poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashSet<String>> {
        self.ids.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Seen set lock was poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FlushState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_seen(&self, id: &str) -> bool {
        self.read().contains(id)
    }

    /// Record `id` as processed. Repeated marks are no-ops.
    pub fn mark_seen(&self, id: &str) {
        let inserted = self.write().insert(id.to_string());
        if inserted {
            self.state().dirty = true;
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Persist the current set. Returns false if the store rejected it.
    pub async fn flush(&self) -> bool {
        let _guard = self.flush_lock.lock().await;

        // Marks that land after this point keep the tracker dirty.
        self.state().dirty = false;
        let snapshot: Vec<String> = {
            let mut ids: Vec<String> = self.read().iter().cloned().collect();
            ids.sort_unstable();
            ids
        };

        match self.store.save(&snapshot).await {
            Ok(()) => {
                self.state().last_flush = Instant::now();
                tracing::debug!(count = snapshot.len(), "Flushed seen items");
                true
            }
            Err(e) => {
                self.state().dirty = true;
                tracing::error!(error = %e, "Failed to flush seen items");
                false
            }
        }
    }

    /// Flush only if `interval` has elapsed since the last flush.
    pub async fn auto_flush(&self, interval: Duration) -> bool {
        let due = self.state().last_flush.elapsed() >= interval;
        if !due {
            return false;
        }
        self.flush().await
    }

    /// Forget every id and persist the empty set.
    pub async fn clear(&self) -> bool {
        let removed = {
            let mut ids = self.write();
            let n = ids.len();
            ids.clear();
            n
        };
        tracing::info!(removed, "Cleared seen items");
        self.flush().await
    }

    pub fn stats(&self) -> SeenStats {
        let state = self.state();
        SeenStats {
            total_seen: self.len(),
            dirty: state.dirty,
            secs_since_flush: state.last_flush.elapsed().as_secs(),
        }
    }
}

/// [`SeenStore`] persisting ids as a JSON array file.
///
/// A [`read_only`](Self::read_only) store loads the file but never writes it.
#[derive(Debug, Clone)]
pub struct JsonFileSeenStore {
    path: PathBuf,
    read_only: bool,
}

impl JsonFileSeenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SeenStore for JsonFileSeenStore {
    async fn load(&self) -> Result<Vec<String>, AppError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let ids: Vec<String> = serde_json::from_slice(&raw)?;
        Ok(ids)
    }

    async fn save(&self, ids: &[String]) -> Result<(), AppError> {
        if self.read_only {
            tracing::debug!(path = %self.path.display(), count = ids.len(), "Read-only seen store, not writing");
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(ids)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
