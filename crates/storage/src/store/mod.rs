#![forbid(unsafe_code)]

mod blobs;
mod cloner;
mod config;
mod coordinator;
mod copy;
mod error;
mod events;
mod locks;
mod mutator;
mod records;
mod replicate;
mod requests;
mod support;
mod types;

pub use blobs::{BlobStore, LocalBlobStore};
pub use cloner::{CloneOptions, NodeCloner};
pub use config::{DEFAULT_BATCH_SIZE, EngineConfig, TREE_LOCK_NAMESPACE};
pub use coordinator::{BatchContext, LockPlan, TreeLockCoordinator};
pub use error::StoreError;
pub use events::{NoopEvents, TreeEvents};
pub use locks::{LocalLockManager, LockGuard, LockKey, LockManager, LockMode};
pub use replicate::AssociatedObjectReplicator;
pub use requests::*;
pub use types::*;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Tree storage over one SQLite connection.
///
/// Stores that must exclude each other share a `LockManager`; each store owns its connection.
pub struct TreeStore {
    conn: Connection,
    storage_dir: Option<PathBuf>,
    config: EngineConfig,
    locks: Arc<dyn LockManager>,
    events: Arc<dyn TreeEvents>,
    blobs: Option<Arc<dyn BlobStore>>,
}

impl TreeStore {
    pub fn open(storage_dir: impl AsRef<Path>, config: EngineConfig) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let conn = Connection::open(storage_dir.join("channel_tree.db"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn, Some(storage_dir), config)
    }

    pub fn open_in_memory(config: EngineConfig) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, None, config)
    }

    fn with_connection(
        conn: Connection,
        storage_dir: Option<PathBuf>,
        config: EngineConfig,
    ) -> Result<Self, StoreError> {
        conn.busy_timeout(config.busy_timeout())?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        support::install_schema(&conn)?;

        Ok(Self {
            conn,
            storage_dir,
            config,
            locks: Arc::new(LocalLockManager::new()),
            events: Arc::new(NoopEvents),
            blobs: None,
        })
    }

    pub fn with_lock_manager(mut self, locks: Arc<dyn LockManager>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn TreeEvents>) -> Self {
        self.events = events;
        self
    }

    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn storage_dir(&self) -> Option<&Path> {
        self.storage_dir.as_deref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Raw connection, for callers composing their own queries.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn coordinator(&self) -> TreeLockCoordinator<'_> {
        TreeLockCoordinator::new(
            self.locks.as_ref(),
            self.config.lock_namespace,
            self.config.lock_wait_timeout(),
        )
    }

    pub fn cloner(&self) -> NodeCloner<'_> {
        NodeCloner::new(&self.conn)
    }

    pub fn replicator(&self) -> AssociatedObjectReplicator<'_> {
        AssociatedObjectReplicator::new(&self.conn, self.blobs.as_deref())
    }
}

impl std::fmt::Debug for TreeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeStore")
            .field("storage_dir", &self.storage_dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
