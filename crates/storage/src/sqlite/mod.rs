use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use thiserror::Error;

use crate::repository::{
    EventLog, IdentityStore, ProgressStore, RemoteStore, StorageError, SyncStores,
};

mod event_repo;
mod identity_repo;
mod mapping;
mod migrate;
mod progress_repo;

/// Device-local store backed by a single `SQLite` database.
///
/// All local trait methods are synchronous; `SQLite` on a local file is fast
/// enough that callers never need to suspend around it.
#[derive(Clone)]
pub struct DeviceStore {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeviceStoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl DeviceStore {
    /// Open (or create) the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `DeviceStoreError` if the database cannot be opened, the
    /// connection pragmas cannot be applied, or migrations fail.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeviceStoreError> {
        Self::setup(Connection::open(path)?)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `DeviceStoreError` if setup or migrations fail.
    pub fn open_in_memory() -> Result<Self, DeviceStoreError> {
        Self::setup(Connection::open_in_memory()?)
    }

    fn setup(mut conn: Connection) -> Result<Self, DeviceStoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        migrate::run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Direct access to the underlying connection, for maintenance and tests.
    #[must_use]
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

impl SyncStores {
    /// Build `SyncStores` backed by a device database plus the given sync
    /// backend.
    ///
    /// # Errors
    ///
    /// Returns `DeviceStoreError` if the database cannot be opened or
    /// migrated.
    pub fn device(
        path: impl AsRef<Path>,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self, DeviceStoreError> {
        let store = DeviceStore::open(path)?;
        let progress: Arc<dyn ProgressStore> = Arc::new(store.clone());
        let identities: Arc<dyn IdentityStore> = Arc::new(store.clone());
        let events: Arc<dyn EventLog> = Arc::new(store);
        Ok(Self {
            progress,
            identities,
            events,
            remote,
        })
    }
}
