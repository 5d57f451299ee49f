#![forbid(unsafe_code)]

pub mod memory;
pub mod repository;
pub mod rest;
pub mod sqlite;

pub use memory::{MemoryLocal, MemoryRemote};
pub use repository::{
    EVENT_LOG_CAP, EventLog, IdentityStore, ProgressRecord, ProgressStore, RemoteError,
    RemoteStore, StorageError, SyncEvent, SyncStores,
};
pub use rest::{RestConfig, RestStore};
pub use sqlite::{DeviceStore, DeviceStoreError};
