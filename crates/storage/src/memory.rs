use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use quiz_core::model::{Identity, LastLocation, ProgressSnapshot, UserId};
use reqwest::StatusCode;

use crate::repository::{
    EVENT_LOG_CAP, EventLog, IdentityStore, ProgressStore, RemoteError, RemoteStore, SyncEvent,
};

/// In-memory device store, for tests and prototyping.
#[derive(Clone, Default)]
pub struct MemoryLocal {
    snapshots: Arc<Mutex<HashMap<UserId, ProgressSnapshot>>>,
    locations: Arc<Mutex<HashMap<UserId, LastLocation>>>,
    identities: Arc<Mutex<HashMap<UserId, Identity>>>,
    events: Arc<Mutex<Vec<SyncEvent>>>,
}

impl MemoryLocal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressStore for MemoryLocal {
    fn save_snapshot(&self, user: &UserId, snapshot: &ProgressSnapshot) -> bool {
        let Ok(mut guard) = self.snapshots.lock() else {
            return false;
        };
        guard.insert(user.clone(), snapshot.clone());
        true
    }

    fn load_snapshot(&self, user: &UserId) -> Option<ProgressSnapshot> {
        let Ok(guard) = self.snapshots.lock() else {
            return None;
        };
        guard.get(user).cloned()
    }

    fn clear_snapshot(&self, user: &UserId) -> bool {
        let Ok(mut guard) = self.snapshots.lock() else {
            return false;
        };
        guard.remove(user);
        true
    }

    fn set_last_location(&self, user: &UserId, location: &LastLocation) -> bool {
        let Ok(mut guard) = self.locations.lock() else {
            return false;
        };
        guard.insert(user.clone(), *location);
        true
    }

    fn last_location(&self, user: &UserId) -> Option<LastLocation> {
        let Ok(guard) = self.locations.lock() else {
            return None;
        };
        guard.get(user).copied()
    }

    fn clear_last_location(&self, user: &UserId) -> bool {
        let Ok(mut guard) = self.locations.lock() else {
            return false;
        };
        guard.remove(user);
        true
    }
}

impl IdentityStore for MemoryLocal {
    fn save_identity(&self, identity: &Identity) -> bool {
        let Ok(mut guard) = self.identities.lock() else {
            return false;
        };
        guard.insert(identity.id().clone(), identity.clone());
        true
    }

    fn load_identity(&self, id: &UserId) -> Option<Identity> {
        let Ok(guard) = self.identities.lock() else {
            return None;
        };
        guard.get(id).cloned()
    }

    fn guest_identity(&self) -> Option<Identity> {
        let Ok(guard) = self.identities.lock() else {
            return None;
        };
        guard
            .values()
            .filter(|identity| identity.is_guest())
            .max_by_key(|identity| identity.created_at())
            .cloned()
    }

    fn clear_identity(&self, id: &UserId) -> bool {
        let Ok(mut guard) = self.identities.lock() else {
            return false;
        };
        guard.remove(id);
        true
    }
}

impl EventLog for MemoryLocal {
    fn append_event(&self, event: &SyncEvent) -> bool {
        let Ok(mut guard) = self.events.lock() else {
            return false;
        };
        guard.push(event.clone());
        let len = guard.len();
        if len > EVENT_LOG_CAP as usize {
            guard.drain(..len - EVENT_LOG_CAP as usize);
        }
        true
    }

    fn recent_events(&self, limit: u32) -> Vec<SyncEvent> {
        let Ok(guard) = self.events.lock() else {
            return Vec::new();
        };
        guard
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect()
    }
}

/// In-memory sync backend with failure controls, for tests.
///
/// `set_offline(true)` makes every call fail with a service-unavailable
/// status, which is how tests drive the session into degraded mode.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    snapshots: Arc<Mutex<HashMap<UserId, ProgressSnapshot>>>,
    locations: Arc<Mutex<HashMap<UserId, LastLocation>>>,
    events: Arc<Mutex<Vec<SyncEvent>>>,
    offline: Arc<AtomicBool>,
    save_calls: Arc<AtomicU32>,
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of snapshot saves attempted while online.
    #[must_use]
    pub fn save_calls(&self) -> u32 {
        self.save_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Status(StatusCode::SERVICE_UNAVAILABLE));
        }
        Ok(())
    }
}

fn poisoned<T>(_: T) -> RemoteError {
    RemoteError::Backend("lock poisoned".into())
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn save_snapshot(
        &self,
        user: &UserId,
        snapshot: &ProgressSnapshot,
    ) -> Result<(), RemoteError> {
        self.check_online()?;
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.snapshots.lock().map_err(poisoned)?;
        guard.insert(user.clone(), snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self, user: &UserId) -> Result<Option<ProgressSnapshot>, RemoteError> {
        self.check_online()?;
        let guard = self.snapshots.lock().map_err(poisoned)?;
        Ok(guard.get(user).cloned())
    }

    async fn clear_snapshot(&self, user: &UserId) -> Result<(), RemoteError> {
        self.check_online()?;
        self.snapshots.lock().map_err(poisoned)?.remove(user);
        self.locations.lock().map_err(poisoned)?.remove(user);
        Ok(())
    }

    async fn set_last_location(
        &self,
        user: &UserId,
        location: &LastLocation,
    ) -> Result<(), RemoteError> {
        self.check_online()?;
        let mut guard = self.locations.lock().map_err(poisoned)?;
        guard.insert(user.clone(), *location);
        Ok(())
    }

    async fn last_location(&self, user: &UserId) -> Result<Option<LastLocation>, RemoteError> {
        self.check_online()?;
        let guard = self.locations.lock().map_err(poisoned)?;
        Ok(guard.get(user).copied())
    }

    async fn append_event(&self, event: &SyncEvent) -> Result<(), RemoteError> {
        self.check_online()?;
        self.events.lock().map_err(poisoned)?.push(event.clone());
        Ok(())
    }
}
