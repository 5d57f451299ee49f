use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quiz_core::model::{
    AchievementId, AnswerRecord, Identity, LastLocation, ModuleId, PowerUps, ProgressDraft,
    ProgressSnapshot, QuestionKey, UserId,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::{MemoryLocal, MemoryRemote};

/// Maximum number of sync events retained per device.
pub const EVENT_LOG_CAP: u32 = 256;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors surfaced by the sync backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RemoteError {
    #[error("remote sync is not configured")]
    Misconfigured,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),

    #[error("backend failure: {0}")]
    Backend(String),
}

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Persisted shape for a progress snapshot.
///
/// This mirrors the domain `ProgressSnapshot` so adapters can
/// serialize/deserialize without leaking storage concerns into the domain
/// layer. Keyed maps use string keys (`"<module>-<question>"` for answers,
/// the module index for question orders) because the payload has to survive
/// JSON, which only allows string map keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub current_module: u32,
    pub current_question: u32,
    pub score: u32,
    pub level: u32,
    pub xp: u32,
    pub streak: u32,
    pub combo: u32,
    pub perfect_modules: u32,
    pub completed_modules: Vec<u32>,
    pub unlocked_modules: Vec<u32>,
    pub answered: BTreeMap<String, AnswerRecord>,
    pub achievements: Vec<u32>,
    pub power_ups: PowerUps,
    pub question_order: BTreeMap<String, Vec<u32>>,
    pub last_updated: DateTime<Utc>,
}

impl ProgressRecord {
    #[must_use]
    pub fn from_snapshot(snapshot: &ProgressSnapshot) -> Self {
        Self {
            current_module: snapshot.current_module().value(),
            current_question: snapshot.current_question(),
            score: snapshot.score(),
            level: snapshot.level(),
            xp: snapshot.xp(),
            streak: snapshot.streak(),
            combo: snapshot.combo(),
            perfect_modules: snapshot.perfect_modules(),
            completed_modules: snapshot
                .completed_modules()
                .iter()
                .map(|module| module.value())
                .collect(),
            unlocked_modules: snapshot
                .unlocked_modules()
                .iter()
                .map(|module| module.value())
                .collect(),
            answered: snapshot
                .answered()
                .iter()
                .map(|(key, record)| (key.to_string(), *record))
                .collect(),
            achievements: snapshot
                .achievements()
                .iter()
                .map(|achievement| achievement.value())
                .collect(),
            power_ups: *snapshot.power_ups(),
            question_order: snapshot
                .question_order()
                .iter()
                .map(|(module, order)| (module.value().to_string(), order.clone()))
                .collect(),
            last_updated: snapshot.last_updated(),
        }
    }

    /// Convert the record back into a validated domain snapshot.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if a stored map key fails to
    /// parse or the decoded fields violate snapshot invariants. Callers
    /// treat either case as an absent snapshot.
    pub fn into_snapshot(self) -> Result<ProgressSnapshot, StorageError> {
        let mut answered = BTreeMap::new();
        for (key, record) in self.answered {
            let key: QuestionKey = key.parse().map_err(ser)?;
            answered.insert(key, record);
        }

        let mut question_order = BTreeMap::new();
        for (module, order) in self.question_order {
            let module: u32 = module
                .parse()
                .map_err(|_| StorageError::Serialization(format!("invalid module key: {module}")))?;
            question_order.insert(ModuleId::new(module), order);
        }

        ProgressDraft {
            current_module: ModuleId::new(self.current_module),
            current_question: self.current_question,
            score: self.score,
            level: self.level,
            xp: self.xp,
            streak: self.streak,
            combo: self.combo,
            perfect_modules: self.perfect_modules,
            completed_modules: self.completed_modules.into_iter().map(ModuleId::new).collect(),
            unlocked_modules: self.unlocked_modules.into_iter().map(ModuleId::new).collect(),
            answered,
            achievements: self.achievements.into_iter().map(AchievementId::new).collect(),
            power_ups: self.power_ups,
            question_order,
            last_updated: self.last_updated,
        }
        .validate()
        .map_err(ser)
    }
}

/// One entry in the sync audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub user_id: UserId,
    pub kind: String,
    pub module: Option<u32>,
    pub question: Option<u32>,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Device-local persistence for snapshots and resume pointers.
///
/// Local writes must never take the session down: implementations swallow
/// backend errors, log them, and report the outcome through the return
/// value. A missing entry and an unreadable one look the same to callers.
pub trait ProgressStore: Send + Sync {
    /// Persist the snapshot for a user, replacing any previous one.
    fn save_snapshot(&self, user: &UserId, snapshot: &ProgressSnapshot) -> bool;

    /// Load the stored snapshot, or `None` when missing or unreadable.
    fn load_snapshot(&self, user: &UserId) -> Option<ProgressSnapshot>;

    /// Drop the stored snapshot. Returns false only on backend failure.
    fn clear_snapshot(&self, user: &UserId) -> bool;

    /// Persist the resume pointer for a user.
    fn set_last_location(&self, user: &UserId, location: &LastLocation) -> bool;

    /// Load the resume pointer, or `None` when missing or unreadable.
    fn last_location(&self, user: &UserId) -> Option<LastLocation>;

    /// Drop the resume pointer. Returns false only on backend failure.
    fn clear_last_location(&self, user: &UserId) -> bool;
}

/// Device-local persistence for identities.
pub trait IdentityStore: Send + Sync {
    /// Persist an identity, replacing any previous one with the same id.
    fn save_identity(&self, identity: &Identity) -> bool;

    /// Load an identity by id, or `None` when missing or unreadable.
    fn load_identity(&self, id: &UserId) -> Option<Identity>;

    /// The most recently created guest identity on this device, if any.
    fn guest_identity(&self) -> Option<Identity>;

    /// Drop an identity. Returns false only on backend failure.
    fn clear_identity(&self, id: &UserId) -> bool;
}

/// Device-local audit trail of sync decisions.
pub trait EventLog: Send + Sync {
    /// Append an event, trimming the log to [`EVENT_LOG_CAP`] entries.
    fn append_event(&self, event: &SyncEvent) -> bool;

    /// Most recent events, newest first.
    fn recent_events(&self, limit: u32) -> Vec<SyncEvent>;
}

/// The account-scoped sync backend.
///
/// Unlike the local stores, remote calls report failures: the save pipeline
/// needs to know whether a write landed before it clears dirty state or
/// discards migrated guest data.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Upsert the snapshot for a user.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` if the backend is unreachable, rejects the
    /// write, or sync is not configured.
    async fn save_snapshot(
        &self,
        user: &UserId,
        snapshot: &ProgressSnapshot,
    ) -> Result<(), RemoteError>;

    /// Fetch the snapshot for a user.
    ///
    /// A payload that decodes but fails snapshot validation is reported as
    /// `Ok(None)`, not an error: the row exists but carries nothing usable.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` if the backend is unreachable or sync is not
    /// configured.
    async fn load_snapshot(&self, user: &UserId) -> Result<Option<ProgressSnapshot>, RemoteError>;

    /// Delete the snapshot and resume pointer for a user.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` if the backend is unreachable or sync is not
    /// configured.
    async fn clear_snapshot(&self, user: &UserId) -> Result<(), RemoteError>;

    /// Upsert the resume pointer for a user.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` if the backend is unreachable or sync is not
    /// configured.
    async fn set_last_location(
        &self,
        user: &UserId,
        location: &LastLocation,
    ) -> Result<(), RemoteError>;

    /// Fetch the resume pointer for a user.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` if the backend is unreachable or sync is not
    /// configured.
    async fn last_location(&self, user: &UserId) -> Result<Option<LastLocation>, RemoteError>;

    /// Append an event to the account's audit trail.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` if the backend is unreachable or sync is not
    /// configured.
    async fn append_event(&self, event: &SyncEvent) -> Result<(), RemoteError>;
}

/// Aggregates the device-side stores and the sync backend behind trait
/// objects for easy backend swapping.
#[derive(Clone)]
pub struct SyncStores {
    pub progress: Arc<dyn ProgressStore>,
    pub identities: Arc<dyn IdentityStore>,
    pub events: Arc<dyn EventLog>,
    pub remote: Arc<dyn RemoteStore>,
}

impl SyncStores {
    /// Build fully in-memory stores, for tests and prototyping.
    #[must_use]
    pub fn in_memory() -> Self {
        let local = Arc::new(MemoryLocal::new());
        let progress: Arc<dyn ProgressStore> = local.clone();
        let identities: Arc<dyn IdentityStore> = local.clone();
        let events: Arc<dyn EventLog> = local;
        let remote: Arc<dyn RemoteStore> = Arc::new(MemoryRemote::new());
        Self {
            progress,
            identities,
            events,
            remote,
        }
    }
}
