use chrono::{DateTime, Utc};
use quiz_core::model::{Gender, Identity, IdentityKind, LastLocation, ModuleId, PowerUps, UserId};
use rusqlite::Row;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::repository::{ProgressRecord, StorageError, SyncEvent};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn_err<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn ts_to_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn ts_from_text(field: &'static str, raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StorageError::Serialization(format!("invalid {field}: {raw}")))
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} out of range: {v}")))
}

/// Resume pointers decode leniently: a negative or oversized index saturates
/// into range instead of discarding the whole pointer. The locator clamps
/// the result against the live catalog anyway.
pub(crate) fn u32_saturating(v: i64) -> u32 {
    u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}

pub(crate) fn to_json<T: Serialize>(field: &'static str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Serialization(format!("{field}: {e}")))
}

pub(crate) fn from_json<T: DeserializeOwned>(
    field: &'static str,
    raw: &str,
) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Serialization(format!("{field}: {e}")))
}

pub(crate) fn kind_to_text(kind: IdentityKind) -> &'static str {
    match kind {
        IdentityKind::Guest => "guest",
        IdentityKind::Authenticated => "authenticated",
    }
}

pub(crate) fn kind_from_text(s: &str) -> Result<IdentityKind, StorageError> {
    match s {
        "guest" => Ok(IdentityKind::Guest),
        "authenticated" => Ok(IdentityKind::Authenticated),
        _ => Err(StorageError::Serialization(format!("invalid kind: {s}"))),
    }
}

pub(crate) fn gender_to_text(gender: Gender) -> &'static str {
    match gender {
        Gender::Female => "female",
        Gender::Male => "male",
        Gender::Other => "other",
        Gender::Undisclosed => "undisclosed",
    }
}

pub(crate) fn gender_from_text(s: &str) -> Result<Gender, StorageError> {
    match s {
        "female" => Ok(Gender::Female),
        "male" => Ok(Gender::Male),
        "other" => Ok(Gender::Other),
        "undisclosed" => Ok(Gender::Undisclosed),
        _ => Err(StorageError::Serialization(format!("invalid gender: {s}"))),
    }
}

/// Raw snapshot columns.
///
/// Reading uses only rusqlite-native getters; decoding happens in a second
/// step so connection errors and payload corruption stay separable.
pub(crate) struct SnapshotRow {
    current_module: i64,
    current_question: i64,
    score: i64,
    level: i64,
    xp: i64,
    streak: i64,
    combo: i64,
    perfect_modules: i64,
    completed_json: String,
    unlocked_json: String,
    answered_json: String,
    achievements_json: String,
    power_skip: i64,
    power_hint: i64,
    power_eliminate: i64,
    question_order_json: String,
    last_updated: String,
}

impl SnapshotRow {
    pub(crate) fn read(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            current_module: row.get("current_module")?,
            current_question: row.get("current_question")?,
            score: row.get("score")?,
            level: row.get("level")?,
            xp: row.get("xp")?,
            streak: row.get("streak")?,
            combo: row.get("combo")?,
            perfect_modules: row.get("perfect_modules")?,
            completed_json: row.get("completed_json")?,
            unlocked_json: row.get("unlocked_json")?,
            answered_json: row.get("answered_json")?,
            achievements_json: row.get("achievements_json")?,
            power_skip: row.get("power_skip")?,
            power_hint: row.get("power_hint")?,
            power_eliminate: row.get("power_eliminate")?,
            question_order_json: row.get("question_order_json")?,
            last_updated: row.get("last_updated")?,
        })
    }

    pub(crate) fn decode(self) -> Result<ProgressRecord, StorageError> {
        Ok(ProgressRecord {
            current_module: u32_from_i64("current_module", self.current_module)?,
            current_question: u32_from_i64("current_question", self.current_question)?,
            score: u32_from_i64("score", self.score)?,
            level: u32_from_i64("level", self.level)?,
            xp: u32_from_i64("xp", self.xp)?,
            streak: u32_from_i64("streak", self.streak)?,
            combo: u32_from_i64("combo", self.combo)?,
            perfect_modules: u32_from_i64("perfect_modules", self.perfect_modules)?,
            completed_modules: from_json("completed_json", &self.completed_json)?,
            unlocked_modules: from_json("unlocked_json", &self.unlocked_json)?,
            answered: from_json("answered_json", &self.answered_json)?,
            achievements: from_json("achievements_json", &self.achievements_json)?,
            power_ups: PowerUps {
                skip: u32_from_i64("power_skip", self.power_skip)?,
                hint: u32_from_i64("power_hint", self.power_hint)?,
                eliminate: u32_from_i64("power_eliminate", self.power_eliminate)?,
            },
            question_order: from_json("question_order_json", &self.question_order_json)?,
            last_updated: ts_from_text("last_updated", &self.last_updated)?,
        })
    }
}

pub(crate) struct LocationRow {
    module: i64,
    question: i64,
    ts: String,
}

impl LocationRow {
    pub(crate) fn read(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            module: row.get("module")?,
            question: row.get("question")?,
            ts: row.get("ts")?,
        })
    }

    pub(crate) fn decode(self) -> Result<LastLocation, StorageError> {
        Ok(LastLocation::new(
            ModuleId::new(u32_saturating(self.module)),
            u32_saturating(self.question),
            ts_from_text("ts", &self.ts)?,
        ))
    }
}

pub(crate) struct IdentityRow {
    id: String,
    kind: String,
    display_name: String,
    organization: Option<String>,
    country: Option<String>,
    gender: String,
    created_at: String,
}

impl IdentityRow {
    pub(crate) fn read(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            kind: row.get("kind")?,
            display_name: row.get("display_name")?,
            organization: row.get("organization")?,
            country: row.get("country")?,
            gender: row.get("gender")?,
            created_at: row.get("created_at")?,
        })
    }

    pub(crate) fn decode(self) -> Result<Identity, StorageError> {
        Identity::from_persisted(
            UserId::new(self.id),
            kind_from_text(&self.kind)?,
            self.display_name,
            self.organization,
            self.country,
            gender_from_text(&self.gender)?,
            ts_from_text("created_at", &self.created_at)?,
        )
        .map_err(ser)
    }
}

pub(crate) struct EventRow {
    user_id: String,
    kind: String,
    module: Option<i64>,
    question: Option<i64>,
    detail: Option<String>,
    at: String,
}

impl EventRow {
    pub(crate) fn read(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            user_id: row.get("user_id")?,
            kind: row.get("kind")?,
            module: row.get("module")?,
            question: row.get("question")?,
            detail: row.get("detail")?,
            at: row.get("at")?,
        })
    }

    pub(crate) fn decode(self) -> Result<SyncEvent, StorageError> {
        Ok(SyncEvent {
            user_id: UserId::new(self.user_id),
            kind: self.kind,
            module: self.module.map(|v| u32_from_i64("module", v)).transpose()?,
            question: self
                .question
                .map(|v| u32_from_i64("question", v))
                .transpose()?,
            detail: self.detail,
            at: ts_from_text("at", &self.at)?,
        })
    }
}
