use quiz_core::model::{LastLocation, ProgressSnapshot, UserId};
use rusqlite::{OptionalExtension, params};

use super::DeviceStore;
use super::mapping::{LocationRow, SnapshotRow, conn_err, to_json, ts_to_text};
use crate::repository::{ProgressRecord, ProgressStore, StorageError};

impl DeviceStore {
    fn try_save_snapshot(
        &self,
        user: &UserId,
        snapshot: &ProgressSnapshot,
    ) -> Result<(), StorageError> {
        let record = ProgressRecord::from_snapshot(snapshot);
        let completed = to_json("completed_json", &record.completed_modules)?;
        let unlocked = to_json("unlocked_json", &record.unlocked_modules)?;
        let answered = to_json("answered_json", &record.answered)?;
        let achievements = to_json("achievements_json", &record.achievements)?;
        let question_order = to_json("question_order_json", &record.question_order)?;

        let conn = self.lock()?;
        conn.execute(
            r"
            INSERT INTO snapshots (
                user_id, current_module, current_question, score, level, xp,
                streak, combo, perfect_modules, completed_json, unlocked_json,
                answered_json, achievements_json, power_skip, power_hint,
                power_eliminate, question_order_json, last_updated
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                    ?14, ?15, ?16, ?17, ?18)
            ON CONFLICT(user_id) DO UPDATE SET
                current_module = excluded.current_module,
                current_question = excluded.current_question,
                score = excluded.score,
                level = excluded.level,
                xp = excluded.xp,
                streak = excluded.streak,
                combo = excluded.combo,
                perfect_modules = excluded.perfect_modules,
                completed_json = excluded.completed_json,
                unlocked_json = excluded.unlocked_json,
                answered_json = excluded.answered_json,
                achievements_json = excluded.achievements_json,
                power_skip = excluded.power_skip,
                power_hint = excluded.power_hint,
                power_eliminate = excluded.power_eliminate,
                question_order_json = excluded.question_order_json,
                last_updated = excluded.last_updated
            ",
            params![
                user.as_str(),
                i64::from(record.current_module),
                i64::from(record.current_question),
                i64::from(record.score),
                i64::from(record.level),
                i64::from(record.xp),
                i64::from(record.streak),
                i64::from(record.combo),
                i64::from(record.perfect_modules),
                completed,
                unlocked,
                answered,
                achievements,
                i64::from(record.power_ups.skip),
                i64::from(record.power_ups.hint),
                i64::from(record.power_ups.eliminate),
                question_order,
                ts_to_text(record.last_updated),
            ],
        )
        .map_err(conn_err)?;
        Ok(())
    }

    fn try_load_snapshot(&self, user: &UserId) -> Result<Option<ProgressSnapshot>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r"
                SELECT current_module, current_question, score, level, xp,
                       streak, combo, perfect_modules, completed_json,
                       unlocked_json, answered_json, achievements_json,
                       power_skip, power_hint, power_eliminate,
                       question_order_json, last_updated
                FROM snapshots
                WHERE user_id = ?1
                ",
            )
            .map_err(conn_err)?;
        let row = stmt
            .query_row([user.as_str()], SnapshotRow::read)
            .optional()
            .map_err(conn_err)?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(row.decode()?.into_snapshot()?)),
        }
    }

    fn try_set_last_location(
        &self,
        user: &UserId,
        location: &LastLocation,
    ) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            r"
            INSERT INTO locations (user_id, module, question, ts)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id) DO UPDATE SET
                module = excluded.module,
                question = excluded.question,
                ts = excluded.ts
            ",
            params![
                user.as_str(),
                i64::from(location.module.value()),
                i64::from(location.question),
                ts_to_text(location.ts),
            ],
        )
        .map_err(conn_err)?;
        Ok(())
    }

    fn try_last_location(&self, user: &UserId) -> Result<Option<LastLocation>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT module, question, ts FROM locations WHERE user_id = ?1")
            .map_err(conn_err)?;
        let row = stmt
            .query_row([user.as_str()], LocationRow::read)
            .optional()
            .map_err(conn_err)?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(row.decode()?)),
        }
    }

    pub(crate) fn try_delete(&self, sql: &str, user: &UserId) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(sql, [user.as_str()]).map_err(conn_err)?;
        Ok(())
    }
}

impl ProgressStore for DeviceStore {
    fn save_snapshot(&self, user: &UserId, snapshot: &ProgressSnapshot) -> bool {
        match self.try_save_snapshot(user, snapshot) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(user = user.as_str(), %err, "device snapshot save failed");
                false
            }
        }
    }

    fn load_snapshot(&self, user: &UserId) -> Option<ProgressSnapshot> {
        match self.try_load_snapshot(user) {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(
                    user = user.as_str(),
                    %err,
                    "device snapshot unreadable, treating as absent"
                );
                None
            }
        }
    }

    fn clear_snapshot(&self, user: &UserId) -> bool {
        match self.try_delete("DELETE FROM snapshots WHERE user_id = ?1", user) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(user = user.as_str(), %err, "device snapshot clear failed");
                false
            }
        }
    }

    fn set_last_location(&self, user: &UserId, location: &LastLocation) -> bool {
        match self.try_set_last_location(user, location) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(user = user.as_str(), %err, "device location save failed");
                false
            }
        }
    }

    fn last_location(&self, user: &UserId) -> Option<LastLocation> {
        match self.try_last_location(user) {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(
                    user = user.as_str(),
                    %err,
                    "device location unreadable, treating as absent"
                );
                None
            }
        }
    }

    fn clear_last_location(&self, user: &UserId) -> bool {
        match self.try_delete("DELETE FROM locations WHERE user_id = ?1", user) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(user = user.as_str(), %err, "device location clear failed");
                false
            }
        }
    }
}
