use rusqlite::params;

use super::DeviceStore;
use super::mapping::{EventRow, conn_err, ts_to_text};
use crate::repository::{EVENT_LOG_CAP, EventLog, StorageError, SyncEvent};

impl DeviceStore {
    fn try_append_event(&self, event: &SyncEvent) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            r"
            INSERT INTO sync_events (user_id, kind, module, question, detail, at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                event.user_id.as_str(),
                event.kind,
                event.module.map(i64::from),
                event.question.map(i64::from),
                event.detail,
                ts_to_text(event.at),
            ],
        )
        .map_err(conn_err)?;

        // keep only the newest EVENT_LOG_CAP rows
        conn.execute(
            r"
            DELETE FROM sync_events
            WHERE id NOT IN (
                SELECT id FROM sync_events ORDER BY id DESC LIMIT ?1
            )
            ",
            [i64::from(EVENT_LOG_CAP)],
        )
        .map_err(conn_err)?;
        Ok(())
    }

    fn try_recent_events(&self, limit: u32) -> Result<Vec<SyncEvent>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r"
                SELECT user_id, kind, module, question, detail, at
                FROM sync_events
                ORDER BY id DESC
                LIMIT ?1
                ",
            )
            .map_err(conn_err)?;
        let rows = stmt
            .query_map([i64::from(limit)], EventRow::read)
            .map_err(conn_err)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(conn_err)?.decode()?);
        }
        Ok(events)
    }
}

impl EventLog for DeviceStore {
    fn append_event(&self, event: &SyncEvent) -> bool {
        match self.try_append_event(event) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(kind = event.kind.as_str(), %err, "event append failed");
                false
            }
        }
    }

    fn recent_events(&self, limit: u32) -> Vec<SyncEvent> {
        match self.try_recent_events(limit) {
            Ok(events) => events,
            Err(err) => {
                tracing::warn!(%err, "event log unreadable");
                Vec::new()
            }
        }
    }
}
