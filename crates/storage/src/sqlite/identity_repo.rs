use quiz_core::model::{Identity, UserId};
use rusqlite::{OptionalExtension, params};

use super::DeviceStore;
use super::mapping::{IdentityRow, conn_err, gender_to_text, kind_to_text, ts_to_text};
use crate::repository::{IdentityStore, StorageError};

impl DeviceStore {
    fn try_save_identity(&self, identity: &Identity) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            r"
            INSERT INTO identities (
                id, kind, display_name, organization, country, gender, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                display_name = excluded.display_name,
                organization = excluded.organization,
                country = excluded.country,
                gender = excluded.gender
            ",
            params![
                identity.id().as_str(),
                kind_to_text(identity.kind()),
                identity.display_name(),
                identity.organization(),
                identity.country(),
                gender_to_text(identity.gender()),
                ts_to_text(identity.created_at()),
            ],
        )
        .map_err(conn_err)?;
        Ok(())
    }

    fn try_load_identity(&self, id: &UserId) -> Result<Option<Identity>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r"
                SELECT id, kind, display_name, organization, country, gender, created_at
                FROM identities
                WHERE id = ?1
                ",
            )
            .map_err(conn_err)?;
        let row = stmt
            .query_row([id.as_str()], IdentityRow::read)
            .optional()
            .map_err(conn_err)?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(row.decode()?)),
        }
    }

    fn try_guest_identity(&self) -> Result<Option<Identity>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r"
                SELECT id, kind, display_name, organization, country, gender, created_at
                FROM identities
                WHERE kind = 'guest'
                ORDER BY created_at DESC
                LIMIT 1
                ",
            )
            .map_err(conn_err)?;
        let row = stmt
            .query_row([], IdentityRow::read)
            .optional()
            .map_err(conn_err)?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(row.decode()?)),
        }
    }
}

impl IdentityStore for DeviceStore {
    fn save_identity(&self, identity: &Identity) -> bool {
        match self.try_save_identity(identity) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(user = identity.id().as_str(), %err, "identity save failed");
                false
            }
        }
    }

    fn load_identity(&self, id: &UserId) -> Option<Identity> {
        match self.try_load_identity(id) {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(user = id.as_str(), %err, "identity unreadable, treating as absent");
                None
            }
        }
    }

    fn guest_identity(&self) -> Option<Identity> {
        match self.try_guest_identity() {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(%err, "guest identity lookup failed");
                None
            }
        }
    }

    fn clear_identity(&self, id: &UserId) -> bool {
        match self.try_delete("DELETE FROM identities WHERE id = ?1", id) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(user = id.as_str(), %err, "identity clear failed");
                false
            }
        }
    }
}
