use chrono::Utc;
use rusqlite::{Connection, params};

/// Runs a single, consolidated migration for the current schema.
///
/// Creates the full schema (identities, snapshots, resume locations, the
/// sync event log, and indexes).
pub fn run_migrations(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    fn is_applied(conn: &Connection, version: i64) -> Result<bool, rusqlite::Error> {
        let mut stmt = conn.prepare("SELECT 1 FROM schema_migrations WHERE version = ?1")?;
        stmt.exists([version])
    }

    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );
        ",
    )?;

    // Version 1: full schema.
    if !is_applied(conn, 1)? {
        let tx = conn.transaction()?;

        tx.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS identities (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL CHECK (kind IN ('guest', 'authenticated')),
                display_name TEXT NOT NULL,
                organization TEXT,
                country TEXT,
                gender TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS snapshots (
                user_id TEXT PRIMARY KEY,
                current_module INTEGER NOT NULL CHECK (current_module >= 0),
                current_question INTEGER NOT NULL CHECK (current_question >= 0),
                score INTEGER NOT NULL CHECK (score >= 0),
                level INTEGER NOT NULL CHECK (level >= 0),
                xp INTEGER NOT NULL CHECK (xp >= 0),
                streak INTEGER NOT NULL CHECK (streak >= 0),
                combo INTEGER NOT NULL CHECK (combo >= 0),
                perfect_modules INTEGER NOT NULL CHECK (perfect_modules >= 0),
                completed_json TEXT NOT NULL,
                unlocked_json TEXT NOT NULL,
                answered_json TEXT NOT NULL,
                achievements_json TEXT NOT NULL,
                power_skip INTEGER NOT NULL CHECK (power_skip >= 0),
                power_hint INTEGER NOT NULL CHECK (power_hint >= 0),
                power_eliminate INTEGER NOT NULL CHECK (power_eliminate >= 0),
                question_order_json TEXT NOT NULL,
                last_updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS locations (
                user_id TEXT PRIMARY KEY,
                module INTEGER NOT NULL,
                question INTEGER NOT NULL,
                ts TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_events (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                module INTEGER,
                question INTEGER,
                detail TEXT,
                at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_identities_kind_created
                ON identities (kind, created_at);

            CREATE INDEX IF NOT EXISTS idx_sync_events_user_at
                ON sync_events (user_id, at);
            ",
        )?;

        tx.execute(
            r"
            INSERT INTO schema_migrations (version, applied_at)
            VALUES (?1, ?2)
            ON CONFLICT(version) DO NOTHING
            ",
            params![1_i64, Utc::now().to_rfc3339()],
        )?;

        tx.commit()?;
    }

    Ok(())
}
