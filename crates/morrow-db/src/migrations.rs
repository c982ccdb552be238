use rusqlite::Connection;
use tracing::info;

use crate::error::StoreResult;

pub const SCHEMA_VERSION: i64 = 1;

pub fn run(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, events, participants)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id           TEXT PRIMARY KEY,
                email        TEXT NOT NULL UNIQUE,
                name         TEXT NOT NULL,
                avatar_url   TEXT,
                external_id  TEXT UNIQUE,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            );

            CREATE TABLE events (
                id           TEXT PRIMARY KEY,
                title        TEXT NOT NULL,
                description  TEXT,
                start_time   TEXT NOT NULL,
                end_time     TEXT NOT NULL,
                emoji        TEXT,
                visibility   TEXT NOT NULL DEFAULT 'private'
                             CHECK (visibility IN ('private', 'shared', 'public')),
                creator_id   TEXT NOT NULL REFERENCES users(id),
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            );

            CREATE INDEX idx_events_creator ON events(creator_id);

            CREATE TABLE participants (
                id           TEXT PRIMARY KEY,
                user_id      TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                event_id     TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                role         TEXT NOT NULL DEFAULT 'viewer'
                             CHECK (role IN ('owner', 'viewer')),
                status       TEXT NOT NULL DEFAULT 'pending'
                             CHECK (status IN ('pending', 'accepted', 'declined')),
                joined_at    TEXT NOT NULL,
                updated_at   TEXT NOT NULL,
                UNIQUE(user_id, event_id)
            );

            CREATE INDEX idx_participants_event ON participants(event_id);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete (schema v{})", SCHEMA_VERSION);
    Ok(())
}
