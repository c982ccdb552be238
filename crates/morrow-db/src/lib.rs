pub mod clock;
pub mod error;
mod events;
pub mod migrations;
pub mod models;
mod participants;
mod users;

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};

/// How many SQLite VM steps run between cancellation checks.
const PROGRESS_OPS: i32 = 1_000;

/// Handle to the relational store. One writer connection guarded by a mutex;
/// every entity operation checks it out through a [`Session`].
pub struct Database {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl Database {
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::from_connection(conn, clock)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory(clock: Arc<dyn Clock>) -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, clock)
    }

    fn from_connection(conn: Connection, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    pub fn migrate(&self) -> StoreResult<()> {
        migrations::run(&self.lock())
    }

    pub fn health_check(&self) -> StoreResult<()> {
        self.lock().query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
        Ok(())
    }

    pub fn close(self) -> StoreResult<()> {
        let conn = self.conn.into_inner().unwrap_or_else(|e| e.into_inner());
        conn.close().map_err(|(_, e)| StoreError::from(e))?;
        info!("Database closed");
        Ok(())
    }

    /// A session that cannot be cancelled. Meant for administrative and
    /// background callers.
    pub fn session(&self) -> Session<'_> {
        Session {
            conn: self.lock(),
            clock: self.clock.as_ref(),
            cancel: None,
        }
    }

    /// A session whose statements abort with [`StoreError::Cancelled`] once
    /// `cancel` fires. An interrupted transaction is rolled back.
    pub fn session_with_cancel(&self, cancel: CancellationToken) -> Session<'_> {
        let conn = self.lock();
        let flag = AssertUnwindSafe(cancel.clone());
        conn.progress_handler(
            PROGRESS_OPS,
            Some(move || {
                let flag = &flag;
                flag.is_cancelled()
            }),
        );

        Session {
            conn,
            clock: self.clock.as_ref(),
            cancel: Some(cancel),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-operation drops its Transaction, which rolls back, so
        // the connection behind a poisoned lock is still consistent.
        self.conn.lock().unwrap_or_else(|e| {
            warn!("DB lock was poisoned, recovering");
            e.into_inner()
        })
    }
}

/// Exclusive use of the connection for the duration of one request.
pub struct Session<'a> {
    conn: MutexGuard<'a, Connection>,
    clock: &'a dyn Clock,
    cancel: Option<CancellationToken>,
}

impl Session<'_> {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn check_cancelled(&self) -> StoreResult<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(StoreError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Runs `f` in a single transaction. Nothing is committed if `f` fails or
    /// the session was cancelled before the commit.
    fn atomic<T>(&self, f: impl FnOnce(&Transaction<'_>) -> StoreResult<T>) -> StoreResult<T> {
        self.check_cancelled()?;
        let tx = self.conn.unchecked_transaction()?;
        let out = f(&tx)?;
        self.check_cancelled()?;
        tx.commit()?;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        self.check_cancelled()?;
        f(&self.conn)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.cancel.is_some() {
            self.conn.progress_handler(0, None::<fn() -> bool>);
        }
    }
}

/// Reads a TEXT column into anything that parses from a string (ids, enum tokens).
fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn ensure_not_blank(field: &str, value: &str) -> StoreResult<()> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::models::{NewEvent, NewUser, UserRow};
    use chrono::TimeZone;
    use morrow_types::ids::UserId;
    use morrow_types::models::Visibility;

    pub fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap()
    }

    pub fn db_with_clock() -> (Database, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(at(0)));
        let db = Database::open_in_memory(clock.clone()).unwrap();
        (db, clock)
    }

    pub fn db() -> Database {
        db_with_clock().0
    }

    pub fn user(s: &Session<'_>, email: &str) -> UserRow {
        s.create_user(NewUser {
            email: email.to_string(),
            name: email.split('@').next().unwrap_or(email).to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    pub fn new_event(creator_id: UserId, visibility: Visibility) -> NewEvent {
        NewEvent {
            title: "Trip".to_string(),
            description: None,
            start_time: at(10),
            end_time: at(12),
            emoji: None,
            visibility: Some(visibility),
            creator_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;

    #[test]
    fn health_check_and_close() {
        let db = testing::db();
        db.health_check().unwrap();
        db.migrate().unwrap();
        db.close().unwrap();
    }

    #[test]
    fn cancelled_session_rejects_work_and_commits_nothing() {
        let db = testing::db();
        let token = CancellationToken::new();
        token.cancel();

        {
            let s = db.session_with_cancel(token);
            let err = s
                .create_user(NewUser {
                    email: "a@x.com".into(),
                    name: "A".into(),
                    ..Default::default()
                })
                .unwrap_err();
            assert!(matches!(err, StoreError::Cancelled));
        }

        assert!(db.session().list_users().unwrap().is_empty());
    }

    const ENDLESS: &str = "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 500000000)
         SELECT COUNT(*) FROM n";

    fn cancel_after(token: &CancellationToken, ms: u64) -> std::thread::JoinHandle<()> {
        let token = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(ms));
            token.cancel();
        })
    }

    #[test]
    fn cancel_interrupts_a_running_statement() {
        let db = testing::db();
        let token = CancellationToken::new();
        let canceller = cancel_after(&token, 50);

        let res = {
            let s = db.session_with_cancel(token);
            s.read(|conn| Ok(conn.query_row(ENDLESS, [], |r| r.get::<_, i64>(0))?))
        };
        canceller.join().unwrap();

        assert!(matches!(res, Err(StoreError::Cancelled)));
        db.health_check().unwrap();
    }

    #[test]
    fn interrupted_transaction_rolls_back() {
        let db = testing::db();
        let token = CancellationToken::new();
        let canceller = cancel_after(&token, 50);

        let res = {
            let s = db.session_with_cancel(token);
            s.atomic(|tx| {
                tx.execute_batch("CREATE TABLE scratch (x INTEGER); INSERT INTO scratch VALUES (1);")?;
                Ok(tx.query_row(ENDLESS, [], |r| r.get::<_, i64>(0))?)
            })
        };
        canceller.join().unwrap();
        assert!(matches!(res, Err(StoreError::Cancelled)));

        let s = db.session();
        let tables: i64 = s
            .read(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name = 'scratch'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(tables, 0);
    }
}
