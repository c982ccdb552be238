use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use morrow_types::ids::UserId;

use crate::models::{DeleteMode, NewUser, UserChanges, UserRow};
use crate::{Session, StoreError, StoreResult, ensure_not_blank, parse_column};

pub(crate) const USER_COLUMNS: &str =
    "u.id, u.email, u.name, u.avatar_url, u.external_id, u.created_at, u.updated_at";

/// Maps the seven [`USER_COLUMNS`] starting at `offset`.
pub(crate) fn map_user(row: &Row<'_>, offset: usize) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: parse_column(row, offset)?,
        email: row.get(offset + 1)?,
        name: row.get(offset + 2)?,
        avatar_url: row.get(offset + 3)?,
        external_id: row.get(offset + 4)?,
        created_at: row.get(offset + 5)?,
        updated_at: row.get(offset + 6)?,
    })
}

impl Session<'_> {
    pub fn create_user(&self, new: NewUser) -> StoreResult<UserRow> {
        ensure_not_blank("email", &new.email)?;
        ensure_not_blank("name", &new.name)?;

        let now = self.now();
        self.atomic(|tx| {
            ensure_email_free(tx, &new.email, None)?;
            if let Some(external_id) = &new.external_id {
                ensure_external_id_free(tx, external_id, None)?;
            }

            let user = UserRow {
                id: UserId::new(),
                email: new.email,
                name: new.name,
                avatar_url: new.avatar_url,
                external_id: new.external_id,
                created_at: now,
                updated_at: now,
            };

            tx.execute(
                "INSERT INTO users (id, email, name, avatar_url, external_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user.id.to_string(),
                    user.email,
                    user.name,
                    user.avatar_url,
                    user.external_id,
                    user.created_at,
                    user.updated_at,
                ],
            )?;

            debug!(user_id = %user.id, "User created");
            Ok(user)
        })
    }

    pub fn get_user(&self, id: UserId) -> StoreResult<UserRow> {
        self.read(|conn| query_user(conn, id)?.ok_or_else(|| StoreError::not_found("user", id)))
    }

    pub fn list_users(&self) -> StoreResult<Vec<UserRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users u ORDER BY u.created_at, u.rowid"
            ))?;
            let rows = stmt
                .query_map([], |row| map_user(row, 0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Applies `changes` to the user. An empty change set returns the stored
    /// row untouched, `updated_at` included.
    pub fn update_user(&self, id: UserId, changes: UserChanges) -> StoreResult<UserRow> {
        let now = self.now();
        self.atomic(|tx| {
            let mut user = query_user(tx, id)?.ok_or_else(|| StoreError::not_found("user", id))?;
            if changes.is_empty() {
                return Ok(user);
            }

            if let Some(email) = changes.email {
                ensure_not_blank("email", &email)?;
                ensure_email_free(tx, &email, Some(id))?;
                user.email = email;
            }
            if let Some(name) = changes.name {
                ensure_not_blank("name", &name)?;
                user.name = name;
            }
            if let Some(avatar_url) = changes.avatar_url {
                user.avatar_url = avatar_url;
            }
            if let Some(external_id) = changes.external_id {
                if let Some(ext) = &external_id {
                    ensure_external_id_free(tx, ext, Some(id))?;
                }
                user.external_id = external_id;
            }
            user.updated_at = now;

            tx.execute(
                "UPDATE users
                 SET email = ?2, name = ?3, avatar_url = ?4, external_id = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    user.email,
                    user.name,
                    user.avatar_url,
                    user.external_id,
                    user.updated_at,
                ],
            )?;

            debug!(user_id = %id, "User updated");
            Ok(user)
        })
    }

    /// Deletes the user. With [`DeleteMode::Restrict`] this fails with
    /// `Conflict` while the user still created events or participates in any.
    pub fn delete_user(&self, id: UserId, mode: DeleteMode) -> StoreResult<()> {
        self.atomic(|tx| {
            if query_user(tx, id)?.is_none() {
                return Err(StoreError::not_found("user", id));
            }

            let key = id.to_string();
            let events: i64 = tx.query_row(
                "SELECT COUNT(*) FROM events WHERE creator_id = ?1",
                [&key],
                |r| r.get(0),
            )?;
            let participations: i64 = tx.query_row(
                "SELECT COUNT(*) FROM participants WHERE user_id = ?1",
                [&key],
                |r| r.get(0),
            )?;

            if mode == DeleteMode::Restrict && (events > 0 || participations > 0) {
                return Err(StoreError::Conflict(format!(
                    "user {} still has {} event(s) and {} participation(s)",
                    id, events, participations
                )));
            }

            tx.execute(
                "DELETE FROM participants
                 WHERE user_id = ?1
                    OR event_id IN (SELECT id FROM events WHERE creator_id = ?1)",
                [&key],
            )?;
            tx.execute("DELETE FROM events WHERE creator_id = ?1", [&key])?;
            tx.execute("DELETE FROM users WHERE id = ?1", [&key])?;

            debug!(user_id = %id, events, participations, "User deleted");
            Ok(())
        })
    }
}

pub(crate) fn query_user(conn: &Connection, id: UserId) -> StoreResult<Option<UserRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1"),
            [id.to_string()],
            |row| map_user(row, 0),
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn user_exists(conn: &Connection, id: UserId) -> StoreResult<bool> {
    let found = conn
        .query_row("SELECT 1 FROM users WHERE id = ?1", [id.to_string()], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn ensure_email_free(conn: &Connection, email: &str, except: Option<UserId>) -> StoreResult<()> {
    ensure_unique(conn, "email", email, except)
}

fn ensure_external_id_free(
    conn: &Connection,
    external_id: &str,
    except: Option<UserId>,
) -> StoreResult<()> {
    ensure_unique(conn, "external_id", external_id, except)
}

fn ensure_unique(
    conn: &Connection,
    column: &'static str,
    value: &str,
    except: Option<UserId>,
) -> StoreResult<()> {
    let owner: Option<String> = conn
        .query_row(
            &format!("SELECT id FROM users WHERE {column} = ?1"),
            [value],
            |r| r.get(0),
        )
        .optional()?;

    match owner {
        Some(owner) if except.is_none_or(|id| id.to_string() != owner) => Err(
            StoreError::Conflict(format!("{} '{}' is already taken", column, value)),
        ),
        _ => Ok(()),
    }
}
