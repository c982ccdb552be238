use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::debug;

use morrow_types::ids::{EventId, ParticipantId, UserId};

use crate::events::event_exists;
use crate::models::{
    NewParticipant, ParticipantChanges, ParticipantFilter, ParticipantRow, ParticipantWithUser,
};
use crate::users::{USER_COLUMNS, map_user, user_exists};
use crate::{Session, StoreError, StoreResult, parse_column};

const PARTICIPANT_COLUMNS: &str =
    "p.id, p.user_id, p.event_id, p.role, p.status, p.joined_at, p.updated_at";
const PARTICIPANT_WIDTH: usize = 7;

fn map_participant(row: &Row<'_>) -> rusqlite::Result<ParticipantRow> {
    Ok(ParticipantRow {
        id: parse_column(row, 0)?,
        user_id: parse_column(row, 1)?,
        event_id: parse_column(row, 2)?,
        role: parse_column(row, 3)?,
        status: parse_column(row, 4)?,
        joined_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl Session<'_> {
    /// Enrolls a user in an event. A user holds at most one participation per
    /// event; a second attempt is a `Conflict`.
    pub fn create_participant(&self, new: NewParticipant) -> StoreResult<ParticipantRow> {
        let now = self.now();
        self.atomic(|tx| {
            if !user_exists(tx, new.user_id)? {
                return Err(StoreError::not_found("user", new.user_id));
            }
            if !event_exists(tx, new.event_id)? {
                return Err(StoreError::not_found("event", new.event_id));
            }
            if query_participation(tx, new.user_id, new.event_id)?.is_some() {
                return Err(StoreError::Conflict(format!(
                    "user {} already participates in event {}",
                    new.user_id, new.event_id
                )));
            }

            let participant = ParticipantRow {
                id: ParticipantId::new(),
                user_id: new.user_id,
                event_id: new.event_id,
                role: new.role.unwrap_or_default(),
                status: new.status.unwrap_or_default(),
                joined_at: now,
                updated_at: now,
            };

            tx.execute(
                "INSERT INTO participants (id, user_id, event_id, role, status, joined_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    participant.id.to_string(),
                    participant.user_id.to_string(),
                    participant.event_id.to_string(),
                    participant.role.as_str(),
                    participant.status.as_str(),
                    participant.joined_at,
                    participant.updated_at,
                ],
            )?;

            debug!(
                participant_id = %participant.id,
                user_id = %participant.user_id,
                event_id = %participant.event_id,
                "Participant created"
            );
            Ok(participant)
        })
    }

    pub fn get_participant(&self, id: ParticipantId) -> StoreResult<ParticipantRow> {
        self.read(|conn| {
            query_participant(conn, id)?.ok_or_else(|| StoreError::not_found("participant", id))
        })
    }

    /// The participation of `user_id` in `event_id`, if there is one.
    pub fn participation(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> StoreResult<Option<ParticipantRow>> {
        self.read(|conn| query_participation(conn, user_id, event_id))
    }

    pub fn list_participants(&self, filter: &ParticipantFilter) -> StoreResult<Vec<ParticipantRow>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        let mut push = |column: &str, value: String| {
            args.push(value);
            clauses.push(format!("{} = ?{}", column, args.len()));
        };
        if let Some(event_id) = filter.event_id {
            push("p.event_id", event_id.to_string());
        }
        if let Some(user_id) = filter.user_id {
            push("p.user_id", user_id.to_string());
        }
        if let Some(role) = filter.role {
            push("p.role", role.as_str().to_string());
        }
        if let Some(status) = filter.status {
            push("p.status", status.as_str().to_string());
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants p {where_sql}
                 ORDER BY p.joined_at, p.rowid"
            ))?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), map_participant)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Participants of an event, each joined with its user in one query.
    pub fn participants_of_event(&self, event_id: EventId) -> StoreResult<Vec<ParticipantWithUser>> {
        self.read(|conn| {
            if !event_exists(conn, event_id)? {
                return Err(StoreError::not_found("event", event_id));
            }

            let mut stmt = conn.prepare(&format!(
                "SELECT {PARTICIPANT_COLUMNS}, {USER_COLUMNS}
                 FROM participants p
                 JOIN users u ON u.id = p.user_id
                 WHERE p.event_id = ?1
                 ORDER BY p.joined_at, p.rowid"
            ))?;
            let rows = stmt
                .query_map([event_id.to_string()], |row| {
                    Ok(ParticipantWithUser {
                        participant: map_participant(row)?,
                        user: map_user(row, PARTICIPANT_WIDTH)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Changes role and/or status. Any status may follow any other; an empty
    /// change set returns the stored row untouched.
    pub fn update_participant(
        &self,
        id: ParticipantId,
        changes: ParticipantChanges,
    ) -> StoreResult<ParticipantRow> {
        let now = self.now();
        self.atomic(|tx| {
            let mut participant = query_participant(tx, id)?
                .ok_or_else(|| StoreError::not_found("participant", id))?;
            if changes.is_empty() {
                return Ok(participant);
            }

            if let Some(role) = changes.role {
                participant.role = role;
            }
            if let Some(status) = changes.status {
                participant.status = status;
            }
            participant.updated_at = now;

            tx.execute(
                "UPDATE participants SET role = ?2, status = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    id.to_string(),
                    participant.role.as_str(),
                    participant.status.as_str(),
                    participant.updated_at,
                ],
            )?;

            debug!(
                participant_id = %id,
                role = %participant.role,
                status = %participant.status,
                "Participant updated"
            );
            Ok(participant)
        })
    }

    pub fn delete_participant(&self, id: ParticipantId) -> StoreResult<()> {
        self.atomic(|tx| {
            let removed = tx.execute("DELETE FROM participants WHERE id = ?1", [id.to_string()])?;
            if removed == 0 {
                return Err(StoreError::not_found("participant", id));
            }
            debug!(participant_id = %id, "Participant deleted");
            Ok(())
        })
    }
}

fn query_participant(conn: &Connection, id: ParticipantId) -> StoreResult<Option<ParticipantRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants p WHERE p.id = ?1"),
            [id.to_string()],
            map_participant,
        )
        .optional()?;
    Ok(row)
}

fn query_participation(
    conn: &Connection,
    user_id: UserId,
    event_id: EventId,
) -> StoreResult<Option<ParticipantRow>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants p
                 WHERE p.user_id = ?1 AND p.event_id = ?2"
            ),
            [user_id.to_string(), event_id.to_string()],
            map_participant,
        )
        .optional()?;
    Ok(row)
}
