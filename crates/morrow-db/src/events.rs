use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::debug;

use morrow_types::ids::EventId;
use morrow_types::models::{ParticipantStatus, Visibility};

use crate::models::{AccessScope, EventChanges, EventFilter, EventRow, NewEvent};
use crate::users::user_exists;
use crate::{Session, StoreError, StoreResult, ensure_not_blank, parse_column};

const EVENT_COLUMNS: &str = "e.id, e.title, e.description, e.start_time, e.end_time, e.emoji, \
                             e.visibility, e.creator_id, e.created_at, e.updated_at";

fn map_event(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: parse_column(row, 0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
        emoji: row.get(5)?,
        visibility: parse_column(row, 6)?,
        creator_id: parse_column(row, 7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn ensure_time_range(start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<()> {
    if start >= end {
        return Err(StoreError::Validation(format!(
            "start time {} must be before end time {}",
            start.to_rfc3339(),
            end.to_rfc3339()
        )));
    }
    Ok(())
}

impl Session<'_> {
    pub fn create_event(&self, new: NewEvent) -> StoreResult<EventRow> {
        ensure_not_blank("title", &new.title)?;
        ensure_time_range(new.start_time, new.end_time)?;

        let now = self.now();
        self.atomic(|tx| {
            if !user_exists(tx, new.creator_id)? {
                return Err(StoreError::not_found("user", new.creator_id));
            }

            let event = EventRow {
                id: EventId::new(),
                title: new.title,
                description: new.description,
                start_time: new.start_time,
                end_time: new.end_time,
                emoji: new.emoji,
                visibility: new.visibility.unwrap_or_default(),
                creator_id: new.creator_id,
                created_at: now,
                updated_at: now,
            };

            tx.execute(
                "INSERT INTO events (id, title, description, start_time, end_time, emoji,
                                     visibility, creator_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    event.id.to_string(),
                    event.title,
                    event.description,
                    event.start_time,
                    event.end_time,
                    event.emoji,
                    event.visibility.as_str(),
                    event.creator_id.to_string(),
                    event.created_at,
                    event.updated_at,
                ],
            )?;

            debug!(event_id = %event.id, creator_id = %event.creator_id, "Event created");
            Ok(event)
        })
    }

    pub fn get_event(&self, id: EventId) -> StoreResult<EventRow> {
        self.read(|conn| query_event(conn, id)?.ok_or_else(|| StoreError::not_found("event", id)))
    }

    /// Lists events ordered by start time. `filter.scope` restricts the result
    /// to what a given viewer may read.
    pub fn list_events(&self, filter: &EventFilter) -> StoreResult<Vec<EventRow>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        if let Some(visibility) = filter.visibility {
            args.push(visibility.as_str().to_string());
            clauses.push(format!("e.visibility = ?{}", args.len()));
        }
        if let Some(creator_id) = filter.creator_id {
            args.push(creator_id.to_string());
            clauses.push(format!("e.creator_id = ?{}", args.len()));
        }
        match filter.scope {
            AccessScope::All => {}
            AccessScope::Anonymous => {
                clauses.push(format!("e.visibility = '{}'", Visibility::Public.as_str()));
            }
            AccessScope::Viewer(user_id) => {
                args.push(user_id.to_string());
                let n = args.len();
                clauses.push(format!(
                    "(e.visibility = '{public}'
                      OR e.creator_id = ?{n}
                      OR EXISTS (SELECT 1 FROM participants p
                                 WHERE p.event_id = e.id AND p.user_id = ?{n}
                                   AND (e.visibility = '{shared}' OR p.status = '{accepted}')))",
                    public = Visibility::Public.as_str(),
                    shared = Visibility::Shared.as_str(),
                    accepted = ParticipantStatus::Accepted.as_str(),
                ));
            }
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events e {where_sql} ORDER BY e.start_time, e.rowid"
            ))?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), map_event)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Applies `changes`, re-checking start < end against the merged times
    /// whenever either one is touched.
    pub fn update_event(&self, id: EventId, changes: EventChanges) -> StoreResult<EventRow> {
        let now = self.now();
        self.atomic(|tx| {
            let mut event =
                query_event(tx, id)?.ok_or_else(|| StoreError::not_found("event", id))?;
            if changes.is_empty() {
                return Ok(event);
            }

            if let Some(title) = changes.title {
                ensure_not_blank("title", &title)?;
                event.title = title;
            }
            if let Some(description) = changes.description {
                event.description = description;
            }
            if changes.start_time.is_some() || changes.end_time.is_some() {
                let start = changes.start_time.unwrap_or(event.start_time);
                let end = changes.end_time.unwrap_or(event.end_time);
                ensure_time_range(start, end)?;
                event.start_time = start;
                event.end_time = end;
            }
            if let Some(emoji) = changes.emoji {
                event.emoji = emoji;
            }
            if let Some(visibility) = changes.visibility {
                event.visibility = visibility;
            }
            event.updated_at = now;

            tx.execute(
                "UPDATE events
                 SET title = ?2, description = ?3, start_time = ?4, end_time = ?5,
                     emoji = ?6, visibility = ?7, updated_at = ?8
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    event.title,
                    event.description,
                    event.start_time,
                    event.end_time,
                    event.emoji,
                    event.visibility.as_str(),
                    event.updated_at,
                ],
            )?;

            debug!(event_id = %id, "Event updated");
            Ok(event)
        })
    }

    /// Deletes the event together with all of its participants.
    pub fn delete_event(&self, id: EventId) -> StoreResult<()> {
        self.atomic(|tx| {
            if !event_exists(tx, id)? {
                return Err(StoreError::not_found("event", id));
            }

            let key = id.to_string();
            let removed = tx.execute("DELETE FROM participants WHERE event_id = ?1", [&key])?;
            tx.execute("DELETE FROM events WHERE id = ?1", [&key])?;

            debug!(event_id = %id, participants = removed, "Event deleted");
            Ok(())
        })
    }
}

fn query_event(conn: &Connection, id: EventId) -> StoreResult<Option<EventRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM events e WHERE e.id = ?1"),
            [id.to_string()],
            map_event,
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn event_exists(conn: &Connection, id: EventId) -> StoreResult<bool> {
    let found = conn
        .query_row("SELECT 1 FROM events WHERE id = ?1", [id.to_string()], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use morrow_types::ids::UserId;

    use super::*;
    use crate::models::NewParticipant;
    use crate::testing::{at, db, db_with_clock, new_event, user};

    #[test]
    fn create_defaults_visibility_to_private() {
        let db = db();
        let s = db.session();
        let a = user(&s, "a@x.com");

        let event = s
            .create_event(NewEvent {
                visibility: None,
                ..new_event(a.id, Visibility::Public)
            })
            .unwrap();
        assert_eq!(event.visibility, Visibility::Private);
        assert_eq!(event.creator_id, a.id);
        assert_eq!(s.get_event(event.id).unwrap(), event);
    }

    #[test]
    fn inverted_or_empty_time_range_is_rejected() {
        let db = db();
        let s = db.session();
        let a = user(&s, "a@x.com");

        let inverted = NewEvent {
            start_time: at(12),
            end_time: at(10),
            ..new_event(a.id, Visibility::Private)
        };
        assert!(matches!(s.create_event(inverted), Err(StoreError::Validation(_))));

        let empty = NewEvent {
            start_time: at(10),
            end_time: at(10),
            ..new_event(a.id, Visibility::Private)
        };
        assert!(matches!(s.create_event(empty), Err(StoreError::Validation(_))));
        assert!(s.list_events(&EventFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn unknown_creator_is_not_found() {
        let db = db();
        let err = db
            .session()
            .create_event(new_event(UserId::new(), Visibility::Private))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "user", .. }));
    }

    #[test]
    fn update_checks_one_sided_time_changes_against_stored_value() {
        let (db, clock) = db_with_clock();
        let s = db.session();
        let a = user(&s, "a@x.com");
        let event = s.create_event(new_event(a.id, Visibility::Private)).unwrap();

        // Moving start past the stored end fails and leaves the row alone.
        let err = s
            .update_event(
                event.id,
                EventChanges {
                    start_time: Some(at(13)),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(s.get_event(event.id).unwrap(), event);

        clock.advance(Duration::minutes(1));
        let moved = s
            .update_event(
                event.id,
                EventChanges {
                    start_time: Some(at(13)),
                    end_time: Some(at(15)),
                    description: Some(Some("Beach".into())),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(moved.start_time, at(13));
        assert_eq!(moved.end_time, at(15));
        assert_eq!(moved.description.as_deref(), Some("Beach"));
        assert_eq!(moved.title, event.title);
        assert!(moved.updated_at > event.updated_at);
    }

    #[test]
    fn empty_update_is_idempotent() {
        let (db, clock) = db_with_clock();
        let s = db.session();
        let a = user(&s, "a@x.com");
        let event = s.create_event(new_event(a.id, Visibility::Shared)).unwrap();

        clock.advance(Duration::hours(2));
        assert_eq!(s.update_event(event.id, EventChanges::default()).unwrap(), event);
    }

    #[test]
    fn delete_cascades_to_participants() {
        let db = db();
        let s = db.session();
        let a = user(&s, "a@x.com");
        let event = s.create_event(new_event(a.id, Visibility::Private)).unwrap();
        let p = s
            .create_participant(NewParticipant {
                user_id: a.id,
                event_id: event.id,
                role: None,
                status: None,
            })
            .unwrap();

        s.delete_event(event.id).unwrap();
        assert!(matches!(s.get_participant(p.id), Err(StoreError::NotFound { .. })));
        assert!(matches!(s.delete_event(event.id), Err(StoreError::NotFound { .. })));
        // The creator is untouched.
        assert!(s.get_user(a.id).is_ok());
    }

    #[test]
    fn list_filters_by_visibility_and_creator() {
        let db = db();
        let s = db.session();
        let a = user(&s, "a@x.com");
        let b = user(&s, "b@x.com");
        s.create_event(new_event(a.id, Visibility::Private)).unwrap();
        let public = s.create_event(new_event(a.id, Visibility::Public)).unwrap();
        s.create_event(new_event(b.id, Visibility::Public)).unwrap();

        let by_a_public = s
            .list_events(&EventFilter {
                visibility: Some(Visibility::Public),
                creator_id: Some(a.id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_a_public, vec![public]);
        assert_eq!(s.list_events(&EventFilter::default()).unwrap().len(), 3);
    }

    #[test]
    fn viewer_scope_follows_visibility_rules() {
        let db = db();
        let s = db.session();
        let owner = user(&s, "owner@x.com");
        let guest = user(&s, "guest@x.com");

        let private = s.create_event(new_event(owner.id, Visibility::Private)).unwrap();
        let shared = s.create_event(new_event(owner.id, Visibility::Shared)).unwrap();
        let public = s.create_event(new_event(owner.id, Visibility::Public)).unwrap();

        let scoped = |scope| {
            let mut ids: Vec<EventId> = s
                .list_events(&EventFilter {
                    scope,
                    ..Default::default()
                })
                .unwrap()
                .into_iter()
                .map(|e| e.id)
                .collect();
            ids.sort();
            ids
        };
        let sorted = |mut ids: Vec<EventId>| {
            ids.sort();
            ids
        };

        assert_eq!(scoped(AccessScope::Anonymous), vec![public.id]);
        assert_eq!(scoped(AccessScope::Viewer(guest.id)), vec![public.id]);
        assert_eq!(
            scoped(AccessScope::Viewer(owner.id)),
            sorted(vec![private.id, shared.id, public.id])
        );

        // A pending invitation opens the shared event but not the private one.
        for event_id in [private.id, shared.id] {
            s.create_participant(NewParticipant {
                user_id: guest.id,
                event_id,
                role: None,
                status: None,
            })
            .unwrap();
        }
        assert_eq!(
            scoped(AccessScope::Viewer(guest.id)),
            sorted(vec![shared.id, public.id])
        );

        let invite = s.participation(guest.id, private.id).unwrap().unwrap();
        s.update_participant(
            invite.id,
            crate::models::ParticipantChanges {
                status: Some(ParticipantStatus::Accepted),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            scoped(AccessScope::Viewer(guest.id)),
            sorted(vec![private.id, shared.id, public.id])
        );
    }
}
