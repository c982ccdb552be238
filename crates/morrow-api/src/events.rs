use morrow_db::models::{EventChanges, EventFilter, EventRow, NewEvent};
use morrow_db::{Session, StoreError, StoreResult};
use morrow_types::api::{
    CreateEventInput, EventParticipantResponse, EventResponse, EventsQuery, UpdateEventInput,
};
use morrow_types::ids::{EventId, UserId};

use crate::access::{Caller, Check, can_view, run_checks};
use crate::error::{ApiError, ApiResult};
use crate::resolver::{RequestContext, Resolver};
use crate::{parse, participants, users};

pub(crate) fn to_response(row: EventRow) -> EventResponse {
    EventResponse {
        id: row.id,
        title: row.title,
        description: row.description,
        start_time: parse::format_timestamp(row.start_time),
        end_time: parse::format_timestamp(row.end_time),
        emoji: row.emoji,
        visibility: row.visibility,
        creator_id: row.creator_id,
        created_at: parse::format_timestamp(row.created_at),
        updated_at: parse::format_timestamp(row.updated_at),
    }
}

/// Loads an event the caller is allowed to read. Hidden events fail exactly
/// like missing ones.
pub(crate) fn visible_event(s: &Session<'_>, caller: Caller, id: EventId) -> StoreResult<EventRow> {
    let event = s.get_event(id)?;
    let participation = match caller.user_id() {
        Some(user_id) => s.participation(user_id, id)?,
        None => None,
    };

    if can_view(&event, caller, participation.as_ref()) {
        Ok(event)
    } else {
        Err(StoreError::not_found("event", id))
    }
}

fn title_present(e: &NewEvent) -> ApiResult<()> {
    if e.title.trim().is_empty() {
        return Err(ApiError::Validation("title must not be empty".into()));
    }
    Ok(())
}

fn starts_before_end(e: &NewEvent) -> ApiResult<()> {
    if e.start_time >= e.end_time {
        return Err(ApiError::Validation(format!(
            "start time {} must be before end time {}",
            parse::format_timestamp(e.start_time),
            parse::format_timestamp(e.end_time)
        )));
    }
    Ok(())
}

fn changed_title(c: &EventChanges) -> ApiResult<()> {
    match &c.title {
        Some(title) if title.trim().is_empty() => {
            Err(ApiError::Validation("title must not be empty".into()))
        }
        _ => Ok(()),
    }
}

// One-sided time changes are checked against the stored row by the store.
fn changed_times(c: &EventChanges) -> ApiResult<()> {
    match (c.start_time, c.end_time) {
        (Some(start), Some(end)) if start >= end => Err(ApiError::Validation(format!(
            "start time {} must be before end time {}",
            parse::format_timestamp(start),
            parse::format_timestamp(end)
        ))),
        _ => Ok(()),
    }
}

const CREATE_CHECKS: &[Check<NewEvent>] = &[title_present, starts_before_end];
const UPDATE_CHECKS: &[Check<EventChanges>] = &[changed_title, changed_times];

impl Resolver {
    pub async fn create_event(
        &self,
        ctx: &RequestContext,
        input: CreateEventInput,
    ) -> ApiResult<EventResponse> {
        let new = NewEvent {
            creator_id: parse::id::<UserId>("creator id", &input.creator_id)?,
            start_time: parse::timestamp("start_time", &input.start_time)?,
            end_time: parse::timestamp("end_time", &input.end_time)?,
            visibility: parse::token(input.visibility.as_deref())?,
            title: input.title,
            description: input.description,
            emoji: input.emoji,
        };
        run_checks(&new, CREATE_CHECKS)?;

        let row = self.run(ctx, move |s| s.create_event(new)).await?;
        Ok(to_response(row))
    }

    pub async fn event(&self, ctx: &RequestContext, id: &str) -> ApiResult<EventResponse> {
        let id: EventId = parse::id("event id", id)?;
        let caller = ctx.caller;
        let row = self.run(ctx, move |s| visible_event(s, caller, id)).await?;
        Ok(to_response(row))
    }

    /// Events the caller may read, optionally narrowed by visibility and creator.
    pub async fn events(
        &self,
        ctx: &RequestContext,
        query: EventsQuery,
    ) -> ApiResult<Vec<EventResponse>> {
        let filter = EventFilter {
            visibility: parse::token(query.visibility.as_deref())?,
            creator_id: parse::optional_id("creator id", query.creator_id.as_deref())?,
            scope: ctx.caller.scope(),
        };

        let rows = self.run(ctx, move |s| s.list_events(&filter)).await?;
        Ok(rows.into_iter().map(to_response).collect())
    }

    pub async fn update_event(
        &self,
        ctx: &RequestContext,
        id: &str,
        input: UpdateEventInput,
    ) -> ApiResult<EventResponse> {
        let id: EventId = parse::id("event id", id)?;
        let changes = EventChanges {
            title: input.title,
            description: input.description,
            start_time: parse::optional_timestamp("start_time", input.start_time.as_deref())?,
            end_time: parse::optional_timestamp("end_time", input.end_time.as_deref())?,
            emoji: input.emoji,
            visibility: parse::token(input.visibility.as_deref())?,
        };
        run_checks(&changes, UPDATE_CHECKS)?;

        let row = self.run(ctx, move |s| s.update_event(id, changes)).await?;
        Ok(to_response(row))
    }

    pub async fn delete_event(&self, ctx: &RequestContext, id: &str) -> ApiResult<bool> {
        let id: EventId = parse::id("event id", id)?;
        self.run(ctx, move |s| s.delete_event(id)).await?;
        Ok(true)
    }

    /// Participants of an event with their users, if the caller can see the event.
    pub async fn event_participants(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> ApiResult<Vec<EventParticipantResponse>> {
        let id: EventId = parse::id("event id", id)?;
        let caller = ctx.caller;
        let rows = self
            .run(ctx, move |s| {
                visible_event(s, caller, id)?;
                s.participants_of_event(id)
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| EventParticipantResponse {
                participant: participants::to_response(row.participant),
                user: users::to_response(row.user),
            })
            .collect())
    }
}
