use std::collections::HashSet;

use morrow_db::StoreError;
use morrow_db::models::{
    EventFilter, NewParticipant, ParticipantChanges, ParticipantFilter, ParticipantRow,
};
use morrow_types::api::{
    CreateParticipantInput, ParticipantResponse, ParticipantsQuery, UpdateParticipantInput,
};
use morrow_types::ids::{EventId, ParticipantId};

use crate::error::ApiResult;
use crate::events::visible_event;
use crate::parse;
use crate::resolver::{RequestContext, Resolver};

pub(crate) fn to_response(row: ParticipantRow) -> ParticipantResponse {
    ParticipantResponse {
        id: row.id,
        user_id: row.user_id,
        event_id: row.event_id,
        role: row.role,
        status: row.status,
        joined_at: parse::format_timestamp(row.joined_at),
        updated_at: parse::format_timestamp(row.updated_at),
    }
}

impl Resolver {
    pub async fn create_participant(
        &self,
        ctx: &RequestContext,
        input: CreateParticipantInput,
    ) -> ApiResult<ParticipantResponse> {
        let new = NewParticipant {
            user_id: parse::id("user id", &input.user_id)?,
            event_id: parse::id("event id", &input.event_id)?,
            role: parse::token(input.role.as_deref())?,
            status: parse::token(input.status.as_deref())?,
        };

        let row = self.run(ctx, move |s| s.create_participant(new)).await?;
        Ok(to_response(row))
    }

    /// A participant is readable when the event it belongs to is.
    pub async fn participant(&self, ctx: &RequestContext, id: &str) -> ApiResult<ParticipantResponse> {
        let id: ParticipantId = parse::id("participant id", id)?;
        let caller = ctx.caller;
        let row = self
            .run(ctx, move |s| {
                let participant = s.get_participant(id)?;
                match visible_event(s, caller, participant.event_id) {
                    Ok(_) => Ok(participant),
                    Err(StoreError::NotFound { .. }) => Err(StoreError::not_found("participant", id)),
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(to_response(row))
    }

    pub async fn participants(
        &self,
        ctx: &RequestContext,
        query: ParticipantsQuery,
    ) -> ApiResult<Vec<ParticipantResponse>> {
        let filter = ParticipantFilter {
            event_id: parse::optional_id("event id", query.event_id.as_deref())?,
            user_id: parse::optional_id("user id", query.user_id.as_deref())?,
            role: parse::token(query.role.as_deref())?,
            status: parse::token(query.status.as_deref())?,
        };
        let scope = EventFilter {
            scope: ctx.caller.scope(),
            ..Default::default()
        };

        let rows = self
            .run(ctx, move |s| {
                let visible: HashSet<EventId> =
                    s.list_events(&scope)?.into_iter().map(|e| e.id).collect();
                let rows = s.list_participants(&filter)?;
                Ok(rows
                    .into_iter()
                    .filter(|p| visible.contains(&p.event_id))
                    .collect::<Vec<_>>())
            })
            .await?;
        Ok(rows.into_iter().map(to_response).collect())
    }

    /// Changes role and/or status. Every status transition is accepted.
    pub async fn update_participant(
        &self,
        ctx: &RequestContext,
        id: &str,
        input: UpdateParticipantInput,
    ) -> ApiResult<ParticipantResponse> {
        let id: ParticipantId = parse::id("participant id", id)?;
        let changes = ParticipantChanges {
            role: parse::token(input.role.as_deref())?,
            status: parse::token(input.status.as_deref())?,
        };

        let row = self.run(ctx, move |s| s.update_participant(id, changes)).await?;
        Ok(to_response(row))
    }

    pub async fn delete_participant(&self, ctx: &RequestContext, id: &str) -> ApiResult<bool> {
        let id: ParticipantId = parse::id("participant id", id)?;
        self.run(ctx, move |s| s.delete_participant(id)).await?;
        Ok(true)
    }
}
