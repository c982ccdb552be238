use morrow_db::models::{DeleteMode, NewUser, UserChanges, UserRow};
use morrow_types::api::{CreateUserInput, UpdateUserInput, UserResponse};
use morrow_types::ids::UserId;

use crate::access::{Check, run_checks};
use crate::error::{ApiError, ApiResult};
use crate::parse;
use crate::resolver::{RequestContext, Resolver};

pub(crate) fn to_response(row: UserRow) -> UserResponse {
    UserResponse {
        id: row.id,
        email: row.email,
        name: row.name,
        avatar_url: row.avatar_url,
        external_id: row.external_id,
        created_at: parse::format_timestamp(row.created_at),
        updated_at: parse::format_timestamp(row.updated_at),
    }
}

fn check_email(email: &str) -> ApiResult<()> {
    match email.trim().split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(ApiError::Validation(format!("invalid email '{}'", email))),
    }
}

fn check_name(name: &str) -> ApiResult<()> {
    if name.trim().is_empty() {
        return Err(ApiError::Validation("name must not be empty".into()));
    }
    Ok(())
}

fn new_email(u: &NewUser) -> ApiResult<()> {
    check_email(&u.email)
}

fn new_name(u: &NewUser) -> ApiResult<()> {
    check_name(&u.name)
}

fn changed_email(c: &UserChanges) -> ApiResult<()> {
    c.email.as_deref().map_or(Ok(()), check_email)
}

fn changed_name(c: &UserChanges) -> ApiResult<()> {
    c.name.as_deref().map_or(Ok(()), check_name)
}

const CREATE_CHECKS: &[Check<NewUser>] = &[new_email, new_name];
const UPDATE_CHECKS: &[Check<UserChanges>] = &[changed_email, changed_name];

impl Resolver {
    pub async fn create_user(
        &self,
        ctx: &RequestContext,
        input: CreateUserInput,
    ) -> ApiResult<UserResponse> {
        let new = NewUser {
            email: input.email.trim().to_string(),
            name: input.name,
            avatar_url: input.avatar_url,
            external_id: input.external_id,
        };
        run_checks(&new, CREATE_CHECKS)?;

        let row = self.run(ctx, move |s| s.create_user(new)).await?;
        Ok(to_response(row))
    }

    pub async fn user(&self, ctx: &RequestContext, id: &str) -> ApiResult<UserResponse> {
        let id: UserId = parse::id("user id", id)?;
        let row = self.run(ctx, move |s| s.get_user(id)).await?;
        Ok(to_response(row))
    }

    pub async fn users(&self, ctx: &RequestContext) -> ApiResult<Vec<UserResponse>> {
        let rows = self.run(ctx, |s| s.list_users()).await?;
        Ok(rows.into_iter().map(to_response).collect())
    }

    pub async fn update_user(
        &self,
        ctx: &RequestContext,
        id: &str,
        input: UpdateUserInput,
    ) -> ApiResult<UserResponse> {
        let id: UserId = parse::id("user id", id)?;
        let changes = UserChanges {
            email: input.email.map(|e| e.trim().to_string()),
            name: input.name,
            avatar_url: input.avatar_url,
            external_id: input.external_id,
        };
        run_checks(&changes, UPDATE_CHECKS)?;

        let row = self.run(ctx, move |s| s.update_user(id, changes)).await?;
        Ok(to_response(row))
    }

    /// Deletes a user. Without `cascade` this is refused while the user still
    /// owns events or participations.
    pub async fn delete_user(&self, ctx: &RequestContext, id: &str, cascade: bool) -> ApiResult<bool> {
        let id: UserId = parse::id("user id", id)?;
        let mode = if cascade {
            DeleteMode::Cascade
        } else {
            DeleteMode::Restrict
        };
        self.run(ctx, move |s| s.delete_user(id, mode)).await?;
        Ok(true)
    }
}
