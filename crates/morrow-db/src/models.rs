//! Row snapshots and per-operation request structs.
//!
//! Rows are owned copies of what the store holds; handing one out never
//! aliases another request's state. The `*Changes` structs carry partial
//! updates: `None` leaves a column alone, and for nullable columns
//! `Some(None)` clears it.

use chrono::{DateTime, Utc};
use morrow_types::ids::{EventId, ParticipantId, UserId};
use morrow_types::models::{ParticipantRole, ParticipantStatus, Visibility};

// -- Users --

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<Option<String>>,
    pub external_id: Option<Option<String>>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.name.is_none()
            && self.avatar_url.is_none()
            && self.external_id.is_none()
    }
}

/// What to do with a user's events and participations on delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteMode {
    /// Refuse while anything still references the user.
    #[default]
    Restrict,
    /// Remove the user's participations, created events and their participants.
    Cascade,
}

// -- Events --

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub id: EventId,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub emoji: Option<String>,
    pub visibility: Visibility,
    pub creator_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub emoji: Option<String>,
    /// `None` falls back to [`Visibility::Private`].
    pub visibility: Option<Visibility>,
    pub creator_id: UserId,
}

#[derive(Debug, Clone, Default)]
pub struct EventChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub emoji: Option<Option<String>>,
    pub visibility: Option<Visibility>,
}

impl EventChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
            && self.emoji.is_none()
            && self.visibility.is_none()
    }
}

/// Which events a viewer may read. The rules live with the caller; the store
/// only turns them into SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessScope {
    /// No restriction (administrative callers).
    #[default]
    All,
    /// Public events only.
    Anonymous,
    /// Public events, events the user created, shared events the user
    /// participates in, and private events the user accepted.
    Viewer(UserId),
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub visibility: Option<Visibility>,
    pub creator_id: Option<UserId>,
    pub scope: AccessScope,
}

// -- Participants --

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantRow {
    pub id: ParticipantId,
    pub user_id: UserId,
    pub event_id: EventId,
    pub role: ParticipantRole,
    pub status: ParticipantStatus,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub user_id: UserId,
    pub event_id: EventId,
    pub role: Option<ParticipantRole>,
    pub status: Option<ParticipantStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct ParticipantChanges {
    pub role: Option<ParticipantRole>,
    pub status: Option<ParticipantStatus>,
}

impl ParticipantChanges {
    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.status.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParticipantFilter {
    pub event_id: Option<EventId>,
    pub user_id: Option<UserId>,
    pub role: Option<ParticipantRole>,
    pub status: Option<ParticipantStatus>,
}

/// A participant joined with its user, as returned by
/// [`Session::participants_of_event`](crate::Session::participants_of_event).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantWithUser {
    pub participant: ParticipantRow,
    pub user: UserRow,
}
