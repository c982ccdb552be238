use serde::{Deserialize, Deserializer, Serialize};

use crate::ids::{EventId, ParticipantId, UserId};
use crate::models::{ParticipantRole, ParticipantStatus, Visibility};

/// Distinguishes an explicit `null` from an absent field: absent stays `None`,
/// `null` becomes `Some(None)`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// -- Users --

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateUserInput {
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateUserInput {
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub avatar_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub external_id: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub external_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// -- Events --

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateEventInput {
    pub title: String,
    pub description: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub emoji: Option<String>,
    pub visibility: Option<String>,
    pub creator_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateEventInput {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub emoji: Option<Option<String>>,
    pub visibility: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsQuery {
    pub visibility: Option<String>,
    pub creator_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventResponse {
    pub id: EventId,
    pub title: String,
    pub description: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub emoji: Option<String>,
    pub visibility: Visibility,
    pub creator_id: UserId,
    pub created_at: String,
    pub updated_at: String,
}

// -- Participants --

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateParticipantInput {
    pub user_id: String,
    pub event_id: String,
    pub role: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateParticipantInput {
    pub role: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParticipantsQuery {
    pub event_id: Option<String>,
    pub user_id: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantResponse {
    pub id: ParticipantId,
    pub user_id: UserId,
    pub event_id: EventId,
    pub role: ParticipantRole,
    pub status: ParticipantStatus,
    pub joined_at: String,
    pub updated_at: String,
}

/// A participant of an event together with the user behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventParticipantResponse {
    #[serde(flatten)]
    pub participant: ParticipantResponse,
    pub user: UserResponse,
}
