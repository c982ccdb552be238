//! Who may read what, and the ordered input checks run before mutations.

use morrow_db::models::{AccessScope, EventRow, ParticipantRow};
use morrow_types::ids::UserId;
use morrow_types::models::{ParticipantStatus, Visibility};

use crate::error::ApiResult;

/// The identity a request acts as, as established by the upstream auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Caller {
    #[default]
    Anonymous,
    User(UserId),
}

impl Caller {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Caller::Anonymous => None,
            Caller::User(id) => Some(*id),
        }
    }

    /// The store-side filter equivalent to [`can_view`] for listings.
    pub fn scope(&self) -> AccessScope {
        match self {
            Caller::Anonymous => AccessScope::Anonymous,
            Caller::User(id) => AccessScope::Viewer(*id),
        }
    }
}

/// Visibility rules for a single event:
/// - public: anyone;
/// - shared: the creator and every participant, whatever their status;
/// - private: the creator and accepted participants.
///
/// `participation` is the caller's own participation in `event`, if any.
pub fn can_view(event: &EventRow, caller: Caller, participation: Option<&ParticipantRow>) -> bool {
    if event.visibility == Visibility::Public {
        return true;
    }
    let Some(user_id) = caller.user_id() else {
        return false;
    };
    if event.creator_id == user_id {
        return true;
    }

    match participation {
        Some(p) if p.user_id == user_id && p.event_id == event.id => match event.visibility {
            Visibility::Shared => true,
            Visibility::Private => p.status == ParticipantStatus::Accepted,
            Visibility::Public => true,
        },
        _ => false,
    }
}

/// A single validation step over an operation's input.
pub type Check<T> = fn(&T) -> ApiResult<()>;

/// Runs `checks` in order, stopping at the first failure.
pub fn run_checks<T>(input: &T, checks: &[Check<T>]) -> ApiResult<()> {
    checks.iter().try_for_each(|check| check(input))
}
