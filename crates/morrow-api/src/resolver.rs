use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::error;

use morrow_db::{Database, Session, StoreResult};

use crate::access::Caller;
use crate::error::{ApiError, ApiResult};

/// Per-request state: who is asking, and when to give up.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub caller: Caller,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(caller: Caller) -> Self {
        Self {
            caller,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Aborts whatever this request is waiting on.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Translates API inputs into entity operations and entity rows back into
/// API records. The resolver methods live in `users`, `events` and
/// `participants`.
pub struct Resolver {
    db: Arc<Database>,
    request_timeout: Option<Duration>,
}

impl Resolver {
    pub fn new(db: Arc<Database>, request_timeout: Option<Duration>) -> Self {
        Self {
            db,
            request_timeout,
        }
    }

    /// A context for `caller` carrying the configured request timeout.
    pub fn context(&self, caller: Caller) -> RequestContext {
        let ctx = RequestContext::new(caller);
        match self.request_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }

    pub async fn health(&self) -> ApiResult<()> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.health_check())
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal
            })?
            .map_err(ApiError::from)
    }

    /// Runs `op` against a fresh session on the blocking pool. If the request
    /// is cancelled or its deadline passes first, the session is interrupted
    /// and the call resolves to `Cancelled` unless `op` had already committed.
    pub(crate) async fn run<T, F>(&self, ctx: &RequestContext, op: F) -> ApiResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session<'_>) -> StoreResult<T> + Send + 'static,
    {
        if ctx.cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }

        let token = ctx.cancel.child_token();
        let db = self.db.clone();
        let session_token = token.clone();
        let mut handle = tokio::task::spawn_blocking(move || {
            let session = db.session_with_cancel(session_token);
            op(&session)
        });

        let joined = tokio::select! {
            joined = &mut handle => joined,
            _ = token.cancelled() => handle.await,
            _ = expired(ctx.deadline) => {
                token.cancel();
                handle.await
            }
        };

        joined
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal
            })?
            .map_err(ApiError::from)
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
