use axum::{extract::Request, middleware::Next, response::Response};
use tracing::warn;

use crate::access::Caller;
use crate::error::ApiError;
use crate::parse;

/// Header carrying the caller's user id. Set by the upstream auth layer after
/// it has validated the session; this service trusts it as-is.
pub const CALLER_HEADER: &str = "x-user-id";

/// Resolves the [`Caller`] for the request and stores it as an extension.
/// No header means an anonymous caller; a malformed one is rejected.
pub async fn identify_caller(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let caller = match req.headers().get(CALLER_HEADER) {
        None => Caller::Anonymous,
        Some(value) => {
            let parsed = value
                .to_str()
                .map_err(|_| ApiError::Validation("invalid X-User-Id header".into()))
                .and_then(|raw| parse::id("X-User-Id header", raw));
            match parsed {
                Ok(id) => Caller::User(id),
                Err(e) => {
                    warn!(header = ?value, "Rejected caller header: {}", e);
                    return Err(e);
                }
            }
        }
    };

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
