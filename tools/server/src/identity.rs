//! Caller identity.
//!
//! Authentication happens upstream; this server trusts the `X-User-Id`
//! header it forwards.

use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use notevault_common::UserId;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Reject requests without an identity and expose the `UserId` to handlers
/// through request extensions.
pub async fn identity_middleware(
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let user = request
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing X-User-Id header".to_string()))
        .and_then(|raw| {
            UserId::new(raw.trim())
                .map_err(|_| ApiError::Unauthorized("Empty X-User-Id header".to_string()))
        })?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
