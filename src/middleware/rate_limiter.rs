// Global rate limit for query sessions

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::warn;

pub type QueryLimiter = Arc<DefaultDirectRateLimiter>;

/// `None` when the limit is disabled
pub fn query_limiter(per_minute: u32) -> Option<QueryLimiter> {
    NonZeroU32::new(per_minute).map(|n| Arc::new(RateLimiter::direct(Quota::per_minute(n))))
}

pub async fn rate_limiter_middleware(
    State(limiter): State<QueryLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if limiter.check().is_err() {
        warn!(path = %req.uri().path(), "Query rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(next.run(req).await)
}
