// Shared auth + rate-limit step for every authenticated HTTP handler.

use crate::auth::{self, CallerContext, RateLimitDecision};
use crate::db::DatabasePool;
use crate::error::KotaError;
use axum::http::{HeaderMap, HeaderValue};

pub async fn authenticate(pool: &DatabasePool, headers: &HeaderMap) -> Result<(CallerContext, RateLimitDecision), KotaError> {
    let header_value = headers.get("authorization").and_then(|v| v.to_str().ok());
    let caller = auth::authenticate(pool, header_value).await?;
    let decision = auth::check_and_increment(pool, &caller.key_id, &caller.tier).await?;

    if !decision.allowed {
        let retry_after = (decision.hour.reset_unix.min(decision.day.reset_unix) - now_unix()).max(1) as u64;
        tracing::warn!(key_id = %caller.key_id, tier = %caller.tier, retry_after, "rate limit exceeded");
        return Err(KotaError::RateLimited { retry_after_secs: retry_after });
    }

    Ok((caller, decision))
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Attach the `X-RateLimit-*` headers §4.6 requires on every authenticated response.
pub fn rate_limit_headers(decision: &RateLimitDecision) -> Vec<(&'static str, HeaderValue)> {
    let mk = |n: u64| HeaderValue::from_str(&n.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"));
    vec![
        ("x-ratelimit-limit-hour", mk(decision.hour.limit)),
        ("x-ratelimit-remaining-hour", mk(decision.hour.remaining)),
        ("x-ratelimit-reset-hour", mk(decision.hour.reset_unix.max(0) as u64)),
        ("x-ratelimit-limit-day", mk(decision.day.limit)),
        ("x-ratelimit-remaining-day", mk(decision.day.remaining)),
        ("x-ratelimit-reset-day", mk(decision.day.reset_unix.max(0) as u64)),
    ]
}
