// API-key authentication and tier-indexed rate limiting (§4.6).
//
// The REST CRUD that issues and revokes keys is an external collaborator;
// this module only verifies a presented key and enforces the rate-limit
// counters, both of which the core must do on every authenticated request.

use crate::db::DatabasePool;
use crate::error::{KotaError, Result};
use rusqlite::params;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Resolved identity of an authenticated caller.
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub owner_scope: String,
    pub key_id: String,
    pub tier: String,
}

/// Parsed form of `kota_<tier>_<key_id>_<secret>`.
struct ParsedKey {
    tier: String,
    key_id: String,
    secret: String,
}

fn parse_bearer(header_value: &str) -> std::result::Result<ParsedKey, KotaError> {
    let token = header_value
        .strip_prefix("Bearer ")
        .ok_or(KotaError::AuthInvalidHeader)?
        .trim();

    let rest = token.strip_prefix("kota_").ok_or(KotaError::AuthInvalidHeader)?;
    let mut parts = rest.splitn(3, '_');
    let (tier, key_id, secret) = match (parts.next(), parts.next(), parts.next()) {
        (Some(t), Some(k), Some(s)) if !t.is_empty() && !k.is_empty() && !s.is_empty() => {
            (t, k, s)
        }
        _ => return Err(KotaError::AuthInvalidHeader),
    };

    Ok(ParsedKey {
        tier: tier.to_string(),
        key_id: key_id.to_string(),
        secret: secret.to_string(),
    })
}

fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Validate the `Authorization` header and return the resolved caller, or a
/// typed auth error. Comparison against the stored hash runs in constant
/// time relative to the hash length (P7): every candidate key's secret is
/// hashed unconditionally before any comparison, and the comparison itself
/// uses `subtle::ConstantTimeEq` rather than short-circuiting equality.
pub async fn authenticate(pool: &DatabasePool, header_value: Option<&str>) -> Result<CallerContext> {
    let header_value = header_value.ok_or(KotaError::AuthMissingKey)?;
    let parsed = parse_bearer(header_value)?;
    let candidate_hash = hash_secret(&parsed.secret);

    let key_id = parsed.key_id.clone();
    let stored: Option<(String, String, bool)> = pool
        .run(move |conn| {
            conn.query_row(
                "SELECT secret_hash, owner_scope, revoked FROM api_keys WHERE key_id = ?1",
                params![key_id],
                |row| {
                    let revoked: i64 = row.get(2)?;
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, revoked != 0))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
        })
        .await?;

    let Some((stored_hash, owner_scope, revoked)) = stored else {
        return Err(KotaError::AuthInvalidKey);
    };

    let matches = candidate_hash.as_bytes().ct_eq(stored_hash.as_bytes()).into();
    if revoked || !matches {
        return Err(KotaError::AuthInvalidKey);
    }

    Ok(CallerContext {
        owner_scope,
        key_id: parsed.key_id,
        tier: parsed.tier,
    })
}

/// Rate limit decision for one window.
#[derive(Debug, Clone, Copy)]
pub struct WindowLimit {
    pub limit: u64,
    pub remaining: u64,
    pub reset_unix: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub hour: WindowLimit,
    pub day: WindowLimit,
    pub allowed: bool,
}

fn tier_limits(tier: &str) -> (u64, u64) {
    match tier {
        "pro" => (10_000, 100_000),
        "enterprise" => (100_000, 1_000_000),
        _ => (1_000, 10_000),
    }
}

/// Atomically increment the hourly and daily counters for `key_id` and
/// report whether the request is allowed (§5: "atomic upsert ... to avoid
/// lost increments").
pub async fn check_and_increment(pool: &DatabasePool, key_id: &str, tier: &str) -> Result<RateLimitDecision> {
    let (hour_limit, day_limit) = tier_limits(tier);
    let key_id = key_id.to_string();

    let now = chrono::Utc::now();
    let hour_window = now.format("%Y-%m-%dT%H").to_string();
    let day_window = now.format("%Y-%m-%d").to_string();
    let hour_reset = (now + chrono::Duration::hours(1))
        .date_naive()
        .and_hms_opt(now.time().hour(), 0, 0)
        .map(|t| t.and_utc().timestamp())
        .unwrap_or_else(|| now.timestamp() + 3600);
    let day_reset = now.timestamp() + 86_400;

    let (hour_count, day_count) = pool
        .run(move |conn| -> std::result::Result<(i64, i64), rusqlite::Error> {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO rate_limit_counters (key_id, window_kind, window_start, count)
                 VALUES (?1, 'hour', ?2, 1)
                 ON CONFLICT(key_id, window_kind, window_start) DO UPDATE SET count = count + 1",
                params![key_id, hour_window],
            )?;
            tx.execute(
                "INSERT INTO rate_limit_counters (key_id, window_kind, window_start, count)
                 VALUES (?1, 'day', ?2, 1)
                 ON CONFLICT(key_id, window_kind, window_start) DO UPDATE SET count = count + 1",
                params![key_id, day_window],
            )?;
            let hour_count: i64 = tx.query_row(
                "SELECT count FROM rate_limit_counters WHERE key_id = ?1 AND window_kind = 'hour' AND window_start = ?2",
                params![key_id, hour_window],
                |row| row.get(0),
            )?;
            let day_count: i64 = tx.query_row(
                "SELECT count FROM rate_limit_counters WHERE key_id = ?1 AND window_kind = 'day' AND window_start = ?2",
                params![key_id, day_window],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok((hour_count, day_count))
        })
        .await?;

    let hour = WindowLimit {
        limit: hour_limit,
        remaining: hour_limit.saturating_sub(hour_count as u64),
        reset_unix: hour_reset,
    };
    let day = WindowLimit {
        limit: day_limit,
        remaining: day_limit.saturating_sub(day_count as u64),
        reset_unix: day_reset,
    };

    Ok(RateLimitDecision {
        hour,
        day,
        allowed: (hour_count as u64) <= hour_limit && (day_count as u64) <= day_limit,
    })
}

use chrono::Timelike;
