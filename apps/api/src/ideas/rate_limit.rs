//! Per-actor daily ceilings.
//!
//! Two shapes: a row-locked upsert counter keyed by (idea, ip, day, action)
//! for likes and token taps, and a read-only COUNT over today's ideas for
//! the creation ceiling. Actors with no resolvable IP are exempt from the
//! counter path; callers skip the check for them.

use std::net::IpAddr;

use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use sqlx::{PgConnection, PgPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Like,
    Tap,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Like => "like",
            ActionKind::Tap => "tap",
        }
    }
}

/// Denial is an ordinary outcome (HTTP 429), distinct from storage failure.
#[derive(Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { count: i64 },
    Denied { count: i64, ceiling: i64 },
}

/// UTC calendar-date bucket all ceilings are keyed by.
pub fn utc_day() -> NaiveDate {
    Utc::now().date_naive()
}

/// Binary-packed actor address: 4 bytes for v4, 16 for v6.
pub fn ip_bytes(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Locks the (idea, ip, day, action) counter row, checks it against the
/// ceiling, and increments (inserting at 1 if absent). Must run inside the
/// caller's transaction; a `Denied` result is expected to roll it back.
pub async fn check_and_increment(
    conn: &mut PgConnection,
    action: ActionKind,
    idea_id: i64,
    ip: &[u8],
    day: NaiveDate,
    ceiling: i64,
) -> sqlx::Result<RateDecision> {
    let current: Option<i64> = sqlx::query_scalar(
        "SELECT count FROM daily_action_counts \
         WHERE idea_id = $1 AND ip = $2 AND day = $3 AND action = $4 FOR UPDATE",
    )
    .bind(idea_id)
    .bind(ip)
    .bind(day)
    .bind(action.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    let current = current.unwrap_or(0);
    if current >= ceiling {
        return Ok(RateDecision::Denied {
            count: current,
            ceiling,
        });
    }

    // ON CONFLICT covers two first-tap requests racing to create the row.
    let count: i64 = sqlx::query_scalar(
        "INSERT INTO daily_action_counts (idea_id, ip, day, action, count) \
         VALUES ($1, $2, $3, $4, 1) \
         ON CONFLICT (idea_id, ip, day, action) \
         DO UPDATE SET count = daily_action_counts.count + 1 \
         RETURNING count",
    )
    .bind(idea_id)
    .bind(ip)
    .bind(day)
    .bind(action.as_str())
    .fetch_one(&mut *conn)
    .await?;

    // Two first actions can race past the row lock when no row exists yet;
    // the upsert serializes them, so catch the overshoot here.
    if count > ceiling {
        return Ok(RateDecision::Denied { count, ceiling });
    }

    Ok(RateDecision::Allowed { count })
}

/// Ideas created today by this actor, matched by email OR submit IP.
/// Plain count query, not lock-protected: idea creation is low-frequency and
/// gated by the spam checks first, so the small overshoot window is accepted.
pub async fn creation_count_today(
    pool: &PgPool,
    email: &str,
    ip: Option<&[u8]>,
    day: NaiveDate,
) -> sqlx::Result<i64> {
    let start = day.and_time(NaiveTime::MIN).and_utc();
    let end = start + Duration::days(1);

    match ip {
        Some(ip) => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM ideas \
                 WHERE created_at >= $1 AND created_at < $2 \
                   AND (submitter_email = $3 OR submit_ip = $4)",
            )
            .bind(start)
            .bind(end)
            .bind(email)
            .bind(ip)
            .fetch_one(pool)
            .await
        }
        None => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM ideas \
                 WHERE created_at >= $1 AND created_at < $2 AND submitter_email = $3",
            )
            .bind(start)
            .bind(end)
            .bind(email)
            .fetch_one(pool)
            .await
        }
    }
}
