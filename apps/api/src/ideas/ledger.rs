//! Contribution Ledger — the only writer of pledge rows, token events, and
//! the denormalized counters on `ideas`. Each public function owns one
//! transaction; any failure inside rolls back every write in it, so readers
//! never observe partial state. The invariant maintained here:
//! `ideas.tokens` equals the sum of `token_events.delta` for that idea.

use std::net::IpAddr;

use sqlx::PgPool;
use tracing::info;

use crate::errors::AppError;
use crate::ideas::models::PledgeKind;
use crate::ideas::rate_limit::{check_and_increment, ip_bytes, utc_day, ActionKind, RateDecision};

pub struct NewPledge<'a> {
    pub idea_id: i64,
    pub supporter_name: &'a str,
    pub supporter_email: &'a str,
    pub kind: PledgeKind,
    pub details: &'a str,
    pub tokens_amount: i64,
}

/// Inserts one immutable pledge row; a token pledge with a positive amount
/// also writes a `pledge` token event and bumps the idea's token counter in
/// the same transaction.
pub async fn record_pledge(
    db: &PgPool,
    pledge: NewPledge<'_>,
    actor_ip: Option<IpAddr>,
    user_agent: Option<&str>,
) -> Result<(), AppError> {
    let mut tx = db.begin().await?;

    let token_amount = if pledge.kind == PledgeKind::Token && pledge.tokens_amount > 0 {
        Some(pledge.tokens_amount)
    } else {
        None
    };

    sqlx::query(
        "INSERT INTO idea_interest \
         (idea_id, supporter_name, supporter_email, pledge_type, pledge_details, tokens_amount) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(pledge.idea_id)
    .bind(pledge.supporter_name)
    .bind(pledge.supporter_email)
    .bind(pledge.kind.as_str())
    .bind(pledge.details)
    .bind(token_amount)
    .execute(&mut *tx)
    .await
    .map_err(missing_idea_as_not_found)?;

    if let Some(amount) = token_amount {
        insert_token_event(&mut tx, pledge.idea_id, amount, "pledge", actor_ip, user_agent).await?;
        bump_tokens(&mut tx, pledge.idea_id, amount).await?;
    }

    tx.commit().await?;
    info!(
        "Recorded {} pledge for idea {}",
        pledge.kind.as_str(),
        pledge.idea_id
    );
    Ok(())
}

/// A single-click micro-contribution: rate-limit the (idea, ip, day) bucket,
/// then write a delta-1 `tap` event and bump the counter, all in one
/// transaction with the counter upsert.
pub async fn record_tap(
    db: &PgPool,
    idea_id: i64,
    actor_ip: Option<IpAddr>,
    user_agent: Option<&str>,
    ceiling: i64,
) -> Result<(), AppError> {
    let mut tx = db.begin().await?;

    if let Some(ip) = actor_ip {
        let key = ip_bytes(ip);
        let decision =
            check_and_increment(&mut *tx, ActionKind::Tap, idea_id, &key, utc_day(), ceiling)
                .await
                .map_err(missing_idea_as_not_found)?;
        if let RateDecision::Denied { ceiling, .. } = decision {
            // Dropping the transaction rolls the lock back.
            return Err(AppError::RateLimited {
                limit: ceiling,
                message: "Daily token tap limit reached for this idea.",
            });
        }
    }

    insert_token_event(&mut tx, idea_id, 1, "tap", actor_ip, user_agent).await?;
    bump_tokens(&mut tx, idea_id, 1).await?;

    tx.commit().await?;
    Ok(())
}

/// Likes increment the counter after the rate limiter admits the actor.
/// Requests with no resolvable IP skip limiting entirely and leave no
/// rate-limit trail — intentional asymmetry, preserved as specified.
pub async fn record_like(
    db: &PgPool,
    idea_id: i64,
    actor_ip: Option<IpAddr>,
    ceiling: i64,
) -> Result<(), AppError> {
    let mut tx = db.begin().await?;

    if let Some(ip) = actor_ip {
        let key = ip_bytes(ip);
        let decision =
            check_and_increment(&mut *tx, ActionKind::Like, idea_id, &key, utc_day(), ceiling)
                .await
                .map_err(missing_idea_as_not_found)?;
        if let RateDecision::Denied { ceiling, .. } = decision {
            return Err(AppError::RateLimited {
                limit: ceiling,
                message: "Daily like limit reached for this idea.",
            });
        }
    }

    let updated = sqlx::query("UPDATE ideas SET likes = likes + 1 WHERE id = $1")
        .bind(idea_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(AppError::NotFound);
    }

    tx.commit().await?;
    Ok(())
}

async fn insert_token_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    idea_id: i64,
    delta: i64,
    reason: &str,
    actor_ip: Option<IpAddr>,
    user_agent: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO token_events (idea_id, delta, reason, actor_ip, user_agent) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(idea_id)
    .bind(delta)
    .bind(reason)
    .bind(actor_ip.map(ip_bytes))
    .bind(user_agent)
    .execute(&mut **tx)
    .await
    .map_err(missing_idea_as_not_found)?;
    Ok(())
}

async fn bump_tokens(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    idea_id: i64,
    amount: i64,
) -> Result<(), AppError> {
    let updated = sqlx::query("UPDATE ideas SET tokens = tokens + $1 WHERE id = $2")
        .bind(amount)
        .bind(idea_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

/// FK violations on idea_id mean the target idea does not exist; surface
/// that as 404 rather than a generic storage failure.
fn missing_idea_as_not_found(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => AppError::NotFound,
        _ => AppError::Database(e),
    }
}
