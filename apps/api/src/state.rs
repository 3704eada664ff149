use sqlx::PgPool;

use crate::config::Config;
use crate::ideas::spam::TurnstileClient;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    /// Outbound human-verification client (Cloudflare Turnstile), fail-closed.
    pub turnstile: TurnstileClient,
}
