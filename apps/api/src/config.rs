use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub rust_log: String,
    /// Deployment environment name ("development", "production", ...).
    pub env: String,
    /// Directory attachments are written to (served statically elsewhere).
    pub upload_dir: String,
    /// Path to the category allow-list JSON, re-read on every request.
    pub categories_path: String,
    pub create_idea_daily_limit: i64,
    pub like_daily_limit: i64,
    pub token_daily_limit: i64,
    pub turnstile_secret: Option<String>,
    pub turnstile_site_key: Option<String>,
    /// Skips the Turnstile verification call; honored only outside production.
    pub bypass_turnstile: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            env: std::env::var("ENV").unwrap_or_else(|_| "development".to_string()),
            upload_dir: std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()),
            categories_path: std::env::var("CATEGORIES_PATH")
                .unwrap_or_else(|_| "categories.json".to_string()),
            create_idea_daily_limit: env_int("CREATE_IDEA_DAILY_LIMIT", 5),
            like_daily_limit: env_int("LIKE_DAILY_LIMIT", 5),
            token_daily_limit: env_int("TOKEN_DAILY_LIMIT", 3),
            turnstile_secret: env_opt("CF_TURNSTILE_SECRET"),
            turnstile_site_key: env_opt("CF_TURNSTILE_SITE_KEY"),
            bypass_turnstile: std::env::var("BYPASS_TURNSTILE").as_deref() == Ok("1"),
        })
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Non-empty env var; an empty value counts as unset.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Positive integer env var with a fallback default. Zero, negative, and
/// unparsable values all fall back (a ceiling of 0 would disable the action).
fn env_int(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

/// Load-shed switch, read from the process environment on every request so
/// operators can flip it without a restart.
pub fn shed_enabled() -> bool {
    match std::env::var("LOAD_SHED") {
        Ok(v) => v == "1" || v.eq_ignore_ascii_case("true"),
        Err(_) => false,
    }
}
