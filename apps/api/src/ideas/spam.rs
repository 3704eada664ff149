//! Spam Guard — pre-admission heuristics plus the outbound human-verification
//! call (Cloudflare Turnstile). Verification is fail-closed: if the upstream
//! service cannot confirm a human, the submission is rejected.

use std::net::IpAddr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::errors::AppError;
use crate::state::AppState;

const SITEVERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";
const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Fastest plausible human form fill.
pub const MIN_FILL_MS: i64 = 1_500;
/// Oldest acceptable form render; anything staler smells like session replay.
pub const MAX_FILL_MS: i64 = 30 * 60 * 1_000;

/// Anti-bot signals carried alongside a submission.
#[derive(Debug, Default)]
pub struct GuardFields {
    /// Hidden form field legitimate clients never populate.
    pub honeypot: String,
    /// Client-reported "form rendered at" in ms since epoch; 0 = absent.
    pub form_rendered_at: i64,
    pub turnstile_token: Option<String>,
}

/// Pure heuristic evaluation: honeypot, then fill-time window.
/// A `form_rendered_at` of 0 skips the timing check entirely.
pub fn evaluate(fields: &GuardFields, now_ms: i64) -> Result<(), AppError> {
    if !fields.honeypot.is_empty() {
        return Err(AppError::Spam("spam_detected"));
    }
    if fields.form_rendered_at > 0 {
        let delta = now_ms - fields.form_rendered_at;
        if delta < MIN_FILL_MS || delta > MAX_FILL_MS {
            return Err(AppError::Spam("suspicious_timing"));
        }
    }
    Ok(())
}

/// Runs the Turnstile check if a secret is configured. The test bypass flag
/// is honored only outside production.
pub async fn require_human(
    state: &AppState,
    token: Option<&str>,
    remote_ip: Option<IpAddr>,
) -> Result<(), AppError> {
    let Some(secret) = state.config.turnstile_secret.as_deref() else {
        return Ok(()); // dev/test mode: no secret, no check
    };
    if state.config.bypass_turnstile && !state.config.is_production() {
        return Ok(());
    }
    if state
        .turnstile
        .verify(secret, token.unwrap_or(""), remote_ip)
        .await
    {
        Ok(())
    } else {
        Err(AppError::Spam("turnstile_failed"))
    }
}

#[derive(Debug, Deserialize)]
struct SiteverifyResponse {
    success: bool,
}

/// The single point of contact with the Turnstile siteverify endpoint.
#[derive(Clone)]
pub struct TurnstileClient {
    client: reqwest::Client,
}

impl TurnstileClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(VERIFY_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Returns true only on an explicit success verdict. Missing token,
    /// transport error, timeout, and malformed body all count as rejection.
    pub async fn verify(&self, secret: &str, token: &str, remote_ip: Option<IpAddr>) -> bool {
        if token.is_empty() {
            return false;
        }
        let form = [
            ("secret", secret.to_string()),
            ("response", token.to_string()),
            (
                "remoteip",
                remote_ip.map(|ip| ip.to_string()).unwrap_or_default(),
            ),
        ];
        match self.client.post(SITEVERIFY_URL).form(&form).send().await {
            Ok(res) => match res.json::<SiteverifyResponse>().await {
                Ok(body) => body.success,
                Err(e) => {
                    warn!("Turnstile response parse failed: {e}");
                    false
                }
            },
            Err(e) => {
                warn!("Turnstile verification call failed: {e}");
                false
            }
        }
    }
}

impl Default for TurnstileClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(honeypot: &str, rendered_at: i64) -> GuardFields {
        GuardFields {
            honeypot: honeypot.to_string(),
            form_rendered_at: rendered_at,
            turnstile_token: None,
        }
    }

    #[test]
    fn test_honeypot_rejects() {
        let err = evaluate(&guard("555-1234", 0), 1_000_000).unwrap_err();
        assert!(matches!(err, AppError::Spam("spam_detected")));
    }

    #[test]
    fn test_too_fast_rejects() {
        let now = 1_000_000;
        let err = evaluate(&guard("", now - 500), now).unwrap_err();
        assert!(matches!(err, AppError::Spam("suspicious_timing")));
    }

    #[test]
    fn test_stale_form_rejects() {
        let now = 2_000_000_000;
        let err = evaluate(&guard("", now - MAX_FILL_MS - 1), now).unwrap_err();
        assert!(matches!(err, AppError::Spam("suspicious_timing")));
    }

    #[test]
    fn test_human_window_accepts() {
        let now = 1_000_000_000;
        assert!(evaluate(&guard("", now - 10_000), now).is_ok());
        assert!(evaluate(&guard("", now - MIN_FILL_MS), now).is_ok());
        assert!(evaluate(&guard("", now - MAX_FILL_MS), now).is_ok());
    }

    #[test]
    fn test_absent_timestamp_skips_check() {
        assert!(evaluate(&guard("", 0), 1_000_000).is_ok());
    }
}
