use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// The fixed pledge enumeration. A "token" pledge additionally moves the
/// idea's token counter through the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PledgeKind {
    Time,
    Mentorship,
    Token,
}

impl PledgeKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "time" => Some(PledgeKind::Time),
            "mentorship" => Some(PledgeKind::Mentorship),
            "token" => Some(PledgeKind::Token),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PledgeKind::Time => "time",
            PledgeKind::Mentorship => "mentorship",
            PledgeKind::Token => "token",
        }
    }
}

/// Listing shape for the leaderboard.
#[derive(Debug, FromRow, Serialize)]
pub struct IdeaSummaryRow {
    pub id: i64,
    pub title: String,
    pub summary: String,
    pub tokens: i64,
    pub likes: i64,
    pub url: Option<String>,
    pub video_url: Option<String>,
    pub file_path: Option<String>,
    pub category: String,
    pub tags: String,
}

#[derive(Debug, FromRow, Serialize)]
pub struct IdeaDetailRow {
    pub id: i64,
    pub title: String,
    pub summary: String,
    pub tokens: i64,
    pub likes: i64,
    pub url: Option<String>,
    pub video_url: Option<String>,
    pub file_path: Option<String>,
    pub file_mime: Option<String>,
    pub file_size: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub category: String,
    pub tags: String,
}

#[derive(Debug, FromRow, Serialize)]
pub struct PledgeRow {
    pub supporter_name: String,
    pub supporter_email: String,
    pub pledge_type: String,
    pub pledge_details: String,
    pub tokens_amount: Option<i64>,
}

/// GDPR export shapes (data-portability utility).
#[derive(Debug, FromRow, Serialize)]
pub struct GdprIdeaRow {
    pub id: i64,
    pub title: String,
    pub summary: String,
    pub category: String,
    pub tags: String,
    pub tokens: i64,
    pub likes: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow, Serialize)]
pub struct GdprPledgeRow {
    pub pledge_id: i64,
    pub idea_id: i64,
    pub pledge_type: String,
    pub pledge_details: String,
    pub tokens_amount: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pledge_kind_round_trip() {
        for kind in [PledgeKind::Time, PledgeKind::Mentorship, PledgeKind::Token] {
            assert_eq!(PledgeKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_pledge_kind_rejects_unknown() {
        assert_eq!(PledgeKind::parse("money"), None);
        assert_eq!(PledgeKind::parse(""), None);
        assert_eq!(PledgeKind::parse("Token"), None);
    }
}
