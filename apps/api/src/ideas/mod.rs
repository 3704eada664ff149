pub mod categories;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod rate_limit;
pub mod slug;
pub mod spam;
pub mod submit;
pub mod upload;

/// Emails are matched case-insensitively; normalize before any lookup.
pub fn normalize_email(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Deliberately loose: one `@`, non-empty local part, dotted domain.
/// Deliverability is not this service's problem.
pub fn is_valid_email(s: &str) -> bool {
    if s.is_empty() || s.contains(char::is_whitespace) {
        return false;
    }
    let mut parts = s.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Jane@Example.COM "), "jane@example.com");
    }

    #[test]
    fn test_valid_emails() {
        assert!(is_valid_email("jane@example.com"));
        assert!(is_valid_email("j.doe+tag@sub.example.org"));
    }

    #[test]
    fn test_invalid_emails() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("jane@nodot"));
        assert!(!is_valid_email("jane@.com"));
        assert!(!is_valid_email("jane@example.com."));
        assert!(!is_valid_email("two@@example.com"));
        assert!(!is_valid_email("sp ace@example.com"));
    }
}
