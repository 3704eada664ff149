//! Category allow-list and tag normalization.
//!
//! The list lives in a JSON file that operators can edit without a redeploy,
//! so it is re-read on every request that needs it.

pub const DEFAULT_CATEGORIES: &[&str] = &[
    "Research",
    "Open Source",
    "Product",
    "Tooling",
    "Education",
    "Community",
    "Infrastructure",
    "Design",
    "Governance",
    "Other",
];

/// Loads the allow-list from `path`, falling back to the built-in default
/// when the file is missing or malformed.
pub async fn load_categories(path: &str) -> Vec<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => parse_categories(&raw),
        Err(_) => default_categories(),
    }
}

pub fn parse_categories(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(cats) if !cats.is_empty() => cats,
        _ => default_categories(),
    }
}

fn default_categories() -> Vec<String> {
    DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect()
}

/// Case-insensitive match against the allow-list; anything unknown or empty
/// lands in "Other". Returns the canonical casing from the list.
pub fn sanitize_category(raw: Option<&str>, allowed: &[String]) -> String {
    let c = raw.unwrap_or("").trim();
    if c.is_empty() {
        return "Other".to_string();
    }
    for a in allowed {
        if a.eq_ignore_ascii_case(c) {
            return a.clone();
        }
    }
    "Other".to_string()
}

/// Accepts CSV or a JSON string array; emits canonical CSV — lowercase,
/// trimmed, de-duplicated, original order preserved.
pub fn normalize_tags(raw: &str) -> String {
    let raw = raw.trim();
    let items: Vec<String> = match serde_json::from_str::<Vec<serde_json::Value>>(raw) {
        Ok(arr) => arr
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        Err(_) => raw.split(',').map(|s| s.to_string()).collect(),
    };

    let mut norm: Vec<String> = Vec::new();
    for t in items {
        let t = t.trim().to_lowercase();
        if !t.is_empty() && !norm.iter().any(|e| e == &t) {
            norm.push(t);
        }
    }
    norm.join(",")
}
