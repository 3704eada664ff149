use sqlx::PgConnection;

/// Lowercases, collapses every run of non-alphanumerics to a single `-`, and
/// trims separators from both ends. Non-ASCII characters are dropped. An
/// empty result falls back to `"x"` so a slug is never blank.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_sep = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if out.is_empty() {
        "x".to_string()
    } else {
        out
    }
}

/// Base token for a username: slugified display name, else the email
/// local-part, else the raw email value.
pub fn username_base(display_name: &str, email: &str) -> String {
    let local = if !display_name.trim().is_empty() {
        display_name
    } else if let Some((local, _)) = email.split_once('@') {
        local
    } else {
        email
    };
    slugify(local)
}

/// Probes `base`, `base-2`, `base-3`, ... until a value unused in
/// `table.column` is found. Check-then-insert: the caller must perform the
/// actual insert inside the same transaction, and the column carries a UNIQUE
/// constraint as the backstop against the remaining race.
///
/// `table` and `column` come from call sites, never from user input.
pub async fn allocate_unique(
    conn: &mut PgConnection,
    table: &str,
    column: &str,
    base: &str,
) -> sqlx::Result<String> {
    let sql = format!("SELECT 1 FROM {table} WHERE {column} = $1 LIMIT 1");
    let mut candidate = base.to_string();
    let mut n: u32 = 2;
    loop {
        let taken: Option<i32> = sqlx::query_scalar(&sql)
            .bind(&candidate)
            .fetch_optional(&mut *conn)
            .await?;
        if taken.is_none() {
            return Ok(candidate);
        }
        candidate = format!("{base}-{n}");
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("My Great Idea"), "my-great-idea");
    }

    #[test]
    fn test_slugify_collapses_runs() {
        assert_eq!(slugify("a  --  b!!c"), "a-b-c");
    }

    #[test]
    fn test_slugify_trims_separators() {
        assert_eq!(slugify("  hello world  "), "hello-world");
        assert_eq!(slugify("---x---"), "x");
    }

    #[test]
    fn test_slugify_lowercases() {
        assert_eq!(slugify("CamelCase99"), "camelcase99");
    }

    #[test]
    fn test_slugify_drops_non_ascii() {
        assert_eq!(slugify("café idea"), "caf-idea");
    }

    #[test]
    fn test_slugify_empty_falls_back() {
        assert_eq!(slugify(""), "x");
        assert_eq!(slugify("!!!"), "x");
        assert_eq!(slugify("日本語"), "x");
    }

    #[test]
    fn test_username_base_prefers_display_name() {
        assert_eq!(username_base("Jane Doe", "jane@example.com"), "jane-doe");
    }

    #[test]
    fn test_username_base_falls_back_to_local_part() {
        assert_eq!(username_base("", "jane.doe@example.com"), "jane-doe");
        assert_eq!(username_base("   ", "jd99@example.com"), "jd99");
    }

    #[test]
    fn test_username_base_raw_email_without_at() {
        assert_eq!(username_base("", "not-an-email"), "not-an-email");
    }
}
