// src/worker/sql_safety.rs
// Read-only enforcement: only SELECT/WITH statements are accepted, and a
// row cap is appended when the statement has no top-level LIMIT.

use super::error::WorkerError;

const DEFAULT_ROW_LIMIT: u32 = 1000;

/// Strips line comments (`-- ...`), block comments (`/* ... */`), and the
/// contents of single-quoted string literals, so keyword/LIMIT detection
/// isn't fooled by SQL text embedded in comments or strings.
fn strip_noise(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                i += 1;
            }
            i += 2;
            continue;
        }
        if c == '\'' {
            out.push(' ');
            i += 1;
            while i < chars.len() {
                if chars[i] == '\'' {
                    if chars.get(i + 1) == Some(&'\'') {
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                i += 1;
            }
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

fn first_keyword(stripped: &str) -> Option<String> {
    stripped
        .split_whitespace()
        .next()
        .map(|s| s.to_ascii_uppercase())
}

/// Rejects any statement whose first significant keyword is not SELECT or
/// WITH. Must run before the statement ever reaches the SQL engine.
pub fn reject_non_select(sql: &str) -> Result<(), WorkerError> {
    let stripped = strip_noise(sql);
    let keyword = first_keyword(&stripped);
    match keyword.as_deref() {
        Some("SELECT") | Some("WITH") => Ok(()),
        _ => Err(WorkerError::sql(
            "Only SELECT queries are supported. Data definition statements (CREATE, ALTER, DROP) and other non-read statements are not supported.",
        )),
    }
}

fn has_top_level_limit(stripped: &str) -> bool {
    let upper = stripped.to_ascii_uppercase();
    // A top-level LIMIT is one not nested inside parentheses (a subquery's
    // own LIMIT doesn't count).
    let mut depth = 0i32;
    let bytes = upper.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {}
        }
        if depth == 0 && upper[i..].starts_with("LIMIT") {
            let before_ok = i == 0 || !upper.as_bytes()[i - 1].is_ascii_alphanumeric();
            let after = i + 5;
            let after_ok = after >= upper.len() || !upper.as_bytes()[after].is_ascii_alphanumeric();
            if before_ok && after_ok {
                return true;
            }
        }
        i += 1;
    }
    false
}

/// Appends `LIMIT 1000` if the statement has no top-level LIMIT clause.
pub fn ensure_row_limit(sql: &str) -> String {
    let trimmed = sql.trim();
    let stripped = strip_noise(trimmed);
    if has_top_level_limit(&stripped) {
        trimmed.to_string()
    } else {
        format!("{} LIMIT {}", trimmed.trim_end_matches(';'), DEFAULT_ROW_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_and_with_are_allowed() {
        assert!(reject_non_select("SELECT * FROM t").is_ok());
        assert!(reject_non_select("  with x as (select 1) select * from x").is_ok());
    }

    #[test]
    fn ddl_and_dml_are_rejected() {
        assert!(reject_non_select("DROP TABLE t").is_err());
        assert!(reject_non_select("DELETE FROM t").is_err());
        assert!(reject_non_select("INSERT INTO t VALUES (1)").is_err());
        assert!(reject_non_select("-- select\nDROP TABLE t").is_err());
    }

    #[test]
    fn comment_stripping_does_not_defeat_the_check() {
        assert!(reject_non_select("/* drop everything */ SELECT 1").is_ok());
    }

    #[test]
    fn appends_limit_when_absent() {
        assert_eq!(ensure_row_limit("SELECT * FROM t"), "SELECT * FROM t LIMIT 1000");
    }

    #[test]
    fn leaves_existing_top_level_limit_alone() {
        assert_eq!(
            ensure_row_limit("SELECT * FROM t LIMIT 10"),
            "SELECT * FROM t LIMIT 10"
        );
    }

    #[test]
    fn subquery_limit_is_not_top_level() {
        let sql = "SELECT * FROM (SELECT * FROM t LIMIT 5) sub";
        assert_eq!(
            ensure_row_limit(sql),
            format!("{} LIMIT 1000", sql)
        );
    }
}
