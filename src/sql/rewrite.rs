//! Deterministic statement rewrites.
//!
//! The backend rejects a handful of constructs that are semantic no-ops for
//! it; those are removed here. Rewriting is a pure text transform decided
//! entirely by the classifier output, never by backend state.

use crate::config::RewriteConfig;
use crate::sql::classify::{Classified, StatementKind};

/// Apply the configured rewrites. Returns the SQL to send to the backend,
/// which is the input unchanged whenever no rule matches.
pub fn rewrite(sql: &str, classified: &Classified, config: &RewriteConfig) -> String {
    if classified.kind == StatementKind::Select && config.strip_for_update {
        if let Some(stripped) = strip_trailing_for_update(sql) {
            return stripped;
        }
    }
    sql.to_string()
}

/// Remove a trailing `FOR UPDATE` (with optional `;`), which the backend
/// rejects on read-only queries but which carries no meaning for it.
fn strip_trailing_for_update(sql: &str) -> Option<String> {
    let trimmed = sql.trim_end();
    let (body, had_semicolon) = match trimmed.strip_suffix(';') {
        Some(body) => (body.trim_end(), true),
        None => (trimmed, false),
    };

    let lower = body.to_ascii_lowercase();
    let stripped = lower.strip_suffix("for update")?;
    // Keyword boundary: the char before FOR must not be part of a word.
    if !stripped
        .chars()
        .next_back()
        .is_some_and(|c| c.is_whitespace() || c == ')')
    {
        return None;
    }
    let mut out = body[..stripped.trim_end().len()].trim_end().to_string();
    if had_semicolon {
        out.push(';');
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::classify::classify;

    fn config() -> RewriteConfig {
        RewriteConfig {
            strip_for_update: true,
        }
    }

    #[test]
    fn strips_for_update_from_select() {
        let sql = "SELECT * FROM t WHERE id = $1 FOR UPDATE";
        let classified = classify(sql);
        assert_eq!(
            rewrite(sql, &classified, &config()),
            "SELECT * FROM t WHERE id = $1"
        );
    }

    #[test]
    fn preserves_semicolon() {
        let sql = "SELECT 1 FOR UPDATE;";
        let classified = classify(sql);
        assert_eq!(rewrite(sql, &classified, &config()), "SELECT 1;");
    }

    #[test]
    fn leaves_other_statements_alone() {
        let sql = "UPDATE t SET a = 1";
        let classified = classify(sql);
        assert_eq!(rewrite(sql, &classified, &config()), sql);
    }

    #[test]
    fn ignores_for_update_inside_identifier() {
        let sql = "SELECT for_update";
        let classified = classify(sql);
        assert_eq!(rewrite(sql, &classified, &config()), sql);
    }

    #[test]
    fn disabled_by_config() {
        let sql = "SELECT 1 FOR UPDATE";
        let classified = classify(sql);
        let config = RewriteConfig {
            strip_for_update: false,
        };
        assert_eq!(rewrite(sql, &classified, &config), sql);
    }
}
