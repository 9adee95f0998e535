//! Post-population SQL scripts.
//!
//! Scripts are run one statement at a time so that a statement referring to
//! a column the current run did not populate fails alone.

use rusqlite::Connection;
use tracing::{debug, warn};

/// Removes `-- line` and `/* block */` comments outside string literals.
pub fn remove_sql_comments(script: &str) -> String {
    let mut out = String::with_capacity(script.len());
    let mut chars = script.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\'' {
                in_string = false;
            }
            continue;
        }
        match (c, chars.peek()) {
            ('\'', _) => {
                in_string = true;
                out.push(c);
            }
            ('-', Some('-')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Splits a script into statements on `;` at the end of a line, dropping
/// comments and blank statements.
pub fn split_statements(script: &str) -> Vec<String> {
    remove_sql_comments(script)
        .split(";\n")
        .map(|s| s.trim().trim_end_matches(';').trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Runs `script` statement by statement; returns how many succeeded.
/// Failing statements are logged and skipped.
pub fn run_script(conn: &Connection, table: &str, script: &str) -> usize {
    let mut ok = 0;
    for statement in split_statements(script) {
        debug!(target: "biblio_vdb::sql", table, sql = %statement, "Post-population statement");
        match conn.execute_batch(&statement) {
            Ok(()) => ok += 1,
            Err(e) => warn!(table, error = %e, sql = %statement, "Skipping failed post-population statement"),
        }
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_removed_outside_strings() {
        let s = "SELECT 1; -- trailing\n/* block\n comment */SELECT '--not a comment';\n";
        let cleaned = remove_sql_comments(s);
        assert!(!cleaned.contains("trailing"));
        assert!(!cleaned.contains("block"));
        assert!(cleaned.contains("'--not a comment'"));
    }

    #[test]
    fn split_on_line_end_semicolons() {
        let s = "CREATE INDEX a ON t(x);\n\n-- note\nUPDATE t SET x = 'a;b';\nSELECT 1";
        assert_eq!(
            split_statements(s),
            vec!["CREATE INDEX a ON t(x)", "UPDATE t SET x = 'a;b'", "SELECT 1"]
        );
    }

    #[test]
    fn failures_are_skipped() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t(x)").unwrap();
        let script = "CREATE INDEX t_x ON t(x);\nCREATE INDEX t_y ON t(y);\nINSERT INTO t VALUES (1);\n";
        assert_eq!(run_script(&conn, "t", script), 2);
        let n: i64 = conn.query_row("SELECT count(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(n, 1);
    }
}
