//! A deliberately small statement grammar:
//!
//! ```text
//! CREATE TABLE t
//! INSERT INTO t key value
//! SELECT * FROM t WHERE key = k
//! SELECT RANGE FROM t start [end]
//! DELETE FROM t WHERE key = k
//! BEGIN | COMMIT | ROLLBACK
//! ```
//!
//! Keywords are case-insensitive. Commas and parentheses separate tokens and a
//! `;` anywhere is dropped.

use bytes::Bytes;

use crate::{
    error::{Error, Result},
    executor::{Statement, TxAction},
};

pub fn tokenize(sql: &str) -> Vec<String> {
    sql.replace([',', '(', ')'], " ")
        .replace('=', " = ")
        .replace(';', "")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

pub fn parse(sql: &str) -> Result<Statement> {
    let tokens = tokenize(sql);
    let words: Vec<&str> = tokens.iter().map(String::as_str).collect();
    let keyword = |i: usize, expected: &str| {
        words
            .get(i)
            .is_some_and(|word| word.eq_ignore_ascii_case(expected))
    };

    let Some(first) = words.first() else {
        return Err(invalid(sql));
    };

    let stmt = match first.to_ascii_uppercase().as_str() {
        "CREATE" if words.len() >= 3 && keyword(1, "TABLE") => Statement::CreateTable {
            name: words[2].to_string(),
        },
        "INSERT" if words.len() >= 5 && keyword(1, "INTO") => Statement::Insert {
            table: words[2].to_string(),
            key: bytes(words[3]),
            value: bytes(words[4]),
        },
        "SELECT" if words.len() >= 8 && keyword(1, "*") && is_key_predicate(&words, 2) => {
            Statement::Select {
                table: words[3].to_string(),
                key: bytes(words[7]),
            }
        }
        "SELECT" if words.len() >= 5 && keyword(1, "RANGE") && keyword(2, "FROM") => {
            Statement::SelectRange {
                table: words[3].to_string(),
                start: bytes(words[4]),
                end: words.get(5).map_or_else(Bytes::new, |end| bytes(end)),
            }
        }
        "DELETE" if words.len() >= 7 && is_key_predicate(&words, 1) => Statement::Delete {
            table: words[2].to_string(),
            key: bytes(words[6]),
        },
        "BEGIN" => Statement::Tx(TxAction::Begin),
        "COMMIT" => Statement::Tx(TxAction::Commit),
        "ROLLBACK" => Statement::Tx(TxAction::Rollback),
        _ => return Err(invalid(sql)),
    };

    Ok(stmt)
}

// `FROM t WHERE key = k` starting at `at`
fn is_key_predicate(words: &[&str], at: usize) -> bool {
    let matches = |offset: usize, expected: &str| {
        words
            .get(at + offset)
            .is_some_and(|word| word.eq_ignore_ascii_case(expected))
    };
    matches(0, "FROM") && matches(2, "WHERE") && matches(3, "key") && matches(4, "=")
}

fn bytes(token: &str) -> Bytes {
    Bytes::copy_from_slice(token.as_bytes())
}

fn invalid(sql: &str) -> Error {
    Error::InvalidSql(sql.trim().to_string())
}

#[cfg(test)]
pub mod test {
    use bytes::Bytes;

    use super::{parse, tokenize};
    use crate::{
        error::Error,
        executor::{Statement, TxAction},
    };

    #[test]
    fn tokenize_splits_separators() {
        assert_eq!(
            tokenize("SELECT * FROM kv WHERE key=k1;"),
            vec!["SELECT", "*", "FROM", "kv", "WHERE", "key", "=", "k1"]
        );
        assert_eq!(tokenize("INSERT INTO kv (a, 1)"), vec!["INSERT", "INTO", "kv", "a", "1"]);
    }

    #[test]
    fn parse_statements() {
        assert_eq!(
            parse("CREATE TABLE users;").unwrap(),
            Statement::CreateTable {
                name: "users".into()
            }
        );
        assert_eq!(
            parse("insert into kv k1 v1").unwrap(),
            Statement::Insert {
                table: "kv".into(),
                key: Bytes::from_static(b"k1"),
                value: Bytes::from_static(b"v1"),
            }
        );
        assert_eq!(
            parse("SELECT * FROM kv WHERE key = k1;").unwrap(),
            Statement::Select {
                table: "kv".into(),
                key: Bytes::from_static(b"k1"),
            }
        );
        assert_eq!(
            parse("SELECT RANGE FROM kv a z;").unwrap(),
            Statement::SelectRange {
                table: "kv".into(),
                start: Bytes::from_static(b"a"),
                end: Bytes::from_static(b"z"),
            }
        );
        assert_eq!(
            parse("DELETE FROM kv WHERE key = k1").unwrap(),
            Statement::Delete {
                table: "kv".into(),
                key: Bytes::from_static(b"k1"),
            }
        );
        assert_eq!(parse("begin;").unwrap(), Statement::Tx(TxAction::Begin));
        assert_eq!(parse("COMMIT").unwrap(), Statement::Tx(TxAction::Commit));
        assert_eq!(parse("ROLLBACK").unwrap(), Statement::Tx(TxAction::Rollback));
    }

    #[test]
    fn open_ended_range() {
        let Statement::SelectRange { end, .. } = parse("SELECT RANGE FROM kv m").unwrap() else {
            panic!("expected a range select");
        };
        assert!(end.is_empty());
    }

    #[test]
    fn parse_invalid() {
        for sql in ["", "   ", "DROP TABLE kv;", "INSERT kv a 1", "SELECT * FROM kv", "CREATE kv"] {
            assert!(matches!(parse(sql), Err(Error::InvalidSql(_))), "{sql:?}");
        }
    }
}
