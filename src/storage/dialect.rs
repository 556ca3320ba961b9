// src/storage/dialect.rs

//! SQL dialect differences between SQLite and PostgreSQL.
//!
//! Store code writes every statement once with `?` placeholders. A
//! [`Dialect`] rewrites it for the target engine.

/// Engine-specific SQL syntax.
pub trait Dialect: Send + Sync + 'static {
    /// Short engine name used in logs.
    const NAME: &'static str;

    /// Whether inserts report their id through `RETURNING`.
    const RETURNS_INSERTED_ID: bool;

    /// Query run on the inserting connection to read the new id when the
    /// INSERT itself returns nothing.
    const LAST_INSERT_ID_SQL: &'static str;

    /// Column definition for an auto-generated primary key.
    fn id_column(name: &str) -> String;

    /// Operator for equality that treats two NULLs as equal.
    fn null_safe_eq() -> &'static str;

    /// Rewrite `?` placeholders into the engine's syntax.
    fn translate(sql: &str) -> String;

    /// Translate an INSERT and arrange for it to yield the new row's id.
    fn insert_sql(sql: &str, id_column: &str) -> String {
        let sql = Self::translate(sql);
        if Self::RETURNS_INSERTED_ID {
            format!("{sql} RETURNING {id_column}")
        } else {
            sql
        }
    }
}

/// SQLite: `?` placeholders, AUTOINCREMENT ids read back with
/// `last_insert_rowid()`, `IS` for null-safe equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

/// PostgreSQL: `$n` placeholders, BIGSERIAL ids, `IS NOT DISTINCT FROM`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Sqlite {
    const NAME: &'static str = "sqlite";
    const RETURNS_INSERTED_ID: bool = false;
    const LAST_INSERT_ID_SQL: &'static str = "SELECT last_insert_rowid()";

    fn id_column(name: &str) -> String {
        format!("{name} INTEGER PRIMARY KEY AUTOINCREMENT")
    }

    fn null_safe_eq() -> &'static str {
        "IS"
    }

    fn translate(sql: &str) -> String {
        sql.to_string()
    }
}

impl Dialect for Postgres {
    const NAME: &'static str = "postgres";
    const RETURNS_INSERTED_ID: bool = true;
    const LAST_INSERT_ID_SQL: &'static str = "SELECT lastval()";

    fn id_column(name: &str) -> String {
        format!("{name} BIGSERIAL PRIMARY KEY")
    }

    fn null_safe_eq() -> &'static str {
        "IS NOT DISTINCT FROM"
    }

    fn translate(sql: &str) -> String {
        numbered_placeholders(sql)
    }
}

/// Replace each `?` outside quoted text with `$1`, `$2`, ...
fn numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut quote: Option<char> = None;
    let mut next = 1;

    for c in sql.chars() {
        match quote {
            Some(q) => {
                // A doubled quote closes and immediately reopens, which
                // leaves the state unchanged overall.
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    out.push(c);
                }
                '?' => {
                    out.push('$');
                    out.push_str(&next.to_string());
                    next += 1;
                }
                _ => out.push(c),
            },
        }
    }
    out
}
