//! Identifier validation.
//!
//! Every user, database, table and column name passes through here before it gets anywhere near SQL.  Table and column
//! names must start with a letter: names starting with `_` are reserved for internal columns such as
//! [crate::ID_COLUMN].  Database and user names are exposed in URLs and on disk, so they may also carry `-` (and `.`
//! for users), but never start with punctuation.
use lazy_static::lazy_static;
use regex::Regex;

use crate::{Error, Result};

/// What a name is going to be used for.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum NameKind {
    User,
    Database,
    Table,
    Column,
}

impl std::fmt::Display for NameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NameKind::User => "user",
            NameKind::Database => "database",
            NameKind::Table => "table",
            NameKind::Column => "column",
        };
        f.write_str(s)
    }
}

lazy_static! {
    static ref VALID_NAME: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_]{0,254}$").unwrap();
    static ref VALID_DBNAME: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]{0,254}$").unwrap();
    static ref VALID_USERNAME: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-\.]{0,254}$").unwrap();
}

/// Check `name`, returning it unchanged if it may be used as a `kind`.
pub fn validate_name(name: &str, kind: NameKind) -> Result<&str> {
    let re: &Regex = match kind {
        NameKind::User => &VALID_USERNAME,
        NameKind::Database => &VALID_DBNAME,
        NameKind::Table | NameKind::Column => &VALID_NAME,
    };

    if !re.is_match(name) {
        return Err(Error::Naming {
            kind,
            name: name.to_string(),
        });
    }

    Ok(name)
}

/// Quote an identifier for sqlite.
///
/// Validated names never contain quotes, but `PRAGMA` and friends can't take bound parameters so we still escape.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
