//! Turning request paths into routes.
use crate::formats::Format;
use crate::{Error, Result};

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Route {
    Login,
    Databases { user: String },
    Database { user: String, database: String },
    Table { user: String, database: String, table: String },
    Row { user: String, database: String, table: String, row: String },
    Schema { user: String, database: String, table: String },
    Distinct { user: String, database: String, table: String, column: String },
}

impl Route {
    /// Routes which only read, and so may be fetched cross-origin.
    pub(crate) fn is_readable(&self) -> bool {
        !matches!(self, Route::Login)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Target {
    pub route: Route,
    /// The format named by the last segment's suffix, if any.
    pub suffix: Option<Format>,
    /// The last segment as it was before the suffix was removed.
    pub last_segment: String,
}

/// Split a known format suffix off a path segment.
fn split_suffix(segment: &str) -> (&str, Option<Format>) {
    if let Some((stem, ext)) = segment.rsplit_once('.') {
        if !stem.is_empty() {
            if let Some(f) = Format::from_suffix(ext) {
                return (stem, Some(f));
            }
        }
    }
    (segment, None)
}

pub(crate) fn parse_target(path: &str) -> Result<Target> {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let last_segment = segments
        .last()
        .map(|s| s.to_string())
        .ok_or_else(|| Error::NotFound("Not found: /".into()))?;
    let (stem, suffix) = split_suffix(&last_segment);
    if let Some(l) = segments.last_mut() {
        *l = stem;
    }

    let s = |i: usize| segments[i].to_string();
    let route = match segments.as_slice() {
        ["login"] if suffix.is_none() => Route::Login,
        [_] => Route::Databases { user: s(0) },
        [_, _] => Route::Database {
            user: s(0),
            database: s(1),
        },
        [_, _, _] => Route::Table {
            user: s(0),
            database: s(1),
            table: s(2),
        },
        [_, _, _, "row", _] => Route::Row {
            user: s(0),
            database: s(1),
            table: s(2),
            row: s(4),
        },
        [_, _, _, "schema"] => Route::Schema {
            user: s(0),
            database: s(1),
            table: s(2),
        },
        [_, _, _, "distinct", _] => Route::Distinct {
            user: s(0),
            database: s(1),
            table: s(2),
            column: s(4),
        },
        _ => return Err(Error::NotFound(format!("Not found: {}", path))),
    };

    Ok(Target {
        route,
        suffix,
        last_segment,
    })
}

pub(crate) fn database_url(user: &str, database: &str) -> String {
    format!("/{}/{}", user, database)
}

pub(crate) fn table_url(user: &str, database: &str, table: &str) -> String {
    format!("/{}/{}/{}", user, database, table)
}

pub(crate) fn distinct_url(user: &str, database: &str, table: &str, column: &str) -> String {
    format!("/{}/{}/{}/distinct/{}", user, database, table, column)
}
