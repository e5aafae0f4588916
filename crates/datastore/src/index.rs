//! Unique index maintenance for upserts.
//!
//! A table keeps one "current" unique index per key combination clients upsert with.  When a request asks for a
//! different combination, the closest existing unique index is replaced: the new index is created first under the next
//! free `<table>_index<N>` name, and only then is the old one dropped, so there is never a moment without a usable
//! unique index.  Sqlite refuses to drop indexes which back a `UNIQUE` constraint; those are left behind.
use std::collections::BTreeSet;

use itertools::Itertools;
use lazy_static::lazy_static;
use log::*;
use regex::Regex;

use crate::introspect::{list_indexes, schema_object_exists, IndexInfo};
use crate::naming::quote_ident;
use crate::{Error, Result};

/// How many candidate names we try before giving up.
pub const MAX_INDEX_NAME_PROBES: u64 = 10000;

lazy_static! {
    static ref TRAILING_NUMBER: Regex = Regex::new(r"(\d+)$").unwrap();
}

/// What [reconcile_unique_index] did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexChange {
    pub created: String,
    /// The superseded index, if it could be dropped.
    pub dropped: Option<String>,
    /// The superseded index, if sqlite wouldn't let us drop it.
    pub retained: Option<String>,
}

/// Find the unique index sharing the most columns with `requested`.
///
/// Ties go to the lexicographically smallest name.  Non-unique indexes are never considered.
pub fn find_closest_index<'a>(indexes: &'a [IndexInfo], requested: &[String]) -> Option<&'a IndexInfo> {
    let requested: BTreeSet<&str> = requested.iter().map(|x| x.as_str()).collect();

    indexes
        .iter()
        .filter(|i| i.unique)
        .map(|i| {
            let overlap = i
                .columns
                .iter()
                .filter(|c| requested.contains(c.as_str()))
                .count();
            (overlap, i)
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.name.cmp(&a.1.name)))
        .map(|x| x.1)
}

/// Pick a name for a new index on `table`, counting up from the trailing number of `previous`.
pub fn next_index_name(conn: &rusqlite::Connection, table: &str, previous: Option<&str>) -> Result<String> {
    let start = previous
        .and_then(|p| TRAILING_NUMBER.captures(p))
        .and_then(|c| c[1].parse::<u64>().ok())
        .unwrap_or(0);

    for i in 0..MAX_INDEX_NAME_PROBES {
        let candidate = format!("{}_index{}", table, start + i);
        if !schema_object_exists(conn, &candidate)? {
            return Ok(candidate);
        }
    }

    Err(Error::IndexNamesExhausted {
        table: table.to_string(),
    })
}

fn same_columns(index: &IndexInfo, requested: &[String]) -> bool {
    let have: BTreeSet<&str> = index.columns.iter().map(|x| x.as_str()).collect();
    let want: BTreeSet<&str> = requested.iter().map(|x| x.as_str()).collect();
    have == want
}

/// Make sure `table` has a unique index over exactly `requested`, rotating out the closest existing one if not.
///
/// Returns `None` if a matching index already existed.  All columns in `requested` must exist.
pub fn reconcile_unique_index(
    conn: &rusqlite::Connection,
    table: &str,
    requested: &[String],
) -> Result<Option<IndexChange>> {
    let requested: Vec<String> = requested.iter().unique().cloned().collect();
    if requested.is_empty() {
        return Ok(None);
    }

    let indexes = list_indexes(conn, table)?;
    let closest = find_closest_index(&indexes, &requested);
    if let Some(c) = closest {
        if same_columns(c, &requested) {
            return Ok(None);
        }
    }

    let previous = closest.map(|x| x.name.as_str());
    let new_name = next_index_name(conn, table, previous)?;
    let stmt = format!(
        "CREATE UNIQUE INDEX main.{} ON {} ({})",
        quote_ident(&new_name),
        quote_ident(table),
        requested.iter().map(|c| quote_ident(c)).join(", ")
    );
    debug!("Creating index: {}", stmt);
    conn.execute(&stmt, [])?;
    info!(
        "Created unique index {} on {}({})",
        new_name,
        table,
        requested.iter().join(", ")
    );

    let mut change = IndexChange {
        created: new_name,
        dropped: None,
        retained: None,
    };

    if let Some(prev) = previous {
        match conn.execute(&format!("DROP INDEX main.{}", quote_ident(prev)), []) {
            Ok(_) => {
                info!("Dropped superseded index {}", prev);
                change.dropped = Some(prev.to_string());
            }
            // Sqlite refuses with "index associated with UNIQUE or PRIMARY KEY constraint cannot be dropped".
            Err(e) if e.to_string().contains("cannot be dropped") => {
                warn!("Keeping superseded index {}: {}", prev, e);
                change.retained = Some(prev.to_string());
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Some(change))
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn keys(k: &[&str]) -> Vec<String> {
        k.iter().map(|x| x.to_string()).collect()
    }

    fn index(name: &str, columns: &[&str], unique: bool) -> IndexInfo {
        IndexInfo {
            name: name.into(),
            columns: keys(columns),
            unique,
        }
    }

    fn unique_indexes(conn: &rusqlite::Connection) -> Vec<IndexInfo> {
        let mut ret = list_indexes(conn, "t")
            .unwrap()
            .into_iter()
            .filter(|x| x.unique)
            .collect::<Vec<_>>();
        ret.sort_by(|a, b| a.name.cmp(&b.name));
        ret
    }

    fn fixture() -> rusqlite::Connection {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE t (__id__ INTEGER PRIMARY KEY AUTOINCREMENT, a INTEGER, b TEXT, c TEXT) STRICT;
            INSERT INTO t (a, b) VALUES (1, 'x'), (1, 'y'), (2, 'x');
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn closest_prefers_overlap_then_name() {
        let indexes = vec![
            index("t_index3", &["a"], true),
            index("t_index1", &["b"], true),
            index("plain", &["a", "b"], false),
            index("t_index2", &["a", "c"], true),
        ];
        assert_eq!(
            find_closest_index(&indexes, &keys(&["a", "c", "d"])).unwrap().name,
            "t_index2"
        );
        assert_eq!(find_closest_index(&indexes, &keys(&["b"])).unwrap().name, "t_index1");
        // Every unique index overlaps by one column; t_index1 sorts first.
        assert_eq!(
            find_closest_index(&indexes, &keys(&["a", "b"])).unwrap().name,
            "t_index1"
        );
        assert_eq!(find_closest_index(&indexes, &keys(&["z"])).unwrap().name, "t_index1");
        assert!(find_closest_index(&indexes[2..3], &keys(&["a"])).is_none());
    }

    #[test]
    fn names_count_up() {
        let conn = fixture();
        assert_eq!(next_index_name(&conn, "t", None).unwrap(), "t_index0");
        assert_eq!(next_index_name(&conn, "t", Some("t_index4")).unwrap(), "t_index4");
        conn.execute_batch("CREATE INDEX t_index4 ON t (c); CREATE INDEX t_index5 ON t (b);")
            .unwrap();
        assert_eq!(next_index_name(&conn, "t", Some("t_index4")).unwrap(), "t_index6");
        assert_eq!(next_index_name(&conn, "t", Some("custom")).unwrap(), "t_index0");
    }

    #[test]
    fn creates_then_rotates() {
        let conn = fixture();

        let change = reconcile_unique_index(&conn, "t", &keys(&["a", "b"])).unwrap().unwrap();
        assert_eq!(change.created, "t_index0");
        assert_eq!(change.dropped, None);

        // Same keys in another order: nothing to do.
        assert!(reconcile_unique_index(&conn, "t", &keys(&["b", "a"])).unwrap().is_none());

        let change = reconcile_unique_index(&conn, "t", &keys(&["a", "b", "c"])).unwrap().unwrap();
        assert_eq!(change.created, "t_index1");
        assert_eq!(change.dropped.as_deref(), Some("t_index0"));
        assert_eq!(unique_indexes(&conn), vec![index("t_index1", &["a", "b", "c"], true)]);

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn widening_keeps_exactly_one_index() {
        let conn = fixture();
        conn.execute("DELETE FROM t WHERE __id__ = 3", []).unwrap();
        reconcile_unique_index(&conn, "t", &keys(&["b"])).unwrap();
        reconcile_unique_index(&conn, "t", &keys(&["a", "b"])).unwrap();
        assert_eq!(unique_indexes(&conn), vec![index("t_index1", &["a", "b"], true)]);
    }

    #[test]
    fn constraint_indexes_are_retained() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (__id__ INTEGER PRIMARY KEY, a INTEGER UNIQUE, b TEXT) STRICT;")
            .unwrap();

        let change = reconcile_unique_index(&conn, "t", &keys(&["a", "b"])).unwrap().unwrap();
        assert_eq!(change.dropped, None);
        assert!(change.retained.unwrap().starts_with("sqlite_autoindex_t"));
        assert_eq!(unique_indexes(&conn).len(), 2);
    }

    #[test]
    fn duplicate_data_fails_without_dropping() {
        let conn = fixture();
        reconcile_unique_index(&conn, "t", &keys(&["b", "a"])).unwrap();
        // `a` alone has duplicates, so the new index can't be built and the old one must survive.
        assert!(reconcile_unique_index(&conn, "t", &keys(&["a"])).is_err());
        assert_eq!(unique_indexes(&conn), vec![index("t_index0", &["b", "a"], true)]);
    }
}
