//! Reading a database's schema back out of sqlite.
//!
//! All of these work on any connection (a transaction derefs to one), and only ever look at the `main` schema: an
//! attached database may well contain a table with the same name.
use crate::naming::quote_ident;
use crate::value::ColumnType;
use crate::Result;

/// A column of a table.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// An index of a table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    /// Indexed columns in index order.
    pub columns: Vec<String>,
    pub unique: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Column {
        Column {
            name: name.into(),
            column_type,
        }
    }
}

pub fn table_exists(conn: &rusqlite::Connection, table: &str) -> Result<bool> {
    let exists = conn
        .prepare_cached("SELECT 1 FROM main.sqlite_master WHERE type = 'table' AND name = ?1")?
        .exists([table])?;
    Ok(exists)
}

/// List user tables, excluding sqlite's own bookkeeping tables.
pub fn list_tables(conn: &rusqlite::Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT name FROM main.sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Load the columns of a table, in table order.
///
/// Returns an empty list for a table which doesn't exist.
pub fn load_columns(conn: &rusqlite::Connection, table: &str) -> Result<Vec<Column>> {
    let mut stmt = conn.prepare(&format!("PRAGMA main.table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |r| {
            let name: String = r.get("name")?;
            let declared: String = r.get("type")?;
            Ok(Column::new(name, ColumnType::from_declared(&declared)))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

/// List all indexes of a table.
pub fn list_indexes(conn: &rusqlite::Connection, table: &str) -> Result<Vec<IndexInfo>> {
    let mut list_stmt = conn.prepare(&format!("PRAGMA main.index_list({})", quote_ident(table)))?;
    let listed = list_stmt
        .query_map([], |r| Ok((r.get::<_, String>("name")?, r.get::<_, bool>("unique")?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut ret = Vec::with_capacity(listed.len());
    for (name, unique) in listed {
        let mut info_stmt = conn.prepare(&format!("PRAGMA main.index_info({})", quote_ident(&name)))?;
        let mut columns = info_stmt
            .query_map([], |r| Ok((r.get::<_, i64>("seqno")?, r.get::<_, Option<String>>("name")?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        columns.sort_by_key(|x| x.0);

        ret.push(IndexInfo {
            name,
            // Expression indexes report a null name; nothing can match those.
            columns: columns.into_iter().filter_map(|x| x.1).collect(),
            unique,
        });
    }

    Ok(ret)
}

/// Whether any schema object (table, index, view, trigger) already has this name.
pub fn schema_object_exists(conn: &rusqlite::Connection, name: &str) -> Result<bool> {
    let exists = conn
        .prepare_cached("SELECT 1 FROM main.sqlite_master WHERE name = ?1")?
        .exists([name])?;
    Ok(exists)
}
