//! The table engine: schema reconciliation and upserts against one table, inside one transaction.
//!
//! Rows don't have to agree on their keys.  Before any row is written, every key the table doesn't have a column for
//! yet becomes a new column, typed from the row's value.  Columns are never retyped afterwards.
//!
//! A [TableHandle] owns the transaction for its request.  Dropping the handle rolls everything back, including the
//! table's creation; [TableHandle::commit] is the only way anything becomes durable.
use std::collections::HashMap;

use itertools::Itertools;
use log::*;
use rusqlite::types::Value as SqlValue;

use crate::index::{reconcile_unique_index, IndexChange};
use crate::introspect::{load_columns, Column};
use crate::naming::{quote_ident, validate_name, NameKind};
use crate::query::{QueryResult, SelectQuery, SelectStatement, Sort};
use crate::value::{infer_type, to_sql, Row};
use crate::{Error, Result, ID_COLUMN};

/// Name of the row count column produced by [TableHandle::distinct].
pub const COUNT_COLUMN: &str = "_count";

const INSERT_TEMPLATE: &str = r#"
INSERT INTO main.{{ table }}(
    {{ columns | join(sep=", ") }}
) VALUES (
    {%- for c in columns -%}
    ?{% if not loop.last %}, {% endif -%}
    {%- endfor -%}
)
"#;

const UPDATE_TEMPLATE: &str = r#"
UPDATE main.{{ table }} SET
    {% for c in columns -%}
    {{ c }} = ?{% if not loop.last %}, {% endif %}
    {%- endfor %}
WHERE {% for k in keys %}{{ k }} IS ?{% if not loop.last %} AND {% endif %}{% endfor %}
"#;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
enum StatementKey {
    Insert(Vec<String>),
    Update { columns: Vec<String>, keys: Vec<String> },
}

/// Find the column sqlite would resolve `name` to.  Identifiers are case-insensitive, so `A` is column `a`.
fn find_column<'c>(columns: &'c [Column], name: &str) -> Option<&'c Column> {
    columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

/// Work out which columns `row` needs that `existing` doesn't have.
///
/// Every key is validated, including ones naming existing columns: [ID_COLUMN] and other reserved names can't be
/// written.  Two keys which differ only in case would land in the same column and are refused.  Only keys with a
/// non-null value produce a column: a null can't tell us what type to use.
pub fn new_columns(existing: &[Column], row: &Row) -> Result<Vec<Column>> {
    let mut ret = vec![];
    let mut seen: Vec<&str> = Vec::with_capacity(row.len());
    for (name, value) in row.iter() {
        validate_name(name, NameKind::Column)?;
        if seen.iter().any(|s| s.eq_ignore_ascii_case(name)) {
            return Err(Error::SchemaConflict(format!("Duplicate column in row: {}", name)));
        }
        seen.push(name);

        if find_column(existing, name).is_some() {
            continue;
        }
        if let Some(t) = infer_type(name, value) {
            ret.push(Column::new(name.clone(), t));
        }
    }
    Ok(ret)
}

/// An open table, holding the write (or read) transaction for the current request.
pub struct TableHandle<'a> {
    name: String,
    tx: rusqlite::Transaction<'a>,
    columns: Vec<Column>,
    statements: HashMap<StatementKey, String>,
}

impl<'a> TableHandle<'a> {
    /// Open an existing table in the given transaction.
    pub(crate) fn load(tx: rusqlite::Transaction<'a>, name: &str) -> Result<TableHandle<'a>> {
        let columns = load_columns(&tx, name)?;
        if columns.is_empty() {
            return Err(Error::NoSuchTable(name.to_string()));
        }

        Ok(TableHandle {
            name: name.to_string(),
            tx,
            columns,
            statements: Default::default(),
        })
    }

    /// Create a table in the given transaction.  The table starts out with only the id column.
    pub(crate) fn create(tx: rusqlite::Transaction<'a>, name: &str) -> Result<TableHandle<'a>> {
        validate_name(name, NameKind::Table)?;
        let stmt = format!(
            "CREATE TABLE main.{} ({} INTEGER PRIMARY KEY AUTOINCREMENT) STRICT",
            quote_ident(name),
            quote_ident(ID_COLUMN)
        );
        debug!("Creating table: {}", stmt);
        tx.execute(&stmt, [])?;
        info!("Created table {}", name);
        TableHandle::load(tx, name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The table's columns, in table order, including the id column.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Whether `name` resolves to a column, ignoring case the way sqlite does.
    pub fn has_column(&self, name: &str) -> bool {
        find_column(&self.columns, name).is_some()
    }

    /// The column's name as the table spells it.
    fn stored_name(&self, name: &str) -> Option<&str> {
        find_column(&self.columns, name).map(|c| c.name.as_str())
    }

    fn reload_columns(&mut self) -> Result<()> {
        self.columns = load_columns(&self.tx, &self.name)?;
        Ok(())
    }

    /// Add a column for every key of `row` the table doesn't have yet, returning what was added.
    pub fn ensure_columns(&mut self, row: &Row) -> Result<Vec<Column>> {
        let wanted = new_columns(&self.columns, row)?;
        if wanted.is_empty() {
            return Ok(wanted);
        }

        for col in wanted.iter() {
            let stmt = format!(
                "ALTER TABLE main.{} ADD COLUMN {} {}",
                quote_ident(&self.name),
                quote_ident(&col.name),
                col.column_type.sql_name()
            );
            debug!("Adding column: {}", stmt);
            match self.tx.execute(&stmt, []) {
                Ok(_) => {}
                // Someone else got there first; whatever type they picked stands.  Sqlite reports this as a plain
                // SQLITE_ERROR with the message "duplicate column name: <column>".
                Err(e) if e.to_string().contains("duplicate column name") => {
                    debug!("Column {}.{} already exists: {}", self.name, col.name, e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.reload_columns()?;
        if let Some(missing) = wanted.iter().find(|c| !self.has_column(&c.name)) {
            return Err(Error::SchemaConflict(format!(
                "Column {}.{} could not be added",
                self.name, missing.name
            )));
        }
        Ok(wanted)
    }

    /// The columns and values of `row` which can be written, in row order.
    ///
    /// Columns are named as the table spells them.  Keys without a column (only possible for keys whose value is
    /// null) are left out.
    fn writable(&self, row: &Row) -> (Vec<String>, Vec<SqlValue>) {
        row.iter()
            .filter_map(|(k, v)| self.stored_name(k).map(|n| (n.to_string(), to_sql(v))))
            .unzip()
    }

    fn statement(&mut self, key: StatementKey) -> Result<&str> {
        if !self.statements.contains_key(&key) {
            let mut context = tera::Context::new();
            context.insert("table", &quote_ident(&self.name));
            let template = match &key {
                StatementKey::Insert(columns) => {
                    context.insert("columns", &columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>());
                    INSERT_TEMPLATE
                }
                StatementKey::Update { columns, keys } => {
                    context.insert("columns", &columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>());
                    context.insert("keys", &keys.iter().map(|c| quote_ident(c)).collect::<Vec<_>>());
                    UPDATE_TEMPLATE
                }
            };
            let stmt = tera::Tera::one_off(template, &context, false)?;
            debug!("Statement for {}: {}", self.name, stmt);
            self.statements.insert(key.clone(), stmt);
        }

        Ok(self.statements[&key].as_str())
    }

    /// Insert `row` as a new row, adding columns first.  Returns the new row's id.
    pub fn add_row(&mut self, row: &Row) -> Result<i64> {
        self.ensure_columns(row)?;
        let (columns, values) = self.writable(row);

        if columns.is_empty() {
            self.tx.execute(
                &format!("INSERT INTO main.{} DEFAULT VALUES", quote_ident(&self.name)),
                [],
            )?;
        } else {
            let sql = self.statement(StatementKey::Insert(columns))?.to_string();
            self.tx
                .prepare_cached(&sql)?
                .execute(rusqlite::params_from_iter(values.iter()))?;
        }

        Ok(self.tx.last_insert_rowid())
    }

    /// Update every row matching `row` on the `unique` columns, adding columns first.
    ///
    /// Returns whether anything matched; callers insert when nothing did.  Rows carrying none of the unique keys never
    /// match anything.
    pub fn update_row(&mut self, unique: &[String], row: &Row) -> Result<bool> {
        if unique.is_empty() {
            return Ok(false);
        }

        self.ensure_columns(row)?;

        let mut keys = vec![];
        let mut key_values = vec![];
        for k in unique.iter().unique() {
            if let Some(v) = row.get(k.as_str()) {
                match self.stored_name(k) {
                    Some(n) => {
                        keys.push(n.to_string());
                        key_values.push(to_sql(v));
                    }
                    None => return Ok(false),
                }
            }
        }
        if keys.is_empty() {
            return Ok(false);
        }

        let (columns, mut values) = self.writable(row);
        values.extend(key_values);

        let sql = self
            .statement(StatementKey::Update { columns, keys })?
            .to_string();
        let changed = self
            .tx
            .prepare_cached(&sql)?
            .execute(rusqlite::params_from_iter(values.iter()))?;
        Ok(changed > 0)
    }

    /// Update the row matching on `unique`, or insert it if there isn't one.
    pub fn upsert_row(&mut self, unique: &[String], row: &Row) -> Result<()> {
        if !self.update_row(unique, row)? {
            self.add_row(row)?;
        }
        Ok(())
    }

    /// Make sure there is a unique index over exactly `unique`.  All of the columns must already exist.
    pub fn ensure_unique_index(&mut self, unique: &[String]) -> Result<Option<IndexChange>> {
        let mut columns = Vec::with_capacity(unique.len());
        for k in unique.iter() {
            validate_name(k, NameKind::Column)?;
            match self.stored_name(k) {
                Some(n) => columns.push(n.to_string()),
                None => {
                    return Err(Error::NoSuchColumn {
                        table: self.name.clone(),
                        column: k.clone(),
                    })
                }
            }
        }

        reconcile_unique_index(&self.tx, &self.name, &columns)
    }

    /// Upsert a batch of rows, in order, returning how many were written.
    ///
    /// Empty rows are skipped.  If `unique` is non-empty, the table's unique index is reconciled once, as soon as all
    /// of its columns exist.  The first error stops the batch; since nothing is committed, the table is left as it
    /// was.
    pub fn upsert<E: From<Error>>(
        &mut self,
        unique: &[String],
        rows: impl IntoIterator<Item = std::result::Result<Row, E>>,
    ) -> std::result::Result<u64, E> {
        for k in unique.iter() {
            validate_name(k, NameKind::Column)?;
        }

        let mut indexed = unique.is_empty();
        let mut count = 0;
        for row in rows {
            let row = row?;
            if row.is_empty() {
                continue;
            }

            self.ensure_columns(&row)?;
            if !indexed && unique.iter().all(|k| self.has_column(k)) {
                self.ensure_unique_index(unique)?;
                indexed = true;
            }

            self.upsert_row(unique, &row)?;
            count += 1;
        }

        debug!("Upserted {} rows into {}", count, self.name);
        Ok(count)
    }

    /// Drop the table.  Like everything else, this only sticks once committed.
    pub fn drop_table(&mut self) -> Result<()> {
        self.tx
            .execute(&format!("DROP TABLE main.{}", quote_ident(&self.name)), [])?;
        info!("Dropped table {}", self.name);
        self.columns.clear();
        self.statements.clear();
        Ok(())
    }

    /// Commit the transaction, releasing the table.
    pub fn commit(self) -> Result<()> {
        Ok(self.tx.commit()?)
    }

    fn check_filters(&self, filters: &[(String, serde_json::Value)]) -> Result<()> {
        for (c, _) in filters.iter() {
            if !self.has_column(c) {
                return Err(Error::InvalidQuery(format!("Invalid filter: {}", c)));
            }
        }
        Ok(())
    }

    fn render_sorts(&self, sorts: &[Sort], extra: Option<&str>) -> Result<Vec<String>> {
        sorts
            .iter()
            .map(|s| {
                if !self.has_column(&s.column) && Some(s.column.as_str()) != extra {
                    return Err(Error::InvalidQuery(format!("Invalid sort column: {}", s.column)));
                }
                Ok(format!(
                    "{} {}",
                    quote_ident(&s.column),
                    if s.descending { "DESC" } else { "ASC" }
                ))
            })
            .collect()
    }

    fn run_select(&self, stmt: SelectStatement, filters: &[(String, serde_json::Value)]) -> Result<QueryResult> {
        let sql = stmt.render()?;
        debug!("Read: {}", sql);
        let mut prepared = self.tx.prepare(&sql)?;
        for (i, (_, v)) in filters.iter().enumerate() {
            prepared.raw_bind_parameter(i + 1, to_sql(v))?;
        }
        QueryResult::from_bound_statement(&mut prepared)
    }

    fn base_select(&self, query: &SelectQuery) -> Result<SelectStatement> {
        self.check_filters(&query.filters)?;
        Ok(SelectStatement {
            columns: vec!["*".into()],
            table: format!("main.{}", quote_ident(&self.name)),
            filters: query.filters.iter().map(|f| quote_ident(&f.0)).collect(),
            group_by: None,
            sorts: vec![],
            limit: query.limit,
            offset: query.offset,
        })
    }

    /// Read rows matching `query`.  Without explicit sorts, rows come back in insertion order.
    pub fn select(&self, query: &SelectQuery) -> Result<QueryResult> {
        let mut stmt = self.base_select(query)?;
        stmt.sorts = self.render_sorts(&query.sorts, None)?;
        if stmt.sorts.is_empty() && self.has_column(ID_COLUMN) {
            stmt.sorts.push(format!("{} ASC", quote_ident(ID_COLUMN)));
        }
        self.run_select(stmt, &query.filters)
    }

    /// Count the rows matching `filters`.
    pub fn count(&self, filters: &[(String, serde_json::Value)]) -> Result<u64> {
        self.check_filters(filters)?;
        let stmt = SelectStatement {
            columns: vec!["COUNT(*)".into()],
            table: format!("main.{}", quote_ident(&self.name)),
            filters: filters.iter().map(|f| quote_ident(&f.0)).collect(),
            group_by: None,
            sorts: vec![],
            limit: None,
            offset: None,
        };
        let res = self.run_select(stmt, filters)?;
        let count = res
            .rows
            .first()
            .and_then(|r| r.first())
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(count)
    }

    /// Read the `n`th row (1-based) in insertion order.
    pub fn row(&self, n: u64) -> Result<QueryResult> {
        if n == 0 {
            return Err(Error::InvalidQuery(
                "Starting at offset 1 to allow header row".into(),
            ));
        }
        self.select(&SelectQuery::default().limit(1).offset(n - 1))
    }

    /// Distinct values of `column` with how often each occurs, most common first unless `query` sorts otherwise.
    ///
    /// `query`'s sorts may also name [COUNT_COLUMN].
    pub fn distinct(&self, column: &str, query: &SelectQuery) -> Result<QueryResult> {
        if !self.has_column(column) {
            return Err(Error::NoSuchColumn {
                table: self.name.clone(),
                column: column.to_string(),
            });
        }

        let col = quote_ident(column);
        let mut stmt = self.base_select(query)?;
        stmt.columns = vec![
            col.clone(),
            format!("COUNT({}) AS {}", col, quote_ident(COUNT_COLUMN)),
        ];
        stmt.group_by = Some(col.clone());
        stmt.sorts = self.render_sorts(&query.sorts, Some(COUNT_COLUMN))?;
        if stmt.sorts.is_empty() {
            stmt.sorts = vec![format!("{} DESC", quote_ident(COUNT_COLUMN)), format!("{} ASC", col)];
        }
        self.run_select(stmt, &query.filters)
    }
}
