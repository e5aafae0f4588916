//! Read queries: what callers ask for, the SQL we build for it, and what comes back.
use serde_json::Value;
use smallvec::SmallVec;

use crate::value::{from_sql, Row};
use crate::{Error, Result};

/// One `ORDER BY` term.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Sort {
    pub column: String,
    pub descending: bool,
}

impl Sort {
    pub fn asc(column: impl Into<String>) -> Sort {
        Sort {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Sort {
        Sort {
            column: column.into(),
            descending: true,
        }
    }

    /// Parse `asc:column` or `desc:column`.
    pub fn parse(raw: &str) -> Result<Sort> {
        let (order, column) = raw
            .split_once(':')
            .ok_or_else(|| Error::InvalidQuery("Invalid sorting format, use: order:column".into()))?;
        match order.to_ascii_lowercase().as_str() {
            "asc" => Ok(Sort::asc(column)),
            "desc" => Ok(Sort::desc(column)),
            _ => Err(Error::InvalidQuery(format!(
                "Invalid sorting order {}, use asc or desc",
                order
            ))),
        }
    }
}

/// Filters, ordering, and pagination for a read.
#[derive(Clone, Debug, Default)]
pub struct SelectQuery {
    /// `column = value` terms, all of which must hold.
    pub filters: Vec<(String, Value)>,
    pub sorts: SmallVec<[Sort; 4]>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectQuery {
    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Column names plus positional rows.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct QueryResult {
    pub keys: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Run a prepared statement whose parameters are already bound, collecting everything it returns.
    pub(crate) fn from_bound_statement(stmt: &mut rusqlite::Statement<'_>) -> Result<QueryResult> {
        let keys: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = keys.len();
        let mut rows = vec![];
        let mut cursor = stmt.raw_query();
        while let Some(r) = cursor.next()? {
            let mut row = Vec::with_capacity(width);
            for i in 0..width {
                row.push(from_sql(r.get_ref(i)?));
            }
            rows.push(row);
        }

        Ok(QueryResult { keys, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate over the rows as maps.
    pub fn iter_rows(&self) -> impl Iterator<Item = Row> + '_ {
        self.rows
            .iter()
            .map(move |r| self.keys.iter().cloned().zip(r.iter().cloned()).collect())
    }
}

/// Everything the select template needs.  Identifiers are already quoted.
#[derive(serde::Serialize)]
pub(crate) struct SelectStatement {
    pub columns: Vec<String>,
    pub table: String,
    pub filters: Vec<String>,
    pub group_by: Option<String>,
    pub sorts: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

const SELECT_TEMPLATE: &str = r#"
SELECT {{ columns | join(sep=", ") }}
FROM {{ table }}
{%- if filters %}
WHERE {% for f in filters %}{{ f }} = ?{% if not loop.last %} AND {% endif %}{% endfor %}
{%- endif %}
{%- if group_by %}
GROUP BY {{ group_by }}
{%- endif %}
{%- if sorts %}
ORDER BY {{ sorts | join(sep=", ") }}
{%- endif %}
{%- if pagination %}
{{ pagination }}
{%- endif %}
"#;

fn to_sql_count(what: &str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::InvalidQuery(format!("Invalid {}: {}", what, value)))
}

impl SelectStatement {
    /// `LIMIT`/`OFFSET`; sqlite won't take an offset without a limit, so `-1` stands in for "no limit".
    ///
    /// Counts above `i64::MAX` are an `InvalidQuery`; sqlite would read a wrapped negative limit as "no limit".
    fn pagination(&self) -> Result<Option<String>> {
        let limit = self.limit.map(|l| to_sql_count("limit", l)).transpose()?;
        let offset = self.offset.map(|o| to_sql_count("offset", o)).transpose()?;
        Ok(match (limit, offset) {
            (None, None) => None,
            (Some(l), None) => Some(format!("LIMIT {}", l)),
            (l, Some(o)) => Some(format!("LIMIT {} OFFSET {}", l.unwrap_or(-1), o)),
        })
    }

    pub(crate) fn render(&self) -> Result<String> {
        let mut context = tera::Context::from_serialize(self)?;
        context.insert("pagination", &self.pagination()?);
        Ok(tera::Tera::one_off(SELECT_TEMPLATE, &context, false)?)
    }
}
