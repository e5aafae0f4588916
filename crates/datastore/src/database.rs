//! The database wraps a guarded rusqlite connection and hands out tables.
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use log::*;
use rusqlite::{OpenFlags, TransactionBehavior};
use serde_json::Value;

use crate::authorizer::{GuardedConnection, Policy};
use crate::introspect::{list_tables, table_exists};
use crate::naming::{validate_name, NameKind};
use crate::query::QueryResult;
use crate::table::TableHandle;
use crate::value::to_sql;
use crate::{Error, Result};

/// SQL that we run as part of opening a writable connection.
///
/// - Sets up WAL, so that readers don't block the single writer.
/// - Enables foreign key enforcement (though we don't expect foreign keys to be used).
/// - Raises the default cache size because the one sqlite sets up for us is only a couple megabytes since they have to
///   make their defaults work with e.g. phones.
/// - Checkpoints less often than the default, since writes arrive in batches.
const INITIAL_SQL: &str = r#"
PRAGMA cache_size = -100000;
PRAGMA foreign_keys = 1;
PRAGMA journal_mode = WAL;
PRAGMA wal_autocheckpoint = 10000;
"#;

/// How hard to try for a write lock before giving up with [Error::StorageBusy].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BusyRetry {
    /// Attempts after the first.
    pub retries: u32,

    /// Sleep before retry `n` is `n * backoff`.
    pub backoff: Duration,

    /// How long sqlite itself waits on a lock before reporting busy.
    pub timeout: Duration,
}

impl Default for BusyRetry {
    fn default() -> Self {
        BusyRetry {
            retries: 3,
            backoff: Duration::from_millis(50),
            timeout: Duration::from_millis(1000),
        }
    }
}

pub struct Database {
    conn: GuardedConnection,
    path: Option<Utf8PathBuf>,
    retry: BusyRetry,
}

/// Begin a transaction, retrying while the database is busy.
fn begin_with_retry<'a>(
    conn: &'a rusqlite::Connection,
    behavior: TransactionBehavior,
    retry: &BusyRetry,
) -> Result<rusqlite::Transaction<'a>> {
    let mut attempt = 0;
    loop {
        // Unchecked because callers hold `&mut Database`, which is what keeps transactions from nesting.
        match rusqlite::Transaction::new_unchecked(conn, behavior) {
            Ok(tx) => return Ok(tx),
            Err(e) => {
                let e = Error::from(e);
                if !e.is_transient() || attempt >= retry.retries {
                    return Err(e);
                }
                attempt += 1;
                warn!("Database busy, retrying ({}/{}): {}", attempt, retry.retries, e);
                std::thread::sleep(retry.backoff * attempt);
            }
        }
    }
}

impl Database {
    /// Open (creating if needed) the database at `path` for writing.
    pub fn open(path: &Utf8Path, retry: BusyRetry) -> Result<Database> {
        info!("Opening database at {}", path);
        let conn = rusqlite::Connection::open(path)?;
        let mut db = Database::with_connection(conn, Policy::WriteMain, retry)?;
        db.path = Some(path.to_path_buf());
        Ok(db)
    }

    /// Open the existing database at `path` for reading only.
    pub fn open_readonly(path: &Utf8Path, retry: BusyRetry) -> Result<Database> {
        info!("Opening database at {} read-only", path);
        let conn = rusqlite::Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let mut db = Database::with_connection(conn, Policy::ReadOnly, retry)?;
        db.path = Some(path.to_path_buf());
        Ok(db)
    }

    /// A private in-memory database.  Mostly useful for testing.
    pub fn open_in_memory() -> Result<Database> {
        Database::with_connection(
            rusqlite::Connection::open_in_memory()?,
            Policy::WriteMain,
            Default::default(),
        )
    }

    /// Build a database from an already-existing connection, which is configured and then guarded by `policy`.
    pub fn with_connection(conn: rusqlite::Connection, policy: Policy, retry: BusyRetry) -> Result<Database> {
        conn.busy_timeout(retry.timeout)?;
        // Must happen before the authorizer goes in, since read-only policies refuse these pragmas.
        if policy == Policy::WriteMain {
            conn.execute_batch(INITIAL_SQL)?;
        }

        Ok(Database {
            conn: GuardedConnection::new(conn, policy),
            path: None,
            retry,
        })
    }

    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    pub fn policy(&self) -> Policy {
        self.conn.policy()
    }

    /// Names of all user tables in the main database, sorted.
    pub fn table_names(&self) -> Result<Vec<String>> {
        list_tables(&self.conn)
    }

    pub fn has_table(&self, name: &str) -> Result<bool> {
        table_exists(&self.conn, name)
    }

    /// Get a table for writing, creating it if it doesn't exist.
    ///
    /// This takes the database's write lock for as long as the handle lives, so that reconciling the schema and
    /// writing rows can't interleave with another writer.
    pub fn table(&mut self, name: &str) -> Result<TableHandle<'_>> {
        validate_name(name, NameKind::Table)?;
        let retry = self.retry;
        let conn: &rusqlite::Connection = self.conn.connection();
        let tx = begin_with_retry(conn, TransactionBehavior::Immediate, &retry)?;
        if table_exists(&tx, name)? {
            TableHandle::load(tx, name)
        } else {
            TableHandle::create(tx, name)
        }
    }

    /// Get a table which must already exist.
    ///
    /// The transaction is deferred: it only takes the write lock if the handle is used to write.
    pub fn existing_table(&mut self, name: &str) -> Result<TableHandle<'_>> {
        validate_name(name, NameKind::Table)?;
        let retry = self.retry;
        let conn: &rusqlite::Connection = self.conn.connection();
        let tx = begin_with_retry(conn, TransactionBehavior::Deferred, &retry)?;
        TableHandle::load(tx, name)
    }

    /// Run client-supplied SQL under the connection's policy.
    ///
    /// `params` is `null`, an array of positional parameters, or an object of named ones.  Names may be written with
    /// or without their `:`/`@`/`$` prefix; bare names are taken to be `:name`.
    pub fn execute_raw(&self, sql: &str, params: &Value) -> Result<QueryResult> {
        debug!("Raw SQL: {}", sql);
        let mut stmt = self.conn.prepare(sql)?;

        match params {
            Value::Null => {}
            Value::Array(values) => {
                let expected = stmt.parameter_count();
                if values.len() != expected {
                    return Err(Error::InvalidQuery(format!(
                        "Expected {} parameters but got {}",
                        expected,
                        values.len()
                    )));
                }
                for (i, v) in values.iter().enumerate() {
                    stmt.raw_bind_parameter(i + 1, to_sql(v))?;
                }
            }
            Value::Object(values) => {
                for (k, v) in values.iter() {
                    let name = if k.starts_with(&[':', '@', '$'][..]) {
                        k.clone()
                    } else {
                        format!(":{}", k)
                    };
                    let index = stmt
                        .parameter_index(&name)?
                        .ok_or_else(|| Error::InvalidQuery(format!("No such parameter: {}", k)))?;
                    stmt.raw_bind_parameter(index, to_sql(v))?;
                }
            }
            _ => {
                return Err(Error::InvalidQuery(
                    "Parameters must be an array or an object".into(),
                ))
            }
        }

        QueryResult::from_bound_statement(&mut stmt)
    }

    /// Attach the database at `path` as `alias`.  It is read-only through this connection.
    pub fn attach(&self, path: &Utf8Path, alias: &str) -> Result<()> {
        validate_name(alias, NameKind::Table)?;
        self.conn.attach(path.as_str(), alias)
    }
}
