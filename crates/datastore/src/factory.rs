//! Maps `(user, database)` pairs to files under a root directory, and opens them.
//!
//! The layout is `<root>/<user>/<database>.db`.  Both names are validated before they're joined onto the root, so a
//! client can't escape it.
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use log::*;

use crate::database::{BusyRetry, Database};
use crate::naming::{validate_name, NameKind};
use crate::{Error, Result};

/// File extension of database files.
pub const DATABASE_EXTENSION: &str = "db";

#[derive(Clone, Debug)]
pub struct FactoryConfig {
    /// Directory holding one subdirectory per user.
    pub root: Utf8PathBuf,
    pub busy_retries: u32,
    pub busy_backoff: Duration,
    pub busy_timeout: Duration,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        let retry = BusyRetry::default();
        FactoryConfig {
            root: Utf8PathBuf::from("/tmp"),
            busy_retries: retry.retries,
            busy_backoff: retry.backoff,
            busy_timeout: retry.timeout,
        }
    }
}

impl FactoryConfig {
    pub fn with_root(root: impl Into<Utf8PathBuf>) -> FactoryConfig {
        FactoryConfig {
            root: root.into(),
            ..Default::default()
        }
    }

    fn busy_retry(&self) -> BusyRetry {
        BusyRetry {
            retries: self.busy_retries,
            backoff: self.busy_backoff,
            timeout: self.busy_timeout,
        }
    }
}

pub struct DatabaseHandlerFactory {
    config: FactoryConfig,
}

impl DatabaseHandlerFactory {
    pub fn new(config: FactoryConfig) -> DatabaseHandlerFactory {
        DatabaseHandlerFactory { config }
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    pub fn user_dir(&self, user: &str) -> Result<Utf8PathBuf> {
        validate_name(user, NameKind::User)?;
        Ok(self.config.root.join(user))
    }

    /// Where the database `database` of `user` lives, whether or not it exists yet.
    pub fn path_for(&self, user: &str, database: &str) -> Result<Utf8PathBuf> {
        validate_name(database, NameKind::Database)?;
        let mut path = self.user_dir(user)?.join(database);
        path.set_extension(DATABASE_EXTENSION);
        Ok(path)
    }

    pub fn exists(&self, user: &str, database: &str) -> Result<bool> {
        Ok(self.path_for(user, database)?.is_file())
    }

    /// Open a database for writing, creating it (and the user's directory) if needed.
    pub fn create(&self, user: &str, database: &str) -> Result<Database> {
        let path = self.path_for(user, database)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        Database::open(&path, self.config.busy_retry())
    }

    /// Open an existing database for reading only.
    pub fn create_readonly(&self, user: &str, database: &str) -> Result<Database> {
        let path = self.existing_path(user, database)?;
        Database::open_readonly(&path, self.config.busy_retry())
    }

    fn existing_path(&self, user: &str, database: &str) -> Result<Utf8PathBuf> {
        let path = self.path_for(user, database)?;
        if !path.is_file() {
            return Err(Error::NoSuchDatabase {
                user: user.to_string(),
                database: database.to_string(),
            });
        }
        Ok(path)
    }

    /// Names of the databases `user` has, sorted.
    pub fn databases_by_user(&self, user: &str) -> Result<Vec<String>> {
        let dir = self.user_dir(user)?;
        if !dir.is_dir() {
            return Err(Error::UserNotFound(user.to_string()));
        }

        let mut ret = vec![];
        for entry in walkdir::WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = match Utf8Path::from_path(entry.path()) {
                Some(p) => p,
                None => {
                    debug!("Skipping non-UTF8 path {}", entry.path().display());
                    continue;
                }
            };
            if path.extension() != Some(DATABASE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem() {
                if validate_name(stem, NameKind::Database).is_ok() {
                    ret.push(stem.to_string());
                }
            }
        }

        ret.sort();
        Ok(ret)
    }

    /// Attach `user`'s database `database` to `db` as `alias` (defaulting to the database's name).
    pub fn attach(&self, db: &Database, user: &str, database: &str, alias: Option<&str>) -> Result<()> {
        let path = self.existing_path(user, database)?;
        db.attach(&path, alias.unwrap_or(database))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn factory() -> (tempfile::TempDir, DatabaseHandlerFactory) {
        let tdir = tempfile::TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(tdir.path().to_path_buf()).unwrap();
        (tdir, DatabaseHandlerFactory::new(FactoryConfig::with_root(root)))
    }

    #[test]
    fn paths() {
        let f = DatabaseHandlerFactory::new(FactoryConfig::with_root("/data"));
        assert_eq!(f.path_for("bob", "weather").unwrap(), Utf8PathBuf::from("/data/bob/weather.db"));
        assert_eq!(
            f.path_for("bob.smith", "my-db").unwrap(),
            Utf8PathBuf::from("/data/bob.smith/my-db.db")
        );
        assert!(matches!(f.path_for("..", "x"), Err(Error::Naming { .. })));
        assert!(matches!(f.path_for("bob", "../x"), Err(Error::Naming { .. })));
        assert!(matches!(f.path_for("bob", "a/b"), Err(Error::Naming { .. })));
    }

    #[test]
    fn lists_databases() {
        let (_tdir, f) = factory();
        assert!(matches!(f.databases_by_user("bob"), Err(Error::UserNotFound(_))));

        f.create("bob", "weather").unwrap();
        f.create("bob", "air-quality").unwrap();
        std::fs::write(f.user_dir("bob").unwrap().join("notes.txt"), "hi").unwrap();
        assert_eq!(
            f.databases_by_user("bob").unwrap(),
            vec!["air-quality".to_string(), "weather".to_string()]
        );
        assert!(f.exists("bob", "weather").unwrap());
        assert!(!f.exists("bob", "nope").unwrap());
    }

    #[test]
    fn readonly_needs_a_file() {
        let (_tdir, f) = factory();
        assert!(matches!(
            f.create_readonly("bob", "weather"),
            Err(Error::NoSuchDatabase { .. })
        ));
        f.create("bob", "weather").unwrap();
        let db = f.create_readonly("bob", "weather").unwrap();
        assert!(db.table_names().unwrap().is_empty());
    }

    #[test]
    fn attaches_other_databases() {
        let (_tdir, f) = factory();
        {
            let mut other = f.create("alice", "shared").unwrap();
            let mut t = other.table("numbers").unwrap();
            t.add_row(&json!({"n": 42}).as_object().unwrap().clone()).unwrap();
            t.commit().unwrap();
        }

        let db = f.create("bob", "weather").unwrap();
        f.attach(&db, "alice", "shared", None).unwrap();
        let res = db.execute_raw("SELECT n FROM shared.numbers", &Value::Null).unwrap();
        assert_eq!(res.rows, vec![vec![json!(42)]]);

        assert!(matches!(
            f.attach(&db, "alice", "missing", Some("m")),
            Err(Error::NoSuchDatabase { .. })
        ));
    }
}
