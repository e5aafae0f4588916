//! Settings for a [crate::Webstore], loaded from a JSON file.
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use log::*;

use tablestore_datastore::FactoryConfig;

use crate::{Error, Result};

/// Environment variable naming the settings file.
pub const SETTINGS_VAR: &str = "TABLESTORE_SETTINGS";

/// Something a client may do to a database.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
    Delete,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
        })
    }
}

/// How the requesting user relates to the owner of the database they're asking about.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Capacity {
    /// The owner.
    Owner,
    /// Some other authenticated user.
    User,
    /// Anonymous.
    World,
}

/// Which actions each [Capacity] may perform.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct AuthorizationMatrix {
    #[serde(rename = "self")]
    pub owner: BTreeSet<Action>,
    pub user: BTreeSet<Action>,
    pub world: BTreeSet<Action>,
}

impl Default for AuthorizationMatrix {
    fn default() -> Self {
        AuthorizationMatrix {
            owner: [Action::Read, Action::Write, Action::Delete].into_iter().collect(),
            user: [Action::Read].into_iter().collect(),
            world: [Action::Read].into_iter().collect(),
        }
    }
}

impl AuthorizationMatrix {
    /// Everyone may do everything.
    pub fn open() -> AuthorizationMatrix {
        let all: BTreeSet<Action> = [Action::Read, Action::Write, Action::Delete].into_iter().collect();
        AuthorizationMatrix {
            owner: all.clone(),
            user: all.clone(),
            world: all,
        }
    }

    pub fn actions(&self, capacity: Capacity) -> &BTreeSet<Action> {
        match capacity {
            Capacity::Owner => &self.owner,
            Capacity::User => &self.user,
            Capacity::World => &self.world,
        }
    }

    pub fn allows(&self, capacity: Capacity, action: Action) -> bool {
        self.actions(capacity).contains(&action)
    }
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct WebstoreConfig {
    /// Root of the per-user database directories.
    pub sqlite_dir: Utf8PathBuf,
    pub authorization: AuthorizationMatrix,
    /// One of `always_login`, `never_login`, or `static`.
    pub auth_function: String,
    /// Passwords by user, for the `static` auth function.
    pub credentials: HashMap<String, String>,
    pub busy_retries: u32,
    pub busy_backoff_ms: u64,
    pub busy_timeout_ms: u64,
    /// Most rows an HTML table shows.
    pub html_row_limit: usize,
    /// Filter handed to the logger by binaries.
    pub log_filter: String,
}

impl Default for WebstoreConfig {
    fn default() -> Self {
        let factory = FactoryConfig::default();
        WebstoreConfig {
            sqlite_dir: factory.root,
            authorization: Default::default(),
            auth_function: "always_login".into(),
            credentials: Default::default(),
            busy_retries: factory.busy_retries,
            busy_backoff_ms: factory.busy_backoff.as_millis() as u64,
            busy_timeout_ms: factory.busy_timeout.as_millis() as u64,
            html_row_limit: 1000,
            log_filter: "info".into(),
        }
    }
}

impl WebstoreConfig {
    pub fn from_path(path: &Utf8Path) -> Result<WebstoreConfig> {
        info!("Loading settings from {}", path);
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Unable to read {}: {}", path, e)))?;
        serde_json::from_str(&data).map_err(|e| Error::Config(format!("Unable to parse {}: {}", path, e)))
    }

    /// Load the file named by [SETTINGS_VAR], or the defaults if it isn't set.
    pub fn from_env() -> Result<WebstoreConfig> {
        match std::env::var(SETTINGS_VAR) {
            Ok(p) => WebstoreConfig::from_path(Utf8Path::new(&p)),
            Err(_) => {
                debug!("{} not set, using default settings", SETTINGS_VAR);
                Ok(Default::default())
            }
        }
    }

    pub fn factory_config(&self) -> FactoryConfig {
        FactoryConfig {
            root: self.sqlite_dir.clone(),
            busy_retries: self.busy_retries,
            busy_backoff: Duration::from_millis(self.busy_backoff_ms),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn partial_files_fill_in_defaults() {
        let config: WebstoreConfig = serde_json::from_str(
            r#"{
                "sqlite_dir": "/srv/tables",
                "authorization": {"world": []},
                "auth_function": "static",
                "credentials": {"hugo": "hungry"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.sqlite_dir, Utf8PathBuf::from("/srv/tables"));
        assert!(config.authorization.world.is_empty());
        assert!(config.authorization.allows(Capacity::Owner, Action::Delete));
        assert_eq!(config.html_row_limit, 1000);
        assert_eq!(config.factory_config().root, Utf8PathBuf::from("/srv/tables"));
        assert_eq!(config.credentials["hugo"], "hungry");
    }

    #[test]
    fn unknown_actions_are_refused() {
        assert!(serde_json::from_str::<WebstoreConfig>(r#"{"authorization": {"user": ["fly"]}}"#).is_err());
    }

    #[test]
    fn reads_files() {
        let tdir = tempfile::TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(tdir.path().join("settings.json")).unwrap();
        std::fs::write(&path, r#"{"html_row_limit": 5}"#).unwrap();
        assert_eq!(WebstoreConfig::from_path(&path).unwrap().html_row_limit, 5);
        assert!(matches!(
            WebstoreConfig::from_path(&path.with_file_name("missing.json")),
            Err(Error::Config(_))
        ));
    }
}
