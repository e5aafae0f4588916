use crate::naming::NameKind;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Invalid {kind} name: {name}")]
    Naming { kind: NameKind, name: String },

    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    #[error("No such table: {0}")]
    NoSuchTable(String),

    #[error("No such column: {column} (table {table})")]
    NoSuchColumn { table: String, column: String },

    #[error("No such database: {user}/{database}")]
    NoSuchDatabase { user: String, database: String },

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Storage is busy: {0}")]
    StorageBusy(String),

    #[error("DB Error: {0}")]
    Storage(String),

    #[error("Not authorized: {0}")]
    AuthorizationDenied(String),

    #[error("Ran out of candidate index names for table {table}")]
    IndexNamesExhausted { table: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Extended result code sqlite uses when a STRICT table refuses a value of the wrong type.
const SQLITE_CONSTRAINT_DATATYPE: std::os::raw::c_int = 3091;

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Error {
        use rusqlite::ErrorCode;

        let message = e.to_string();
        match &e {
            rusqlite::Error::SqliteFailure(f, _) => match f.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => Error::StorageBusy(message),
                ErrorCode::AuthorizationForStatementDenied => Error::AuthorizationDenied(message),
                ErrorCode::TypeMismatch => Error::SchemaConflict(message),
                ErrorCode::ConstraintViolation if f.extended_code == SQLITE_CONSTRAINT_DATATYPE => {
                    Error::SchemaConflict(message)
                }
                _ => Error::Storage(message),
            },
            _ => Error::Storage(message),
        }
    }
}

impl From<tera::Error> for Error {
    fn from(e: tera::Error) -> Error {
        Error::Storage(format!("Unable to build statement: {}", e))
    }
}

impl From<walkdir::Error> for Error {
    fn from(e: walkdir::Error) -> Error {
        Error::Io(e.into())
    }
}

impl Error {
    /// Whether retrying the same operation later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StorageBusy(_))
    }
}
