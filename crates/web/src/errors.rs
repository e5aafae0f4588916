use tablestore_datastore::Error as StoreError;

/// Everything a request can fail with.  Each kind carries the HTTP status it is reported as.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    MethodNotAllowed(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Store(e) => match e {
                StoreError::Naming { .. }
                | StoreError::InvalidQuery(_)
                | StoreError::SchemaConflict(_)
                | StoreError::Storage(_) => 400,
                StoreError::AuthorizationDenied(_) => 403,
                StoreError::NoSuchTable(_)
                | StoreError::NoSuchColumn { .. }
                | StoreError::NoSuchDatabase { .. }
                | StoreError::UserNotFound(_) => 404,
                StoreError::StorageBusy(_) => 503,
                _ => 500,
            },
            Error::BadRequest(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::MethodNotAllowed(_) => 405,
            Error::Conflict(_) => 409,
            Error::Config(_) | Error::Internal(_) => 500,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::BadRequest(format!("Invalid JSON: {}", e))
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Error {
        Error::BadRequest(format!("Invalid CSV: {}", e))
    }
}

impl From<tera::Error> for Error {
    fn from(e: tera::Error) -> Error {
        Error::Internal(format!("Unable to render template: {}", e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Internal(format!("I/O error: {}", e))
    }
}
