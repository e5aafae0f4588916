//! Who is asking, and what they may do.
use std::collections::HashMap;

use base64::Engine;
use log::*;

use crate::config::{Action, AuthorizationMatrix, Capacity, WebstoreConfig};
use crate::http::Request;
use crate::{Error, Result};

/// Checks passwords presented with HTTP basic auth.  Picked once, from configuration.
#[derive(Clone, Debug)]
pub enum AuthStrategy {
    /// Every password is right.
    AlwaysLogin,
    /// Every password is wrong.
    NeverLogin,
    /// Passwords come from configuration.
    Static(HashMap<String, String>),
}

impl AuthStrategy {
    pub fn from_config(config: &WebstoreConfig) -> Result<AuthStrategy> {
        match config.auth_function.as_str() {
            "always_login" => Ok(AuthStrategy::AlwaysLogin),
            "never_login" => Ok(AuthStrategy::NeverLogin),
            "static" => Ok(AuthStrategy::Static(config.credentials.clone())),
            other => Err(Error::Config(format!("Unknown auth function: {}", other))),
        }
    }

    pub fn check(&self, user: &str, password: &str) -> bool {
        match self {
            AuthStrategy::AlwaysLogin => true,
            AuthStrategy::NeverLogin => false,
            AuthStrategy::Static(credentials) => credentials.get(user).map(|p| p == password).unwrap_or(false),
        }
    }
}

fn invalid_login() -> Error {
    Error::Unauthorized("Invalid username or password!".into())
}

/// Split a basic `Authorization` header into user and password.
fn decode_basic(header: &str) -> Result<(String, String)> {
    let encoded = header.split_once(' ').map(|(_, e)| e).unwrap_or(header).trim();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| invalid_login())?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid_login())?;
    let (user, password) = decoded.split_once(':').ok_or_else(invalid_login)?;
    Ok((user.to_string(), password.to_string()))
}

/// Work out the requesting user.
///
/// A user set by a fronting server is trusted.  Credentials in an `Authorization` header take precedence, and must
/// pass `strategy`.
pub fn authenticate(request: &Request, strategy: &AuthStrategy) -> Result<Option<String>> {
    let mut user = request.remote_user.clone();

    if let Some(header) = request.header("Authorization") {
        let (name, password) = decode_basic(header)?;
        if !strategy.check(&name, &password) {
            debug!("Refusing login for {}", name);
            return Err(invalid_login());
        }
        user = Some(name);
    }

    Ok(user)
}

pub fn capacity(current_user: Option<&str>, owner: &str) -> Capacity {
    match current_user {
        Some(u) if u == owner => Capacity::Owner,
        Some(_) => Capacity::User,
        None => Capacity::World,
    }
}

/// Whether `current_user` may perform `action` on a database of `owner`.
pub fn has(matrix: &AuthorizationMatrix, current_user: Option<&str>, owner: &str, action: Action) -> bool {
    matrix.allows(capacity(current_user, owner), action)
}

pub fn require(
    matrix: &AuthorizationMatrix,
    current_user: Option<&str>,
    owner: &str,
    database: &str,
    action: Action,
) -> Result<()> {
    if !has(matrix, current_user, owner, action) {
        return Err(Error::Forbidden(format!("No permission to {} {}", action, database)));
    }
    Ok(())
}
