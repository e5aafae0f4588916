//! The REST surface of the table store.
//!
//! [Webstore::handle] maps a [Request] to a [Response]; carrying those over a socket is left to whatever embeds this
//! crate.  Paths look like `/{user}/{database}/{table}`, optionally with a format suffix such as `.csv` on the last
//! segment.
mod auth;
mod config;
mod errors;
mod formats;
mod http;
mod routes;
mod webstore;

pub use auth::{authenticate, capacity, has, require, AuthStrategy};
pub use config::*;
pub use errors::*;
pub use formats::{Format, Message, State, SQLITE_MIME};
pub use http::*;
pub use webstore::*;
