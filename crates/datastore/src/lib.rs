//! Schemaless tables on top of sqlite.
//!
//! Clients write rows as maps; tables grow a column for every new key they see, typed from the first non-null value
//! written to it.  Upserts match existing rows on a client-chosen set of unique columns, which is kept backed by a
//! unique index.  Every connection runs under a capability [Policy], enforced by sqlite's authorizer rather than by
//! looking at SQL text.
//!
//! The entry point is [DatabaseHandlerFactory], which maps `(user, database)` pairs to files and opens them as
//! [Database]s; a [Database] hands out [TableHandle]s, each of which owns one transaction.
mod authorizer;
mod database;
mod errors;
mod factory;
mod index;
mod introspect;
mod naming;
mod query;
mod table;
mod value;

pub use authorizer::*;
pub use database::*;
pub use errors::*;
pub use factory::*;
pub use index::*;
pub use introspect::*;
pub use naming::*;
pub use query::*;
pub use table::*;
pub use value::*;

/// Name of the synthetic primary key every table gets.
pub const ID_COLUMN: &str = "__id__";
