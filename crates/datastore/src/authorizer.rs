//! Capability policies enforced through sqlite's authorizer hook.
//!
//! Sqlite consults the authorizer for every action a statement will perform while compiling it, so a policy holds no
//! matter what SQL text a client sends.  A [GuardedConnection] owns a connection together with its current policy;
//! the only way to change the policy is [GuardedConnection::with_policy], which puts the previous one back when the
//! closure returns, errors, or panics.
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use log::*;
use rusqlite::hooks::{AuthAction, AuthContext, Authorization};

use crate::Result;

/// Pragmas a read-only connection may run: enough to introspect tables and indexes.
const READONLY_PRAGMAS: &[&str] = &["table_info", "index_list", "index_info"];

/// What a connection is allowed to do.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Policy {
    /// Reads, transaction control, detaching, and schema introspection only.
    ReadOnly = 0,

    /// [Policy::ReadOnly], plus attaching other databases.  Only ever active for the duration of an `ATTACH`.
    Attaching = 1,

    /// Anything in the main database except attaching; attached databases stay read-only.
    WriteMain = 2,
}

impl Policy {
    fn from_u8(raw: u8) -> Policy {
        match raw {
            0 => Policy::ReadOnly,
            1 => Policy::Attaching,
            _ => Policy::WriteMain,
        }
    }

    /// Decide whether `action`, targeting the database named `database_name`, is allowed.
    ///
    /// `database_name` is `None` for actions which don't name a database, e.g. `BEGIN`.
    pub fn authorize(&self, action: &AuthAction<'_>, database_name: Option<&str>) -> Authorization {
        match self {
            Policy::ReadOnly => authorize_readonly(action),
            Policy::Attaching => match action {
                AuthAction::Attach { .. } => Authorization::Allow,
                _ => authorize_readonly(action),
            },
            Policy::WriteMain => match (action, database_name) {
                (AuthAction::Attach { .. }, _) => Authorization::Deny,
                (_, None | Some("main")) => Authorization::Allow,
                _ => authorize_readonly(action),
            },
        }
    }
}

fn authorize_readonly(action: &AuthAction<'_>) -> Authorization {
    match action {
        AuthAction::Select
        | AuthAction::Read { .. }
        | AuthAction::Detach { .. }
        | AuthAction::Transaction { .. }
        | AuthAction::Function { .. }
        | AuthAction::Recursive => Authorization::Allow,
        AuthAction::Pragma { pragma_name, .. }
            if READONLY_PRAGMAS.iter().any(|p| p.eq_ignore_ascii_case(pragma_name)) =>
        {
            Authorization::Allow
        }
        _ => Authorization::Deny,
    }
}

/// A connection whose every statement is checked against a [Policy].
pub struct GuardedConnection {
    conn: rusqlite::Connection,
    policy: Arc<AtomicU8>,
}

/// Puts a policy back on drop.
struct PolicyGuard<'a> {
    slot: &'a AtomicU8,
    previous: u8,
}

impl Drop for PolicyGuard<'_> {
    fn drop(&mut self) {
        self.slot.store(self.previous, Ordering::SeqCst);
    }
}

impl GuardedConnection {
    /// Wrap a connection, installing the authorizer.
    pub fn new(conn: rusqlite::Connection, policy: Policy) -> GuardedConnection {
        let slot = Arc::new(AtomicU8::new(policy as u8));
        let hook_slot = slot.clone();
        conn.authorizer(Some(move |ctx: AuthContext<'_>| {
            let policy = Policy::from_u8(hook_slot.load(Ordering::SeqCst));
            let decision = policy.authorize(&ctx.action, ctx.database_name);
            if matches!(decision, Authorization::Deny) {
                debug!(
                    "Denied {:?} on database {:?} under {:?}",
                    ctx.action, ctx.database_name, policy
                );
            }
            decision
        }));

        GuardedConnection { conn, policy: slot }
    }

    pub fn policy(&self) -> Policy {
        Policy::from_u8(self.policy.load(Ordering::SeqCst))
    }

    pub fn connection(&self) -> &rusqlite::Connection {
        &self.conn
    }

    /// Run `f` with `policy` in effect, restoring whatever was in effect before on every exit path.
    ///
    /// Policies are checked when statements are compiled, so statements must be prepared inside the closure.
    pub fn with_policy<T>(
        &self,
        policy: Policy,
        f: impl FnOnce(&rusqlite::Connection) -> Result<T>,
    ) -> Result<T> {
        let previous = self.policy.swap(policy as u8, Ordering::SeqCst);
        let _guard = PolicyGuard {
            slot: &self.policy,
            previous,
        };
        f(&self.conn)
    }

    /// Attach the database at `path` as `alias`.
    ///
    /// This is the only operation that ever escalates to [Policy::Attaching].  Whatever the connection's policy is,
    /// the attached database is read-only through it.
    pub fn attach(&self, path: &str, alias: &str) -> Result<()> {
        info!("Attaching {} as {}", path, alias);
        self.with_policy(Policy::Attaching, |conn| {
            conn.execute("ATTACH DATABASE ?1 AS ?2", [path, alias])?;
            Ok(())
        })
    }
}

impl std::ops::Deref for GuardedConnection {
    type Target = rusqlite::Connection;

    fn deref(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

impl std::ops::DerefMut for GuardedConnection {
    fn deref_mut(&mut self) -> &mut rusqlite::Connection {
        &mut self.conn
    }
}
