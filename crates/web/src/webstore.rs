//! Request dispatch: authentication, authorization, and one handler per route.
use log::*;
use serde_json::{json, Value};

use tablestore_datastore::{
    Database, DatabaseHandlerFactory, Error as StoreError, QueryResult, SelectQuery, Sort,
};

use crate::auth::{authenticate, has, require, AuthStrategy};
use crate::config::{Action, WebstoreConfig};
use crate::formats::{validate_callback, Format, FormatTrait, Message, State, SQLITE_MIME};
use crate::http::{Method, Request, Response};
use crate::routes::{database_url, distinct_url, parse_target, table_url, Route, Target};
use crate::{Error, Result};

/// Per-request state, built once and handed to every handler.
pub struct RequestContext<'r> {
    pub request: &'r Request,
    /// The authenticated user, if any.
    pub user: Option<String>,
    /// The format responses are rendered in.
    pub format: Format,
    /// The format named by the path, which also decides how the body is read.
    pub suffix: Option<Format>,
    /// JSONP callback.
    pub callback: Option<String>,
}

impl RequestContext<'_> {
    fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

/// Body of a JSON SQL request.
#[derive(serde::Deserialize)]
struct SqlRequest {
    #[serde(default)]
    query: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    attach: Vec<AttachRequest>,
}

#[derive(serde::Deserialize)]
struct AttachRequest {
    user: Option<String>,
    database: String,
    alias: Option<String>,
}

fn parse_count(value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::BadRequest(format!("Invalid value: {}", value)))
}

/// Pull pagination, sorting, and filters out of the query string.
///
/// Parameters starting with `_` are reserved; everything else is an equality filter.
fn select_query(request: &Request) -> Result<SelectQuery> {
    let mut query = SelectQuery::default();
    for (k, v) in request.query.iter() {
        match k.as_str() {
            "_limit" => query.limit = Some(parse_count(v)?),
            "_offset" => query.offset = Some(parse_count(v)?),
            "_sort" => query.sorts.push(Sort::parse(v)?),
            "_callback" => {}
            _ => query.filters.push((k.clone(), Value::String(v.clone()))),
        }
    }
    Ok(query)
}

/// A listing of names and where to find them.
fn link_table(links: impl IntoIterator<Item = (String, String)>) -> QueryResult {
    QueryResult {
        keys: vec!["name".into(), "url".into()],
        rows: links.into_iter().map(|(n, u)| vec![json!(n), json!(u)]).collect(),
    }
}

pub struct Webstore {
    config: WebstoreConfig,
    factory: DatabaseHandlerFactory,
    auth: AuthStrategy,
}

impl Webstore {
    pub fn new(config: WebstoreConfig) -> Result<Webstore> {
        let auth = AuthStrategy::from_config(&config)?;
        let factory = DatabaseHandlerFactory::new(config.factory_config());
        info!("Serving databases under {}", config.sqlite_dir);
        Ok(Webstore {
            config,
            factory,
            auth,
        })
    }

    pub fn config(&self) -> &WebstoreConfig {
        &self.config
    }

    /// Handle one request.  Failures become error responses in the requested format.
    pub fn handle(&self, request: &Request) -> Response {
        let target = parse_target(&request.path);
        let suffix = target.as_ref().ok().and_then(|t| t.suffix);
        let format = Format::for_response(request, suffix);

        let result = target.and_then(|target| {
            let context = RequestContext {
                request,
                user: authenticate(request, &self.auth)?,
                format,
                suffix,
                callback: request
                    .query_value("_callback")
                    .map(|cb| validate_callback(cb).map(String::from))
                    .transpose()?,
            };
            self.dispatch(&context, target)
        });

        match result {
            Ok(r) => r,
            Err(e) => {
                let status = e.status_code();
                if status >= 500 {
                    error!("{:?} {}: {}", request.method, request.path, e);
                } else {
                    debug!("{:?} {}: {}", request.method, request.path, e);
                }
                self.message(
                    format,
                    status,
                    Message {
                        message: e.to_string(),
                        state: State::Error,
                        url: None,
                    },
                )
            }
        }
    }

    fn dispatch(&self, ctx: &RequestContext, target: Target) -> Result<Response> {
        let method = ctx.request.method;
        if method == Method::Options && target.route.is_readable() {
            return Ok(Response::new(200, "text/plain", vec![])
                .with_header("Access-Control-Allow-Origin", "*")
                .with_header("Access-Control-Allow-Methods", "GET, OPTIONS")
                .with_header("Access-Control-Max-Age", "21600"));
        }

        let response = match (method, target.route) {
            (Method::Get, Route::Login) => return self.login(ctx),
            (Method::Get, Route::Databases { user }) => self.databases(ctx, &user, &target.last_segment),
            (Method::Get, Route::Database { user, database }) => self.index(ctx, &user, &database),
            (Method::Put, Route::Database { user, database }) => return self.sql(ctx, &user, &database),
            (Method::Post, Route::Database { user, database }) => {
                let table = ctx
                    .request
                    .query_value("table")
                    .ok_or_else(|| Error::BadRequest("Missing argument: table".into()))?;
                return self.create(ctx, &user, &database, table);
            }
            (Method::Post, Route::Table { user, database, table }) => {
                return self.create(ctx, &user, &database, &table)
            }
            (Method::Put, Route::Table { user, database, table }) => {
                return self.upsert(ctx, &user, &database, &table)
            }
            (Method::Delete, Route::Table { user, database, table }) => {
                return self.delete(ctx, &user, &database, &table)
            }
            (Method::Get, Route::Table { user, database, table }) => self.read(ctx, &user, &database, &table),
            (
                Method::Get,
                Route::Row {
                    user,
                    database,
                    table,
                    row,
                },
            ) => self.row(ctx, &user, &database, &table, &row),
            (Method::Get, Route::Schema { user, database, table }) => self.schema(ctx, &user, &database, &table),
            (
                Method::Get,
                Route::Distinct {
                    user,
                    database,
                    table,
                    column,
                },
            ) => self.distinct(ctx, &user, &database, &table, &column),
            (m, _) => {
                return Err(Error::MethodNotAllowed(format!(
                    "Method not allowed: {:?} {}",
                    m, ctx.request.path
                )))
            }
        }?;

        Ok(response.with_header("Access-Control-Allow-Origin", "*"))
    }

    /// Render a status message.  A `Location` header goes with the url, if there is one.
    fn message(&self, format: Format, status: u16, message: Message) -> Response {
        let formatter = format.formatter(self.config.html_row_limit);
        let body = match formatter.render_message(&message) {
            Ok(b) => b,
            Err(e) => {
                error!("Unable to render message {:?}: {}", message, e);
                return Response::new(500, "text/plain", message.message);
            }
        };

        let response = Response::new(status, formatter.content_type(), body);
        match message.url {
            Some(url) => response.with_header("Location", url),
            None => response,
        }
    }

    fn table(&self, ctx: &RequestContext, table: &QueryResult) -> Result<Response> {
        let formatter = ctx.format.formatter(self.config.html_row_limit);
        let callback = ctx.callback.as_deref().filter(|_| ctx.format.supports_callback());
        let body = formatter.render_table(table, callback)?;
        Ok(Response::new(200, formatter.content_type(), body))
    }

    fn login(&self, ctx: &RequestContext) -> Result<Response> {
        if ctx.user.is_some() {
            return Ok(self.message(
                ctx.format,
                302,
                Message {
                    message: String::new(),
                    state: State::Success,
                    url: Some("/".into()),
                },
            ));
        }

        Ok(self
            .message(
                ctx.format,
                401,
                Message {
                    message: "Please authenticate".into(),
                    state: State::Success,
                    url: None,
                },
            )
            .with_header("WWW-Authenticate", r#"Basic realm="WebStore access""#))
    }

    /// List a user's databases.
    ///
    /// User names may contain dots, so `/a.json` could be user `a` as JSON or user `a.json`.  The longer name wins
    /// when such a user exists.
    fn databases(&self, ctx: &RequestContext, user: &str, last_segment: &str) -> Result<Response> {
        let dotted = Some(last_segment).filter(|s| *s != user);
        let (user, names) = match dotted.map(|d| (d, self.factory.databases_by_user(d))) {
            Some((d, Ok(names))) => (d, names),
            _ => (user, self.factory.databases_by_user(user)?),
        };

        let links = names.into_iter().map(|n| {
            let url = database_url(user, &n);
            (n, url)
        });
        self.table(ctx, &link_table(links))
    }

    /// List a database's tables, or send the database itself.
    fn index(&self, ctx: &RequestContext, user: &str, database: &str) -> Result<Response> {
        require(&self.config.authorization, ctx.user(), user, database, Action::Read)?;

        if ctx.format == Format::Db {
            let path = self.factory.path_for(user, database)?;
            if !path.is_file() {
                return Ok(self.message(
                    Format::Json,
                    404,
                    Message {
                        message: format!("No such database: {}", database),
                        state: State::Error,
                        url: None,
                    },
                ));
            }
            debug!("Sending database file {}", path);
            return Ok(Response::new(200, SQLITE_MIME, std::fs::read(&path)?));
        }

        let db = self.factory.create(user, database)?;
        let links = db.table_names()?.into_iter().map(|t| {
            let url = table_url(user, database, &t);
            (t, url)
        });
        self.table(ctx, &link_table(links))
    }

    /// Run client SQL.  Only callers who may delete get a writable connection.
    fn sql(&self, ctx: &RequestContext, user: &str, database: &str) -> Result<Response> {
        let request = match ctx.request.content_type().as_deref() {
            Some("text/sql") => SqlRequest {
                query: String::from_utf8(ctx.request.body.clone())
                    .map_err(|_| Error::BadRequest("SQL must be UTF-8".into()))?,
                params: Value::Null,
                attach: vec![],
            },
            Some("application/json") => serde_json::from_slice(&ctx.request.body)?,
            _ => {
                return Err(Error::BadRequest(
                    "Only text/sql, application/json is supported".into(),
                ))
            }
        };

        let matrix = &self.config.authorization;
        let db: Database = if has(matrix, ctx.user(), user, Action::Delete) {
            self.factory.create(user, database)?
        } else {
            require(matrix, ctx.user(), user, database, Action::Read)?;
            self.factory.create_readonly(user, database)?
        };

        for attach in request.attach.iter() {
            let attach_user = attach.user.as_deref().unwrap_or(user);
            require(matrix, ctx.user(), attach_user, &attach.database, Action::Read)?;
            self.factory
                .attach(&db, attach_user, &attach.database, attach.alias.as_deref())?;
        }

        let result = db.execute_raw(&request.query, &request.params)?;
        self.table(ctx, &result)
    }

    /// `POST`: like [Webstore::upsert], but the table must not exist yet.
    fn create(&self, ctx: &RequestContext, user: &str, database: &str, table: &str) -> Result<Response> {
        require(&self.config.authorization, ctx.user(), user, database, Action::Write)?;
        let mut db = self.factory.create(user, database)?;
        if db.has_table(table)? {
            return Err(Error::Conflict(format!("Table already exists: {}", table)));
        }
        self.save(ctx, &mut db, user, database, table, &[])
    }

    fn upsert(&self, ctx: &RequestContext, user: &str, database: &str, table: &str) -> Result<Response> {
        let matrix = &self.config.authorization;
        require(matrix, ctx.user(), user, database, Action::Write)?;
        let unique: Vec<String> = ctx.request.query_values("unique").map(String::from).collect();
        // Matching on keys can overwrite rows.
        if !unique.is_empty() {
            require(matrix, ctx.user(), user, database, Action::Delete)?;
        }

        let mut db = self.factory.create(user, database)?;
        self.save(ctx, &mut db, user, database, table, &unique)
    }

    fn save(
        &self,
        ctx: &RequestContext,
        db: &mut Database,
        user: &str,
        database: &str,
        table: &str,
        unique: &[String],
    ) -> Result<Response> {
        let formatter = Format::for_request(ctx.request, ctx.suffix).formatter(self.config.html_row_limit);
        let mut handle = db.table(table)?;
        let rows = formatter.decode_rows(&ctx.request.body)?;
        let count = handle.upsert(unique, rows)?;
        handle.commit()?;
        info!("Saved {} rows to {}/{}/{}", count, user, database, table);

        Ok(self.message(
            ctx.format,
            201,
            Message {
                message: format!("Successfully saved: {} ({} rows)", table, count),
                state: State::Success,
                url: Some(table_url(user, database, table)),
            },
        ))
    }

    /// Open a database read-only for reading a table.  A missing database is a missing table.
    fn readable_database(&self, ctx: &RequestContext, user: &str, database: &str, table: &str) -> Result<Database> {
        require(&self.config.authorization, ctx.user(), user, database, Action::Read)?;
        if !self.factory.exists(user, database)? {
            return Err(StoreError::NoSuchTable(table.to_string()).into());
        }
        Ok(self.factory.create_readonly(user, database)?)
    }

    fn read(&self, ctx: &RequestContext, user: &str, database: &str, table: &str) -> Result<Response> {
        let query = select_query(ctx.request)?;
        let mut db = self.readable_database(ctx, user, database, table)?;
        let handle = db.existing_table(table)?;
        let result = handle.select(&query)?;
        let count = handle.count(&query.filters)?;
        debug!("{} of {} rows from {}", result.len(), count, table);
        Ok(self.table(ctx, &result)?.with_header("X-Count", count.to_string()))
    }

    fn row(&self, ctx: &RequestContext, user: &str, database: &str, table: &str, row: &str) -> Result<Response> {
        let n: u64 = row
            .parse()
            .map_err(|_| Error::BadRequest(format!("Invalid row ID: {}", row)))?;
        let mut db = self.readable_database(ctx, user, database, table)?;
        let result = db.existing_table(table)?.row(n)?;
        self.table(ctx, &result)
    }

    fn schema(&self, ctx: &RequestContext, user: &str, database: &str, table: &str) -> Result<Response> {
        let mut db = self.readable_database(ctx, user, database, table)?;
        let handle = db.existing_table(table)?;
        let result = QueryResult {
            keys: vec!["name".into(), "type".into(), "values_url".into()],
            rows: handle
                .columns()
                .iter()
                .map(|c| {
                    vec![
                        json!(c.name),
                        json!(c.column_type.to_string()),
                        json!(distinct_url(user, database, table, &c.name)),
                    ]
                })
                .collect(),
        };
        self.table(ctx, &result)
    }

    fn distinct(
        &self,
        ctx: &RequestContext,
        user: &str,
        database: &str,
        table: &str,
        column: &str,
    ) -> Result<Response> {
        let query = select_query(ctx.request)?;
        let mut db = self.readable_database(ctx, user, database, table)?;
        let result = db.existing_table(table)?.distinct(column, &query)?;
        self.table(ctx, &result)
    }

    fn delete(&self, ctx: &RequestContext, user: &str, database: &str, table: &str) -> Result<Response> {
        require(&self.config.authorization, ctx.user(), user, database, Action::Delete)?;
        if !self.factory.exists(user, database)? {
            return Err(StoreError::NoSuchTable(table.to_string()).into());
        }
        let mut db = self.factory.create(user, database)?;
        let mut handle = db.existing_table(table)?;
        handle.drop_table()?;
        handle.commit()?;

        Ok(self.message(
            ctx.format,
            410,
            Message {
                message: format!("Table dropped: {}", table),
                state: State::Success,
                url: None,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn query_parameters() {
        let req = Request::get("/a/b/c")
            .with_query("_limit", "2")
            .with_query("_offset", "4")
            .with_query("_sort", "desc:temperature")
            .with_query("_callback", "cb")
            .with_query("place", "Galway");
        let q = select_query(&req).unwrap();
        assert_eq!(q.limit, Some(2));
        assert_eq!(q.offset, Some(4));
        assert_eq!(q.sorts.as_slice(), &[Sort::desc("temperature")]);
        assert_eq!(q.filters, vec![("place".to_string(), json!("Galway"))]);

        let bad = Request::get("/a/b/c").with_query("_limit", "BANANA");
        assert!(matches!(select_query(&bad), Err(Error::BadRequest(ref m)) if m.contains("BANANA")));
        let bad = Request::get("/a/b/c").with_query("_sort", "theotherway");
        assert!(matches!(select_query(&bad), Err(Error::Store(StoreError::InvalidQuery(_)))));
    }
}
