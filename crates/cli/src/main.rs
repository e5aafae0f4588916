//! Send one request through the store from the command line.
//!
//! ```bash
//! # Create a table from a CSV file
//! tablestore POST /hugo/weather --query table=readings --content-type text/csv --data readings.csv
//!
//! # Read it back, newest first
//! tablestore GET /hugo/weather/readings.json --query _sort=desc:date --query _limit=10
//! ```
//!
//! The response body goes to stdout; the status line and headers go to stderr.
use std::io::{Read, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use log::*;

use tablestore_web::{Method, Request, Webstore, WebstoreConfig, SETTINGS_VAR};

#[derive(Parser, Debug)]
#[command(name = "tablestore", version, about = "Query and update tablestore databases")]
struct Args {
    /// GET, POST, PUT, DELETE or OPTIONS
    method: String,

    /// Request path, e.g. /user/database/table.csv
    path: String,

    /// Query parameter as key=value; may be repeated
    #[arg(short, long = "query", value_name = "KEY=VALUE", value_parser = parse_pair)]
    queries: Vec<(String, String)>,

    /// Request header as name=value; may be repeated
    #[arg(short = 'H', long = "header", value_name = "NAME=VALUE", value_parser = parse_pair)]
    headers: Vec<(String, String)>,

    /// Request body; `-` reads stdin
    #[arg(short, long, value_name = "FILE")]
    data: Option<String>,

    /// Content type of the request body
    #[arg(short, long, default_value = "application/json")]
    content_type: String,

    /// Accept header
    #[arg(short, long)]
    accept: Option<String>,

    /// Act as this already-authenticated user
    #[arg(short, long)]
    user: Option<String>,

    /// Settings file; defaults to the file named by the settings variable
    #[arg(short, long, env = SETTINGS_VAR)]
    settings: Option<Utf8PathBuf>,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {}", raw))
}

fn read_body(source: &str) -> Result<Vec<u8>> {
    let mut body = vec![];
    if source == "-" {
        std::io::stdin().read_to_end(&mut body)?;
    } else {
        body = std::fs::read(source).with_context(|| format!("Unable to read {}", source))?;
    }
    Ok(body)
}

fn build_request(args: &Args) -> Result<Request> {
    let method: Method = args.method.parse()?;
    let mut request = Request::new(method, args.path.clone());
    for (k, v) in args.queries.iter() {
        request = request.with_query(k.as_str(), v.as_str());
    }
    for (k, v) in args.headers.iter() {
        request = request.with_header(k.as_str(), v.as_str());
    }
    if let Some(accept) = args.accept.as_deref() {
        request = request.with_header("Accept", accept);
    }
    if let Some(user) = args.user.as_deref() {
        request = request.with_remote_user(user);
    }
    if let Some(source) = args.data.as_deref() {
        request = request.with_body(&args.content_type, read_body(source)?);
    }
    Ok(request)
}

fn run(args: Args) -> Result<u16> {
    let config = match args.settings.as_ref() {
        Some(p) => WebstoreConfig::from_path(p)?,
        None => WebstoreConfig::default(),
    };
    tablestore_logging::log_to_stderr_with_filter(&config.log_filter);

    let request = build_request(&args)?;
    let store = Webstore::new(config)?;
    let response = store.handle(&request);
    info!("{} {} -> {}", args.method, args.path, response.status);

    let mut stderr = std::io::stderr().lock();
    writeln!(stderr, "{}", response.status)?;
    writeln!(stderr, "Content-Type: {}", response.content_type)?;
    for (k, v) in response.headers.iter() {
        writeln!(stderr, "{}: {}", k, v)?;
    }

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&response.body)?;
    stdout.flush()?;
    Ok(response.status)
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(status) if status < 400 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs() {
        assert_eq!(parse_pair("a=b=c").unwrap(), ("a".to_string(), "b=c".to_string()));
        assert!(parse_pair("nope").is_err());
    }

    #[test]
    fn requests_from_arguments() {
        let args = Args::parse_from([
            "tablestore",
            "get",
            "/hugo/db/t",
            "-q",
            "_limit=2",
            "--query",
            "place=Galway",
            "--accept",
            "text/csv",
            "--user",
            "hugo",
        ]);
        let request = build_request(&args).unwrap();
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.query_value("_limit"), Some("2"));
        assert_eq!(request.query_value("place"), Some("Galway"));
        assert_eq!(request.header("accept"), Some("text/csv"));
        assert_eq!(request.remote_user.as_deref(), Some("hugo"));
        assert!(request.body.is_empty());
    }
}
