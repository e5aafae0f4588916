//! helpers for logging.
//!
//! Everything in the workspace logs through the `log` facade; binaries and tests pick one of the functions here to
//! decide where that output goes.

fn format_record(
    buf: &mut env_logger::fmt::Formatter,
    record: &log::Record,
) -> std::io::Result<()> {
    use std::io::Write;

    let now = time::OffsetDateTime::now_utc();

    writeln!(
        buf,
        "{} {} time={} target={}",
        record.level(),
        record.args(),
        now,
        record.target()
    )
}

/// Log to stderr, honoring `RUST_LOG`.
///
/// If called multiple times in the same process, only applies once.
pub fn log_to_stderr() {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        // Tests call this from many threads; `try_init` keeps a second logger from panicking.
        let _ = env_logger::builder()
            .format(format_record)
            .is_test(cfg!(test))
            .try_init();
    });
}

/// Log to stderr with an explicit filter such as `info` or `tablestore_datastore=debug`.
///
/// `RUST_LOG`, if set, still wins.  Shares the once-guard semantics of [log_to_stderr]: whichever is called first
/// decides the configuration.
pub fn log_to_stderr_with_filter(filter: &str) {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        let env = env_logger::Env::default().default_filter_or(filter);
        let _ = env_logger::Builder::from_env(env)
            .format(format_record)
            .try_init();
    });
}
