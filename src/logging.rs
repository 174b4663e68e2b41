//! Root logger construction

use slog::{Drain, Logger};

/// Build the standard root logger: terminal format behind an async drain.
pub fn root_logger(service: &'static str) -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, slog::o!("service" => service))
}

/// Discards all records; used by tests that don't assert on log output.
pub fn discard_logger() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}
