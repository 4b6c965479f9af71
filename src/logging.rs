/// Tracing setup
///
/// stdout belongs to the JSON-RPC stream, so every layer here writes to
/// stderr or to a file. The stderr layer is human-readable with ANSI colors
/// on a terminal and JSON when piped; the optional file layer is always JSON.

use std::fs::{File, OpenOptions};
use std::io::IsTerminal;
use std::sync::Arc;

use tracing_subscriber::{
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};
use crate::config::Config;

/// Initialize the global subscriber.
///
/// Level comes from config.log_level; RUST_LOG overrides it at runtime.
/// When config.log_file is set, a JSON layer appends to that file alongside
/// stderr. An unopenable log file degrades to stderr-only: the subscriber
/// is not up yet, so the failure itself can only go to stderr.
pub fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let file_layer = config.log_file.as_deref().and_then(|path| {
        match open_log_file(path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false)
                    .json(),
            ),
            Err(e) => {
                eprintln!("Could not open log file {}: {}; logging to stderr only", path, e);
                None
            }
        }
    });

    let stderr_layer = if std::io::stderr().is_terminal() {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

/// Open the log file for appending, creating it if needed.
fn open_log_file(path: &str) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_log_file_creates_and_appends() {
        let path = std::env::temp_dir().join(format!("trove-log-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let path_str = path.to_string_lossy().into_owned();

        let mut first = open_log_file(&path_str).unwrap();
        writeln!(first, "one").unwrap();
        drop(first);

        // Reopening appends rather than truncating
        let mut second = open_log_file(&path_str).unwrap();
        writeln!(second, "two").unwrap();
        drop(second);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "one\ntwo\n");

        let _ = std::fs::remove_file(&path);
    }
}
