//! Logging utilities

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Directory holding the append-only log files
pub const LOG_DIR: &str = "logs";

/// Initialize the global logging system
///
/// Installs three sinks: human-readable output on stderr, an
/// application-wide append-only file `logs/miharu.log`, and
/// `logs/bot.log` restricted to Discord adaptor events. Level is taken
/// from `MIHARU_LOG_LEVEL` (or `RUST_LOG`), defaulting to `info`.
pub fn init_logging() {
    let level = std::env::var("MIHARU_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let _ = std::fs::create_dir_all(LOG_DIR);
    let app_log = AppendWriter::new(Path::new(LOG_DIR).join("miharu.log"));
    let bot_log = AppendWriter::new(Path::new(LOG_DIR).join("bot.log"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(app_log),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(bot_log)
                .with_filter(filter::filter_fn(|meta| {
                    meta.target().starts_with("miharu_adaptor_discord")
                })),
        )
        .init();
}

/// MakeWriter that appends to a fixed file, creating it on first use
struct AppendWriter {
    path: PathBuf,
}

impl AppendWriter {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for AppendWriter {
    type Writer = AppendSink;

    fn make_writer(&'a self) -> Self::Writer {
        AppendSink(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .ok(),
        )
    }
}

/// Writer over an optional file; events are dropped if the file could
/// not be opened (logging must never take the bot down)
struct AppendSink(Option<File>);

impl Write for AppendSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.0 {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.0 {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_writer_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        let writer = AppendWriter::new(path.clone());
        {
            use tracing_subscriber::fmt::MakeWriter;
            let mut sink = writer.make_writer();
            sink.write_all(b"first\n").unwrap();
            let mut sink = writer.make_writer();
            sink.write_all(b"second\n").unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_append_sink_swallows_missing_file() {
        let mut sink = AppendSink(None);
        assert_eq!(sink.write(b"dropped").unwrap(), 7);
        assert!(sink.flush().is_ok());
    }
}
