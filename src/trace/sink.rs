//! Output sinks for rendered trace lines
//!
//! @module trace/sink

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Where rendered lines go; exactly one per session
pub enum OutputSink {
    /// Standard error (the default)
    Stderr,
    /// Append to a file; with `overwrite` the first write truncates it
    File { path: PathBuf, overwrite: bool },
    /// Any byte stream
    Stream(Box<dyn Write + Send>),
    /// Called once per line, without the trailing newline
    Callback(Box<dyn FnMut(&str) + Send>),
}

impl OutputSink {
    pub fn file(path: impl Into<PathBuf>, overwrite: bool) -> Self {
        OutputSink::File {
            path: path.into(),
            overwrite,
        }
    }

    pub fn stream<W: Write + Send + 'static>(writer: W) -> Self {
        OutputSink::Stream(Box::new(writer))
    }

    pub fn callback<F: FnMut(&str) + Send + 'static>(f: F) -> Self {
        OutputSink::Callback(Box::new(f))
    }

    /// Write one line; failures are logged, never returned
    pub fn write_line(&mut self, line: &str) {
        let result = match self {
            OutputSink::Stderr => writeln!(std::io::stderr(), "{}", line),
            OutputSink::File { path, overwrite } => {
                let truncate = std::mem::replace(overwrite, false);
                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(!truncate)
                    .truncate(truncate)
                    .open(&*path)
                    .and_then(|mut file| writeln!(file, "{}", line))
            }
            OutputSink::Stream(writer) => writeln!(writer, "{}", line),
            OutputSink::Callback(f) => {
                f(line);
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!("Failed to write trace output: {}", e);
        }
    }
}

impl Default for OutputSink {
    fn default() -> Self {
        OutputSink::Stderr
    }
}
