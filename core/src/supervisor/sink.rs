//! Destinations for companion process output.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

/// Which pipe a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Receives companion output one line at a time.
pub trait OutputSink: Send + Sync + 'static {
    fn line(&self, stream: OutputStream, line: &str);
}

/// Forwards lines to the tracing log, stdout at info and stderr at error.
#[derive(Debug, Clone)]
pub struct TracingSink {
    prefix: String,
}

impl TracingSink {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl OutputSink for TracingSink {
    fn line(&self, stream: OutputStream, line: &str) {
        match stream {
            OutputStream::Stdout => {
                info!(prefix = %self.prefix, stream = stream.as_str(), "{}", line)
            }
            OutputStream::Stderr => {
                error!(prefix = %self.prefix, stream = stream.as_str(), "{}", line)
            }
        }
    }
}

/// Keeps every line in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    lines: Arc<Mutex<Vec<(OutputStream, String)>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(OutputStream, String)> {
        self.lines.lock().clone()
    }

    /// Lines from one stream, in arrival order.
    pub fn stream(&self, stream: OutputStream) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|(_, line)| line.contains(needle))
    }
}

impl OutputSink for CollectingSink {
    fn line(&self, stream: OutputStream, line: &str) {
        self.lines.lock().push((stream, line.to_string()));
    }
}
