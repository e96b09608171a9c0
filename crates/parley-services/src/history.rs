//! Session history — append-only store of displayed lines.
//!
//! Every line the node displays (inbound chat, own messages, connect
//! and disconnect notices) is recorded here in arrival order and
//! flushed to a per-session file at shutdown. Lines are immutable once
//! recorded; readers take full snapshots, so eventual visibility is
//! all that is required of the lock.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Wall-clock stamp for display lines, `HH:MM:SS`.
pub fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// File name for one session's history.
pub fn history_file_name(username: &str, started_at_ms: u64) -> String {
    format!("history-{username}-{started_at_ms}.txt")
}

#[derive(Clone, Default)]
pub struct History {
    lines: Arc<Mutex<Vec<String>>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one formatted line.
    pub fn record(&self, line: impl Into<String>) {
        self.lines.lock().expect("history lock poisoned").push(line.into());
    }

    /// Full ordered snapshot.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().expect("history lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().expect("history lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the full history to `dir/history-<username>-<millis>.txt`,
    /// one line per record, no header. Creates the directory if
    /// missing. Returns the path written.
    pub fn flush_to(
        &self,
        dir: &Path,
        username: &str,
        started_at_ms: u64,
    ) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(history_file_name(username, started_at_ms));
        let mut file = std::fs::File::create(&path)?;
        for line in self.snapshot() {
            writeln!(file, "{line}")?;
        }
        file.flush()?;
        Ok(path)
    }
}
