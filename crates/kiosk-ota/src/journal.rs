use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

/// Append-only operator log, one `<RFC3339> - <message>` line per event.
#[derive(Debug, Clone)]
pub struct OtaJournal {
    path: PathBuf,
}

impl OtaJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write failures are reported through tracing and never surface to callers.
    pub fn append(&self, message: &str) {
        if let Err(err) = self.try_append(message) {
            warn!(target: "kiosk::ota", log = %self.path.display(), error = %err, "failed to append update log line");
        }
    }

    fn try_append(&self, message: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = format!("{} - {}\n", Utc::now().to_rfc3339(), message.trim_end());
        file.write_all(line.as_bytes())
    }

    pub fn tail(&self, lines: usize) -> io::Result<Vec<String>> {
        if lines == 0 {
            return Ok(Vec::new());
        }
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut window = VecDeque::with_capacity(lines.min(1024));
        for line in BufReader::new(file).lines() {
            let line = line?;
            if window.len() == lines {
                window.pop_front();
            }
            window.push_back(line);
        }
        Ok(window.into_iter().collect())
    }
}
