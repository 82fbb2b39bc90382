use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const ROTATE_ABOVE_LINES: usize = 1000;
const ROTATE_KEEP_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub ts: String,
    pub level: LogLevel,
    pub component: String,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
    pub attempt: i64,
    pub retryable: bool,
}

/// Append-only JSONL diagnostic log. Every write is best-effort: a logging
/// failure is swallowed, never propagated, never crashes the process.
pub struct ErrorLog {
    path: PathBuf,
    // serializes appends/rotations; the teacher treats single-file-append as
    // sufficient for interleaving but rotation needs a read-modify-write.
    lock: Mutex<()>,
}

impl ErrorLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends an entry and rotates if needed. Never returns an error to the
    /// caller; failures are silently ignored per §4.10/§7.
    pub fn log(&self, entry: &ErrorLogEntry) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let _ = self.try_log(entry);
    }

    fn try_log(&self, entry: &ErrorLogEntry) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let line = serde_json::to_string(entry).unwrap_or_default();
        {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            writeln!(file, "{line}")?;
        }
        self.rotate_if_needed()
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Ok(()),
        };
        let lines: Vec<String> = std::io::BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .collect();
        if lines.len() <= ROTATE_ABOVE_LINES {
            return Ok(());
        }
        let keep = &lines[lines.len() - ROTATE_KEEP_LINES..];
        let mut body = keep.join("\n");
        body.push('\n');
        fs::write(&self.path, body)
    }

    /// Reads entries newest-first, capped by `limit`. Malformed lines are
    /// skipped rather than aborting the read.
    pub fn read(&self, limit: usize) -> Vec<ErrorLogEntry> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };
        let mut entries: Vec<ErrorLogEntry> = std::io::BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();
        entries.reverse();
        entries.truncate(limit);
        entries
    }

    /// Removes entries strictly before `cutoff` (ISO-8601). Entries with a
    /// timestamp that doesn't parse-compare are retained (never dropped by
    /// a malformed cutoff comparison).
    pub fn clear(&self, cutoff: Option<&str>) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let _ = self.try_clear(cutoff);
    }

    fn try_clear(&self, cutoff: Option<&str>) -> std::io::Result<()> {
        let Some(cutoff) = cutoff else {
            return fs::write(&self.path, "");
        };
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Ok(()),
        };
        let retained: Vec<String> = std::io::BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter(|line| {
                serde_json::from_str::<ErrorLogEntry>(line)
                    .map(|entry| entry.ts.as_str() >= cutoff)
                    .unwrap_or(true)
            })
            .collect();
        let mut body = retained.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        fs::write(&self.path, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(code: &str) -> ErrorLogEntry {
        ErrorLogEntry {
            ts: "2026-01-01T00:00:00Z".to_string(),
            level: LogLevel::Error,
            component: "refresh".to_string(),
            code: code.to_string(),
            message: "boom".to_string(),
            tool: None,
            context: BTreeMap::new(),
            attempt: 1,
            retryable: false,
        }
    }

    #[test]
    fn append_and_read_round_trips_newest_first() {
        let dir = tempdir().expect("tempdir");
        let log = ErrorLog::new(dir.path().join("error.log"));
        log.log(&entry("A"));
        log.log(&entry("B"));
        let read = log.read(10);
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].code, "B");
        assert_eq!(read[1].code, "A");
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("error.log");
        fs::write(&path, "not json\n{\"bad\":true}\n").expect("seed");
        let log = ErrorLog::new(path);
        log.log(&entry("C"));
        let read = log.read(10);
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].code, "C");
    }

    #[test]
    fn rotation_keeps_last_500_lines_once_over_1000() {
        let dir = tempdir().expect("tempdir");
        let log = ErrorLog::new(dir.path().join("error.log"));
        for i in 0..1200 {
            log.log(&entry(&i.to_string()));
        }
        let lines = fs::read_to_string(log.path()).expect("read");
        let count = lines.lines().count();
        assert_eq!(count, ROTATE_KEEP_LINES);
        assert!(lines.lines().last().unwrap().contains("\"1199\""));
    }

    #[test]
    fn logging_never_panics_when_parent_is_unwritable() {
        let log = ErrorLog::new(PathBuf::from("/nonexistent-root-dir/x/error.log"));
        log.log(&entry("D"));
    }

    #[test]
    fn clear_with_cutoff_retains_entries_at_or_after_cutoff() {
        let dir = tempdir().expect("tempdir");
        let log = ErrorLog::new(dir.path().join("error.log"));
        let mut early = entry("early");
        early.ts = "2026-01-01T00:00:00Z".to_string();
        let mut late = entry("late");
        late.ts = "2026-06-01T00:00:00Z".to_string();
        log.log(&early);
        log.log(&late);
        log.clear(Some("2026-03-01T00:00:00Z"));
        let read = log.read(10);
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].code, "late");
    }
}
