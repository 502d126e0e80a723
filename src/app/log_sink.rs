//! Append-only JSON-lines history of operations, adb invocations and timings.
//!
//! Each kind has its own file in the sink directory. Files rotate by size:
//! `commands.log` becomes `commands.log.1`, older generations shift up, and
//! anything past `max_files` generations is deleted.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

use crate::app::config::LoggingSettings;

pub const MAX_RECORDED_OUTPUT: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Operation,
    Command,
    Performance,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [
        RecordKind::Operation,
        RecordKind::Command,
        RecordKind::Performance,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            RecordKind::Operation => "operations.log",
            RecordKind::Command => "commands.log",
            RecordKind::Performance => "performance.log",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "operation" | "operations" => Some(RecordKind::Operation),
            "command" | "commands" => Some(RecordKind::Command),
            "performance" | "perf" => Some(RecordKind::Performance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandRecord {
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
    pub serial: Option<String>,
    pub command: String,
    pub exit_code: Option<i32>,
    pub output: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationRecord {
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
    pub operation: String,
    pub serial: Option<String>,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceRecord {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub serial: Option<String>,
    pub elapsed_ms: u64,
}

pub fn truncate_output(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &value[..end])
}

pub struct LogSink {
    dir: PathBuf,
    max_bytes: u64,
    max_files: usize,
    write_lock: Mutex<()>,
}

impl LogSink {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64, max_files: usize) -> Self {
        Self {
            dir: dir.into(),
            max_bytes: max_bytes.max(1),
            max_files: max_files.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self::new(
            settings.resolved_log_dir(),
            settings.max_file_bytes(),
            settings.max_log_files.max(1) as usize,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: RecordKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn record_command(&self, mut record: CommandRecord) {
        record.output = truncate_output(&record.output, MAX_RECORDED_OUTPUT);
        self.append(RecordKind::Command, &record);
    }

    pub fn record_operation(&self, record: OperationRecord) {
        self.append(RecordKind::Operation, &record);
    }

    pub fn record_performance(&self, record: PerformanceRecord) {
        self.append(RecordKind::Performance, &record);
    }

    fn append<T: Serialize>(&self, kind: RecordKind, record: &T) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = self.append_locked(kind, record) {
            warn!(error = %err, file = kind.file_name(), "failed to append log record");
        }
    }

    fn append_locked<T: Serialize>(&self, kind: RecordKind, record: &T) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(kind);
        if fs::metadata(&path).map(|meta| meta.len() >= self.max_bytes).unwrap_or(false) {
            self.rotate(&path)?;
        }
        let line = serde_json::to_string(record).map_err(std::io::Error::other)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{line}")
    }

    fn rotated_path(path: &Path, generation: usize) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(format!(".{generation}"));
        PathBuf::from(name)
    }

    fn rotate(&self, path: &Path) -> std::io::Result<()> {
        let oldest = Self::rotated_path(path, self.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for generation in (1..self.max_files).rev() {
            let from = Self::rotated_path(path, generation);
            if from.exists() {
                fs::rename(&from, Self::rotated_path(path, generation + 1))?;
            }
        }
        fs::rename(path, Self::rotated_path(path, 1))
    }

    /// Last `limit` records of the current file, oldest first. Malformed lines are skipped.
    pub fn recent<T: DeserializeOwned>(&self, kind: RecordKind, limit: usize) -> Vec<T> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let Ok(file) = File::open(self.path_for(kind)) else {
            return Vec::new();
        };
        let lines: Vec<String> = BufReader::new(file).lines().map_while(Result::ok).collect();
        let start = lines.len().saturating_sub(limit);
        lines[start..]
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    pub fn recent_raw(&self, kind: RecordKind, limit: usize) -> Vec<serde_json::Value> {
        self.recent(kind, limit)
    }

    /// All sink files including rotated generations.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files = fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| {
                        path.file_name()
                            .and_then(|name| name.to_str())
                            .map(|name| {
                                RecordKind::ALL
                                    .iter()
                                    .any(|kind| name.starts_with(kind.file_name()))
                            })
                            .unwrap_or(false)
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        files.sort();
        files
    }

    pub fn clear(&self) -> std::io::Result<usize> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let files = self.files();
        for path in &files {
            fs::remove_file(path)?;
        }
        Ok(files.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn command(index: usize) -> CommandRecord {
        CommandRecord {
            timestamp: Utc::now(),
            trace_id: format!("trace-{index}"),
            serial: Some("ABC".to_string()),
            command: "adb -s ABC shell id".to_string(),
            exit_code: Some(0),
            output: "uid=2000(shell)".to_string(),
            elapsed_ms: 12,
        }
    }

    #[test]
    fn appends_json_lines_and_reads_recent() {
        let tmp = TempDir::new().expect("tmp");
        let sink = LogSink::new(tmp.path(), 1024 * 1024, 3);
        for index in 0..5 {
            sink.record_command(command(index));
        }
        let recent: Vec<CommandRecord> = sink.recent(RecordKind::Command, 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].trace_id, "trace-3");
        assert_eq!(recent[1].trace_id, "trace-4");

        let raw = fs::read_to_string(sink.path_for(RecordKind::Command)).expect("read");
        assert_eq!(raw.lines().count(), 5);
    }

    #[test]
    fn rotates_and_caps_generations() {
        let tmp = TempDir::new().expect("tmp");
        let sink = LogSink::new(tmp.path(), 64, 2);
        for index in 0..10 {
            sink.record_command(command(index));
        }
        let path = sink.path_for(RecordKind::Command);
        assert!(path.exists());
        assert!(LogSink::rotated_path(&path, 1).exists());
        assert!(LogSink::rotated_path(&path, 2).exists());
        assert!(!LogSink::rotated_path(&path, 3).exists());
    }

    #[test]
    fn truncates_large_output() {
        let tmp = TempDir::new().expect("tmp");
        let sink = LogSink::new(tmp.path(), 1024 * 1024, 3);
        let mut record = command(0);
        record.output = "x".repeat(MAX_RECORDED_OUTPUT * 2);
        sink.record_command(record);
        let recent: Vec<CommandRecord> = sink.recent(RecordKind::Command, 1);
        assert!(recent[0].output.len() < MAX_RECORDED_OUTPUT + 32);
        assert!(recent[0].output.ends_with("[truncated]"));
    }

    #[test]
    fn clear_removes_every_kind() {
        let tmp = TempDir::new().expect("tmp");
        let sink = LogSink::new(tmp.path(), 1024 * 1024, 3);
        sink.record_command(command(0));
        sink.record_operation(OperationRecord {
            timestamp: Utc::now(),
            trace_id: "t".to_string(),
            operation: "reboot".to_string(),
            serial: None,
            success: true,
            message: "ok".to_string(),
        });
        sink.record_performance(PerformanceRecord {
            timestamp: Utc::now(),
            operation: "reboot".to_string(),
            serial: None,
            elapsed_ms: 5,
        });
        assert_eq!(sink.files().len(), 3);
        assert_eq!(sink.clear().expect("clear"), 3);
        assert!(sink.files().is_empty());
        assert!(sink.recent_raw(RecordKind::Operation, 10).is_empty());
    }

    #[test]
    fn parses_kind_names() {
        assert_eq!(RecordKind::parse("commands"), Some(RecordKind::Command));
        assert_eq!(RecordKind::parse("perf"), Some(RecordKind::Performance));
        assert_eq!(RecordKind::parse("nope"), None);
    }
}
