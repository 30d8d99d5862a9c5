//! Append-only JSON-lines transaction log (spec.md §4.5.4) and rollback
//! reader (spec.md §4.5.5).

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{PhotoCopyError, Result, Timestamp};

const FLUSH_BYTES_THRESHOLD: u64 = 1024 * 1024;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOp {
    Copy,
    Move,
    DirectoryCreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionLogEntry {
    pub op: TxOp,
    pub source: PathBuf,
    pub dest: PathBuf,
    pub bytes: u64,
    pub started_at: Timestamp,
    pub completed_at: Timestamp,
    pub status: TxStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LogHeader {
    version: u32,
    operation_id: String,
    started_at: Timestamp,
    config_snapshot: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct LogFooter {
    status: FooterStatus,
    completed_at: Timestamp,
    files_processed: usize,
    files_failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FooterStatus {
    Completed,
    Aborted,
}

/// Owns the single open transaction-log file for one run. Per spec.md §5
/// the log writer is owned by exactly one thread; workers hand it
/// completed records through a channel rather than opening the file
/// themselves.
pub struct TransactionLogWriter {
    file: File,
    path: PathBuf,
    bytes_since_flush: u64,
    last_flush: Instant,
}

impl TransactionLogWriter {
    /// Opens `path` for writing, writes the header line, and `fsync`s
    /// (spec.md §4.5.4: "fsynced after the header and the closing line").
    pub fn create(path: &Path, operation_id: &str, started_at: Timestamp, config_snapshot: Value) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;

        let header = LogHeader { version: CURRENT_VERSION, operation_id: operation_id.to_string(), started_at, config_snapshot };
        writeln!(file, "{}", serde_json::to_string(&header)?)?;
        file.sync_all()?;

        Ok(TransactionLogWriter { file, path: path.to_path_buf(), bytes_since_flush: 0, last_flush: Instant::now() })
    }

    /// Appends one record. Flushes (not fsync) at most once per 1 MiB
    /// written or once per second, whichever comes first.
    pub fn write_record(&mut self, entry: &TransactionLogEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        self.bytes_since_flush += line.len() as u64 + 1;
        writeln!(self.file, "{}", line)?;

        if self.bytes_since_flush >= FLUSH_BYTES_THRESHOLD || self.last_flush.elapsed() >= FLUSH_INTERVAL {
            self.file.flush()?;
            self.bytes_since_flush = 0;
            self.last_flush = Instant::now();
        }
        Ok(())
    }

    /// Writes the closing footer line and `fsync`s.
    pub fn close(mut self, status: FooterStatus, completed_at: Timestamp, files_processed: usize, files_failed: usize) -> Result<PathBuf> {
        let footer = LogFooter { status, completed_at, files_processed, files_failed };
        writeln!(self.file, "{}", serde_json::to_string(&footer)?)?;
        self.file.sync_all()?;
        Ok(self.path)
    }
}

/// Summary of one log file's header, as returned by `list` mode
/// (spec.md §4.5.5).
#[derive(Debug, Clone, Serialize)]
pub struct LogSummary {
    pub path: PathBuf,
    pub operation_id: String,
    pub started_at: Timestamp,
    pub status: String,
    pub file_count: usize,
}

/// Enumerates `*.json` log files in `dir`, parsing each header (and
/// counting records) without validating the footer.
pub fn list_logs(dir: &Path) -> Result<Vec<LogSummary>> {
    let mut summaries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Ok(summary) = summarize_log(&path) {
            summaries.push(summary);
        }
    }
    Ok(summaries)
}

fn summarize_log(path: &Path) -> Result<LogSummary> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let header_line = lines.next().ok_or_else(|| PhotoCopyError::Io {
        message: format!("{}: empty transaction log", path.display()),
    })??;
    let header: LogHeader = serde_json::from_str(&header_line)?;
    if header.version > CURRENT_VERSION {
        return Err(PhotoCopyError::Internal {
            message: format!("{}: unsupported transaction log version {}", path.display(), header.version),
        });
    }

    let mut file_count = 0usize;
    let mut status = "InProgress".to_string();
    for line in lines {
        let line = line?;
        if let Ok(footer) = serde_json::from_str::<LogFooter>(&line) {
            status = match footer.status {
                FooterStatus::Completed => "Completed".to_string(),
                FooterStatus::Aborted => "Aborted".to_string(),
            };
            continue;
        }
        if serde_json::from_str::<TransactionLogEntry>(&line).is_ok() {
            file_count += 1;
        }
    }

    Ok(LogSummary { path: path.to_path_buf(), operation_id: header.operation_id, started_at: header.started_at, status, file_count })
}

/// Outcome of a rollback attempt (spec.md §4.5.5).
#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    pub files_restored: usize,
    pub files_failed: usize,
    pub partial: bool,
}

/// Reads `log_path` once to verify its header, then replays its records in
/// reverse order: a `Copy` record's destination is deleted if its checksum
/// (or size, when no checksum was recorded) matches; a `Move` record is
/// undone by moving the destination back to the source; a
/// `DirectoryCreate` record's directory is removed if empty.
///
/// Interactive confirmation is a CLI/console concern and is assumed to
/// have already happened by the time this is called.
pub fn rollback(log_path: &Path) -> Result<RollbackOutcome> {
    let file = File::open(log_path)?;
    let reader = BufReader::new(file);
    let mut lines: Vec<String> = reader.lines().collect::<std::io::Result<_>>()?;

    if lines.is_empty() {
        return Err(PhotoCopyError::Io { message: format!("{}: empty transaction log", log_path.display()) });
    }
    let header: LogHeader = serde_json::from_str(&lines[0])?;
    if header.version > CURRENT_VERSION {
        return Err(PhotoCopyError::Internal {
            message: format!("{}: unsupported transaction log version {}", log_path.display(), header.version),
        });
    }
    lines.remove(0);
    if lines.last().and_then(|l| serde_json::from_str::<LogFooter>(l).ok()).is_some() {
        lines.pop();
    }

    let mut records: Vec<TransactionLogEntry> = Vec::with_capacity(lines.len());
    for line in &lines {
        records.push(serde_json::from_str(line)?);
    }

    let mut restored = 0usize;
    let mut failed = 0usize;

    for record in records.into_iter().rev() {
        if record.status != TxStatus::Success {
            continue;
        }
        match rollback_one(&record) {
            Ok(()) => restored += 1,
            Err(_) => failed += 1,
        }
    }

    Ok(RollbackOutcome { files_restored: restored, files_failed: failed, partial: failed > 0 })
}

fn rollback_one(record: &TransactionLogEntry) -> Result<()> {
    match record.op {
        TxOp::Copy => {
            if dest_matches_record(record) {
                fs::remove_file(&record.dest)?;
            }
            Ok(())
        }
        TxOp::Move => {
            if record.dest.exists() {
                fs::rename(&record.dest, &record.source)?;
            }
            Ok(())
        }
        TxOp::DirectoryCreate => {
            if record.dest.is_dir() && fs::read_dir(&record.dest)?.next().is_none() {
                fs::remove_dir(&record.dest)?;
            }
            Ok(())
        }
    }
}

fn dest_matches_record(record: &TransactionLogEntry) -> bool {
    if !record.dest.exists() {
        return false;
    }
    if let Some(expected) = &record.checksum {
        return crate::checksum::sha256_file(&record.dest).map(|h| &h == expected).unwrap_or(false);
    }
    fs::metadata(&record.dest).map(|m| m.len() == record.bytes).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_header_records_and_footer() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("transaction-test.json");
        let mut writer =
            TransactionLogWriter::create(&log_path, "op-1", "2023-06-15T14:30:00Z".to_string(), serde_json::json!({})).unwrap();

        writer
            .write_record(&TransactionLogEntry {
                op: TxOp::Copy,
                source: PathBuf::from("/src/a.jpg"),
                dest: PathBuf::from("/dst/a.jpg"),
                bytes: 100,
                started_at: "2023-06-15T14:30:00Z".to_string(),
                completed_at: "2023-06-15T14:30:01Z".to_string(),
                status: TxStatus::Success,
                checksum: None,
            })
            .unwrap();

        writer.close(FooterStatus::Completed, "2023-06-15T14:30:02Z".to_string(), 1, 0).unwrap();

        let summary = summarize_log(&log_path).unwrap();
        assert_eq!(summary.operation_id, "op-1");
        assert_eq!(summary.file_count, 1);
        assert_eq!(summary.status, "Completed");
    }

    #[test]
    fn rollback_restores_moved_file() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.jpg");
        let dest = dir.path().join("dest.jpg");
        std::fs::write(&dest, b"moved content").unwrap();

        let log_path = dir.path().join("transaction-move.json");
        let mut writer =
            TransactionLogWriter::create(&log_path, "op-2", "2023-06-15T14:30:00Z".to_string(), serde_json::json!({})).unwrap();
        writer
            .write_record(&TransactionLogEntry {
                op: TxOp::Move,
                source: source.clone(),
                dest: dest.clone(),
                bytes: 13,
                started_at: "2023-06-15T14:30:00Z".to_string(),
                completed_at: "2023-06-15T14:30:01Z".to_string(),
                status: TxStatus::Success,
                checksum: None,
            })
            .unwrap();
        writer.close(FooterStatus::Completed, "2023-06-15T14:30:02Z".to_string(), 1, 0).unwrap();

        let outcome = rollback(&log_path).unwrap();
        assert_eq!(outcome.files_restored, 1);
        assert!(!outcome.partial);
        assert!(source.exists());
        assert!(!dest.exists());
    }

    #[test]
    fn rollback_deletes_copy_destination_when_checksum_matches() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("dest.jpg");
        std::fs::write(&dest, b"copied content").unwrap();
        let hash = crate::checksum::sha256_bytes(b"copied content");

        let log_path = dir.path().join("transaction-copy.json");
        let mut writer =
            TransactionLogWriter::create(&log_path, "op-3", "2023-06-15T14:30:00Z".to_string(), serde_json::json!({})).unwrap();
        writer
            .write_record(&TransactionLogEntry {
                op: TxOp::Copy,
                source: dir.path().join("source.jpg"),
                dest: dest.clone(),
                bytes: 14,
                started_at: "2023-06-15T14:30:00Z".to_string(),
                completed_at: "2023-06-15T14:30:01Z".to_string(),
                status: TxStatus::Success,
                checksum: Some(hash),
            })
            .unwrap();
        writer.close(FooterStatus::Completed, "2023-06-15T14:30:02Z".to_string(), 1, 0).unwrap();

        let outcome = rollback(&log_path).unwrap();
        assert_eq!(outcome.files_restored, 1);
        assert!(!dest.exists());
    }
}
