//! Parallel copy/move executor (spec.md §4.5): dispatches `DestinationPlan`s
//! to a worker pool with retry-classified I/O errors, related-file
//! co-movement, progress reporting, and an append-only transaction log.

pub mod txlog;

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::planner::{CollisionAction, DestinationPlan};
use crate::source_file::SourceFile;
use crate::{format_timestamp, PhotoCopyError, ProgressEvent, Result};
use txlog::{FooterStatus, TransactionLogEntry, TransactionLogWriter, TxOp, TxStatus};

const COPY_BUFFER_SIZE: usize = 64 * 1024;
const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_MS: [u64; 3] = [100, 400, 1600];
const MAX_ERRORS_RECORDED: usize = 1000;

/// Whether the executor copies (leaving the source intact) or moves
/// (renaming, falling back to copy-then-delete across devices).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Copy,
    Move,
}

/// One file's failure, retained in `CopyResult.errors` up to
/// `MAX_ERRORS_RECORDED`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyError {
    pub path: PathBuf,
    pub message: String,
}

/// Aggregate outcome of one executor run, accumulated monotonically across
/// every dispatched plan (spec.md §3.1).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CopyResult {
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes: u64,
    pub errors: Vec<CopyError>,
    /// Count of additional failures beyond `MAX_ERRORS_RECORDED` that were
    /// not individually retained (spec.md §4.5.3: "bounded error list, up
    /// to 1000 entries, then counted only").
    pub errors_truncated: usize,
}

/// Resolved executor configuration.
pub struct ExecutorConfig {
    pub parallelism: usize,
    pub mode: OperationMode,
    pub log_path: PathBuf,
    pub config_snapshot: serde_json::Value,
}

/// Shared cancellation flag, checked before each file, between retry
/// attempts, and during back-off sleeps (spec.md §5).
#[derive(Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-file outcome sent from a worker to the single collector thread that
/// owns progress reporting and the transaction log writer (spec.md §5:
/// "the transaction-log writer is owned by exactly one thread and
/// serializes via a channel").
enum WorkerEvent {
    FileStarted { path: String },
    FileCompleted { path: String, success: bool, skipped: bool, bytes: u64, error: Option<String>, log_entries: Vec<TransactionLogEntry> },
}

/// Runs `plans` to completion (or cancellation), returning the aggregate
/// result. `progress` is invoked from the collector thread only, so
/// implementations never need their own synchronization.
pub fn execute(
    plans: Vec<DestinationPlan>,
    config: &ExecutorConfig,
    cancellation: &CancellationToken,
    mut progress: Option<Box<dyn FnMut(ProgressEvent) + Send>>,
) -> Result<CopyResult> {
    let operation_id = uuid::Uuid::new_v4().to_string();
    let started_at = OffsetDateTime::now_utc();
    let writer = TransactionLogWriter::create(
        &config.log_path,
        &operation_id,
        format_timestamp(started_at),
        config.config_snapshot.clone(),
    )?;

    let (tx, rx) = mpsc::channel::<WorkerEvent>();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.parallelism.max(1))
        .build()
        .map_err(|e| PhotoCopyError::Internal { message: format!("failed to build worker pool: {}", e) })?;

    let mode = config.mode;
    let cancel_for_workers = cancellation.clone();

    let cancel_for_collector = cancellation.clone();
    let collector = std::thread::spawn(move || collect(rx, writer, progress.take(), cancel_for_collector));

    pool.install(|| {
        plans.into_par_iter().for_each_with(tx, |tx, plan| {
            if cancel_for_workers.is_cancelled() {
                return;
            }
            let path = plan.file.source.path.to_string_lossy().to_string();
            let _ = tx.send(WorkerEvent::FileStarted { path });
            let event = process_plan(plan, mode, &cancel_for_workers);
            let _ = tx.send(event);
        });
    });

    let result = collector.join().map_err(|_| PhotoCopyError::Internal {
        message: "transaction log collector thread panicked".to_string(),
    })?;

    Ok(result)
}

/// The collector thread: owns the transaction log writer and the progress
/// callback, applying both as `WorkerEvent`s arrive, and closes the log
/// with `Aborted` if the run was cancelled or `Completed` otherwise.
fn collect(
    rx: mpsc::Receiver<WorkerEvent>,
    mut writer: TransactionLogWriter,
    mut progress: Option<Box<dyn FnMut(ProgressEvent) + Send>>,
    cancellation: CancellationToken,
) -> CopyResult {
    let mut result = CopyResult::default();

    for event in rx {
        match event {
            WorkerEvent::FileStarted { path } => {
                if let Some(cb) = progress.as_mut() {
                    cb(ProgressEvent::FileStarted { path });
                }
            }
            WorkerEvent::FileCompleted { path, success, skipped, bytes, error, log_entries } => {
                for entry in &log_entries {
                    let _ = writer.write_record(entry);
                }

                if skipped {
                    result.skipped += 1;
                } else if success {
                    result.processed += 1;
                    result.bytes += bytes;
                } else {
                    result.failed += 1;
                    if result.errors.len() < MAX_ERRORS_RECORDED {
                        result.errors.push(CopyError { path: PathBuf::from(&path), message: error.unwrap_or_default() });
                    } else {
                        result.errors_truncated += 1;
                    }
                }

                if let Some(cb) = progress.as_mut() {
                    cb(ProgressEvent::Tick {
                        files_processed: result.processed,
                        files_failed: result.failed,
                        files_skipped: result.skipped,
                        bytes_processed: result.bytes,
                        current_path: Some(path.clone()),
                    });
                    cb(ProgressEvent::FileCompleted { path, success, error: None, bytes: Some(bytes) });
                }
            }
        }
    }

    let finished_at = format_timestamp(OffsetDateTime::now_utc());
    let status = if cancellation.is_cancelled() { FooterStatus::Aborted } else { FooterStatus::Completed };
    let _ = writer.close(status, finished_at, result.processed, result.failed);

    result
}

/// Executes one plan (main file plus its related files) with retries,
/// producing the event the collector will fold into the aggregate result.
fn process_plan(plan: DestinationPlan, mode: OperationMode, cancellation: &CancellationToken) -> WorkerEvent {
    let source_path = plan.file.source.path.clone();
    let path_string = source_path.to_string_lossy().to_string();

    if cancellation.is_cancelled() {
        return WorkerEvent::FileCompleted { path: path_string, success: false, skipped: true, bytes: 0, error: None, log_entries: Vec::new() };
    }

    let mut log_entries = Vec::new();

    if let Some(parent) = plan.planned_path.parent() {
        match ensure_dir_logged(parent) {
            Ok(entry) => log_entries.extend(entry),
            Err(e) => {
                return WorkerEvent::FileCompleted {
                    path: path_string,
                    success: false,
                    skipped: false,
                    bytes: 0,
                    error: Some(e.to_string()),
                    log_entries: Vec::new(),
                };
            }
        }
    }

    let main_result = perform_operation(
        &source_path,
        &plan.planned_path,
        plan.collision_action,
        mode,
        plan.file.metadata.checksum.as_deref(),
        cancellation,
    );

    if main_result.is_err() && cancellation.is_cancelled() {
        // Cancellation raced with an in-flight retry: spec.md §4.6 treats
        // this as `Canceled -> Done` with no log record, not a failure.
        return WorkerEvent::FileCompleted {
            path: path_string,
            success: false,
            skipped: true,
            bytes: 0,
            error: None,
            log_entries: Vec::new(),
        };
    }

    let (main_success, main_bytes, main_error) = match main_result {
        Ok(outcome) => {
            if let Some(entry) = outcome.log_entry {
                log_entries.push(entry);
            }
            (true, outcome.bytes, None)
        }
        Err(e) => (false, 0, Some(e)),
    };

    let mut total_bytes = main_bytes;
    if main_success {
        for related in &plan.file.related {
            let related_dest = related_destination(&plan.planned_path, related);
            if let Some(parent) = related_dest.parent() {
                if let Ok(entry) = ensure_dir_logged(parent) {
                    log_entries.extend(entry);
                }
            }
            if let Ok(outcome) = perform_operation(&related.path, &related_dest, CollisionAction::Write, mode, None, cancellation) {
                total_bytes += outcome.bytes;
                if let Some(entry) = outcome.log_entry {
                    log_entries.push(entry);
                }
            }
        }
    }

    WorkerEvent::FileCompleted {
        path: path_string,
        success: main_success,
        skipped: matches!(plan.collision_action, CollisionAction::Skip | CollisionAction::ReuseExisting),
        bytes: total_bytes,
        error: main_error,
        log_entries,
    }
}

struct OperationOutcome {
    bytes: u64,
    log_entry: Option<TransactionLogEntry>,
}

/// Creates `dir` (and any missing ancestors) if it does not already exist,
/// emitting one `DirectoryCreate` log entry for it when it does (spec.md
/// §4.5.1 step 5: "Emit a TransactionLogEntry for every actual operation
/// performed (creates, copies, moves)"). Idempotent: a directory that
/// already exists produces no entry and rollback has nothing to undo.
fn ensure_dir_logged(dir: &Path) -> std::io::Result<Option<TransactionLogEntry>> {
    if dir.exists() {
        return Ok(None);
    }
    let started_at = OffsetDateTime::now_utc();
    fs::create_dir_all(dir)?;
    let completed_at = OffsetDateTime::now_utc();
    Ok(Some(TransactionLogEntry {
        op: TxOp::DirectoryCreate,
        source: dir.to_path_buf(),
        dest: dir.to_path_buf(),
        bytes: 0,
        started_at: format_timestamp(started_at),
        completed_at: format_timestamp(completed_at),
        status: TxStatus::Success,
        checksum: None,
    }))
}

/// Performs one file's operation with retry-classified errors
/// (spec.md §4.5.2), returning the bytes moved and the log record to
/// emit, if any.
fn perform_operation(
    source: &Path,
    dest: &Path,
    action: CollisionAction,
    mode: OperationMode,
    checksum: Option<&str>,
    cancellation: &CancellationToken,
) -> std::result::Result<OperationOutcome, String> {
    if matches!(action, CollisionAction::Skip | CollisionAction::ReuseExisting) {
        return Ok(OperationOutcome { bytes: 0, log_entry: None });
    }

    let started_at = OffsetDateTime::now_utc();
    let mut attempt = 0u32;
    let mut rng = rand::thread_rng();

    loop {
        if cancellation.is_cancelled() {
            return Err("cancelled".to_string());
        }

        let result = match mode {
            OperationMode::Copy => copy_with_buffer(source, dest).map(|bytes| (TxOp::Copy, bytes)),
            OperationMode::Move => move_file(source, dest).map(|bytes| (TxOp::Move, bytes)),
        };

        match result {
            Ok((op, bytes)) => {
                let completed_at = OffsetDateTime::now_utc();
                let entry = TransactionLogEntry {
                    op,
                    source: source.to_path_buf(),
                    dest: dest.to_path_buf(),
                    bytes,
                    started_at: format_timestamp(started_at),
                    completed_at: format_timestamp(completed_at),
                    status: TxStatus::Success,
                    checksum: checksum.map(|s| s.to_string()),
                };
                return Ok(OperationOutcome { bytes, log_entry: Some(entry) });
            }
            Err(e) => {
                if attempt >= MAX_RETRIES || classify_error(&e) == ErrorClass::Fatal {
                    return Err(e.to_string());
                }
                if !sleep_with_cancellation(backoff_duration(attempt, &mut rng), cancellation) {
                    return Err("cancelled".to_string());
                }
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorClass {
    Transient,
    Fatal,
}

/// Classifies an I/O error as transient (worth retrying) or fatal
/// (spec.md §4.5.2). Windows error codes are named in the spec directly;
/// the Unix analogues (`EAGAIN`, `EBUSY`, `ETXTBSY`) cover the same class
/// of "someone else has this file open" conditions on this platform.
fn classify_error(err: &std::io::Error) -> ErrorClass {
    use std::io::ErrorKind::*;
    match err.kind() {
        Interrupted | WouldBlock | TimedOut => ErrorClass::Transient,
        _ => match err.raw_os_error() {
            Some(11) | Some(16) | Some(26) => ErrorClass::Transient,
            Some(32) | Some(33) | Some(54) | Some(108) | Some(1006) | Some(1920) => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        },
    }
}

fn backoff_duration(attempt: u32, rng: &mut impl Rng) -> Duration {
    let base = BACKOFF_BASE_MS[(attempt as usize).min(BACKOFF_BASE_MS.len() - 1)];
    let jitter = rng.gen_range(-0.2..=0.2);
    let millis = (base as f64 * (1.0 + jitter)).max(0.0) as u64;
    Duration::from_millis(millis)
}

/// Sleeps in short increments so cancellation during back-off is honored
/// promptly (spec.md §5). Returns `false` if cancelled mid-sleep.
fn sleep_with_cancellation(total: Duration, cancellation: &CancellationToken) -> bool {
    const STEP: Duration = Duration::from_millis(25);
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if cancellation.is_cancelled() {
            return false;
        }
        let chunk = remaining.min(STEP);
        std::thread::sleep(chunk);
        remaining -= chunk;
    }
    !cancellation.is_cancelled()
}

fn copy_with_buffer(source: &Path, dest: &Path) -> std::io::Result<u64> {
    let mut src_file = fs::File::open(source)?;
    let mut dest_file = fs::File::create(dest)?;
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let read = src_file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        dest_file.write_all(&buffer[..read])?;
        total += read as u64;
    }
    dest_file.flush()?;

    if let Ok(modified) = src_file.metadata().and_then(|m| m.modified()) {
        let _ = dest_file.set_modified(modified);
    }
    Ok(total)
}

/// Tries `rename` first; falls back to copy-then-delete on a cross-device
/// error (`EXDEV`, errno 18), per spec.md §4.5.1 step 3.
fn move_file(source: &Path, dest: &Path) -> std::io::Result<u64> {
    match fs::rename(source, dest) {
        Ok(()) => fs::metadata(dest).map(|m| m.len()),
        Err(e) if e.raw_os_error() == Some(18) => {
            let bytes = copy_with_buffer(source, dest)?;
            fs::remove_file(source)?;
            Ok(bytes)
        }
        Err(e) => Err(e),
    }
}

/// Computes a related file's destination by replacing the main
/// destination's stem with the related file's own filename suffix
/// (everything after its double-extension-aware stem), preserving
/// whatever extension(s) it originally had (spec.md §4.5.1 step 4).
fn related_destination(main_planned_path: &Path, related: &SourceFile) -> PathBuf {
    let main_dest_stem = main_planned_path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();

    let related_filename = related.path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let related_stem = related.stem();

    let suffix = if related_filename.len() >= related_stem.len()
        && related_filename[..related_stem.len()].eq_ignore_ascii_case(&related_stem)
    {
        related_filename[related_stem.len()..].to_string()
    } else {
        related.ext_with_dot()
    };

    main_planned_path.parent().unwrap_or_else(|| Path::new("")).join(format!("{main_dest_stem}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn related_destination_preserves_double_extension() {
        let main_planned = PathBuf::from("/dst/2023/06/A-1.jpg");
        let related = SourceFile { path: PathBuf::from("/src/A.jpg.xmp"), kind: crate::source_file::FileKind::SidecarXmp };
        let result = related_destination(&main_planned, &related);
        assert_eq!(result, PathBuf::from("/dst/2023/06/A-1.jpg.xmp"));
    }

    #[test]
    fn classify_error_treats_interrupted_as_transient() {
        let err = std::io::Error::from(std::io::ErrorKind::Interrupted);
        assert_eq!(classify_error(&err), ErrorClass::Transient);
    }

    #[test]
    fn classify_error_treats_not_found_as_fatal() {
        let err = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(classify_error(&err), ErrorClass::Fatal);
    }

    #[test]
    fn backoff_duration_stays_within_jitter_bounds() {
        let mut rng = rand::thread_rng();
        for attempt in 0..3 {
            let d = backoff_duration(attempt, &mut rng);
            let base = BACKOFF_BASE_MS[attempt as usize] as f64;
            assert!(d.as_millis() as f64 <= base * 1.2 + 1.0);
            assert!(d.as_millis() as f64 >= base * 0.8 - 1.0);
        }
    }

    #[test]
    fn ensure_dir_logged_emits_entry_only_on_first_creation() {
        let dir = tempfile::TempDir::new().unwrap();
        let nested = dir.path().join("2023").join("06");

        let first = ensure_dir_logged(&nested).unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().op, TxOp::DirectoryCreate);
        assert!(nested.is_dir());

        let second = ensure_dir_logged(&nested).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn execute_emits_file_started_before_file_completed() {
        use crate::metadata::{EnrichedFile, FileMetadata};
        use crate::source_file::FileKind;
        use std::sync::{Arc, Mutex};

        let dir = tempfile::TempDir::new().unwrap();
        let source_path = dir.path().join("a.jpg");
        std::fs::write(&source_path, b"hello").unwrap();
        let dest_path = dir.path().join("out").join("a.jpg");

        let source = SourceFile { path: source_path, kind: FileKind::StillImage };
        let file = EnrichedFile { source, metadata: FileMetadata::blank(), related: Vec::new() };
        let plan = DestinationPlan { file, planned_path: dest_path, collision_action: CollisionAction::Write };

        let config = ExecutorConfig {
            parallelism: 1,
            mode: OperationMode::Copy,
            log_path: dir.path().join("log.json"),
            config_snapshot: serde_json::json!({}),
        };

        let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let events_for_callback = events.clone();
        let progress: Box<dyn FnMut(ProgressEvent) + Send> =
            Box::new(move |event| events_for_callback.lock().unwrap().push(event));

        let cancellation = CancellationToken::new();
        let result = execute(vec![plan], &config, &cancellation, Some(progress)).unwrap();
        assert_eq!(result.processed, 1);

        let events = events.lock().unwrap();
        let started = events.iter().position(|e| matches!(e, ProgressEvent::FileStarted { .. }));
        let completed = events.iter().position(|e| matches!(e, ProgressEvent::FileCompleted { .. }));
        assert!(started.is_some(), "ProgressEvent::FileStarted was never emitted");
        assert!(started.unwrap() < completed.unwrap(), "FileStarted must precede FileCompleted");
    }
}
