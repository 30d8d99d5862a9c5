//! # PhotoCopy Core Library
//!
//! Core library for PhotoCopy, a photo organizer that copies, moves, or
//! catalogs media files from a source tree into a destination tree laid out
//! according to a user-supplied path template driven by each file's
//! metadata (date taken, GPS-derived location, camera attributes).
//!
//! ## Architecture
//!
//! The core is a directed pipeline of cooperating subsystems:
//!
//! - **geohash** - base-32 geohash encode/decode, neighbors, Haversine, point-in-polygon
//! - **geocode** - reverse-geocoding engine (gazetteer stream index + country boundaries)
//! - **metadata** - ordered enrichment pipeline producing `FileMetadata` per file
//! - **planner** - destination template expansion and duplicate/collision resolution
//! - **executor** - parallel copy/move execution, retry policy, transaction log, rollback
//! - **commands** - thin orchestrators binding the above into the four user-visible verbs
//!
//! ## Core Philosophy
//!
//! - **Immutable originals** - source files are only ever read, never mutated
//! - **Local-first** - no network access, no uploads
//! - **Crash-safe** - every destructive operation is logged before it is considered durable

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use time::OffsetDateTime;

pub mod checksum;
pub mod commands;
pub mod executor;
pub mod geocode;
pub mod geohash;
pub mod metadata;
pub mod planner;
pub mod source_file;

pub use executor::{CopyError, CopyResult};
pub use metadata::{Coordinates, EnrichedFile, FileDateTime, FileMetadata, LocationData};
pub use planner::{CollisionAction, DestinationPlan};
pub use source_file::{FileKind, SourceFile};

/// Standard result type for all PhotoCopy operations.
pub type Result<T> = std::result::Result<T, PhotoCopyError>;

/// RFC3339-formatted timestamp string, used wherever spec.md calls for an
/// "ISO-8601 with TZ" field (transaction log records, operation envelopes).
pub type Timestamp = String;

/// Formats the given instant as RFC3339. PhotoCopy never feeds this a value
/// outside the representable range, so formatting failure is treated as an
/// internal bug rather than a recoverable error.
pub fn format_timestamp(at: OffsetDateTime) -> Timestamp {
    at.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

// ============================================================================
// Progress Event for Real-Time Callbacks
// ============================================================================

/// Progress event emitted during long-running operations for real-time
/// progress tracking. The executor and scan commands accept an optional
/// callback that receives these events; it is the caller's (CLI's)
/// responsibility to render them, never the core's.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A file entered the pipeline.
    FileStarted { path: String },
    /// A file finished processing.
    FileCompleted {
        path: String,
        success: bool,
        error: Option<String>,
        bytes: Option<u64>,
    },
    /// Aggregate counters changed; emitted periodically by the executor.
    Tick {
        files_processed: usize,
        files_failed: usize,
        files_skipped: usize,
        bytes_processed: u64,
        current_path: Option<String>,
    },
}

// ============================================================================
// Common Response Envelope
// ============================================================================

/// Generic wrapper adding timing metadata to any operation's result payload.
/// Every CLI-facing verb wraps its result this way so JSON output has a
/// consistent envelope regardless of which verb produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse<T> {
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub duration_ms: u64,
    pub data: T,
}

impl<T> OperationResponse<T> {
    pub fn new(data: T, started_at: OffsetDateTime, finished_at: OffsetDateTime) -> Self {
        let duration_ms = (finished_at - started_at).whole_milliseconds().max(0) as u64;
        Self {
            started_at: format_timestamp(started_at),
            finished_at: format_timestamp(finished_at),
            duration_ms,
            data,
        }
    }
}

// ============================================================================
// Structured Error Type with Exit Codes
// ============================================================================

/// Structured error type for all PhotoCopy operations, grouped per spec.md
/// §7's five error kinds. Exit codes follow spec.md §6.1's per-verb table;
/// `exit_code()` returns the code appropriate when this error is the sole
/// and final outcome of a run (individual per-file failures inside a batch
/// do not construct this type — they are accumulated in `CopyError` lists
/// instead and never abort the run).
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PhotoCopyError {
    /// Configuration/argument problems caught before any I/O (exit 3).
    #[serde(rename = "invalid_arguments")]
    InvalidArguments { message: String },

    /// Filesystem failures that are not retry-classified as transient, or
    /// that persisted after retries were exhausted (exit 5).
    #[serde(rename = "io")]
    Io { message: String },

    /// A file failed validation in `validate`/`scan` (exit 4).
    #[serde(rename = "validation")]
    Validation { message: String },

    /// A coordinate lookup returned nothing, or the geocoder was
    /// uninitialized. Not a hard failure on its own; surfaced for callers
    /// that want to treat it as fatal (e.g. `validate --strict`).
    #[serde(rename = "geocoding")]
    Geocoding { message: String },

    /// The run was cancelled (exit 2).
    #[serde(rename = "cancelled")]
    Cancelled { message: String },

    /// Unexpected programmer errors: index file corruption, boundary-file
    /// magic mismatch, and similar invariant violations. Always aborts.
    #[serde(rename = "internal")]
    Internal { message: String },
}

impl fmt::Display for PhotoCopyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhotoCopyError::InvalidArguments { message } => {
                write!(f, "invalid arguments: {}", message)
            }
            PhotoCopyError::Io { message } => write!(f, "I/O error: {}", message),
            PhotoCopyError::Validation { message } => write!(f, "validation error: {}", message),
            PhotoCopyError::Geocoding { message } => write!(f, "geocoding error: {}", message),
            PhotoCopyError::Cancelled { message } => write!(f, "cancelled: {}", message),
            PhotoCopyError::Internal { message } => write!(f, "internal error: {}", message),
        }
    }
}

impl std::error::Error for PhotoCopyError {}

impl From<std::io::Error> for PhotoCopyError {
    fn from(err: std::io::Error) -> Self {
        PhotoCopyError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for PhotoCopyError {
    fn from(err: serde_json::Error) -> Self {
        PhotoCopyError::Validation {
            message: format!("JSON error: {}", err),
        }
    }
}

impl From<walkdir::Error> for PhotoCopyError {
    fn from(err: walkdir::Error) -> Self {
        PhotoCopyError::Io {
            message: format!("directory traversal error: {}", err),
        }
    }
}

impl PhotoCopyError {
    /// Returns the process exit code for this error per spec.md §6.1.
    pub fn exit_code(&self) -> i32 {
        match self {
            PhotoCopyError::InvalidArguments { .. } => 3,
            PhotoCopyError::Io { .. } => 5,
            PhotoCopyError::Validation { .. } => 4,
            PhotoCopyError::Geocoding { .. } => 4,
            PhotoCopyError::Cancelled { .. } => 2,
            PhotoCopyError::Internal { .. } => 4,
        }
    }
}

/// A path paired with the error describing why an operation on it failed.
/// Used by commands that accumulate per-file failures without aborting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathError {
    pub path: PathBuf,
    pub message: String,
}
