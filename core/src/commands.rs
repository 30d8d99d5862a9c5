//! Thin orchestrators binding geohash/geocode/metadata/planner/executor
//! together into the four user-visible verbs (spec.md §2 component F,
//! §6.1). Argument parsing, configuration loading, and console rendering
//! are all out of scope and live in the CLI layer.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::executor::txlog::{self, LogSummary, RollbackOutcome};
use crate::executor::{self, CancellationToken, CopyResult, ExecutorConfig, OperationMode};
use crate::metadata::{enrich_batch, EnrichedFile, EnrichmentConfig, UnknownReason};
use crate::planner::{plan_destination, DuplicateTracker, PlannerConfig};
use crate::source_file::SourceFile;
use crate::{PhotoCopyError, ProgressEvent, Result};

/// Glob-based include/exclude filtering shared by `scan`, `validate`, and
/// `copy`/`move` (reused verbatim from the directory-traversal pattern:
/// excludes are applied before includes).
pub struct EnumerationConfig {
    pub recursive: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for EnumerationConfig {
    fn default() -> Self {
        EnumerationConfig { recursive: true, include: Vec::new(), exclude: Vec::new() }
    }
}

fn build_globset(patterns: &[String]) -> Result<globset::GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| PhotoCopyError::InvalidArguments { message: format!("invalid glob '{}': {}", pattern, e) })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| PhotoCopyError::InvalidArguments { message: e.to_string() })
}

/// Enumerates source files under `root`, honoring recursion and
/// include/exclude globs. Excludes are applied before includes; an empty
/// include list matches everything.
pub fn enumerate_source_files(root: &Path, config: &EnumerationConfig) -> Result<Vec<SourceFile>> {
    let include_set = build_globset(&config.include)?;
    let exclude_set = build_globset(&config.exclude)?;

    let walker = if config.recursive { WalkDir::new(root) } else { WalkDir::new(root).max_depth(1) };

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);

        if !config.exclude.is_empty() && exclude_set.is_match(relative) {
            continue;
        }
        if !config.include.is_empty() && !include_set.is_match(relative) {
            continue;
        }
        files.push(SourceFile::from_path(path.to_path_buf()));
    }
    Ok(files)
}

// ============================================================================
// scan
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedFileReport {
    pub path: String,
    pub kind: String,
    pub has_date: bool,
    pub has_location: bool,
    pub unknown_reason: UnknownReason,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ScanReport {
    pub files: Vec<ScannedFileReport>,
    pub total_files: usize,
    pub with_date: usize,
    pub with_location: usize,
    pub unknown: usize,
}

/// Enumerates and enriches every file under `source`, without planning or
/// performing any destination writes. Always succeeds unless cancelled or
/// given invalid arguments (spec.md §6.1: `scan` exits 0 unless
/// cancelled/invalid).
pub fn scan(
    source: &Path,
    enumeration: &EnumerationConfig,
    enrichment: &EnrichmentConfig,
    cancellation: &CancellationToken,
    mut progress: Option<Box<dyn FnMut(ProgressEvent)>>,
) -> Result<ScanReport> {
    let sources = enumerate_source_files(source, enumeration)?;
    let mut report = ScanReport { total_files: sources.len(), ..ScanReport::default() };

    let enriched = enrich_batch(sources, enrichment);

    for file in &enriched {
        if cancellation.is_cancelled() {
            return Err(PhotoCopyError::Cancelled { message: "scan cancelled".to_string() });
        }
        if let Some(cb) = progress.as_mut() {
            cb(ProgressEvent::FileCompleted {
                path: file.source.path.to_string_lossy().to_string(),
                success: true,
                error: None,
                bytes: None,
            });
        }

        let has_date = !file.metadata.datetime.is_unknown();
        let has_location = file.metadata.location.is_some();
        report.with_date += has_date as usize;
        report.with_location += has_location as usize;
        report.unknown += (file.metadata.unknown_reason != UnknownReason::None) as usize;

        report.files.push(ScannedFileReport {
            path: file.source.path.to_string_lossy().to_string(),
            kind: format!("{:?}", file.source.kind),
            has_date,
            has_location,
            unknown_reason: file.metadata.unknown_reason,
        });
    }

    Ok(report)
}

// ============================================================================
// validate
// ============================================================================

/// A capability-set validator (spec.md §9): `name` plus a predicate over
/// one enriched file.
pub struct Validator {
    pub name: &'static str,
    pub check: fn(&EnrichedFile) -> std::result::Result<(), String>,
}

pub fn require_date(file: &EnrichedFile) -> std::result::Result<(), String> {
    if file.metadata.datetime.is_unknown() {
        Err("no capture date could be determined".to_string())
    } else {
        Ok(())
    }
}

pub fn require_location(file: &EnrichedFile) -> std::result::Result<(), String> {
    if file.metadata.location.is_none() {
        Err("no location could be resolved".to_string())
    } else {
        Ok(())
    }
}

pub fn require_template_resolves(template: &str) -> std::result::Result<(), String> {
    crate::planner::validate_template(template).map_err(|e| e.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub path: String,
    pub validator: String,
    pub message: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub total_files: usize,
    pub passed: usize,
    pub failed: usize,
    pub failures: Vec<ValidationFailure>,
}

/// Runs `validators` over every enumerated and enriched file, recording
/// one failure per (file, validator) pair that does not pass. Returns
/// `Ok` with a non-empty `failures` list rather than an `Err`; the CLI
/// decides the exit code (4 on any validation failure, per spec.md §6.1).
pub fn validate(
    source: &Path,
    template: &str,
    enumeration: &EnumerationConfig,
    enrichment: &EnrichmentConfig,
    validators: &[Validator],
    cancellation: &CancellationToken,
) -> Result<ValidationReport> {
    require_template_resolves(template).map_err(|message| PhotoCopyError::InvalidArguments { message })?;

    let sources = enumerate_source_files(source, enumeration)?;
    let enriched = enrich_batch(sources, enrichment);

    let mut report = ValidationReport { total_files: enriched.len(), ..ValidationReport::default() };

    for file in &enriched {
        if cancellation.is_cancelled() {
            return Err(PhotoCopyError::Cancelled { message: "validate cancelled".to_string() });
        }
        let mut file_passed = true;
        for validator in validators {
            if let Err(message) = (validator.check)(file) {
                file_passed = false;
                report.failures.push(ValidationFailure {
                    path: file.source.path.to_string_lossy().to_string(),
                    validator: validator.name.to_string(),
                    message,
                });
            }
        }
        if file_passed {
            report.passed += 1;
        } else {
            report.failed += 1;
        }
    }

    Ok(report)
}

// ============================================================================
// copy / move
// ============================================================================

pub struct CopyMoveConfig {
    pub enumeration: EnumerationConfig,
    pub enrichment: EnrichmentConfig,
    pub planner: PlannerConfig,
    pub mode: OperationMode,
    pub destination_root: PathBuf,
    pub parallelism: usize,
    pub log_path: PathBuf,
}

/// Enumerates, enriches, plans, and executes every file under `source`,
/// returning the executor's aggregate result. This is the `copy`/`move`
/// verb's entire implementation; everything else is already handled by
/// the component modules.
pub fn copy_or_move(
    source: &Path,
    config: &CopyMoveConfig,
    cancellation: &CancellationToken,
    progress: Option<Box<dyn FnMut(ProgressEvent) + Send>>,
) -> Result<CopyResult> {
    let sources = enumerate_source_files(source, &config.enumeration)?;
    let enriched = enrich_batch(sources, &config.enrichment);

    let mut tracker = DuplicateTracker::new();
    let mut plans = Vec::with_capacity(enriched.len());
    for file in enriched {
        if cancellation.is_cancelled() {
            return Err(PhotoCopyError::Cancelled { message: "planning cancelled".to_string() });
        }
        let relative_dir = file
            .source
            .path
            .parent()
            .and_then(|p| p.strip_prefix(source).ok())
            .map(|p| p.to_string_lossy().to_string());
        let plan = plan_destination(file, &config.destination_root, relative_dir.as_deref(), &config.planner, &mut tracker)?;
        plans.push(plan);
    }

    let executor_config = ExecutorConfig {
        parallelism: config.parallelism,
        mode: config.mode,
        log_path: config.log_path.clone(),
        config_snapshot: serde_json::json!({
            "template": config.planner.template,
            "destination_root": config.destination_root.to_string_lossy(),
            "mode": format!("{:?}", config.mode),
        }),
    };

    executor::execute(plans, &executor_config, cancellation, progress)
}

// ============================================================================
// rollback
// ============================================================================

/// Lists transaction logs under `log_dir` (spec.md §4.5.5 `list` mode).
pub fn rollback_list(log_dir: &Path) -> Result<Vec<LogSummary>> {
    txlog::list_logs(log_dir)
}

/// Replays `log_path` in reverse, undoing every successfully-recorded
/// operation. Interactive confirmation is a CLI concern; by the time this
/// is called the operator has already agreed to proceed.
pub fn rollback(log_path: &Path) -> Result<RollbackOutcome> {
    txlog::rollback(log_path)
}
