//! # PhotoCopy CLI
//!
//! Command-line interface for PhotoCopy, a photo organizer that copies,
//! moves, or catalogs media files from a source tree into a destination
//! tree laid out according to a user-supplied path template.
//!
//! This binary provides access to the four user-visible verbs the core
//! implements (`copy`/`move`, `scan`, `validate`, `rollback`); argument
//! parsing, configuration-file loading, and console rendering live here
//! because they are explicitly out of scope for `photocopy-core`.
//!
//! All commands output JSON to stdout when `--json` is passed or stdout
//! is not a TTY; otherwise they print human-readable progress.

use clap::{Args, Parser, Subcommand, ValueEnum};
use photocopy_core::commands::{self, EnumerationConfig, Validator};
use photocopy_core::executor::{CancellationToken, OperationMode};
use photocopy_core::geocode::GeocodeService;
use photocopy_core::metadata::{EnrichmentConfig, SidecarMergePolicy};
use photocopy_core::planner::{CollisionPolicy, PathCasing, PlannerConfig};
use photocopy_core::{OperationResponse, PhotoCopyError, ProgressEvent, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;
use time::OffsetDateTime;

// ============================================================================
// Output Format
// ============================================================================

/// Output format mode for CLI commands.
#[derive(Clone, Copy, Debug)]
enum OutputFormat {
    /// Human-readable progress output with real-time feedback.
    Human,
    /// JSON output (silent until completion).
    Json,
}

/// Determines output format based on `--json` and TTY detection: if
/// `--json` is explicitly set, use JSON; otherwise auto-detect (human if
/// stdout is a TTY, JSON if piped).
fn determine_output_format(json_flag: bool) -> OutputFormat {
    if json_flag {
        OutputFormat::Json
    } else if atty::is(atty::Stream::Stdout) {
        OutputFormat::Human
    } else {
        OutputFormat::Json
    }
}

// ============================================================================
// Value Enums for Type-Safe Options
// ============================================================================

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CollisionArg {
    SkipExisting,
    Overwrite,
    Suffix,
    ReuseIfEqual,
    SkipDuplicates,
}

impl From<CollisionArg> for CollisionPolicy {
    fn from(value: CollisionArg) -> Self {
        match value {
            CollisionArg::SkipExisting => CollisionPolicy::SkipExisting,
            CollisionArg::Overwrite => CollisionPolicy::Overwrite,
            CollisionArg::Suffix => CollisionPolicy::Suffix,
            CollisionArg::ReuseIfEqual => CollisionPolicy::ReuseIfEqual,
            CollisionArg::SkipDuplicates => CollisionPolicy::SkipDuplicates,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CasingArg {
    Preserve,
    Lower,
    Title,
}

impl From<CasingArg> for PathCasing {
    fn from(value: CasingArg) -> Self {
        match value {
            CasingArg::Preserve => PathCasing::Preserve,
            CasingArg::Lower => PathCasing::Lower,
            CasingArg::Title => PathCasing::Title,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SidecarMergeArg {
    EmbeddedFirst,
    SidecarFirst,
    MergePreferEmbedded,
}

impl From<SidecarMergeArg> for SidecarMergePolicy {
    fn from(value: SidecarMergeArg) -> Self {
        match value {
            SidecarMergeArg::EmbeddedFirst => SidecarMergePolicy::EmbeddedFirst,
            SidecarMergeArg::SidecarFirst => SidecarMergePolicy::SidecarFirst,
            SidecarMergeArg::MergePreferEmbedded => SidecarMergePolicy::MergePreferEmbedded,
        }
    }
}

// ============================================================================
// Top-Level CLI Structure
// ============================================================================

/// PhotoCopy — a local-first photo organizer.
///
/// Copies, moves, or catalogs photos, videos, and their sidecars from a
/// source tree into a destination tree laid out by a path template driven
/// by each file's date, GPS-derived location, and camera attributes.
/// Source files are only ever read, never mutated.
#[derive(Parser)]
#[command(
    name = "photocopy",
    version,
    about = "Organize photos and videos by date and location",
    long_about = "PhotoCopy copies, moves, or catalogs media files from a source tree into\n\
                  a destination tree laid out by a user-supplied path template.\n\n\
                  Dates come from EXIF, sidecars, or filesystem timestamps; locations are\n\
                  resolved from embedded GPS against a reverse-geocoding gazetteer. All\n\
                  processing happens locally; source files are never modified.",
    after_help = "EXAMPLES:\n  \
                  photocopy copy ~/Photos dst --template \"{year}/{month}/{name}{ext}\"\n  \
                  photocopy move ~/Photos dst --template \"{country}/{city:Unknown}/{name}{ext}\" --gazetteer geo/allCountries.txt\n  \
                  photocopy scan ~/Photos\n  \
                  photocopy validate ~/Photos --template \"{year}/{name}{ext}\" --require-date\n  \
                  photocopy rollback --list ~/.photocopy/logs\n  \
                  photocopy rollback ~/.photocopy/logs/transaction-2023....json --yes"
)]
struct CliArgs {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Copy files into a destination tree, leaving the source intact.
    Copy(CopyMoveArgs),
    /// Move files into a destination tree, removing them from the source.
    Move(CopyMoveArgs),
    /// Enumerate and enrich a source tree without writing anything.
    Scan(ScanArgs),
    /// Run validators over a source tree and a template without writing.
    Validate(ValidateArgs),
    /// List or replay a transaction log.
    Rollback(RollbackArgs),
}

// ============================================================================
// Shared argument groups
// ============================================================================

#[derive(Args)]
struct EnumerationArgs {
    /// Disable recursive directory traversal (only the top-level directory
    /// is scanned).
    #[arg(long)]
    no_recursive: bool,

    /// Comma-separated glob patterns to include (e.g. "*.jpg,*.heic").
    #[arg(long, value_name = "PATTERNS")]
    include: Option<String>,

    /// Comma-separated glob patterns to exclude (e.g. "**/.*/**").
    #[arg(long, value_name = "PATTERNS")]
    exclude: Option<String>,
}

impl EnumerationArgs {
    fn resolve(&self) -> EnumerationConfig {
        EnumerationConfig {
            recursive: !self.no_recursive,
            include: parse_patterns(self.include.as_deref()),
            exclude: parse_patterns(self.exclude.as_deref()),
        }
    }
}

#[derive(Args)]
struct EnrichmentArgs {
    /// Path to a GeoNames-formatted gazetteer file, for GPS reverse
    /// geocoding. Without it, located files report `unknown_reason =
    /// GeocodingFailed`.
    #[arg(long, value_name = "PATH")]
    gazetteer: Option<PathBuf>,

    /// Gazetteer cell-cache budget in MiB (default 100).
    #[arg(long, value_name = "MB", default_value_t = 100)]
    cache_budget_mb: u64,

    /// How embedded EXIF and sidecar fields combine when both are present.
    #[arg(long, value_enum, default_value = "embedded-first")]
    sidecar_merge: SidecarMergeArg,

    /// Disable the streaming SHA-256 checksum step.
    #[arg(long)]
    no_checksum: bool,

    /// Companion-GPS time window in minutes (0 disables the cross-file
    /// GPS-proximity enricher).
    #[arg(long, value_name = "MINUTES", default_value_t = 0)]
    gps_window_minutes: u32,

    /// Resolve `{country}` to the boundary index's full country name
    /// instead of its two-letter ISO code.
    #[arg(long)]
    use_full_country_names: bool,
}

impl EnrichmentArgs {
    fn resolve(&self) -> Result<EnrichmentConfig> {
        let geocoder = match &self.gazetteer {
            Some(path) => {
                let budget_bytes = self.cache_budget_mb.saturating_mul(1024 * 1024);
                Some(Arc::new(GeocodeService::open(path, budget_bytes, self.use_full_country_names)?))
            }
            None => None,
        };
        Ok(EnrichmentConfig {
            sidecar_merge_policy: self.sidecar_merge.into(),
            checksum_enabled: !self.no_checksum,
            gps_proximity_window_minutes: self.gps_window_minutes,
            geocoder,
        })
    }
}

// ============================================================================
// copy / move
// ============================================================================

#[derive(Args)]
struct CopyMoveArgs {
    /// Source directory to enumerate.
    source: PathBuf,

    /// Destination root directory the template expands underneath.
    destination: PathBuf,

    /// Destination path template (e.g. "{year}/{month}/{name}{ext}").
    #[arg(long, value_name = "TEMPLATE")]
    template: String,

    /// How path segments are cased after token substitution.
    #[arg(long, value_enum, default_value = "preserve")]
    casing: CasingArg,

    /// Collision policy when the planned destination already exists.
    #[arg(long, value_enum, default_value = "suffix")]
    collision: CollisionArg,

    /// Format string inserted between stem and extension by the `suffix`
    /// collision policy; must contain the literal token "{number}".
    #[arg(long, value_name = "FORMAT", default_value = "-{number}")]
    duplicates_format: String,

    /// Number of parallel worker threads (default: logical CPU count).
    #[arg(long, value_name = "N")]
    parallelism: Option<usize>,

    /// Directory transaction logs are written under (default:
    /// `~/.photocopy/logs`).
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(flatten)]
    enumeration: EnumerationArgs,

    #[command(flatten)]
    enrichment: EnrichmentArgs,

    /// Force JSON output even when stdout is a TTY.
    #[arg(long)]
    json: bool,
}

fn validate_copy_move_args(args: &CopyMoveArgs) -> Result<()> {
    commands::require_template_resolves(&args.template)
        .map_err(|message| PhotoCopyError::InvalidArguments { message })?;
    if !args.duplicates_format.contains("{number}") {
        return Err(PhotoCopyError::InvalidArguments {
            message: format!("duplicates-format '{}' must contain the literal token {{number}}", args.duplicates_format),
        });
    }
    Ok(())
}

fn print_progress(base_path: &Path, event: ProgressEvent) {
    if let ProgressEvent::FileCompleted { path, success, error, .. } = event {
        let display_path = Path::new(&path).strip_prefix(base_path).unwrap_or(Path::new(&path));
        if success {
            println!("{} ... ok", display_path.display());
        } else {
            println!("{} ... FAILED {}", display_path.display(), error.as_deref().unwrap_or("unknown error"));
        }
    }
}

/// Runs `copy` or `move`. Returns the process exit code per spec.md §6.1:
/// 0 on success, 1 if any file failed, 2 on cancellation (surfaced as a
/// `PhotoCopyError::Cancelled` and handled by `main`'s top-level match).
fn handle_copy_move(args: CopyMoveArgs, mode: OperationMode) -> Result<i32> {
    validate_copy_move_args(&args)?;

    let parallelism = args.parallelism.unwrap_or_else(num_cpus::get);
    let log_dir = args.log_dir.clone().unwrap_or_else(default_log_dir);
    let log_path = log_dir.join(format!("transaction-{}-{}.json", timestamp_for_filename(), std::process::id()));

    let config = commands::CopyMoveConfig {
        enumeration: args.enumeration.resolve(),
        enrichment: args.enrichment.resolve()?,
        planner: PlannerConfig {
            template: args.template.clone(),
            casing: args.casing.into(),
            collision_policy: args.collision.into(),
            duplicates_format: args.duplicates_format.clone(),
        },
        mode,
        destination_root: args.destination.clone(),
        parallelism,
        log_path,
    };

    let output_format = determine_output_format(args.json);
    let cancellation = CancellationToken::new();
    let start = OffsetDateTime::now_utc();

    let progress: Option<Box<dyn FnMut(ProgressEvent) + Send>> = match output_format {
        OutputFormat::Human => {
            let base_path = args.source.clone();
            Some(Box::new(move |event| print_progress(&base_path, event)))
        }
        OutputFormat::Json => None,
    };

    let result = commands::copy_or_move(&args.source, &config, &cancellation, progress)?;
    let end = OffsetDateTime::now_utc();

    match output_format {
        OutputFormat::Human => {
            let duration_secs = (end - start).whole_milliseconds() as f64 / 1000.0;
            println!("\nProcessed {} files in {:.2}s", result.processed, duration_secs);
            println!("  Failed: {}", result.failed);
            println!("  Skipped: {}", result.skipped);
            println!("  Bytes: {}", result.bytes);
        }
        OutputFormat::Json => {
            let response = OperationResponse::new(result_for_output(&result), start, end);
            println!("{}", serde_json::to_string_pretty(&response)?);
            return Ok(if result.failed > 0 { 1 } else { 0 });
        }
    }

    Ok(if result.failed > 0 { 1 } else { 0 })
}

#[derive(Serialize)]
struct CopyResultOutput<'a> {
    processed: usize,
    failed: usize,
    skipped: usize,
    bytes: u64,
    errors: &'a [photocopy_core::CopyError],
    errors_truncated: usize,
}

fn result_for_output(result: &photocopy_core::CopyResult) -> CopyResultOutput<'_> {
    CopyResultOutput {
        processed: result.processed,
        failed: result.failed,
        skipped: result.skipped,
        bytes: result.bytes,
        errors: &result.errors,
        errors_truncated: result.errors_truncated,
    }
}

// ============================================================================
// scan
// ============================================================================

#[derive(Args)]
struct ScanArgs {
    /// Source directory to enumerate.
    source: PathBuf,

    #[command(flatten)]
    enumeration: EnumerationArgs,

    #[command(flatten)]
    enrichment: EnrichmentArgs,

    /// Force JSON output even when stdout is a TTY.
    #[arg(long)]
    json: bool,
}

/// Runs `scan`. Always exits 0 unless the core reports cancellation or
/// invalid arguments (spec.md §6.1), both surfaced via `PhotoCopyError`.
fn handle_scan(args: ScanArgs) -> Result<i32> {
    let enumeration = args.enumeration.resolve();
    let enrichment = args.enrichment.resolve()?;
    let output_format = determine_output_format(args.json);
    let cancellation = CancellationToken::new();
    let start = OffsetDateTime::now_utc();

    let progress: Option<Box<dyn FnMut(ProgressEvent)>> = match output_format {
        OutputFormat::Human => {
            let base_path = args.source.clone();
            Some(Box::new(move |event| print_progress(&base_path, event)))
        }
        OutputFormat::Json => None,
    };

    let report = commands::scan(&args.source, &enumeration, &enrichment, &cancellation, progress)?;
    let end = OffsetDateTime::now_utc();

    match output_format {
        OutputFormat::Human => {
            let duration_secs = (end - start).whole_milliseconds() as f64 / 1000.0;
            println!("\nScanned {} files in {:.2}s", report.total_files, duration_secs);
            println!("  With date: {}", report.with_date);
            println!("  With location: {}", report.with_location);
            println!("  Unknown: {}", report.unknown);
        }
        OutputFormat::Json => {
            let response = OperationResponse::new(report, start, end);
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(0)
}

// ============================================================================
// validate
// ============================================================================

#[derive(Args)]
struct ValidateArgs {
    /// Source directory to enumerate.
    source: PathBuf,

    /// Destination path template to validate, in addition to any
    /// per-file validators selected below.
    #[arg(long, value_name = "TEMPLATE")]
    template: String,

    /// Fail files with no resolvable capture date.
    #[arg(long)]
    require_date: bool,

    /// Fail files with no resolvable location.
    #[arg(long)]
    require_location: bool,

    #[command(flatten)]
    enumeration: EnumerationArgs,

    #[command(flatten)]
    enrichment: EnrichmentArgs,

    /// Force JSON output even when stdout is a TTY.
    #[arg(long)]
    json: bool,
}

/// Runs `validate`. Exit codes per spec.md §6.1: 0 if every file passed
/// every selected validator, 4 if any failed (reported, not an `Err`), 5
/// on I/O errors (surfaced as `PhotoCopyError::Io`).
fn handle_validate(args: ValidateArgs) -> Result<i32> {
    let enumeration = args.enumeration.resolve();
    let enrichment = args.enrichment.resolve()?;
    let cancellation = CancellationToken::new();

    let mut validators = Vec::new();
    if args.require_date {
        validators.push(Validator { name: "require_date", check: commands::require_date });
    }
    if args.require_location {
        validators.push(Validator { name: "require_location", check: commands::require_location });
    }

    let start = OffsetDateTime::now_utc();
    let report = commands::validate(&args.source, &args.template, &enumeration, &enrichment, &validators, &cancellation)?;
    let end = OffsetDateTime::now_utc();

    let output_format = determine_output_format(args.json);
    match output_format {
        OutputFormat::Human => {
            println!("Validated {} files: {} passed, {} failed", report.total_files, report.passed, report.failed);
            for failure in &report.failures {
                println!("  {} [{}]: {}", failure.path, failure.validator, failure.message);
            }
        }
        OutputFormat::Json => {
            let response = OperationResponse::new(&report, start, end);
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(if report.failed > 0 { 4 } else { 0 })
}

// ============================================================================
// rollback
// ============================================================================

#[derive(Args)]
struct RollbackArgs {
    /// Transaction-log path to roll back, or (with `--list`) the log
    /// directory to enumerate.
    path: PathBuf,

    /// List transaction logs under `path` instead of rolling one back.
    #[arg(long)]
    list: bool,

    /// Skip the interactive confirmation prompt.
    #[arg(long)]
    yes: bool,

    /// Force JSON output even when stdout is a TTY.
    #[arg(long)]
    json: bool,
}

/// Runs `rollback` (or `--list`). Exit codes per spec.md §6.1: 0 on full
/// rollback or list, 6 on partial rollback, 3 invalid args, 5 I/O errors.
/// Declining the interactive confirmation returns 0 without touching
/// files (spec.md §4.5.5).
fn handle_rollback(args: RollbackArgs) -> Result<i32> {
    let output_format = determine_output_format(args.json);

    if args.list {
        let summaries = commands::rollback_list(&args.path)?;
        match output_format {
            OutputFormat::Human => {
                for summary in &summaries {
                    println!(
                        "{}  op={}  started={}  status={}  files={}",
                        summary.path.display(),
                        summary.operation_id,
                        summary.started_at,
                        summary.status,
                        summary.file_count
                    );
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
        }
        return Ok(0);
    }

    if !args.yes && !confirm_rollback(&args.path) {
        return Ok(0);
    }

    let outcome = commands::rollback(&args.path)?;
    match output_format {
        OutputFormat::Human => {
            println!("Restored {} files ({} failed)", outcome.files_restored, outcome.files_failed);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
    }

    Ok(if outcome.partial { 6 } else { 0 })
}

/// Prompts on stdin/stdout for rollback confirmation (spec.md §4.5.5:
/// "interactive unless `--yes` was passed").
fn confirm_rollback(log_path: &Path) -> bool {
    use std::io::{self, Write};
    print!("Roll back {}? [y/N] ", log_path.display());
    let _ = io::stdout().flush();
    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

// ============================================================================
// Shared helpers
// ============================================================================

fn parse_patterns(patterns: Option<&str>) -> Vec<String> {
    match patterns {
        Some(s) => s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect(),
        None => Vec::new(),
    }
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".photocopy").join("logs")
}

fn timestamp_for_filename() -> String {
    let now = OffsetDateTime::now_utc();
    let format = time::format_description::parse("[year][month][day]T[hour][minute][second]Z")
        .expect("static format description is valid");
    now.format(&format).unwrap_or_else(|_| "unknown".to_string())
}

// ============================================================================
// Entry point
// ============================================================================

fn run_command(cmd: Cmd) -> Result<i32> {
    match cmd {
        Cmd::Copy(args) => handle_copy_move(args, OperationMode::Copy),
        Cmd::Move(args) => handle_copy_move(args, OperationMode::Move),
        Cmd::Scan(args) => handle_scan(args),
        Cmd::Validate(args) => handle_validate(args),
        Cmd::Rollback(args) => handle_rollback(args),
    }
}

/// Parses CLI arguments, runs the requested command, and handles errors.
/// On success, exits with the code the handler computed; on an `Err`,
/// prints the structured error as JSON to stderr and exits with
/// `PhotoCopyError::exit_code()`.
fn main() {
    env_logger::init();
    let args = CliArgs::parse();

    match run_command(args.cmd) {
        Ok(code) => exit(code),
        Err(e) => {
            let exit_code = e.exit_code();
            let error_output = serde_json::to_string_pretty(&e).unwrap_or_else(|_| {
                serde_json::to_string_pretty(&serde_json::json!({ "error": e.to_string(), "exit_code": exit_code }))
                    .unwrap_or_else(|_| format!("{{\"error\":\"{}\"}}", e))
            });
            eprintln!("{}", error_output);
            exit(exit_code);
        }
    }
}
