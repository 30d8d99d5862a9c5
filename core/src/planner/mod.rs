//! Destination planner (spec.md §4.4): template expansion producing a
//! target path, followed by collision resolution.

pub mod collision;
pub mod template;

pub use collision::{CollisionPolicy, DuplicateTracker, DEFAULT_DUPLICATES_FORMAT};
pub use template::PathCasing;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::metadata::EnrichedFile;
use crate::{PhotoCopyError, Result};

/// The collision-resolution outcome for a planned write, per spec.md §3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollisionAction {
    Write,
    Skip,
    Overwrite,
    SuffixedWrite,
    ReuseExisting,
}

/// A computed destination for one enriched file. Invariant: `planned_path`
/// contains no unresolved template tokens (guaranteed by
/// [`template::expand`]'s construction).
#[derive(Debug)]
pub struct DestinationPlan {
    pub file: EnrichedFile,
    pub planned_path: PathBuf,
    pub collision_action: CollisionAction,
}

/// Fully-resolved planner configuration (configuration-file loading and
/// layering is out of scope for the core).
pub struct PlannerConfig {
    pub template: String,
    pub casing: PathCasing,
    pub collision_policy: CollisionPolicy,
    pub duplicates_format: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            template: "{year}/{month}/{name}{ext}".to_string(),
            casing: PathCasing::Preserve,
            collision_policy: CollisionPolicy::Suffix,
            duplicates_format: DEFAULT_DUPLICATES_FORMAT.to_string(),
        }
    }
}

/// Computes the destination path for `file` under `destination_root`,
/// expanding the template and resolving any collision at that path.
/// Consumes `file` since the plan owns it from here on (spec.md §3.1).
pub fn plan_destination(
    file: EnrichedFile,
    destination_root: &Path,
    source_relative_dir: Option<&str>,
    config: &PlannerConfig,
    tracker: &mut DuplicateTracker,
) -> Result<DestinationPlan> {
    let expanded = template::expand(&config.template, &file, source_relative_dir, config.casing)
        .map_err(|e| PhotoCopyError::InvalidArguments { message: e.to_string() })?;

    let candidate_path = destination_root.join(expanded);
    let (planned_path, collision_action) = collision::resolve(
        &candidate_path,
        config.collision_policy,
        &config.duplicates_format,
        file.metadata.checksum.as_deref(),
        tracker,
    )?;

    Ok(DestinationPlan { file, planned_path, collision_action })
}

/// Validates a template and a `duplicates_format` string without planning
/// any file. Used by argument validators (out of scope for the core
/// itself, but exposed so the CLI layer can call into the same logic
/// rather than re-implementing it).
pub fn validate_template(template: &str) -> Result<()> {
    template::validate(template).map_err(|e| PhotoCopyError::InvalidArguments { message: e.to_string() })
}
