//! Duplicate/collision resolution (spec.md §4.4.2): decides what action a
//! planned destination path should take when something is already there,
//! or when this run has already planned identical content elsewhere.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::checksum;
use crate::planner::CollisionAction;
use crate::{PhotoCopyError, Result};

/// Collision policy, as resolved from configuration (spec.md §4.4.2).
/// `skip_existing` and `overwrite` are mutually exclusive at the
/// configuration layer (out of scope here; the CLI's validators reject the
/// combination before the core ever sees it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionPolicy {
    SkipExisting,
    Overwrite,
    Suffix,
    ReuseIfEqual,
    SkipDuplicates,
}

/// Tracks content hashes of files already planned in this run, for the
/// `skip_duplicates` policy (spec.md §4.4.2).
#[derive(Debug, Default)]
pub struct DuplicateTracker {
    seen_hashes: HashSet<String>,
}

impl DuplicateTracker {
    pub fn new() -> Self {
        DuplicateTracker::default()
    }

    /// Returns `true` if `hash` was already recorded by an earlier call
    /// (meaning this content has already been planned once this run), and
    /// records it either way.
    fn check_and_record(&mut self, hash: &str) -> bool {
        !self.seen_hashes.insert(hash.to_string())
    }
}

/// Default suffix format, used when configuration left `duplicates_format`
/// unset.
pub const DEFAULT_DUPLICATES_FORMAT: &str = "-{number}";

/// Resolves a collision for `candidate_path`, returning the (possibly
/// adjusted) destination path and the action to take.
///
/// `source_checksum` must be `Some` for `reuse_if_equal` and
/// `skip_duplicates` to do anything meaningful; when checksums are
/// disabled those policies degrade to `suffix` and "never a duplicate"
/// respectively.
pub fn resolve(
    candidate_path: &Path,
    policy: CollisionPolicy,
    duplicates_format: &str,
    source_checksum: Option<&str>,
    tracker: &mut DuplicateTracker,
) -> Result<(PathBuf, CollisionAction)> {
    match policy {
        CollisionPolicy::SkipExisting => {
            if candidate_path.exists() {
                Ok((candidate_path.to_path_buf(), CollisionAction::Skip))
            } else {
                Ok((candidate_path.to_path_buf(), CollisionAction::Write))
            }
        }
        CollisionPolicy::Overwrite => {
            let action = if candidate_path.exists() { CollisionAction::Overwrite } else { CollisionAction::Write };
            Ok((candidate_path.to_path_buf(), action))
        }
        CollisionPolicy::Suffix => resolve_suffix(candidate_path, duplicates_format),
        CollisionPolicy::ReuseIfEqual => {
            if candidate_path.exists() {
                if let Some(source_hash) = source_checksum {
                    let dest_hash = checksum::sha256_file(candidate_path)?;
                    if &dest_hash == source_hash {
                        return Ok((candidate_path.to_path_buf(), CollisionAction::ReuseExisting));
                    }
                }
                resolve_suffix(candidate_path, duplicates_format)
            } else {
                Ok((candidate_path.to_path_buf(), CollisionAction::Write))
            }
        }
        CollisionPolicy::SkipDuplicates => {
            if let Some(hash) = source_checksum {
                if tracker.check_and_record(hash) {
                    return Ok((candidate_path.to_path_buf(), CollisionAction::Skip));
                }
            }
            if candidate_path.exists() {
                resolve_suffix(candidate_path, duplicates_format)
            } else {
                Ok((candidate_path.to_path_buf(), CollisionAction::Write))
            }
        }
    }
}

/// Inserts `duplicates_format` (which must contain the literal `{number}`
/// token) between the stem and extension, incrementing `number` from 1
/// until the candidate does not exist. Per the documented open-question
/// decision in DESIGN.md, numbers above 9 are **not** zero-padded.
fn resolve_suffix(candidate_path: &Path, duplicates_format: &str) -> Result<(PathBuf, CollisionAction)> {
    if !candidate_path.exists() {
        return Ok((candidate_path.to_path_buf(), CollisionAction::Write));
    }
    if !duplicates_format.contains("{number}") {
        return Err(PhotoCopyError::InvalidArguments {
            message: format!("duplicates_format '{}' must contain the literal token {{number}}", duplicates_format),
        });
    }

    let parent = candidate_path.parent().unwrap_or_else(|| Path::new(""));
    let stem = candidate_path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let ext = candidate_path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();

    let mut number: u32 = 1;
    loop {
        let suffix = duplicates_format.replace("{number}", &number.to_string());
        let candidate = parent.join(format!("{stem}{suffix}{ext}"));
        if !candidate.exists() {
            return Ok((candidate, CollisionAction::SuffixedWrite));
        }
        number += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn skip_existing_skips_present_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"x").unwrap();
        let mut tracker = DuplicateTracker::new();
        let (result_path, action) =
            resolve(&path, CollisionPolicy::SkipExisting, DEFAULT_DUPLICATES_FORMAT, None, &mut tracker).unwrap();
        assert_eq!(result_path, path);
        assert_eq!(action, CollisionAction::Skip);
    }

    #[test]
    fn overwrite_returns_overwrite_when_present() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"x").unwrap();
        let mut tracker = DuplicateTracker::new();
        let (_, action) =
            resolve(&path, CollisionPolicy::Overwrite, DEFAULT_DUPLICATES_FORMAT, None, &mut tracker).unwrap();
        assert_eq!(action, CollisionAction::Overwrite);
    }

    #[test]
    fn suffix_increments_past_existing_candidates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"x").unwrap();
        std::fs::write(dir.path().join("a-1.jpg"), b"y").unwrap();
        let mut tracker = DuplicateTracker::new();
        let (result_path, action) =
            resolve(&path, CollisionPolicy::Suffix, DEFAULT_DUPLICATES_FORMAT, None, &mut tracker).unwrap();
        assert_eq!(result_path, dir.path().join("a-2.jpg"));
        assert_eq!(action, CollisionAction::SuffixedWrite);
    }

    #[test]
    fn suffix_numbers_above_nine_are_not_zero_padded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"x").unwrap();
        for n in 1..=10 {
            std::fs::write(dir.path().join(format!("a-{n}.jpg")), b"y").unwrap();
        }
        let mut tracker = DuplicateTracker::new();
        let (result_path, _) =
            resolve(&path, CollisionPolicy::Suffix, DEFAULT_DUPLICATES_FORMAT, None, &mut tracker).unwrap();
        assert_eq!(result_path, dir.path().join("a-11.jpg"));
    }

    #[test]
    fn reuse_if_equal_reuses_when_checksums_match() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"same content").unwrap();
        let hash = checksum::sha256_bytes(b"same content");
        let mut tracker = DuplicateTracker::new();
        let (result_path, action) =
            resolve(&path, CollisionPolicy::ReuseIfEqual, DEFAULT_DUPLICATES_FORMAT, Some(&hash), &mut tracker).unwrap();
        assert_eq!(result_path, path);
        assert_eq!(action, CollisionAction::ReuseExisting);
    }

    #[test]
    fn reuse_if_equal_falls_back_to_suffix_when_different() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"existing content").unwrap();
        let hash = checksum::sha256_bytes(b"different content");
        let mut tracker = DuplicateTracker::new();
        let (result_path, action) =
            resolve(&path, CollisionPolicy::ReuseIfEqual, DEFAULT_DUPLICATES_FORMAT, Some(&hash), &mut tracker).unwrap();
        assert_eq!(result_path, dir.path().join("a-1.jpg"));
        assert_eq!(action, CollisionAction::SuffixedWrite);
    }

    #[test]
    fn skip_duplicates_skips_repeat_content_hash_within_run() {
        let dir = TempDir::new().unwrap();
        let path_a = dir.path().join("a.jpg");
        let path_b = dir.path().join("b.jpg");
        let hash = checksum::sha256_bytes(b"shared content");
        let mut tracker = DuplicateTracker::new();

        let (_, first_action) =
            resolve(&path_a, CollisionPolicy::SkipDuplicates, DEFAULT_DUPLICATES_FORMAT, Some(&hash), &mut tracker).unwrap();
        let (_, second_action) =
            resolve(&path_b, CollisionPolicy::SkipDuplicates, DEFAULT_DUPLICATES_FORMAT, Some(&hash), &mut tracker).unwrap();

        assert_eq!(first_action, CollisionAction::Write);
        assert_eq!(second_action, CollisionAction::Skip);
    }
}
