//! Ordered enrichment steps (spec.md §4.3) plus the two cross-file
//! enrichers that run once per batch: Live-Photo inheritance and
//! companion-GPS lookup.

use std::sync::Arc;
use std::time::SystemTime;

use rayon::prelude::*;
use time::OffsetDateTime;

use crate::checksum;
use crate::geocode::GeocodeService;
use crate::source_file::{FileKind, SourceFile};

use super::{exif, sidecar, Coordinates, DateSource, EnrichedFile, FileDateTime, FileMetadata, UnknownReason};

/// How embedded EXIF and sidecar fields combine when both are present
/// (spec.md §4.3 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarMergePolicy {
    EmbeddedFirst,
    SidecarFirst,
    MergePreferEmbedded,
}

/// Resolved configuration for one enrichment run. Fully-resolved values
/// only: config-file loading/layering is out of scope for the core.
pub struct EnrichmentConfig {
    pub sidecar_merge_policy: SidecarMergePolicy,
    pub checksum_enabled: bool,
    /// `0` disables the companion-GPS cross-file enricher.
    pub gps_proximity_window_minutes: u32,
    pub geocoder: Option<Arc<GeocodeService>>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        EnrichmentConfig {
            sidecar_merge_policy: SidecarMergePolicy::EmbeddedFirst,
            checksum_enabled: true,
            gps_proximity_window_minutes: 0,
            geocoder: None,
        }
    }
}

/// Runs the four per-file steps (DateTime, Location, Sidecar, Checksum) in
/// order for a single file, independent of every other file in the batch.
pub fn enrich_file(file: &SourceFile, config: &EnrichmentConfig) -> FileMetadata {
    let mut metadata = FileMetadata::blank();

    datetime_step(file, &mut metadata);
    location_step(file, config, &mut metadata);
    sidecar_step(file, config, &mut metadata);
    checksum_step(file, config, &mut metadata);

    metadata
}

/// Step 1: `DateTimeOriginal`, then `DateTimeDigitized`, then the older of
/// creation/modification file times.
fn datetime_step(file: &SourceFile, metadata: &mut FileMetadata) {
    if let Some((when, source)) = exif::extract_datetime(&file.path) {
        metadata.datetime = FileDateTime { when, source };
        metadata.unknown_reason = UnknownReason::None;
        return;
    }

    if let Ok(fs_meta) = std::fs::metadata(&file.path) {
        let created = fs_meta.created().ok();
        let modified = fs_meta.modified().ok();
        match (created, modified) {
            (Some(created), Some(modified)) => {
                // "older of creation and modification, using modification if
                // creation is newer than modification" (spec.md §4.3 step 1).
                let (when, source) = if created > modified {
                    (modified, DateSource::FileModification)
                } else {
                    (created, DateSource::FileCreation)
                };
                metadata.datetime = FileDateTime { when: system_time_to_offset(when), source };
                metadata.unknown_reason = UnknownReason::None;
            }
            (None, Some(modified)) => {
                metadata.datetime = FileDateTime { when: system_time_to_offset(modified), source: DateSource::FileModification };
                metadata.unknown_reason = UnknownReason::None;
            }
            (Some(created), None) => {
                metadata.datetime = FileDateTime { when: system_time_to_offset(created), source: DateSource::FileCreation };
                metadata.unknown_reason = UnknownReason::None;
            }
            (None, None) => {
                metadata.datetime = FileDateTime::unknown();
                metadata.unknown_reason = UnknownReason::NoDate;
            }
        }
    } else {
        metadata.datetime = FileDateTime::unknown();
        metadata.unknown_reason = UnknownReason::NoDate;
    }
}

fn system_time_to_offset(t: SystemTime) -> OffsetDateTime {
    OffsetDateTime::from(t)
}

/// Step 2: camera make/model plus GPS coordinate extraction and reverse
/// geocoding. Camera attributes come from EXIF independent of whether the
/// file carries GPS data, so they are read before the coordinate
/// early-returns below.
fn location_step(file: &SourceFile, config: &EnrichmentConfig, metadata: &mut FileMetadata) {
    let (make, model) = exif::extract_camera(&file.path);
    metadata.camera_make = make;
    metadata.camera_model = model;

    let coordinates = match exif::extract_coordinates(&file.path) {
        Ok(Some(coords)) if !coords.is_null_island() => coords,
        Ok(_) => {
            metadata.unknown_reason = UnknownReason::NoGpsData;
            return;
        }
        Err(_) => {
            metadata.unknown_reason = UnknownReason::GpsExtractionError;
            return;
        }
    };

    metadata.coordinates = Some(coordinates);
    reverse_geocode_into(config, coordinates, metadata);
}

fn reverse_geocode_into(config: &EnrichmentConfig, coordinates: Coordinates, metadata: &mut FileMetadata) {
    let Some(geocoder) = &config.geocoder else {
        metadata.unknown_reason = UnknownReason::GeocodingFailed;
        return;
    };
    match geocoder.reverse_geocode(coordinates.latitude, coordinates.longitude) {
        Ok(Some(location)) => {
            metadata.location = Some(location);
            metadata.unknown_reason = UnknownReason::None;
        }
        Ok(None) => metadata.unknown_reason = UnknownReason::GeocodingFailed,
        Err(_) => metadata.unknown_reason = UnknownReason::GeocodingFailed,
    }
}

/// Step 3: merges sibling `.xmp`/`.json`/`.aae` sidecars per the
/// configured merge policy.
fn sidecar_step(file: &SourceFile, config: &EnrichmentConfig, metadata: &mut FileMetadata) {
    let stem = file.stem();
    let sidecar_data = sidecar::read_sidecars(&file.path, &stem);

    match config.sidecar_merge_policy {
        SidecarMergePolicy::EmbeddedFirst | SidecarMergePolicy::MergePreferEmbedded => {
            if metadata.datetime.is_unknown() {
                if let Some((when, _)) = sidecar_data.datetime {
                    metadata.datetime = FileDateTime { when, source: DateSource::Sidecar };
                    metadata.unknown_reason = UnknownReason::None;
                }
            }
            if metadata.coordinates.is_none() {
                if let Some(coords) = sidecar_data.coordinates {
                    metadata.coordinates = Some(coords);
                    reverse_geocode_into(config, coords, metadata);
                }
            }
        }
        SidecarMergePolicy::SidecarFirst => {
            if let Some((when, _)) = sidecar_data.datetime {
                metadata.datetime = FileDateTime { when, source: DateSource::Sidecar };
                metadata.unknown_reason = UnknownReason::None;
            }
            if let Some(coords) = sidecar_data.coordinates {
                metadata.coordinates = Some(coords);
                reverse_geocode_into(config, coords, metadata);
            }
        }
    }
}

/// Step 4: streaming SHA-256 checksum, when enabled.
fn checksum_step(file: &SourceFile, config: &EnrichmentConfig, metadata: &mut FileMetadata) {
    if !config.checksum_enabled {
        return;
    }
    if let Ok(digest) = checksum::sha256_file(&file.path) {
        metadata.checksum = Some(digest);
    }
}

/// Runs per-file enrichment over every source file in parallel, attaches
/// sidecars as `related`, and runs the two cross-file enrichers.
pub fn enrich_batch(files: Vec<SourceFile>, config: &EnrichmentConfig) -> Vec<EnrichedFile> {
    let (mains, sidecars): (Vec<SourceFile>, Vec<SourceFile>) = files
        .into_iter()
        .partition(|f| !matches!(f.kind, FileKind::SidecarXmp | FileKind::SidecarJson | FileKind::SidecarAae));

    let mut enriched: Vec<EnrichedFile> = mains
        .into_par_iter()
        .map(|source| {
            let metadata = enrich_file(&source, config);
            EnrichedFile { source, metadata, related: Vec::new() }
        })
        .collect();

    attach_sidecars(&mut enriched, sidecars);
    live_photo_inheritance(&mut enriched);
    if config.gps_proximity_window_minutes > 0 {
        companion_gps(&mut enriched, config);
    }

    enriched
}

/// Matches each sidecar to the main file sharing its stem (case
/// insensitive) and moves it into that file's `related` list. Sidecars
/// with no matching main file are dropped: the executor only ever
/// discovers them via a main file's `related`, never standalone, per
/// spec.md §4.5.1 step 4.
fn attach_sidecars(enriched: &mut [EnrichedFile], sidecars: Vec<SourceFile>) {
    for sidecar_file in sidecars {
        let sidecar_stem = sidecar_file.stem().to_lowercase();
        if let Some(main) = enriched.iter_mut().find(|e| e.source.stem().to_lowercase() == sidecar_stem) {
            main.related.push(sidecar_file);
        }
    }
}

const STILL_EXTS_FOR_LIVE_PHOTO: &[&str] = &["heic", "heif", "jpg", "jpeg"];

/// When a still and a `.mov` share a case-insensitive base name, the video
/// inherits the still's location if it has none of its own. Multiple
/// stills sharing a base name: the first with coordinates wins
/// (spec.md §4.3).
fn live_photo_inheritance(enriched: &mut [EnrichedFile]) {
    let mut donor_by_stem: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for (index, entry) in enriched.iter().enumerate() {
        if entry.source.kind != FileKind::StillImage {
            continue;
        }
        let ext = entry.source.ext_with_dot().trim_start_matches('.').to_lowercase();
        if !STILL_EXTS_FOR_LIVE_PHOTO.contains(&ext.as_str()) {
            continue;
        }
        if entry.metadata.location.is_none() && entry.metadata.coordinates.is_none() {
            continue;
        }
        let stem = entry.source.stem().to_lowercase();
        donor_by_stem.entry(stem).or_insert(index);
    }

    for index in 0..enriched.len() {
        let is_mov_video = enriched[index].source.kind == FileKind::Video
            && enriched[index].source.ext_with_dot().eq_ignore_ascii_case(".mov");
        if !is_mov_video {
            continue;
        }
        if enriched[index].metadata.location.is_some() {
            continue;
        }
        let stem = enriched[index].source.stem().to_lowercase();
        if let Some(&donor_index) = donor_by_stem.get(&stem) {
            if donor_index == index {
                continue;
            }
            let donor_location = enriched[donor_index].metadata.location.clone();
            if let Some(location) = donor_location {
                enriched[index].metadata.location = Some(location);
                enriched[index].metadata.unknown_reason = UnknownReason::None;
            }
        }
    }
}

/// Binary-searches a time-sorted index of coordinate-bearing files for the
/// nearest timestamp within `gps_proximity_window_minutes`, attaching
/// reverse-geocoded coordinates to files with `unknown_reason ==
/// NoGpsData`. Files whose extraction errored are never touched
/// (spec.md §4.3).
fn companion_gps(enriched: &mut [EnrichedFile], config: &EnrichmentConfig) {
    let mut index: Vec<(OffsetDateTime, Coordinates)> = enriched
        .iter()
        .filter_map(|e| e.metadata.coordinates.map(|c| (e.metadata.datetime.when, c)))
        .collect();
    if index.is_empty() {
        return;
    }
    index.sort_by_key(|(when, _)| *when);

    let window = time::Duration::minutes(config.gps_proximity_window_minutes as i64);

    for entry in enriched.iter_mut() {
        if entry.metadata.unknown_reason != UnknownReason::NoGpsData {
            continue;
        }
        if let Some(coords) = nearest_within_window(&index, entry.metadata.datetime.when, window) {
            reverse_geocode_into(config, coords, &mut entry.metadata);
            if entry.metadata.location.is_some() {
                entry.metadata.coordinates = Some(coords);
            }
        }
    }
}

fn nearest_within_window(
    index: &[(OffsetDateTime, Coordinates)],
    when: OffsetDateTime,
    window: time::Duration,
) -> Option<Coordinates> {
    let pos = index.partition_point(|(t, _)| *t < when);

    let mut best: Option<(time::Duration, Coordinates)> = None;
    for candidate_index in [pos.checked_sub(1), Some(pos)].into_iter().flatten() {
        if let Some((t, c)) = index.get(candidate_index) {
            let delta = if *t >= when { *t - when } else { when - *t };
            if delta <= window {
                if best.map(|(best_delta, _)| delta < best_delta).unwrap_or(true) {
                    best = Some((delta, *c));
                }
            }
        }
    }
    best.map(|(_, c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::LocationData;
    use tempfile::TempDir;

    /// Hand-assembles a minimal little-endian TIFF file with a `Make`/
    /// `Model` pair in IFD0 and no GPS tags at all, for exercising camera
    /// extraction independent of location data.
    fn build_tiff_with_camera(make: &str, model: &str) -> Vec<u8> {
        let make_bytes = [make.as_bytes(), b"\0"].concat();
        let model_bytes = [model.as_bytes(), b"\0"].concat();

        const IFD0_OFFSET: u32 = 8;
        const ENTRY_COUNT: u16 = 2;
        let ifd_len = 2 + 12 * ENTRY_COUNT as u32 + 4;
        let make_offset = IFD0_OFFSET + ifd_len;
        let model_offset = make_offset + make_bytes.len() as u32;

        let mut buf = Vec::new();
        buf.extend_from_slice(b"II");
        buf.extend_from_slice(&42u16.to_le_bytes());
        buf.extend_from_slice(&IFD0_OFFSET.to_le_bytes());

        buf.extend_from_slice(&ENTRY_COUNT.to_le_bytes());

        // Make (tag 0x010F), type ASCII (2).
        buf.extend_from_slice(&0x010Fu16.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&(make_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&make_offset.to_le_bytes());

        // Model (tag 0x0110), type ASCII (2).
        buf.extend_from_slice(&0x0110u16.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&(model_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&model_offset.to_le_bytes());

        buf.extend_from_slice(&0u32.to_le_bytes()); // no next IFD

        buf.extend_from_slice(&make_bytes);
        buf.extend_from_slice(&model_bytes);
        buf
    }

    #[test]
    fn location_step_extracts_camera_without_gps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("no_gps.tiff");
        std::fs::write(&path, build_tiff_with_camera("Canon", "EOS R5")).unwrap();

        let file = SourceFile { path, kind: FileKind::StillImage };
        let config = EnrichmentConfig::default();
        let mut metadata = FileMetadata::blank();

        location_step(&file, &config, &mut metadata);

        assert_eq!(metadata.camera_make.as_deref(), Some("Canon"));
        assert_eq!(metadata.camera_model.as_deref(), Some("EOS R5"));
        assert!(metadata.coordinates.is_none());
        assert_eq!(metadata.unknown_reason, UnknownReason::NoGpsData);
    }

    fn make_entry(stem: &str, ext: &str, kind: FileKind, location: Option<LocationData>) -> EnrichedFile {
        let mut metadata = FileMetadata::blank();
        metadata.location = location.clone();
        if location.is_some() {
            metadata.coordinates = Some(Coordinates::new(1.0, 1.0));
            metadata.unknown_reason = UnknownReason::None;
        }
        EnrichedFile {
            source: SourceFile { path: format!("{stem}{ext}").into(), kind },
            metadata,
            related: Vec::new(),
        }
    }

    fn sample_location() -> LocationData {
        LocationData {
            district: Some("Paris".to_string()),
            city: Some("Paris".to_string()),
            county: None,
            state: Some("Ile-de-France".to_string()),
            country: "FR".to_string(),
            population: Some(2_000_000),
        }
    }

    #[test]
    fn live_photo_video_inherits_still_location() {
        let mut entries = vec![
            make_entry("IMG_1234", ".heic", FileKind::StillImage, Some(sample_location())),
            make_entry("IMG_1234", ".mov", FileKind::Video, None),
        ];
        live_photo_inheritance(&mut entries);
        assert_eq!(entries[1].metadata.location, Some(sample_location()));
        assert_eq!(entries[1].metadata.unknown_reason, UnknownReason::None);
    }

    #[test]
    fn mp4_is_not_paired_as_live_photo() {
        let mut entries = vec![
            make_entry("IMG_5", ".heic", FileKind::StillImage, Some(sample_location())),
            make_entry("IMG_5", ".mp4", FileKind::Video, None),
        ];
        live_photo_inheritance(&mut entries);
        assert!(entries[1].metadata.location.is_none());
    }

    #[test]
    fn sidecars_attach_to_matching_main_by_stem() {
        let mut enriched = vec![EnrichedFile {
            source: SourceFile { path: "IMG_1.jpg".into(), kind: FileKind::StillImage },
            metadata: FileMetadata::blank(),
            related: Vec::new(),
        }];
        let sidecars = vec![SourceFile { path: "IMG_1.jpg.xmp".into(), kind: FileKind::SidecarXmp }];
        attach_sidecars(&mut enriched, sidecars);
        assert_eq!(enriched[0].related.len(), 1);
    }
}
