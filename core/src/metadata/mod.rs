//! Metadata enrichment pipeline (spec.md §4.3): an ordered sequence of
//! per-file steps producing a [`FileMetadata`], followed by two cross-file
//! enrichers that run over the whole enumerated batch.

pub mod exif;
pub mod pipeline;
pub mod sidecar;

pub use pipeline::{enrich_batch, enrich_file, EnrichmentConfig, SidecarMergePolicy};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::source_file::SourceFile;

/// Where a [`FileDateTime`] value came from. Ordering in this enum has no
/// semantic meaning; `DateTimeStep` assigns variants in its own preference
/// order, not this declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateSource {
    ExifDateTimeOriginal,
    ExifDateTimeDigitized,
    Sidecar,
    FileCreation,
    FileModification,
    Unknown,
}

/// A file's best-known capture date, tagged with where it came from.
/// Invariant: `source == Unknown` iff `when` is the sentinel zero timestamp
/// (`OffsetDateTime::UNIX_EPOCH`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDateTime {
    #[serde(with = "time::serde::rfc3339")]
    pub when: OffsetDateTime,
    pub source: DateSource,
}

impl FileDateTime {
    pub fn unknown() -> Self {
        FileDateTime { when: OffsetDateTime::UNIX_EPOCH, source: DateSource::Unknown }
    }

    pub fn is_unknown(&self) -> bool {
        self.source == DateSource::Unknown
    }
}

/// A geographic coordinate pair. The literal `(0.0, 0.0)` is treated as "no
/// data" throughout the pipeline (the "null island" policy, spec.md §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Coordinates { latitude, longitude }
    }

    pub fn is_null_island(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }
}

/// A resolved place, composed by the reverse-geocoding engine. `country` is
/// always set when any other field is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationData {
    pub district: Option<String>,
    pub city: Option<String>,
    pub county: Option<String>,
    pub state: Option<String>,
    pub country: String,
    pub population: Option<u64>,
}

/// Why a file's metadata is incomplete under the active policy.
/// `unknown_reason == None` iff the metadata is deemed complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnknownReason {
    None,
    NoGpsData,
    GpsExtractionError,
    GeocodingFailed,
    NoDate,
}

/// The fused result of running a file through the enrichment pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub datetime: FileDateTime,
    pub coordinates: Option<Coordinates>,
    pub location: Option<LocationData>,
    pub checksum: Option<String>,
    pub unknown_reason: UnknownReason,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
}

impl FileMetadata {
    /// A blank metadata record, as handed to the first pipeline step.
    pub fn blank() -> Self {
        FileMetadata {
            datetime: FileDateTime::unknown(),
            coordinates: None,
            location: None,
            checksum: None,
            unknown_reason: UnknownReason::NoDate,
            camera_make: None,
            camera_model: None,
        }
    }
}

/// A file plus its enriched metadata and the sidecars/variants that must be
/// co-moved with it.
#[derive(Debug, Clone)]
pub struct EnrichedFile {
    pub source: SourceFile,
    pub metadata: FileMetadata,
    pub related: Vec<SourceFile>,
}
