//! Reverse-geocoding engine (spec.md §4.2): a stream-indexed gazetteer for
//! nearest-place lookups, and a country-boundary index for authoritative
//! country resolution, sharing an LRU cell cache.

pub mod boundary;
pub mod gazetteer;

use crate::metadata::LocationData;
use crate::{PhotoCopyError, Result};
use std::path::{Path, PathBuf};

pub use boundary::BoundaryIndex;
pub use gazetteer::GazetteerIndex;

/// Process-wide reverse-geocoding service combining the gazetteer and
/// country-boundary indices. Constructed once at service initialization
/// and shared read-only by every worker task (spec.md §3.2).
pub struct GeocodeService {
    gazetteer: GazetteerIndex,
    boundary: Option<BoundaryIndex>,
    use_full_country_names: bool,
}

/// Search order for locating `geo.geobounds` relative to the gazetteer
/// directory, per spec.md §6.5.
pub fn locate_boundary_file(gazetteer_dir: &Path) -> Option<PathBuf> {
    let mut candidates = vec![gazetteer_dir.join("geo.geobounds")];
    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            candidates.push(exe_dir.join("data").join("geo.geobounds"));
            candidates.push(exe_dir.join("geo.geobounds"));
        }
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".photocopy").join("geo.geobounds"));
    }
    candidates.into_iter().find(|p| p.exists())
}

impl GeocodeService {
    /// Opens (and rebuilds the stream index if stale) the gazetteer at
    /// `gazetteer_path`, and loads a country-boundary file if one is found
    /// via [`locate_boundary_file`].
    ///
    /// `use_full_country_names` controls whether `LocationData.country` is
    /// the two-letter ISO code (the default) or the boundary index's full
    /// country name (spec.md §3.1). It has no effect when no boundary index
    /// is found, since the gazetteer itself only carries the ISO code.
    pub fn open(gazetteer_path: &Path, cache_budget_bytes: u64, use_full_country_names: bool) -> Result<Self> {
        let gazetteer = GazetteerIndex::open(gazetteer_path, cache_budget_bytes)?;
        let boundary = gazetteer_path
            .parent()
            .and_then(locate_boundary_file)
            .map(|p| BoundaryIndex::load(&p))
            .transpose()?;
        Ok(GeocodeService { gazetteer, boundary, use_full_country_names })
    }

    /// Resolves `(lat, lon)` to a [`LocationData`], or `None` if no place
    /// was found within the search radius. The literal `(0.0, 0.0)` "null
    /// island" sentinel is rejected before any lookup is attempted.
    pub fn reverse_geocode(&self, lat: f64, lon: f64) -> Result<Option<LocationData>> {
        if lat == 0.0 && lon == 0.0 {
            return Ok(None);
        }
        let mut located = self.gazetteer.reverse_geocode(lat, lon)?;

        if let (Some(boundary), Some(loc)) = (&self.boundary, located.as_mut()) {
            if let Some(country) = boundary.country_at(lat, lon) {
                loc.country = if self.use_full_country_names {
                    boundary.full_name_for(&country).unwrap_or(country)
                } else {
                    country
                };
            } else if self.use_full_country_names {
                if let Some(name) = boundary.full_name_for(&loc.country) {
                    loc.country = name;
                }
            }
        }
        Ok(located)
    }

    /// Resolves only the country for `(lat, lon)` via the boundary index,
    /// without consulting the gazetteer. Returns `None` if no boundary
    /// index was loaded or the point falls in open ocean.
    pub fn country_at(&self, lat: f64, lon: f64) -> Result<Option<String>> {
        match &self.boundary {
            Some(b) => Ok(b.country_at(lat, lon)),
            None => Err(PhotoCopyError::Geocoding {
                message: "no country-boundary index loaded".to_string(),
            }),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.gazetteer.cache_stats()
    }
}

/// Hit/miss counters for the cell cache, exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}
