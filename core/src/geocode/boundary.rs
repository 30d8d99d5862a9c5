//! Country-boundary index (spec.md §4.2.2): a binary `.geobounds` file
//! giving authoritative country polygons plus precomputed geohash caches
//! so most lookups resolve without a point-in-polygon test.

use crate::geohash::{self, Polygon};
use crate::{PhotoCopyError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const BOUNDARY_MAGIC: &[u8; 4] = b"PGB1";
const BOUNDARY_VERSION: u16 = 1;
const CELL_PRECISION: usize = 4;
const BORDER_SENTINEL: u16 = 0xFFFF;

struct CountryRecord {
    alpha2: String,
    #[allow(dead_code)]
    alpha3: String,
    name: String,
    bbox: (f32, f32, f32, f32), // min_lat, max_lat, min_lon, max_lon
    first_polygon_index: u32,
    polygon_count: u16,
}

/// A loaded country-boundary index: countries, their polygons, and the two
/// precomputed geohash caches that make `country_at` O(1) for the common
/// case (spec.md §4.2.2).
pub struct BoundaryIndex {
    countries: Vec<CountryRecord>,
    polygons: Vec<Polygon>,
    single_country_cache: HashMap<String, u16>,
    border_cells: HashMap<String, Vec<u16>>,
}

impl BoundaryIndex {
    /// Loads a `.geobounds` file in full into memory. The format is small
    /// enough (tens of MB) that streaming is unnecessary (spec.md §4.2.2).
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != BOUNDARY_MAGIC {
            return Err(PhotoCopyError::Internal {
                message: format!("{}: bad .geobounds magic", path.display()),
            });
        }
        let version = reader.read_u16::<LittleEndian>()?;
        if version > BOUNDARY_VERSION {
            return Err(PhotoCopyError::Internal {
                message: format!("{}: unsupported .geobounds version {}", path.display(), version),
            });
        }

        // Fixed 48-byte header (after magic+version): reserved(2) + six u32
        // counts/offsets, padded to 48 bytes total including magic+version.
        let _reserved = reader.read_u16::<LittleEndian>()?;
        let country_count = reader.read_u32::<LittleEndian>()?;
        let total_polygons = reader.read_u32::<LittleEndian>()?;
        let total_vertices = reader.read_u32::<LittleEndian>()?;
        let geohash_cache_count = reader.read_u32::<LittleEndian>()?;
        let border_cell_count = reader.read_u32::<LittleEndian>()?;
        let mut pad = [0u8; 48 - 4 - 2 - 2 - 4 * 5];
        reader.read_exact(&mut pad)?;
        let _ = total_vertices;

        let mut countries = Vec::with_capacity(country_count as usize);
        for _ in 0..country_count {
            countries.push(read_country_record(&mut reader)?);
        }

        let mut polygons = Vec::with_capacity(total_polygons as usize);
        for _ in 0..total_polygons {
            polygons.push(read_polygon(&mut reader)?);
        }

        let mut single_country_cache = HashMap::with_capacity(geohash_cache_count as usize);
        for _ in 0..geohash_cache_count {
            let cell = read_cell_id(&mut reader)?;
            let country_index = reader.read_u16::<LittleEndian>()?;
            if country_index != BORDER_SENTINEL {
                single_country_cache.insert(cell, country_index);
            }
        }

        let mut border_cells = HashMap::with_capacity(border_cell_count as usize);
        for _ in 0..border_cell_count {
            let cell = read_cell_id(&mut reader)?;
            let candidate_count = reader.read_u16::<LittleEndian>()?;
            let mut candidates = Vec::with_capacity(candidate_count as usize);
            for _ in 0..candidate_count {
                candidates.push(reader.read_u16::<LittleEndian>()?);
            }
            border_cells.insert(cell, candidates);
        }

        Ok(BoundaryIndex { countries, polygons, single_country_cache, border_cells })
    }

    /// Resolves `(lat, lon)` to an ISO alpha-2 country code, or `None` for
    /// open ocean / unmapped area, per spec.md §4.2.2's four-step lookup.
    pub fn country_at(&self, lat: f64, lon: f64) -> Option<String> {
        let cell = geohash::encode(lat, lon, CELL_PRECISION);

        if let Some(&country_index) = self.single_country_cache.get(&cell) {
            return self.countries.get(country_index as usize).map(|c| c.alpha2.clone());
        }

        if let Some(candidates) = self.border_cells.get(&cell) {
            for &country_index in candidates {
                if self.country_contains(country_index, lat, lon) {
                    return self.countries.get(country_index as usize).map(|c| c.alpha2.clone());
                }
            }
        }

        self.linear_scan(lat, lon)
    }

    fn country_contains(&self, country_index: u16, lat: f64, lon: f64) -> bool {
        let Some(country) = self.countries.get(country_index as usize) else {
            return false;
        };
        let start = country.first_polygon_index as usize;
        let end = start + country.polygon_count as usize;
        self.polygons
            .get(start..end)
            .map(|polys| polys.iter().any(|p| p.contains(lat, lon)))
            .unwrap_or(false)
    }

    /// Looks up a country's full display name by its ISO alpha-2 code, for
    /// the `use_full_country_names` policy (spec.md §3.1: `country` is the
    /// gazetteer's name field rather than the two-letter code when that
    /// policy is on).
    pub fn full_name_for(&self, alpha2: &str) -> Option<String> {
        self.countries.iter().find(|c| c.alpha2 == alpha2).map(|c| c.name.clone())
    }

    fn linear_scan(&self, lat: f64, lon: f64) -> Option<String> {
        for (index, country) in self.countries.iter().enumerate() {
            let (min_lat, max_lat, min_lon, max_lon) = country.bbox;
            if (lat as f32) < min_lat || (lat as f32) > max_lat || (lon as f32) < min_lon || (lon as f32) > max_lon {
                continue;
            }
            if self.country_contains(index as u16, lat, lon) {
                return Some(country.alpha2.clone());
            }
        }
        None
    }
}

fn read_cell_id<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_u8()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| PhotoCopyError::Internal {
        message: format!("corrupt cell id in .geobounds: {}", e),
    })
}

fn read_country_record<R: Read>(reader: &mut R) -> Result<CountryRecord> {
    let mut alpha2 = [0u8; 2];
    reader.read_exact(&mut alpha2)?;
    let mut alpha3 = [0u8; 3];
    reader.read_exact(&mut alpha3)?;

    let name_len = reader.read_u8()? as usize;
    let mut name_buf = vec![0u8; name_len];
    reader.read_exact(&mut name_buf)?;
    let name = String::from_utf8(name_buf).map_err(|e| PhotoCopyError::Internal {
        message: format!("corrupt country name in .geobounds: {}", e),
    })?;

    let min_lat = reader.read_f32::<LittleEndian>()?;
    let max_lat = reader.read_f32::<LittleEndian>()?;
    let min_lon = reader.read_f32::<LittleEndian>()?;
    let max_lon = reader.read_f32::<LittleEndian>()?;

    let polygon_count = reader.read_u16::<LittleEndian>()?;
    let first_polygon_index = reader.read_u32::<LittleEndian>()?;

    Ok(CountryRecord {
        alpha2: String::from_utf8_lossy(&alpha2).trim().to_string(),
        alpha3: String::from_utf8_lossy(&alpha3).trim().to_string(),
        name,
        bbox: (min_lat, max_lat, min_lon, max_lon),
        first_polygon_index,
        polygon_count,
    })
}

fn read_polygon<R: Read>(reader: &mut R) -> Result<Polygon> {
    let exterior_count = reader.read_u16::<LittleEndian>()?;
    let hole_count = reader.read_u8()?;
    let _reserved = reader.read_u8()?;

    let exterior = read_ring(reader, exterior_count as usize)?;
    let mut holes = Vec::with_capacity(hole_count as usize);
    for _ in 0..hole_count {
        let vertex_count = reader.read_u16::<LittleEndian>()?;
        holes.push(read_ring(reader, vertex_count as usize)?);
    }

    Ok(Polygon { exterior, holes })
}

fn read_ring<R: Read>(reader: &mut R, count: usize) -> Result<Vec<(i16, i16)>> {
    let mut ring = Vec::with_capacity(count);
    for _ in 0..count {
        let lat = reader.read_i16::<LittleEndian>()?;
        let lon = reader.read_i16::<LittleEndian>()?;
        ring.push((lat, lon));
    }
    Ok(ring)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Hand-assembles a minimal single-country `.geobounds` file covering a
    /// 2x2 degree square around (10, 10), exercising the single-country
    /// cache fast path.
    fn write_minimal_geobounds(path: &Path) {
        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(BOUNDARY_MAGIC);
        buf.write_u16::<LittleEndian>(BOUNDARY_VERSION).unwrap();
        buf.write_u16::<LittleEndian>(0).unwrap(); // reserved
        buf.write_u32::<LittleEndian>(1).unwrap(); // country_count
        buf.write_u32::<LittleEndian>(1).unwrap(); // total_polygons
        buf.write_u32::<LittleEndian>(4).unwrap(); // total_vertices
        buf.write_u32::<LittleEndian>(1).unwrap(); // geohash_cache_count
        buf.write_u32::<LittleEndian>(0).unwrap(); // border_cell_count
        buf.extend_from_slice(&[0u8; 48 - 4 - 2 - 2 - 4 * 5]);

        // country record
        buf.extend_from_slice(b"XX");
        buf.extend_from_slice(b"XXX");
        let name = b"Testland";
        buf.write_u8(name.len() as u8).unwrap();
        buf.extend_from_slice(name);
        buf.write_f32::<LittleEndian>(9.0).unwrap();
        buf.write_f32::<LittleEndian>(11.0).unwrap();
        buf.write_f32::<LittleEndian>(9.0).unwrap();
        buf.write_f32::<LittleEndian>(11.0).unwrap();
        buf.write_u16::<LittleEndian>(1).unwrap(); // polygon_count
        buf.write_u32::<LittleEndian>(0).unwrap(); // first_polygon_index

        // polygon: square from (9,9) to (11,11), scaled x100 per geohash::QuantizedRing
        buf.write_u16::<LittleEndian>(4).unwrap(); // exterior_count
        buf.write_u8(0).unwrap(); // hole_count
        buf.write_u8(0).unwrap(); // reserved
        for (lat, lon) in [(900i16, 900i16), (900, 1100), (1100, 1100), (1100, 900)] {
            buf.write_i16::<LittleEndian>(lat).unwrap();
            buf.write_i16::<LittleEndian>(lon).unwrap();
        }

        // single-country cache: the cell covering (10, 10) maps to country 0
        let cell = geohash::encode(10.0, 10.0, CELL_PRECISION);
        buf.write_u8(cell.len() as u8).unwrap();
        buf.extend_from_slice(cell.as_bytes());
        buf.write_u16::<LittleEndian>(0).unwrap();

        let mut file = File::create(path).unwrap();
        file.write_all(&buf).unwrap();
    }

    #[test]
    fn resolves_country_via_single_country_cache() {
        let file = NamedTempFile::new().unwrap();
        write_minimal_geobounds(file.path());
        let index = BoundaryIndex::load(file.path()).unwrap();
        assert_eq!(index.country_at(10.0, 10.0), Some("XX".to_string()));
    }

    #[test]
    fn rejects_bad_magic() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"NOPE\x01\x00").unwrap();
        let result = BoundaryIndex::load(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn out_of_bbox_point_falls_back_to_none() {
        let file = NamedTempFile::new().unwrap();
        write_minimal_geobounds(file.path());
        let index = BoundaryIndex::load(file.path()).unwrap();
        assert_eq!(index.country_at(50.0, 50.0), None);
    }

    #[test]
    fn full_name_for_resolves_by_alpha2() {
        let file = NamedTempFile::new().unwrap();
        write_minimal_geobounds(file.path());
        let index = BoundaryIndex::load(file.path()).unwrap();
        assert_eq!(index.full_name_for("XX"), Some("Testland".to_string()));
        assert_eq!(index.full_name_for("ZZ"), None);
    }
}
