//! Gazetteer stream index (spec.md §4.2.1): an on-disk index mapping every
//! precision-4 geohash cell to the byte offsets of gazetteer lines that
//! fall in it, so a lookup never has to scan or hold the ~1.7 GB gazetteer
//! file in RAM.

use crate::geohash;
use crate::metadata::LocationData;
use crate::{PhotoCopyError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use lru::LruCache;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const INDEX_MAGIC: &[u8; 4] = b"GSIX";
const INDEX_VERSION: u16 = 2;
const CELL_PRECISION: usize = 4;
const SEARCH_RADIUS_KM: f64 = 50.0;
const PRIORITY_THRESHOLD_KM: f64 = 15.0;
const CITY_POPULATION_THRESHOLD: u64 = 100_000;
const DEFAULT_CACHE_BUDGET_BYTES: u64 = 100 * 1024 * 1024;
const LOOKUP_CACHE_CAPACITY: usize = 10_000;

/// A single parsed row from the GeoNames-formatted gazetteer file (spec.md
/// §6.3: tab-separated, fields used are 1, 4, 5, 6, 7, 8, 10, 11, 14).
#[derive(Debug, Clone)]
struct GazetteerRow {
    name: String,
    lat: f64,
    lon: f64,
    feature_class: char,
    feature_code: String,
    country_code: String,
    admin1: String,
    admin2: String,
    population: u64,
}

/// Feature priority ordering used when two candidates tie within the
/// priority threshold (spec.md §4.2.1): populated places outrank
/// administrative areas outrank landmarks.
fn feature_priority(row: &GazetteerRow) -> u8 {
    match row.feature_class {
        'P' => 2,
        'A' => 1,
        _ => 0,
    }
}

fn parse_gazetteer_line(line: &str) -> Option<GazetteerRow> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 15 {
        log::debug!("skipping gazetteer line with {} columns (<15)", fields.len());
        return None;
    }
    // GeoNames rows carry `geonameid` as field 0, which this index never
    // uses; the fields below are at their real (0-indexed) column
    // positions in the distributed file (spec.md §4.2.1/§6.3).
    let name = fields[1].to_string();
    let lat: f64 = fields[4].parse().ok()?;
    let lon: f64 = fields[5].parse().ok()?;
    let feature_class = fields[6].chars().next().unwrap_or('\0');
    let feature_code = fields[7].to_string();
    let country_code = fields[8].to_string();
    let admin1 = fields[10].to_string();
    let admin2 = fields[11].to_string();
    let population: u64 = fields[14].parse().unwrap_or(0);

    Some(GazetteerRow {
        name,
        lat,
        lon,
        feature_class,
        feature_code,
        country_code,
        admin1,
        admin2,
        population,
    })
}

/// Byte offsets of lines belonging to one precision-4 geohash cell.
type CellOffsets = Vec<i64>;

struct IndexHeader {
    precision: u8,
    cell_count: u32,
    total_entries: u64,
}

/// An opened gazetteer: the raw TSV data file plus its stream index
/// (offsets-by-cell) and the LRU caches described in spec.md §4.2.1.
pub struct GazetteerIndex {
    data_path: PathBuf,
    cells: HashMap<String, CellOffsets>,
    cell_cache: Mutex<CellCache>,
    lookup_cache: Mutex<LookupCache>,
}

/// LRU cache of loaded cell contents, bounded by a byte budget rather than
/// an item count (spec.md §4.2.1: "default 100 MiB").
struct CellCache {
    inner: LruCache<String, CachedCell>,
    budget_bytes: u64,
    used_bytes: u64,
    hits: u64,
    misses: u64,
}

struct CachedCell {
    rows: Vec<GazetteerRow>,
    size_bytes: u64,
}

impl CellCache {
    fn new(budget_bytes: u64) -> Self {
        // Capacity is nominal (LruCache requires a bound); real eviction is
        // driven by `used_bytes` against `budget_bytes` in `insert`.
        let cap = NonZeroUsize::new(4096).unwrap();
        CellCache {
            inner: LruCache::new(cap),
            budget_bytes,
            used_bytes: 0,
            hits: 0,
            misses: 0,
        }
    }

    fn get(&mut self, key: &str) -> Option<Vec<GazetteerRow>> {
        if let Some(cell) = self.inner.get(key) {
            self.hits += 1;
            Some(cell.rows.clone())
        } else {
            self.misses += 1;
            None
        }
    }

    fn insert(&mut self, key: String, rows: Vec<GazetteerRow>) {
        let size_bytes = estimate_rows_size(&rows);
        while self.used_bytes + size_bytes > self.budget_bytes {
            match self.inner.pop_lru() {
                Some((_, evicted)) => self.used_bytes = self.used_bytes.saturating_sub(evicted.size_bytes),
                None => break,
            }
        }
        self.used_bytes += size_bytes;
        self.inner.put(key, CachedCell { rows, size_bytes });
    }
}

fn estimate_rows_size(rows: &[GazetteerRow]) -> u64 {
    rows.iter()
        .map(|r| (r.name.len() + r.country_code.len() + r.admin1.len() + r.admin2.len() + 64) as u64)
        .sum()
}

/// `(lat, lon)`-rounded-to-4-decimals lookup cache. Per spec.md §4.2.1 this
/// is "cleared on overflow" rather than LRU-evicted, so it is a plain map.
struct LookupCache {
    map: HashMap<(i64, i64), Option<LocationData>>,
}

impl LookupCache {
    fn new() -> Self {
        LookupCache { map: HashMap::new() }
    }

    fn key(lat: f64, lon: f64) -> (i64, i64) {
        ((lat * 10_000.0).round() as i64, (lon * 10_000.0).round() as i64)
    }

    fn get(&self, lat: f64, lon: f64) -> Option<Option<LocationData>> {
        self.map.get(&Self::key(lat, lon)).cloned()
    }

    fn insert(&mut self, lat: f64, lon: f64, value: Option<LocationData>) {
        if self.map.len() >= LOOKUP_CACHE_CAPACITY {
            self.map.clear();
        }
        self.map.insert(Self::key(lat, lon), value);
    }
}

impl GazetteerIndex {
    /// Opens the gazetteer at `data_path`, rebuilding its
    /// `.geostreamindex` sibling if it is missing or older than the data
    /// file (spec.md §4.2.1).
    pub fn open(data_path: &Path, cache_budget_bytes: u64) -> Result<Self> {
        let index_path = index_path_for(data_path);
        let needs_rebuild = match (data_path.metadata(), index_path.metadata()) {
            (Ok(data_meta), Ok(index_meta)) => {
                let data_mtime = data_meta.modified().ok();
                let index_mtime = index_meta.modified().ok();
                match (data_mtime, index_mtime) {
                    (Some(d), Some(i)) => i < d,
                    _ => true,
                }
            }
            _ => true,
        };

        if needs_rebuild {
            log::debug!("rebuilding gazetteer stream index at {}", index_path.display());
            build_index(data_path, &index_path)?;
        }

        let cells = read_index(&index_path)?;
        let budget = if cache_budget_bytes == 0 {
            DEFAULT_CACHE_BUDGET_BYTES
        } else {
            cache_budget_bytes
        };

        Ok(GazetteerIndex {
            data_path: data_path.to_path_buf(),
            cells,
            cell_cache: Mutex::new(CellCache::new(budget)),
            lookup_cache: Mutex::new(LookupCache::new()),
        })
    }

    pub fn cache_stats(&self) -> super::CacheStats {
        let cache = self.cell_cache.lock().expect("cell cache mutex poisoned");
        super::CacheStats { hits: cache.hits, misses: cache.misses }
    }

    /// Resolves `(lat, lon)` against the gazetteer: gathers candidates from
    /// the precision-4 cell and its eight neighbors, then picks the best
    /// district and (if any) city per spec.md §4.2.1.
    pub fn reverse_geocode(&self, lat: f64, lon: f64) -> Result<Option<LocationData>> {
        if let Some(cached) = self.lookup_cache.lock().expect("lookup cache mutex poisoned").get(lat, lon) {
            return Ok(cached);
        }

        let candidates = self.load_candidates(lat, lon)?;
        let result = select_location(lat, lon, &candidates);

        self.lookup_cache
            .lock()
            .expect("lookup cache mutex poisoned")
            .insert(lat, lon, result.clone());
        Ok(result)
    }

    fn load_candidates(&self, lat: f64, lon: f64) -> Result<Vec<GazetteerRow>> {
        let center_cell = geohash::encode(lat, lon, CELL_PRECISION);
        let mut cell_ids = vec![center_cell.clone()];
        if let Ok(neighbor_cells) = geohash::neighbors(&center_cell) {
            cell_ids.extend(neighbor_cells.into_iter().map(|(_, gh)| gh));
        }

        let mut all = Vec::new();
        for cell_id in cell_ids {
            all.extend(self.load_cell(&cell_id)?);
        }
        Ok(all)
    }

    fn load_cell(&self, cell_id: &str) -> Result<Vec<GazetteerRow>> {
        if let Some(rows) = self.cell_cache.lock().expect("cell cache mutex poisoned").get(cell_id) {
            return Ok(rows);
        }

        let offsets = match self.cells.get(cell_id) {
            Some(o) => o,
            None => return Ok(Vec::new()),
        };

        // Loading releases the cache mutex for the duration of file I/O,
        // then reacquires it to insert (spec.md §5): two concurrent misses
        // on the same cell may both load it; the later insert wins.
        let rows = read_rows_at_offsets(&self.data_path, offsets)?;

        self.cell_cache
            .lock()
            .expect("cell cache mutex poisoned")
            .insert(cell_id.to_string(), rows.clone());
        Ok(rows)
    }
}

fn read_rows_at_offsets(data_path: &Path, offsets: &[i64]) -> Result<Vec<GazetteerRow>> {
    let mut file = File::open(data_path)?;
    let mut rows = Vec::with_capacity(offsets.len());
    for &offset in offsets {
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut reader = BufReader::new(&mut file);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        if let Some(row) = parse_gazetteer_line(line.trim_end_matches(['\n', '\r'])) {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Applies the candidate-selection rule of spec.md §4.2.1 to produce the
/// best district and (if any) best city, and composes a `LocationData`.
fn select_location(lat: f64, lon: f64, candidates: &[GazetteerRow]) -> Option<LocationData> {
    if candidates.is_empty() {
        return None;
    }

    let in_radius: Vec<&GazetteerRow> = candidates
        .iter()
        .filter(|row| matches!(row.feature_class, 'P' | 'A'))
        .filter(|row| geohash::haversine(lat, lon, row.lat, row.lon) <= SEARCH_RADIUS_KM)
        .collect();

    let district = best_candidate(lat, lon, in_radius.iter().copied())?;
    let city = best_candidate(
        lat,
        lon,
        in_radius.iter().copied().filter(|r| r.population >= CITY_POPULATION_THRESHOLD),
    );

    Some(LocationData {
        district: Some(district.name.clone()),
        city: city.map(|c| c.name.clone()),
        county: non_empty(&district.admin2),
        state: non_empty(&district.admin1),
        country: district.country_code.clone(),
        population: if district.population > 0 { Some(district.population) } else { None },
    })
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Picks the best candidate by distance, with feature-priority as a
/// tiebreaker when both candidates under comparison are within the
/// priority threshold (spec.md §4.2.1).
fn best_candidate<'a>(
    lat: f64,
    lon: f64,
    candidates: impl Iterator<Item = &'a GazetteerRow>,
) -> Option<&'a GazetteerRow> {
    let mut best: Option<&GazetteerRow> = None;
    let mut best_dist = f64::INFINITY;

    for candidate in candidates {
        let dist = geohash::haversine(lat, lon, candidate.lat, candidate.lon);
        best = Some(match best {
            None => candidate,
            Some(current) => {
                let current_dist = geohash::haversine(lat, lon, current.lat, current.lon);
                let both_close = dist <= PRIORITY_THRESHOLD_KM && current_dist <= PRIORITY_THRESHOLD_KM;
                let one_close = dist <= PRIORITY_THRESHOLD_KM || current_dist <= PRIORITY_THRESHOLD_KM;

                if both_close {
                    match feature_priority(candidate).cmp(&feature_priority(current)) {
                        std::cmp::Ordering::Greater => candidate,
                        std::cmp::Ordering::Less => current,
                        std::cmp::Ordering::Equal => {
                            if dist < current_dist {
                                candidate
                            } else {
                                current
                            }
                        }
                    }
                } else if one_close {
                    if dist <= PRIORITY_THRESHOLD_KM {
                        candidate
                    } else {
                        current
                    }
                } else if dist < current_dist {
                    candidate
                } else {
                    current
                }
            }
        });
        best_dist = best_dist.min(dist);
    }
    let _ = best_dist;
    best
}

fn index_path_for(data_path: &Path) -> PathBuf {
    let mut s = data_path.as_os_str().to_os_string();
    s.push(".geostreamindex");
    PathBuf::from(s)
}

/// Builds the `.geostreamindex` sidecar by scanning the gazetteer once,
/// grouping lines into precision-4 geohash cells, delta-encoding each
/// cell's offset list, and gzip-compressing the result (spec.md §4.2.1).
fn build_index(data_path: &Path, index_path: &Path) -> Result<()> {
    let file = File::open(data_path)?;
    let mut reader = BufReader::new(file);

    let mut cells: HashMap<String, CellOffsets> = HashMap::new();
    let mut total_entries: u64 = 0;
    let mut offset: i64 = 0;

    loop {
        let mut line = String::new();
        let start = offset;
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            break;
        }
        offset += read as i64;

        if let Some(row) = parse_gazetteer_line(line.trim_end_matches(['\n', '\r'])) {
            if matches!(row.feature_class, 'P' | 'A') {
                let cell = geohash::encode(row.lat, row.lon, CELL_PRECISION);
                cells.entry(cell).or_default().push(start);
                total_entries += 1;
            }
        }
    }

    write_index(index_path, &cells, total_entries)
}

fn write_index(index_path: &Path, cells: &HashMap<String, CellOffsets>, total_entries: u64) -> Result<()> {
    let file = File::create(index_path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());

    encoder.write_all(INDEX_MAGIC)?;
    encoder.write_u16::<LittleEndian>(INDEX_VERSION)?;
    encoder.write_u8(CELL_PRECISION as u8)?;
    encoder.write_u8(0)?; // reserved
    encoder.write_u32::<LittleEndian>(cells.len() as u32)?;
    encoder.write_u64::<LittleEndian>(total_entries)?;

    for (geohash_str, offsets) in cells {
        let mut sorted = offsets.clone();
        sorted.sort_unstable();

        encoder.write_u8(geohash_str.len() as u8)?;
        encoder.write_all(geohash_str.as_bytes())?;
        encoder.write_i32::<LittleEndian>(sorted.len() as i32)?;

        let mut prev = 0i64;
        for &value in &sorted {
            let delta = value - prev;
            encoder.write_i64::<LittleEndian>(delta)?;
            prev = value;
        }
    }

    encoder.finish()?;
    Ok(())
}

fn read_index(index_path: &Path) -> Result<HashMap<String, CellOffsets>> {
    let file = File::open(index_path)?;
    let mut decoder = GzDecoder::new(file);

    let mut magic = [0u8; 4];
    decoder.read_exact(&mut magic)?;
    if &magic != INDEX_MAGIC {
        return Err(PhotoCopyError::Internal {
            message: "gazetteer index magic mismatch (corrupt .geostreamindex)".to_string(),
        });
    }
    let version = decoder.read_u16::<LittleEndian>()?;
    if version > INDEX_VERSION {
        return Err(PhotoCopyError::Internal {
            message: format!("gazetteer index version {} newer than supported {}", version, INDEX_VERSION),
        });
    }
    let header = IndexHeader {
        precision: decoder.read_u8()?,
        cell_count: {
            let _reserved = decoder.read_u8()?;
            decoder.read_u32::<LittleEndian>()?
        },
        total_entries: decoder.read_u64::<LittleEndian>()?,
    };
    let _ = header.total_entries;
    if header.precision as usize != CELL_PRECISION {
        return Err(PhotoCopyError::Internal {
            message: format!("gazetteer index precision {} != expected {}", header.precision, CELL_PRECISION),
        });
    }

    let mut cells = HashMap::with_capacity(header.cell_count as usize);
    for _ in 0..header.cell_count {
        let len = decoder.read_u8()? as usize;
        let mut buf = vec![0u8; len];
        decoder.read_exact(&mut buf)?;
        let geohash_str = String::from_utf8(buf).map_err(|e| PhotoCopyError::Internal {
            message: format!("corrupt geohash in index: {}", e),
        })?;

        let count = decoder.read_i32::<LittleEndian>()?;
        let mut offsets = Vec::with_capacity(count.max(0) as usize);
        let mut prev = 0i64;
        for _ in 0..count {
            let delta = decoder.read_i64::<LittleEndian>()?;
            prev += delta;
            offsets.push(prev);
        }
        cells.insert(geohash_str, offsets);
    }

    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn sample_gazetteer() -> String {
        // geonameid name asciiname alt lat lon feature_class feature_code country cc2 admin1 admin2 admin3 admin4 population elevation dem tz modified
        let rows = [
            ("Paris", 48.8566, 2.3522, "P", "PPLC", "FR", "11", "75", 2148327u64),
            ("Gare de l'Est", 48.8766, 2.3594, "P", "PPL", "FR", "11", "75", 0),
            ("Ile-de-France", 48.8, 2.5, "A", "ADM1", "FR", "11", "", 12000000),
        ];
        let mut out = String::new();
        for (name, lat, lon, fc, code, cc, admin1, admin2, pop) in rows {
            out.push_str(&format!(
                "1\t{name}\t{name}\t\t{lat}\t{lon}\t{fc}\t{code}\t{cc}\t\t{admin1}\t{admin2}\t\t\t{pop}\t\t\t\t2020-01-01\n"
            ));
        }
        out
    }

    fn write_gazetteer(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("gazetteer.tsv");
        let mut f = File::create(&path).unwrap();
        f.write_all(sample_gazetteer().as_bytes()).unwrap();
        path
    }

    #[test]
    fn builds_index_and_reverse_geocodes() {
        let dir = TempDir::new().unwrap();
        let data_path = write_gazetteer(&dir);
        let index = GazetteerIndex::open(&data_path, 0).unwrap();

        let loc = index.reverse_geocode(48.8566, 2.3522).unwrap().unwrap();
        assert_eq!(loc.country, "FR");
        assert!(loc.district.is_some());
    }

    #[test]
    fn city_population_threshold_excludes_small_places() {
        let dir = TempDir::new().unwrap();
        let data_path = write_gazetteer(&dir);
        let index = GazetteerIndex::open(&data_path, 0).unwrap();

        let loc = index.reverse_geocode(48.8566, 2.3522).unwrap().unwrap();
        // Paris has population above the city threshold; the small "Gare
        // de l'Est" point (population 0) must not be picked as district
        // over the much closer match; city must be Paris given its size.
        assert_eq!(loc.city.as_deref(), Some("Paris"));
    }

    #[test]
    fn null_island_returns_none() {
        let dir = TempDir::new().unwrap();
        let data_path = write_gazetteer(&dir);
        let index = GazetteerIndex::open(&data_path, 0).unwrap();
        // reverse_geocode itself doesn't special-case null island (that is
        // GeocodeService's job); verify it simply finds no nearby rows
        // far from any seeded fixture point instead.
        let loc = index.reverse_geocode(10.0, 10.0).unwrap();
        assert!(loc.is_none());
    }

    #[test]
    fn rebuilds_when_index_stale() {
        let dir = TempDir::new().unwrap();
        let data_path = write_gazetteer(&dir);
        let _ = GazetteerIndex::open(&data_path, 0).unwrap();
        let index_path = index_path_for(&data_path);
        assert!(index_path.exists());

        // Touch the data file so its mtime is newer than the index.
        std::thread::sleep(std::time::Duration::from_millis(10));
        let mut f = std::fs::OpenOptions::new().append(true).open(&data_path).unwrap();
        f.write_all(b"").unwrap();
        filetime_bump(&data_path);

        let index = GazetteerIndex::open(&data_path, 0).unwrap();
        assert!(index.reverse_geocode(48.8566, 2.3522).unwrap().is_some());
    }

    fn filetime_bump(path: &Path) {
        // Force an mtime update without adding a filetime dependency: a
        // zero-byte append plus a flush is often insufficient on some
        // filesystems, so explicitly set the modified time via std.
        let now = std::time::SystemTime::now();
        let file = File::options().write(true).open(path).unwrap();
        let _ = file.set_modified(now);
    }
}
