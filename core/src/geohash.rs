//! Geohash & spatial primitives.
//!
//! Base-32 geohash encode/decode, neighbor cells, Haversine distance,
//! point-in-polygon testing over quantized coordinates, and bounding boxes.
//! Every other geospatial subsystem (`geocode`) is built on top of this
//! module; it has no dependencies on the rest of the crate.

use crate::{PhotoCopyError, Result};

/// Geohash base-32 alphabet (no `a`, `i`, `l`, `o`).
const ALPHABET: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Mean Earth radius in kilometers, used by [`haversine`].
pub const EARTH_RADIUS_KM: f64 = 6371.0;

fn char_to_index(c: u8) -> Option<u8> {
    ALPHABET.iter().position(|&a| a == c).map(|i| i as u8)
}

/// A latitude/longitude bounding rectangle, as returned by [`decode_bounds`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Bounds {
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

/// Encodes a coordinate into a base-32 geohash string of the given
/// precision (character length), alternately bisecting longitude then
/// latitude, 5 bits per character.
///
/// `precision` is clamped to `[1, 12]` per spec.md §4.1.
pub fn encode(lat: f64, lon: f64, precision: usize) -> String {
    let precision = precision.clamp(1, 12);
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);

    let mut out = Vec::with_capacity(precision);
    let mut bit = 0u8;
    let mut ch = 0u8;
    let mut even_bit = true; // longitude bit first

    while out.len() < precision {
        if even_bit {
            let mid = (lon_range.0 + lon_range.1) / 2.0;
            if lon >= mid {
                ch |= 1 << (4 - bit);
                lon_range.0 = mid;
            } else {
                lon_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if lat >= mid {
                ch |= 1 << (4 - bit);
                lat_range.0 = mid;
            } else {
                lat_range.1 = mid;
            }
        }
        even_bit = !even_bit;

        if bit < 4 {
            bit += 1;
        } else {
            out.push(ALPHABET[ch as usize]);
            bit = 0;
            ch = 0;
        }
    }

    String::from_utf8(out).expect("alphabet is ASCII")
}

/// Decodes a geohash string into the bounding rectangle of its cell.
pub fn decode_bounds(geohash: &str) -> Result<Bounds> {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut even_bit = true;

    for c in geohash.bytes() {
        let idx = char_to_index(c.to_ascii_lowercase()).ok_or_else(|| {
            PhotoCopyError::Validation {
                message: format!("invalid geohash character: {}", c as char),
            }
        })?;
        for n in (0..5).rev() {
            let bit = (idx >> n) & 1;
            if even_bit {
                let mid = (lon_range.0 + lon_range.1) / 2.0;
                if bit == 1 {
                    lon_range.0 = mid;
                } else {
                    lon_range.1 = mid;
                }
            } else {
                let mid = (lat_range.0 + lat_range.1) / 2.0;
                if bit == 1 {
                    lat_range.0 = mid;
                } else {
                    lat_range.1 = mid;
                }
            }
            even_bit = !even_bit;
        }
    }

    Ok(Bounds {
        min_lat: lat_range.0,
        max_lat: lat_range.1,
        min_lon: lon_range.0,
        max_lon: lon_range.1,
    })
}

/// Returns the midpoint of the cell decoded from `geohash`.
pub fn center(geohash: &str) -> Result<(f64, f64)> {
    Ok(decode_bounds(geohash)?.center())
}

/// The eight compass-point neighbor directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    N,
    Ne,
    E,
    Se,
    S,
    Sw,
    W,
    Nw,
}

pub const ALL_DIRECTIONS: [Direction; 8] = [
    Direction::N,
    Direction::Ne,
    Direction::E,
    Direction::Se,
    Direction::S,
    Direction::Sw,
    Direction::W,
    Direction::Nw,
];

/// Returns the up-to-eight neighbor cells of `geohash` at the same
/// precision. Longitude wraps across +/-180; neighbors that would cross a
/// pole are omitted (per spec.md §4.1).
pub fn neighbors(geohash: &str) -> Result<Vec<(Direction, String)>> {
    let bounds = decode_bounds(geohash)?;
    let precision = geohash.len();
    let (lat, lon) = bounds.center();
    let lat_span = bounds.max_lat - bounds.min_lat;
    let lon_span = bounds.max_lon - bounds.min_lon;

    let mut out = Vec::with_capacity(8);
    for dir in ALL_DIRECTIONS {
        let (dlat, dlon) = match dir {
            Direction::N => (1.0, 0.0),
            Direction::Ne => (1.0, 1.0),
            Direction::E => (0.0, 1.0),
            Direction::Se => (-1.0, 1.0),
            Direction::S => (-1.0, 0.0),
            Direction::Sw => (-1.0, -1.0),
            Direction::W => (0.0, -1.0),
            Direction::Nw => (1.0, -1.0),
        };
        let n_lat = lat + dlat * lat_span;
        if n_lat > 90.0 || n_lat < -90.0 {
            continue;
        }
        let mut n_lon = lon + dlon * lon_span;
        if n_lon > 180.0 {
            n_lon -= 360.0;
        } else if n_lon < -180.0 {
            n_lon += 360.0;
        }
        out.push((dir, encode(n_lat, n_lon, precision)));
    }
    Ok(out)
}

/// Great-circle distance between two points in kilometers.
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1r, lat2r) = (lat1.to_radians(), lat2.to_radians());
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1r.cos() * lat2r.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Clamps latitude to [-90, 90] and normalizes longitude by wrapping into
/// [-180, 180], per spec.md §4.1's point-in-polygon preprocessing rule.
pub fn normalize(lat: f64, lon: f64) -> (f64, f64) {
    let lat = lat.clamp(-90.0, 90.0);
    let mut lon = lon % 360.0;
    if lon > 180.0 {
        lon -= 360.0;
    } else if lon < -180.0 {
        lon += 360.0;
    }
    (lat, lon)
}

/// A polygon ring as quantized `(lat, lon)` pairs encoding degrees x 100,
/// recoverable to +/-0.01 degree, as used by the country-boundary index.
pub type QuantizedRing = Vec<(i16, i16)>;

fn dequantize(p: (i16, i16)) -> (f64, f64) {
    (p.0 as f64 / 100.0, p.1 as f64 / 100.0)
}

/// Ray-cast (even-odd) point-in-ring test over quantized vertices.
pub fn ring_contains(ring: &QuantizedRing, lat: f64, lon: f64) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let n = ring.len();
    let mut j = n - 1;
    for i in 0..n {
        let (yi, xi) = dequantize(ring[i]);
        let (yj, xj) = dequantize(ring[j]);
        let intersects = ((yi > lat) != (yj > lat))
            && (lon < (xj - xi) * (lat - yi) / (yj - yi) + xi);
        if intersects {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// A polygon: one exterior ring plus zero or more hole rings. Contains a
/// point if the exterior ring contains it and no hole does.
#[derive(Debug, Clone, Default)]
pub struct Polygon {
    pub exterior: QuantizedRing,
    pub holes: Vec<QuantizedRing>,
}

impl Polygon {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        let (lat, lon) = normalize(lat, lon);
        if !ring_contains(&self.exterior, lat, lon) {
            return false;
        }
        !self.holes.iter().any(|hole| ring_contains(hole, lat, lon))
    }
}

/// Packs a geohash string of length 1-6 into a `u32`: the top 3 bits hold
/// the character length, the remaining 29 bits hold the left-aligned
/// base-32 sequence (5 bits per character).
pub fn encode_u32(geohash: &str) -> Result<u32> {
    let len = geohash.len();
    if len == 0 || len > 6 {
        return Err(PhotoCopyError::Validation {
            message: format!("geohash length {} out of range [1,6] for u32 packing", len),
        });
    }
    let mut bits: u32 = 0;
    for c in geohash.bytes() {
        let idx = char_to_index(c.to_ascii_lowercase()).ok_or_else(|| PhotoCopyError::Validation {
            message: format!("invalid geohash character: {}", c as char),
        })?;
        bits = (bits << 5) | idx as u32;
    }
    // Left-align the 5*len bits within the low 29 bits.
    let shift = 29 - 5 * len;
    let packed = ((len as u32) << 29) | (bits << shift);
    Ok(packed)
}

/// Inverse of [`encode_u32`].
pub fn decode_u32(packed: u32) -> Result<String> {
    let len = (packed >> 29) as usize;
    if len == 0 || len > 6 {
        return Err(PhotoCopyError::Validation {
            message: format!("corrupt packed geohash: length field {} out of range", len),
        });
    }
    let shift = 29 - 5 * len;
    let mask: u32 = (1u32 << (5 * len)) - 1;
    let bits = (packed >> shift) & mask;

    let mut out = Vec::with_capacity(len);
    for i in (0..len).rev() {
        let idx = (bits >> (5 * i)) & 0x1f;
        out.push(ALPHABET[idx as usize]);
    }
    Ok(String::from_utf8(out).expect("alphabet is ASCII"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_known_value() {
        // Gare de l'Est, Paris area; well-known geohash reference value.
        let gh = encode(48.858, 2.294, 7);
        assert_eq!(gh.len(), 7);
        assert!(gh.starts_with("u09tv"));
    }

    #[test]
    fn round_trip_center_within_bounds() {
        for (lat, lon) in [(48.8566, 2.3522), (-33.8688, 151.2093), (0.0, 0.0), (89.9, 179.9)] {
            for precision in 1..=10 {
                let gh = encode(lat, lon, precision);
                let bounds = decode_bounds(&gh).unwrap();
                assert!(bounds.contains(lat, lon), "precision {} failed for ({}, {})", precision, lat, lon);
                let (clat, clon) = center(&gh).unwrap();
                assert!(bounds.contains(clat, clon));
            }
        }
    }

    #[test]
    fn u32_packing_round_trips() {
        for s in ["u", "u0", "u09", "u09t", "u09tv", "gbsuv"] {
            let packed = encode_u32(s).unwrap();
            let back = decode_u32(packed).unwrap();
            assert_eq!(s, back);
        }
    }

    #[test]
    fn u32_packing_rejects_out_of_range_length() {
        assert!(encode_u32("").is_err());
        assert!(encode_u32("1234567").is_err());
    }

    #[test]
    fn haversine_symmetry_and_identity() {
        let a = (48.8566, 2.3522);
        let b = (40.7128, -74.0060);
        assert!((haversine(a.0, a.1, b.0, b.1) - haversine(b.0, b.1, a.0, a.1)).abs() < 1e-9);
        assert!(haversine(a.0, a.1, a.0, a.1) < 1e-9);
    }

    #[test]
    fn haversine_paris_new_york_is_plausible() {
        let km = haversine(48.8566, 2.3522, 40.7128, -74.0060);
        assert!((5500.0..5900.0).contains(&km), "got {}", km);
    }

    #[test]
    fn neighbors_are_eight_away_from_poles() {
        let gh = encode(48.8566, 2.3522, 4);
        let ns = neighbors(&gh).unwrap();
        assert_eq!(ns.len(), 8);
    }

    #[test]
    fn neighbors_near_pole_are_fewer() {
        let gh = encode(89.95, 10.0, 4);
        let ns = neighbors(&gh).unwrap();
        assert!(ns.len() < 8);
    }

    #[test]
    fn ring_contains_square() {
        // A 1-degree square around the origin, quantized at x100.
        let ring: QuantizedRing = vec![(-100, -100), (-100, 100), (100, 100), (100, -100)];
        assert!(ring_contains(&ring, 0.0, 0.0));
        assert!(!ring_contains(&ring, 5.0, 5.0));
    }

    #[test]
    fn polygon_excludes_holes() {
        let exterior: QuantizedRing = vec![(-500, -500), (-500, 500), (500, 500), (500, -500)];
        let hole: QuantizedRing = vec![(-100, -100), (-100, 100), (100, 100), (100, -100)];
        let poly = Polygon { exterior, holes: vec![hole] };
        assert!(poly.contains(3.0, 3.0));
        assert!(!poly.contains(0.0, 0.0));
    }

    #[test]
    fn normalize_wraps_longitude_and_clamps_latitude() {
        assert_eq!(normalize(100.0, 0.0), (90.0, 0.0));
        let (_, lon) = normalize(0.0, 190.0);
        assert!((lon - (-170.0)).abs() < 1e-9);
    }
}
