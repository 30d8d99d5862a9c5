//! Sidecar file reading: `.xmp`, `.json`, `.aae` files sharing a source
//! file's base name, consulted by the `Sidecar` pipeline step
//! (spec.md §4.3 step 3).

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use time::OffsetDateTime;

use super::{Coordinates, DateSource};

/// Fields a sidecar can contribute. Any field may be absent; the merge
/// policy decides how these combine with embedded EXIF values.
#[derive(Debug, Clone, Default)]
pub struct SidecarMetadata {
    pub datetime: Option<(OffsetDateTime, DateSource)>,
    pub coordinates: Option<Coordinates>,
}

/// Looks for `<stem>.xmp`, `<stem>.json`, `<stem>.aae` next to `main_path`
/// (same directory, matched case-insensitively) and merges whichever are
/// present and parseable. Later sidecar kinds in this list do not override
/// fields already found by an earlier one.
pub fn read_sidecars(main_path: &Path, stem: &str) -> SidecarMetadata {
    let mut result = SidecarMetadata::default();
    let Some(dir) = main_path.parent() else {
        return result;
    };

    for (ext, parser) in [
        ("xmp", parse_xmp as fn(&str) -> SidecarMetadata),
        ("json", parse_json),
        ("aae", parse_aae),
    ] {
        if let Some(path) = find_sidecar(dir, stem, ext) {
            if let Ok(contents) = fs::read_to_string(&path) {
                let parsed = parser(&contents);
                if result.datetime.is_none() {
                    result.datetime = parsed.datetime;
                }
                if result.coordinates.is_none() {
                    result.coordinates = parsed.coordinates;
                }
            }
        }
    }

    result
}

fn find_sidecar(dir: &Path, stem: &str, ext: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let target_name = format!("{}.{}", stem, ext).to_lowercase();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if name == target_name {
            return Some(entry.path());
        }
    }
    None
}

/// Minimal XMP parser: pulls `exif:DateTimeOriginal` and
/// `exif:GPSLatitude`/`exif:GPSLongitude` attributes out of the RDF/XML
/// envelope via substring search rather than a full XML parser, matching
/// what most consumer XMP sidecars actually contain (single-line
/// attributes on the `rdf:Description` element).
fn parse_xmp(contents: &str) -> SidecarMetadata {
    let mut result = SidecarMetadata::default();

    if let Some(raw) = extract_xmp_attribute(contents, "exif:DateTimeOriginal") {
        if let Some(when) = parse_xmp_datetime(&raw) {
            result.datetime = Some((when, DateSource::Sidecar));
        }
    }

    let lat = extract_xmp_attribute(contents, "exif:GPSLatitude").and_then(|s| parse_xmp_gps_coordinate(&s));
    let lon = extract_xmp_attribute(contents, "exif:GPSLongitude").and_then(|s| parse_xmp_gps_coordinate(&s));
    if let (Some(lat), Some(lon)) = (lat, lon) {
        result.coordinates = Some(Coordinates::new(lat, lon));
    }

    result
}

fn extract_xmp_attribute(contents: &str, name: &str) -> Option<String> {
    let needle = format!("{}=\"", name);
    let start = contents.find(&needle)? + needle.len();
    let end = contents[start..].find('"')? + start;
    Some(contents[start..end].to_string())
}

fn parse_xmp_datetime(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339).ok()
}

/// XMP encodes GPS coordinates as `"48,51.376N"` (degrees, decimal minutes,
/// hemisphere letter).
fn parse_xmp_gps_coordinate(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let hemisphere = raw.chars().last()?;
    let body = &raw[..raw.len() - 1];
    let (deg_str, min_str) = body.split_once(',')?;
    let degrees: f64 = deg_str.parse().ok()?;
    let minutes: f64 = min_str.parse().ok()?;
    let decimal = degrees + minutes / 60.0;
    Some(if matches!(hemisphere, 'S' | 'W') { -decimal } else { decimal })
}

#[derive(Debug, Deserialize, Default)]
struct JsonSidecar {
    #[serde(rename = "photoTakenTime")]
    photo_taken_time: Option<JsonTimestamp>,
    #[serde(rename = "geoData")]
    geo_data: Option<JsonGeoData>,
}

#[derive(Debug, Deserialize)]
struct JsonTimestamp {
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct JsonGeoData {
    latitude: f64,
    longitude: f64,
}

/// Google Takeout-style JSON sidecars: `photoTakenTime.timestamp` (Unix
/// seconds as a string) and `geoData.{latitude,longitude}`.
fn parse_json(contents: &str) -> SidecarMetadata {
    let mut result = SidecarMetadata::default();
    let Ok(parsed) = serde_json::from_str::<JsonSidecar>(contents) else {
        return result;
    };

    if let Some(ts) = parsed.photo_taken_time {
        if let Ok(seconds) = ts.timestamp.parse::<i64>() {
            if let Ok(when) = OffsetDateTime::from_unix_timestamp(seconds) {
                result.datetime = Some((when, DateSource::Sidecar));
            }
        }
    }
    if let Some(geo) = parsed.geo_data {
        if geo.latitude != 0.0 || geo.longitude != 0.0 {
            result.coordinates = Some(Coordinates::new(geo.latitude, geo.longitude));
        }
    }

    result
}

/// Apple `.aae` adjustment sidecars are plist/XML and do not carry
/// date/GPS data of their own; they exist purely so this file type is
/// recognized as a sidecar for co-movement (spec.md §3.1). Parsing
/// contributes nothing.
fn parse_aae(_contents: &str) -> SidecarMetadata {
    SidecarMetadata::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_xmp_datetime_and_gps() {
        let xmp = r#"<rdf:Description exif:DateTimeOriginal="2023-06-15T14:30:00Z" exif:GPSLatitude="48,51.396N" exif:GPSLongitude="2,21.132E"/>"#;
        let parsed = parse_xmp(xmp);
        assert!(parsed.datetime.is_some());
        let coords = parsed.coordinates.unwrap();
        assert!((coords.latitude - 48.8566).abs() < 0.001);
        assert!((coords.longitude - 2.3522).abs() < 0.001);
    }

    #[test]
    fn parses_json_takeout_style_sidecar() {
        let json = r#"{"photoTakenTime":{"timestamp":"1686839400"},"geoData":{"latitude":48.8566,"longitude":2.3522}}"#;
        let parsed = parse_json(json);
        assert!(parsed.datetime.is_some());
        assert_eq!(parsed.coordinates, Some(Coordinates::new(48.8566, 2.3522)));
    }

    #[test]
    fn json_with_null_island_geo_data_is_ignored() {
        let json = r#"{"geoData":{"latitude":0.0,"longitude":0.0}}"#;
        let parsed = parse_json(json);
        assert!(parsed.coordinates.is_none());
    }

    #[test]
    fn aae_contributes_nothing() {
        let parsed = parse_aae("<plist></plist>");
        assert!(parsed.datetime.is_none());
        assert!(parsed.coordinates.is_none());
    }
}
