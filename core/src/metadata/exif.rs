//! Embedded EXIF extraction: capture date, GPS coordinates, and camera
//! make/model. Used by the `DateTime` and `Location` pipeline steps
//! (spec.md §4.3).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use exif::{In, Reader, Tag, Value};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

use super::{Coordinates, DateSource};

/// Extraction failed in a way that should be reported rather than silently
/// treated as "no GPS data" (spec.md §4.3 step 2: "on extractor exception
/// sets `GpsExtractionError`").
#[derive(Debug)]
pub struct ExtractionError(pub String);

impl std::fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn read_exif(path: &Path) -> Option<exif::Exif> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    Reader::new().read_from_container(&mut reader).ok()
}

/// Tries `DateTimeOriginal` then `DateTimeDigitized`, returning the first
/// one present and parseable, tagged with its source.
pub fn extract_datetime(path: &Path) -> Option<(OffsetDateTime, DateSource)> {
    let exif = read_exif(path)?;

    for (tag, source) in [
        (Tag::DateTimeOriginal, DateSource::ExifDateTimeOriginal),
        (Tag::DateTimeDigitized, DateSource::ExifDateTimeDigitized),
    ] {
        if let Some(field) = exif.get_field(tag, In::PRIMARY) {
            let raw = field.display_value().to_string();
            if let Some(when) = parse_exif_datetime(&raw) {
                return Some((when, source));
            }
        }
    }
    None
}

/// Parses the canonical EXIF datetime string `"YYYY:MM:DD HH:MM:SS"`.
fn parse_exif_datetime(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    let (date_part, time_part) = raw.split_once(' ')?;
    let mut date_fields = date_part.splitn(3, ':');
    let year: i32 = date_fields.next()?.parse().ok()?;
    let month: u8 = date_fields.next()?.parse().ok()?;
    let day: u8 = date_fields.next()?.parse().ok()?;

    let mut time_fields = time_part.splitn(3, ':');
    let hour: u8 = time_fields.next()?.parse().ok()?;
    let minute: u8 = time_fields.next()?.parse().ok()?;
    let second: u8 = time_fields.next().unwrap_or("0").parse().ok()?;

    let month = Month::try_from(month).ok()?;
    let date = Date::from_calendar_date(year, month, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc())
}

/// Extracts `GPSLatitude`/`GPSLongitude` (with their hemisphere refs),
/// converting degrees/minutes/seconds rationals to signed decimal degrees.
/// Returns `Ok(None)` when no GPS tags are present at all (distinct from
/// `Err` which signals a tag was present but malformed).
pub fn extract_coordinates(path: &Path) -> Result<Option<Coordinates>, ExtractionError> {
    let exif = match read_exif(path) {
        Some(e) => e,
        None => return Ok(None),
    };

    let lat_field = exif.get_field(Tag::GPSLatitude, In::PRIMARY);
    let lon_field = exif.get_field(Tag::GPSLongitude, In::PRIMARY);
    let (lat_field, lon_field) = match (lat_field, lon_field) {
        (Some(a), Some(b)) => (a, b),
        _ => return Ok(None),
    };

    let lat_ref = exif
        .get_field(Tag::GPSLatitudeRef, In::PRIMARY)
        .map(|f| f.display_value().to_string())
        .unwrap_or_else(|| "N".to_string());
    let lon_ref = exif
        .get_field(Tag::GPSLongitudeRef, In::PRIMARY)
        .map(|f| f.display_value().to_string())
        .unwrap_or_else(|| "E".to_string());

    let lat = dms_to_decimal(&lat_field.value).ok_or_else(|| ExtractionError("malformed GPSLatitude".to_string()))?;
    let lon = dms_to_decimal(&lon_field.value).ok_or_else(|| ExtractionError("malformed GPSLongitude".to_string()))?;

    let signed_lat = if lat_ref.trim().starts_with('S') { -lat } else { lat };
    let signed_lon = if lon_ref.trim().starts_with('W') { -lon } else { lon };

    Ok(Some(Coordinates::new(signed_lat, signed_lon)))
}

fn dms_to_decimal(value: &Value) -> Option<f64> {
    let rationals = match value {
        Value::Rational(r) => r,
        _ => return None,
    };
    if rationals.len() < 3 {
        return None;
    }
    let degrees = rationals[0].to_f64();
    let minutes = rationals[1].to_f64();
    let seconds = rationals[2].to_f64();
    Some(degrees + minutes / 60.0 + seconds / 3600.0)
}

/// Extracts `Make`/`Model`, trimmed of the trailing NUL padding some
/// cameras embed.
pub fn extract_camera(path: &Path) -> (Option<String>, Option<String>) {
    let exif = match read_exif(path) {
        Some(e) => e,
        None => return (None, None),
    };
    let make = exif
        .get_field(Tag::Make, In::PRIMARY)
        .map(|f| f.display_value().to_string().trim_matches(['"', '\0', ' ']).to_string())
        .filter(|s| !s.is_empty());
    let model = exif
        .get_field(Tag::Model, In::PRIMARY)
        .map(|f| f.display_value().to_string().trim_matches(['"', '\0', ' ']).to_string())
        .filter(|s| !s.is_empty());
    (make, model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_exif_datetime() {
        let parsed = parse_exif_datetime("2023:06:15 14:30:00").unwrap();
        assert_eq!(parsed.year(), 2023);
        assert_eq!(parsed.month() as u8, 6);
        assert_eq!(parsed.day(), 15);
        assert_eq!(parsed.hour(), 14);
        assert_eq!(parsed.minute(), 30);
    }

    #[test]
    fn rejects_malformed_datetime() {
        assert!(parse_exif_datetime("not a date").is_none());
        assert!(parse_exif_datetime("2023:06:15").is_none());
    }

    #[test]
    fn dms_conversion_matches_known_value() {
        let value = Value::Rational(vec![
            exif::Rational { num: 48, denom: 1 },
            exif::Rational { num: 51, denom: 1 },
            exif::Rational { num: 2376, denom: 100 },
        ]);
        let decimal = dms_to_decimal(&value).unwrap();
        assert!((decimal - 48.8566).abs() < 0.001);
    }

    #[test]
    fn missing_file_yields_no_datetime_and_no_error() {
        let missing = Path::new("/nonexistent/path/does/not/exist.jpg");
        assert!(extract_datetime(missing).is_none());
        assert!(extract_coordinates(missing).unwrap().is_none());
    }
}
