//! `SourceFile` — a read-only reference to a filesystem file plus its
//! detected kind. Kind is derived deterministically from extension, with a
//! magic-byte fallback for ambiguous cases, per spec.md §3.1.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// The kind of a discovered source file, as spec.md §3.1 enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    StillImage,
    Video,
    SidecarXmp,
    SidecarJson,
    SidecarAae,
    GpsTrail,
    Other,
}

const STILL_IMAGE_EXTS: &[&str] = &[
    "jpg", "jpeg", "png", "heic", "heif", "raw", "cr2", "nef", "arw", "dng", "tiff", "tif", "webp",
];
const VIDEO_EXTS: &[&str] = &["mov", "mp4", "m4v", "avi", "mkv", "3gp"];
const GPS_TRAIL_EXTS: &[&str] = &["gpx", "nmea"];

/// A read-only reference to a file discovered during enumeration. Lifetime
/// spans from enumeration to the end of the run; `SourceFile` never mutates
/// the underlying path.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub kind: FileKind,
}

impl SourceFile {
    /// Builds a `SourceFile`, deriving its kind from the path's extension
    /// and, for extensionless or ambiguous files, a magic-byte sniff.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let kind = detect_kind(&path);
        SourceFile { path, kind }
    }

    /// The file stem (name without extension), matching the template
    /// language's `{name}` token semantics.
    pub fn stem(&self) -> String {
        stem_with_double_extension_awareness(&self.path)
    }

    /// The extension including the leading dot, lowercased, matching the
    /// template language's `{ext}` token semantics. Empty string if none.
    pub fn ext_with_dot(&self) -> String {
        match self.path.extension() {
            Some(ext) => format!(".{}", ext.to_string_lossy().to_lowercase()),
            None => String::new(),
        }
    }
}

/// Returns the file stem, treating well-known sidecar double extensions
/// (e.g. `photo.jpg.xmp`) as a single trailing extension so the stem
/// recovers the original media file's name (`photo`), matching the
/// related-file renaming rule in spec.md §4.5.1 step 4.
fn stem_with_double_extension_awareness(path: &Path) -> String {
    let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let lower = file_name.to_lowercase();
    for sidecar_ext in [".xmp", ".json", ".aae"] {
        if lower.ends_with(sidecar_ext) {
            let trimmed = &file_name[..file_name.len() - sidecar_ext.len()];
            // trimmed may itself still carry the media extension (photo.jpg);
            // strip that too so the stem is just "photo".
            if let Some(dot) = trimmed.rfind('.') {
                return trimmed[..dot].to_string();
            }
            return trimmed.to_string();
        }
    }
    path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or(file_name)
}

fn ext_lower(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

/// Derives a [`FileKind`] from `path`'s extension, falling back to a magic
/// byte sniff when the extension is ambiguous or absent.
pub fn detect_kind(path: &Path) -> FileKind {
    if let Some(ext) = ext_lower(path) {
        if ext == "xmp" {
            return FileKind::SidecarXmp;
        }
        if ext == "aae" {
            return FileKind::SidecarAae;
        }
        if ext == "json" {
            return FileKind::SidecarJson;
        }
        if GPS_TRAIL_EXTS.contains(&ext.as_str()) {
            return FileKind::GpsTrail;
        }
        if STILL_IMAGE_EXTS.contains(&ext.as_str()) {
            return FileKind::StillImage;
        }
        if VIDEO_EXTS.contains(&ext.as_str()) {
            return FileKind::Video;
        }
    }
    sniff_magic_bytes(path).unwrap_or(FileKind::Other)
}

/// Reads a small header and classifies by magic bytes. Used only when the
/// extension did not resolve the kind unambiguously.
fn sniff_magic_bytes(path: &Path) -> Option<FileKind> {
    let mut header = [0u8; 12];
    let mut file = File::open(path).ok()?;
    let read = file.read(&mut header).ok()?;
    if read < 4 {
        return None;
    }
    if &header[0..2] == b"\xff\xd8" {
        return Some(FileKind::StillImage); // JPEG SOI marker
    }
    if &header[0..8] == b"\x89PNG\r\n\x1a\n" {
        return Some(FileKind::StillImage);
    }
    if read >= 12 && &header[4..8] == b"ftyp" {
        let brand = &header[8..12];
        if matches!(brand, b"heic" | b"heif" | b"mif1") {
            return Some(FileKind::StillImage);
        }
        if matches!(brand, b"qt  " | b"M4V " | b"isom" | b"MSNV") {
            return Some(FileKind::Video);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn classifies_by_extension() {
        assert_eq!(detect_kind(Path::new("a.JPG")), FileKind::StillImage);
        assert_eq!(detect_kind(Path::new("a.mov")), FileKind::Video);
        assert_eq!(detect_kind(Path::new("a.jpg.xmp")), FileKind::SidecarXmp);
        assert_eq!(detect_kind(Path::new("a.jpg.json")), FileKind::SidecarJson);
        assert_eq!(detect_kind(Path::new("a.aae")), FileKind::SidecarAae);
        assert_eq!(detect_kind(Path::new("track.gpx")), FileKind::GpsTrail);
    }

    #[test]
    fn stem_strips_double_extension() {
        let sf = SourceFile::from_path(PathBuf::from("IMG_1234.jpg.xmp"));
        assert_eq!(sf.stem(), "IMG_1234");
        let sf = SourceFile::from_path(PathBuf::from("IMG_1234.JPG"));
        assert_eq!(sf.stem(), "IMG_1234");
    }

    #[test]
    fn ext_with_dot_is_lowercased() {
        let sf = SourceFile::from_path(PathBuf::from("IMG_1234.JPG"));
        assert_eq!(sf.ext_with_dot(), ".jpg");
    }

    #[test]
    fn sniffs_magic_bytes_when_extension_unknown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mystery.bin");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"\xff\xd8\xff\xe0rest-of-jpeg").unwrap();
        assert_eq!(detect_kind(&path), FileKind::StillImage);
    }

    #[test]
    fn unknown_extension_without_magic_bytes_is_other() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("readme.txt");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"just some text").unwrap();
        assert_eq!(detect_kind(&path), FileKind::Other);
    }
}
