//! Destination template language (spec.md §4.4.1): literal segments plus
//! `{token}`, `{token:fallback}`, and `{token?predicate:else}` forms.

use time::Month;

use crate::metadata::EnrichedFile;

const KNOWN_TOKENS: &[&str] = &[
    "year", "month", "day", "hour", "minute", "name", "ext", "directory", "camera_make", "camera_model", "city",
    "district", "county", "state", "country",
];

const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// A single parsed piece of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Plain(String),
    Fallback(String, String),
    Conditional(String, Predicate, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Predicate {
    HasGps,
    HasLocation,
    HasCity,
    HasDate,
}

fn parse_predicate(name: &str) -> Option<Predicate> {
    match name {
        "hasGps" => Some(Predicate::HasGps),
        "hasLocation" => Some(Predicate::HasLocation),
        "hasCity" => Some(Predicate::HasCity),
        "hasDate" => Some(Predicate::HasDate),
        _ => None,
    }
}

/// Case transformation applied to each path segment after token
/// substitution (spec.md §4.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathCasing {
    Preserve,
    Lower,
    Title,
}

fn apply_casing(segment: &str, casing: PathCasing) -> String {
    match casing {
        PathCasing::Preserve => segment.to_string(),
        PathCasing::Lower => segment.to_lowercase(),
        PathCasing::Title => segment
            .split(' ')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" "),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    UnbalancedBraces,
    UnknownToken { token: String, suggestion: Option<String> },
    EmptyToken,
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateError::UnbalancedBraces => write!(f, "unbalanced braces in template"),
            TemplateError::UnknownToken { token, suggestion: Some(s) } => {
                write!(f, "unknown token '{}' (did you mean '{}'?)", token, s)
            }
            TemplateError::UnknownToken { token, suggestion: None } => write!(f, "unknown token '{}'", token),
            TemplateError::EmptyToken => write!(f, "empty token `{{}}`"),
        }
    }
}

/// Parses `template` into a sequence of pieces, validating brace balance
/// and token names up front.
fn parse(template: &str) -> Result<Vec<Piece>, TemplateError> {
    let mut pieces = Vec::new();
    let mut chars = template.char_indices().peekable();
    let mut literal = String::new();

    while let Some((_, c)) = chars.next() {
        if c == '{' {
            if !literal.is_empty() {
                pieces.push(Piece::Literal(std::mem::take(&mut literal)));
            }
            let mut body = String::new();
            let mut closed = false;
            for (_, c2) in chars.by_ref() {
                if c2 == '}' {
                    closed = true;
                    break;
                }
                if c2 == '{' {
                    return Err(TemplateError::UnbalancedBraces);
                }
                body.push(c2);
            }
            if !closed {
                return Err(TemplateError::UnbalancedBraces);
            }
            pieces.push(parse_token_body(&body)?);
        } else if c == '}' {
            return Err(TemplateError::UnbalancedBraces);
        } else {
            literal.push(c);
        }
    }
    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    Ok(pieces)
}

fn parse_token_body(body: &str) -> Result<Piece, TemplateError> {
    if body.is_empty() {
        return Err(TemplateError::EmptyToken);
    }
    if let Some((token, rest)) = body.split_once('?') {
        let (predicate_name, else_literal) = rest.split_once(':').unwrap_or((rest, ""));
        validate_token(token)?;
        let predicate = parse_predicate(predicate_name).ok_or_else(|| TemplateError::UnknownToken {
            token: predicate_name.to_string(),
            suggestion: None,
        })?;
        return Ok(Piece::Conditional(token.to_string(), predicate, else_literal.to_string()));
    }
    if let Some((token, fallback)) = body.split_once(':') {
        validate_token(token)?;
        return Ok(Piece::Fallback(token.to_string(), fallback.to_string()));
    }
    validate_token(body)?;
    Ok(Piece::Plain(body.to_string()))
}

fn validate_token(token: &str) -> Result<(), TemplateError> {
    if KNOWN_TOKENS.contains(&token) {
        return Ok(());
    }
    Err(TemplateError::UnknownToken { token: token.to_string(), suggestion: suggest_token(token) })
}

/// Offers a correction for a near-miss token name via single-edit
/// Damerau-Levenshtein distance (spec.md §4.4.1's worked typo list).
fn suggest_token(token: &str) -> Option<String> {
    KNOWN_TOKENS
        .iter()
        .find(|candidate| damerau_levenshtein(token, candidate) == 1)
        .map(|s| s.to_string())
}

/// Classic Damerau-Levenshtein edit distance (insert/delete/substitute/
/// transpose), O(n*m) dynamic-programming table. Token names are short
/// enough that this is never a hot path.
fn damerau_levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (la, lb) = (a.len(), b.len());

    let mut d = vec![vec![0usize; lb + 1]; la + 1];
    for (i, row) in d.iter_mut().enumerate().take(la + 1) {
        row[0] = i;
    }
    for j in 0..=lb {
        d[0][j] = j;
    }

    for i in 1..=la {
        for j in 1..=lb {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            d[i][j] = (d[i - 1][j] + 1).min(d[i][j - 1] + 1).min(d[i - 1][j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                d[i][j] = d[i][j].min(d[i - 2][j - 2] + 1);
            }
        }
    }
    d[la][lb]
}

/// Replaces unsafe filesystem characters and control characters within a
/// single token's substituted value (spec.md §4.4.1).
fn sanitize_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) || c.is_control() { '_' } else { c })
        .collect()
}

/// Missing-value substitution for a plain (non-fallback, non-conditional)
/// token whose value resolves empty: the literal `_`, matching spec.md
/// §8 scenario 2 (`C.heic` without GPS resolves `{country}` to `_` even
/// though no explicit fallback was written in that template).
const MISSING_VALUE_DEFAULT: &str = "_";

fn resolve_token(token: &str, file: &EnrichedFile, source_relative_dir: Option<&str>) -> Option<String> {
    let metadata = &file.metadata;
    match token {
        "year" => (!metadata.datetime.is_unknown()).then(|| format!("{:04}", metadata.datetime.when.year())),
        "month" => (!metadata.datetime.is_unknown()).then(|| format!("{:02}", month_number(metadata.datetime.when.month()))),
        "day" => (!metadata.datetime.is_unknown()).then(|| format!("{:02}", metadata.datetime.when.day())),
        "hour" => (!metadata.datetime.is_unknown()).then(|| format!("{:02}", metadata.datetime.when.hour())),
        "minute" => (!metadata.datetime.is_unknown()).then(|| format!("{:02}", metadata.datetime.when.minute())),
        "name" => Some(file.source.stem()),
        "ext" => Some(file.source.ext_with_dot()),
        "directory" => source_relative_dir.map(|s| s.to_string()).filter(|s| !s.is_empty()),
        "camera_make" => metadata.camera_make.clone(),
        "camera_model" => metadata.camera_model.clone(),
        "city" => metadata.location.as_ref().and_then(|l| l.city.clone()),
        "district" => metadata.location.as_ref().and_then(|l| l.district.clone()),
        "county" => metadata.location.as_ref().and_then(|l| l.county.clone()),
        "state" => metadata.location.as_ref().and_then(|l| l.state.clone()),
        "country" => metadata.location.as_ref().map(|l| l.country.clone()),
        _ => None,
    }
}

fn month_number(month: Month) -> u8 {
    month as u8
}

fn predicate_holds(predicate: Predicate, file: &EnrichedFile) -> bool {
    let metadata = &file.metadata;
    match predicate {
        Predicate::HasGps => metadata.coordinates.is_some(),
        Predicate::HasLocation => metadata.location.is_some(),
        Predicate::HasCity => metadata.location.as_ref().is_some_and(|l| l.city.is_some()),
        Predicate::HasDate => !metadata.datetime.is_unknown(),
    }
}

/// Validates `template` without expanding it (used by argument validators
/// before any file enumeration begins).
pub fn validate(template: &str) -> Result<(), TemplateError> {
    parse(template).map(|_| ())
}

/// Expands `template` against `file`, returning the substituted path
/// string with casing applied per-segment. The result is guaranteed free
/// of unresolved `{...}` tokens by construction (every `Piece` other than
/// `Literal` is fully substituted before segments are joined).
pub fn expand(
    template: &str,
    file: &EnrichedFile,
    source_relative_dir: Option<&str>,
    casing: PathCasing,
) -> Result<String, TemplateError> {
    let pieces = parse(template)?;
    let mut expanded = String::new();

    for piece in pieces {
        match piece {
            Piece::Literal(text) => expanded.push_str(&text),
            Piece::Plain(token) => {
                let value = resolve_token(&token, file, source_relative_dir)
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| MISSING_VALUE_DEFAULT.to_string());
                expanded.push_str(&sanitize_value(&value));
            }
            Piece::Fallback(token, fallback) => {
                let value = resolve_token(&token, file, source_relative_dir).filter(|v| !v.is_empty()).unwrap_or(fallback);
                expanded.push_str(&sanitize_value(&value));
            }
            Piece::Conditional(token, predicate, else_literal) => {
                let value = if predicate_holds(predicate, file) {
                    resolve_token(&token, file, source_relative_dir).unwrap_or(else_literal)
                } else {
                    else_literal
                };
                expanded.push_str(&sanitize_value(&value));
            }
        }
    }

    let cased: Vec<String> = expanded.split('/').map(|segment| apply_casing(segment, casing)).collect();
    Ok(cased.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DateSource, FileDateTime, FileMetadata, LocationData, UnknownReason};
    use crate::source_file::{FileKind, SourceFile};
    use time::macros::datetime;

    fn sample_file(with_location: bool) -> EnrichedFile {
        let mut metadata = FileMetadata::blank();
        metadata.datetime = FileDateTime { when: datetime!(2023-06-15 14:30:00 UTC), source: DateSource::ExifDateTimeOriginal };
        metadata.unknown_reason = UnknownReason::None;
        if with_location {
            metadata.location = Some(LocationData {
                district: Some("Paris".to_string()),
                city: Some("Paris".to_string()),
                county: None,
                state: None,
                country: "FR".to_string(),
                population: Some(2_000_000),
            });
        }
        EnrichedFile {
            source: SourceFile { path: "A.jpg".into(), kind: FileKind::StillImage },
            metadata,
            related: Vec::new(),
        }
    }

    #[test]
    fn expands_date_template() {
        let file = sample_file(false);
        let result = expand("dst/{year}/{month}/{name}{ext}", &file, None, PathCasing::Preserve).unwrap();
        assert_eq!(result, "dst/2023/06/A.jpg");
    }

    #[test]
    fn geocoded_template_with_fallback_resolves_city() {
        let file = sample_file(true);
        let result = expand("dst/{country}/{city:Unknown}/{name}{ext}", &file, None, PathCasing::Preserve).unwrap();
        assert_eq!(result, "dst/FR/Paris/A.jpg");
    }

    #[test]
    fn missing_country_without_fallback_uses_underscore() {
        let file = sample_file(false);
        let result = expand("dst/{country}/{city:Unknown}/{name}{ext}", &file, None, PathCasing::Preserve).unwrap();
        assert_eq!(result, "dst/_/Unknown/A.jpg");
    }

    #[test]
    fn conditional_predicate_switches_branch() {
        let with_gps = sample_file(true);
        let without_gps = sample_file(false);
        let template = "dst/{city?hasGps:nogps}/{name}{ext}";
        assert_eq!(expand(template, &with_gps, None, PathCasing::Preserve).unwrap(), "dst/Paris/A.jpg");
        assert_eq!(expand(template, &without_gps, None, PathCasing::Preserve).unwrap(), "dst/nogps/A.jpg");
    }

    #[test]
    fn rejects_unbalanced_braces() {
        assert_eq!(validate("dst/{year/{name}{ext}"), Err(TemplateError::UnbalancedBraces));
    }

    #[test]
    fn unknown_token_suggests_correction() {
        let err = validate("dst/{yeaar}/{name}{ext}").unwrap_err();
        match err {
            TemplateError::UnknownToken { token, suggestion } => {
                assert_eq!(token, "yeaar");
                assert_eq!(suggestion, Some("year".to_string()));
            }
            other => panic!("expected UnknownToken, got {:?}", other),
        }
    }

    #[test]
    fn casing_policy_applies_per_segment() {
        let file = sample_file(true);
        let result = expand("dst/{city}/{name}{ext}", &file, None, PathCasing::Lower).unwrap();
        assert_eq!(result, "dst/paris/a.jpg");
    }

    #[test]
    fn no_unresolved_tokens_or_unsafe_characters_survive() {
        let file = sample_file(true);
        let result = expand("dst/{district}/{name}{ext}", &file, None, PathCasing::Preserve).unwrap();
        assert!(!result.contains('{') && !result.contains('}'));
        assert!(!result.chars().any(|c| UNSAFE_CHARS.contains(&c)));
    }
}
