//! Drawing-name parsing rules.
//!
//! File names in the document tree follow the `<PART NAME>_<revision>.<ext>`
//! convention, where the revision token is one of `revA`-style markers,
//! `v1`/`V2b`-style markers, or an eight-digit date. Everything here operates
//! on the basename only; path-level fields come from [`crate::path::TreePath`].

use once_cell::sync::Lazy;
use regex::Regex;

use crate::path::TreePath;

/// Accepted revision tokens after the last `_`: `rev` + alphanumerics,
/// `v` + digits + optional letters, or exactly eight digits (YYYYMMDD).
static REVISION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:rev[0-9a-z]+|v[0-9]+[a-z]*|[0-9]{8})$").expect("revision regex")
});

/// Split a basename into (stem, extension). The extension excludes the dot
/// and is `None` when the basename has no dot.
pub fn split_name_ext(basename: &str) -> (&str, Option<&str>) {
    match basename.rfind('.') {
        Some(pos) => (&basename[..pos], Some(&basename[pos + 1..])),
        None => (basename, None),
    }
}

/// Extract the revision token from a stem, e.g. `PUMP_revA` → `revA`.
///
/// `None` when there is no `_` or the tail does not match an accepted
/// pattern (`PUMP_FINAL` has no revision).
pub fn extract_revision(stem: &str) -> Option<&str> {
    let (_, tail) = stem.rsplit_once('_')?;
    REVISION_RE.is_match(tail).then_some(tail)
}

/// Stem with the `_revision` suffix stripped, or the whole stem when no
/// revision was detected.
pub fn extract_part_name(stem: &str) -> &str {
    match extract_revision(stem) {
        Some(rev) => &stem[..stem.len() - rev.len() - 1],
        None => stem,
    }
}

/// Part of the part name after its first `_`, trimmed; the whole part name
/// when it contains no `_`. `SUB-TYPE-1_ PART TWO _revA` → `PART TWO`.
pub fn extract_core_name(stem: &str) -> &str {
    let part = extract_part_name(stem);
    match part.split_once('_') {
        Some((_, rest)) => rest.trim(),
        None => part.trim(),
    }
}

/// First path segment (top-level product folder).
pub fn product_main_type(path: &TreePath) -> &str {
    path.segments().next().unwrap_or(path.as_str())
}

/// Remaining segments joined by `/`, `None` for root-level entries.
pub fn product_sub_type(path: &TreePath) -> Option<&str> {
    path.as_str().split_once('/').map(|(_, rest)| rest)
}
