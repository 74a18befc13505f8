//! Content-type and extension normalization.
//!
//! Registry lookups, deny checks, and collision detection all key on the
//! folded form produced here, so the rules must be applied uniformly:
//! a deny check and a resolution check must never disagree on the key.

use url::Url;

/// Fallback type for resources with no usable declared content type.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Normalize a declared content-type string: truncate at the first `;`
/// (dropping parameters such as `charset=`) and trim whitespace.
/// Missing or empty input maps to `application/octet-stream`.
pub fn normalize_content_type(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return OCTET_STREAM.to_string();
    };
    let head = match raw.find(';') {
        Some(pos) => &raw[..pos],
        None => raw,
    };
    let head = head.trim();
    if head.is_empty() {
        OCTET_STREAM.to_string()
    } else {
        head.to_string()
    }
}

/// Fold a key for case- and accent-insensitive comparison.
///
/// Locale-stable: Unicode lowercasing plus a latin accent strip, so that
/// `Text/HTML`, `text/html` and `tëxt/html` all land on the same key.
pub fn fold_key(s: &str) -> String {
    s.chars()
        .flat_map(char::to_lowercase)
        .map(strip_accent)
        .collect()
}

fn strip_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

/// Extract the file extension from a URL path: the portion after the last
/// `.` of the final path segment, already folded. `None` when the segment
/// has no dot, or the dot is leading/trailing.
pub fn extension_of(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let pos = segment.rfind('.')?;
    let ext = &segment[pos + 1..];
    if ext.is_empty() || pos == 0 {
        return None;
    }
    Some(fold_key(ext))
}

/// The two format signals carried by a resource before its bytes are seen:
/// the declared content type (normalized) and the URL's file extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentKind {
    pub content_type: String,
    pub extension: Option<String>,
}

impl ContentKind {
    pub fn of(location: &Url, declared: Option<&str>) -> Self {
        Self {
            content_type: normalize_content_type(declared),
            extension: extension_of(location),
        }
    }
}
