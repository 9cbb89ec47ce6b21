use std::path::Path;

use url::Url;

/// How a fetched body should be handled, decided from the declared media
/// type alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaClass {
    GeminiText,
    Html,
    PlainText,
    Image,
    Binary,
}

/// Substring match on the declared type, deliberately not a MIME parse:
/// parameterized declarations like `text/html; charset=utf-8` must match
/// their base class.
pub fn classify(declared: &str) -> MediaClass {
    if declared.contains("text/gemini") {
        MediaClass::GeminiText
    } else if declared.contains("text/html") {
        MediaClass::Html
    } else if declared.contains("text/") {
        MediaClass::PlainText
    } else if declared.contains("image/") {
        MediaClass::Image
    } else {
        MediaClass::Binary
    }
}

/// Extension appended to the cached raw file for binary content, taken
/// from the URL path; `.tmp` when the path carries none.
pub fn binary_extension(url: &Url) -> String {
    Path::new(url.path())
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_else(|| ".tmp".to_string())
}
