use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use url::Url;

use crate::error::NavError;

/// Registered default port for the schemes the engine navigates.
/// Known defaults are stripped during normalization so two otherwise
/// identical URIs hash to the same content key.
fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "gemini" => Some(1965),
        "gopher" => Some(70),
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// Canonicalize a URI before any other navigation step.
///
/// The url crate already lower-cases the scheme and host and strips the
/// default port for web schemes; gemini and gopher defaults are stripped
/// here. Path and query are left untouched.
pub fn normalize(input: &str) -> Result<Url, NavError> {
    let mut parsed = Url::parse(input).map_err(|_| NavError::InvalidUri(input.to_string()))?;
    if parsed.cannot_be_a_base() && parsed.scheme() != "about" {
        return Err(NavError::InvalidUri(input.to_string()));
    }
    if let (Some(port), Some(default)) = (parsed.port(), default_port(parsed.scheme())) {
        if port == default {
            parsed.set_port(None).ok();
        }
    }
    Ok(parsed)
}

/// Resolve a redirect target against the URL that produced it. Absolute
/// targets are normalized directly; relative ones are joined first.
pub fn resolve_redirect(base: &Url, target: &str) -> Result<Url, NavError> {
    if target.contains("://") {
        normalize(target)
    } else {
        let joined = base
            .join(target)
            .map_err(|_| NavError::InvalidUri(target.to_string()))?;
        normalize(joined.as_str())
    }
}

/// Build the re-navigation URL for a status 10/11 input response: the
/// user's answer is percent-encoded into the query component.
pub fn with_user_input(url: &Url, input: &str) -> Url {
    let mut target = url.clone();
    let encoded = utf8_percent_encode(input, NON_ALPHANUMERIC).to_string();
    target.set_query(Some(&encoded));
    target
}

/// Quick syntax check used by address-bar style callers.
pub fn text_is_uri(text: &str) -> bool {
    normalize(text).is_ok()
}
