use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::TlsReason;
use crate::fetch::FetchResult;

/// Which captured stream a chunk of fetcher output came from. Unmatched
/// stderr lines become user-visible errors, unmatched stdout lines
/// informational notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Tagged classification of a two-digit Gemini status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 10/11: server wants user input (meta carries the prompt).
    Input,
    /// 20-29: a body was written to the raw output file.
    Success,
    /// 30/31: follow `final_url`.
    Redirect,
    /// 40-49: temporary server-side failure.
    TempFailure,
    /// 50/51: not found or gone.
    NotFound,
    /// Anything else, or no status at all (pure transport failure).
    Unknown,
}

pub fn classify_status(status: Option<u8>) -> StatusClass {
    match status {
        Some(10) | Some(11) => StatusClass::Input,
        Some(20..=29) => StatusClass::Success,
        Some(30) | Some(31) => StatusClass::Redirect,
        Some(40..=49) => StatusClass::TempFailure,
        Some(50) | Some(51) => StatusClass::NotFound,
        _ => StatusClass::Unknown,
    }
}

// "NN meta"; gemget prefixes the line with "Header: " when --header is on.
static STATUS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:Header:\s*)?([0-9]{2}) (.*)$").expect("regex"));
static REDIRECT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[Rr]edirected to (\S+)").expect("regex"));

const SIZE_ABANDON_MARKERS: [&str; 2] = ["max size", "larger than what is allowed"];
const TIME_ABANDON_MARKERS: [&str; 2] = ["max time", "timed out"];
const EXPIRED_CERT_MARKER: &str = "server cert is expired";
const HOST_MISMATCH_MARKER: &str = "hostname does not verify";

/// Structured view of one fetch attempt, accumulated from the fetcher's
/// stdout and stderr. Read-only once both streams have been absorbed.
#[derive(Debug, Clone)]
pub struct GeminiResponse {
    request_url: String,
    status: Option<u8>,
    meta: String,
    final_url: Option<String>,
    info: Vec<String>,
    errors: Vec<String>,
    abandoned_size: bool,
    abandoned_timeout: bool,
}

impl GeminiResponse {
    pub fn new(request_url: impl Into<String>) -> Self {
        GeminiResponse {
            request_url: request_url.into(),
            status: None,
            meta: String::new(),
            final_url: None,
            info: Vec::new(),
            errors: Vec::new(),
            abandoned_size: false,
            abandoned_timeout: false,
        }
    }

    /// Parse both streams of a fetch result in the conventional order.
    pub fn from_fetch(request_url: &str, result: &FetchResult) -> Self {
        let mut response = GeminiResponse::new(request_url);
        response.absorb(&result.stdout, Stream::Stdout);
        response.absorb(&result.stderr, Stream::Stderr);
        response
    }

    /// Feed one stream's text into the response. May be called once per
    /// stream; previously parsed fields are never reset, only extended.
    pub fn absorb(&mut self, text: &str, stream: Stream) {
        for line in text.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            if self.status.is_none() {
                if let Some(caps) = STATUS_LINE.captures(line) {
                    if let Ok(code) = caps[1].parse::<u8>() {
                        self.status = Some(code);
                        self.meta = caps[2].trim().to_string();
                        if classify_status(self.status) == StatusClass::Redirect {
                            self.final_url = Some(self.meta.clone());
                        }
                        continue;
                    }
                }
            }

            if let Some(caps) = REDIRECT_LINE.captures(line) {
                self.final_url = Some(caps[1].to_string());
                continue;
            }

            let lower = line.to_ascii_lowercase();
            if SIZE_ABANDON_MARKERS.iter().any(|m| lower.contains(m)) {
                self.abandoned_size = true;
                continue;
            }
            if TIME_ABANDON_MARKERS.iter().any(|m| lower.contains(m)) {
                self.abandoned_timeout = true;
                continue;
            }

            match stream {
                Stream::Stdout => self.info.push(line.to_string()),
                Stream::Stderr => self.errors.push(line.to_string()),
            }
        }
    }

    pub fn request_url(&self) -> &str {
        &self.request_url
    }

    pub fn status(&self) -> Option<u8> {
        self.status
    }

    pub fn status_class(&self) -> StatusClass {
        classify_status(self.status)
    }

    /// MIME type for success codes, prompt text for input codes, error
    /// text otherwise.
    pub fn meta(&self) -> &str {
        &self.meta
    }

    pub fn final_url(&self) -> Option<&str> {
        self.final_url.as_deref()
    }

    pub fn info(&self) -> &[String] {
        &self.info
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn abandoned_size(&self) -> bool {
        self.abandoned_size
    }

    pub fn abandoned_timeout(&self) -> bool {
        self.abandoned_timeout
    }

    pub fn abandoned(&self) -> bool {
        self.abandoned_size || self.abandoned_timeout
    }

    /// TLS validation failure category, judged from the first error line.
    /// Only these qualify for the insecure downgrade retry.
    pub fn tls_failure(&self) -> Option<TlsReason> {
        let first = self.errors.first()?;
        if first.contains(EXPIRED_CERT_MARKER) {
            Some(TlsReason::ExpiredCertificate)
        } else if first.contains(HOST_MISMATCH_MARKER) {
            Some(TlsReason::HostnameMismatch)
        } else {
            None
        }
    }
}
