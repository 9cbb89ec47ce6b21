use std::fmt;

/// Why a fetch attempt failed TLS validation.
///
/// Only these two categories qualify for the one-shot insecure retry;
/// everything else the fetcher reports is a plain transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsReason {
    ExpiredCertificate,
    HostnameMismatch,
}

impl fmt::Display for TlsReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsReason::ExpiredCertificate => write!(f, "Server certificate is expired"),
            TlsReason::HostnameMismatch => write!(f, "Host name does not verify"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NavError {
    #[error("Not a valid URI: {0}")]
    InvalidUri(String),

    #[error("Cannot retrieve the content (exit code {code}): \n\n{info} \n\n{errors}")]
    Transport {
        code: i32,
        info: String,
        errors: String,
    },

    #[error("{reason} for: {authority}")]
    TlsValidation {
        reason: TlsReason,
        authority: String,
    },

    #[error(
        "Download was abandoned as it exceeded the max size ({size_mb} Mb) or time ({time_secs} s). See settings for details.\n\n{url}"
    )]
    AbandonedLimit {
        size_mb: u32,
        time_secs: u32,
        url: String,
    },

    #[error("Could not convert content for {url}: {detail}")]
    Conversion { url: String, detail: String },

    /// Rejected redirect (cross-scheme away from gemini, or hop limit).
    /// The message is composed at the rejection site.
    #[error("{0}")]
    UnsupportedRedirect(String),

    /// Missing local `about:` resource or a server 50/51 response.
    #[error("{0}")]
    ResourceNotFound(String),
}

impl NavError {
    /// Failures in these classes are user mistakes or server policy, not
    /// engine faults; the shell shows them as warnings rather than errors.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            NavError::AbandonedLimit { .. }
                | NavError::UnsupportedRedirect(_)
                | NavError::ResourceNotFound(_)
                | NavError::TlsValidation { .. }
        )
    }
}
