//! Error taxonomy for model invocation, digest runs and startup configuration.
//!
//! Every error exposes a stable kebab-case [`kind`](DigestError::kind) so the
//! outer layer can tell retryable failures (`rate-exhausted`,
//! `transient-upstream`) from ones that need attention (`quota-exceeded`).

use thiserror::Error;

/// Terminal outcome of a failed model invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvokeError {
    /// Every attempt was throttled by the rate governor.
    #[error("rate limit exhausted; retry in {wait_secs}s")]
    RateExhausted { wait_secs: u64 },

    /// The model call kept failing for a non-quota reason.
    #[error("model call failed: {message}")]
    TransientUpstream { message: String },

    /// The provider reported a quota or billing condition. Never retried.
    #[error("model quota exceeded: {message}")]
    QuotaExceeded { message: String },
}

impl InvokeError {
    pub fn kind(&self) -> &'static str {
        match self {
            InvokeError::RateExhausted { .. } => "rate-exhausted",
            InvokeError::TransientUpstream { .. } => "transient-upstream",
            InvokeError::QuotaExceeded { .. } => "quota-exceeded",
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            InvokeError::RateExhausted { wait_secs } => Some(*wait_secs),
            _ => None,
        }
    }
}

/// Failure of a catalogue digest, or of one patch note within it.
#[derive(Debug, Error)]
pub enum DigestError {
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error("failed to fetch {url}: {message}")]
    FetchFailed { url: String, message: String },

    /// The model answered, but not with the structure that was asked for.
    #[error("could not interpret model response: {reason}")]
    ParseFailed { reason: String, raw: String },

    #[error("{url} does not look like a patch notes catalogue: {reason}")]
    NotACatalogue { url: String, reason: String },

    #[error("no patch note links found on {url}")]
    NoPatchNotesFound { url: String },

    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl DigestError {
    pub fn kind(&self) -> &'static str {
        match self {
            DigestError::Invoke(e) => e.kind(),
            DigestError::FetchFailed { .. } => "fetch-failed",
            DigestError::ParseFailed { .. } => "parse-failed",
            DigestError::NotACatalogue { .. } => "not-a-catalogue",
            DigestError::NoPatchNotesFound { .. } => "no-patch-notes",
            DigestError::InvalidUrl { .. } => "invalid-url",
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            DigestError::Invoke(e) => e.retry_after_secs(),
            _ => None,
        }
    }

    /// The unparsed model output, kept for diagnostics.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            DigestError::ParseFailed { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

/// Startup configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing Gemini API key (pass --api-key or set GEMINI_API_KEY)")]
    MissingApiKey,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
