//! Error types for the manifiestos-bot library.
//!
//! A single fatal error type, [`ManifestError`], covers every stage of the
//! pipeline. Unlike a multi-page conversion there is no partial success to
//! report: one photo yields one row or nothing, so every stage fails fast and
//! the error surfaces unchanged to the orchestrator.
//!
//! Variants are grouped by the stage that raises them:
//!
//! | Stage | Variants |
//! |-------|----------|
//! | acquire | [`Acquisition`], [`Transport`], [`DownloadTimeout`] |
//! | enhance | [`Enhancement`] |
//! | invoke  | [`ModelApi`], [`ModelTransport`], [`ModelRateLimited`], [`ProviderNotConfigured`] |
//! | decode  | [`Decode`] |
//! | sink    | [`Sink`] |
//!
//! [`Acquisition`]: ManifestError::Acquisition
//! [`Transport`]: ManifestError::Transport
//! [`DownloadTimeout`]: ManifestError::DownloadTimeout
//! [`Enhancement`]: ManifestError::Enhancement
//! [`ModelApi`]: ManifestError::ModelApi
//! [`ModelTransport`]: ManifestError::ModelTransport
//! [`ModelRateLimited`]: ManifestError::ModelRateLimited
//! [`ProviderNotConfigured`]: ManifestError::ProviderNotConfigured
//! [`Decode`]: ManifestError::Decode
//! [`Sink`]: ManifestError::Sink

use thiserror::Error;

/// Maximum number of characters of a remote response body kept in an error.
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// HTTP statuses the model stage treats as transient.
const TRANSIENT_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// All errors returned by the manifiestos-bot library.
#[derive(Debug, Error)]
pub enum ManifestError {
    // ── Acquisition errors ───────────────────────────────────────────────
    /// The media could not be requested at all (missing credentials, missing
    /// local file).
    #[error("Cannot acquire media: {reason}")]
    Acquisition { reason: String },

    /// The media host answered with a non-success status or the connection
    /// failed.
    #[error("Failed to download '{url}': {reason}")]
    Transport { url: String, reason: String },

    /// The media download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Image errors ─────────────────────────────────────────────────────
    /// The downloaded bytes are not a decodable image.
    #[error("Image enhancement failed: {detail}")]
    Enhancement { detail: String },

    // ── Model errors ─────────────────────────────────────────────────────
    /// The configured provider could not be created (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The model API answered with an error. `status` is `None` when the
    /// backend reported a failure without an HTTP status.
    #[error("Model API error{}: {body}", fmt_status(.status))]
    ModelApi { status: Option<u16>, body: String },

    /// No response was received from the model API (timeout, connection
    /// refused, reset).
    #[error("Model API unreachable: {reason}")]
    ModelTransport { reason: String },

    /// Every attempt hit a transient failure (rate limit / unavailable).
    #[error("Model still rate-limited or unavailable after {attempts} attempts")]
    ModelRateLimited {
        attempts: u32,
        last_status: Option<u16>,
    },

    // ── Decode errors ────────────────────────────────────────────────────
    /// The model output contained no parsable JSON object.
    #[error("Could not decode model output: {detail} (output starts with {snippet:?})")]
    Decode { detail: String, snippet: String },

    // ── Sink errors ──────────────────────────────────────────────────────
    /// The tabular sink rejected the row.
    #[error("Failed to append row to sink: {reason}")]
    Sink { reason: String },

    // ── Config errors ────────────────────────────────────────────────────
    /// Builder validation failed or a required variable is missing.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ManifestError {
    /// Build a [`ManifestError::ModelApi`] with the body cut to
    /// [`MAX_ERROR_BODY_CHARS`].
    pub fn model_api(status: Option<u16>, body: impl AsRef<str>) -> Self {
        ManifestError::ModelApi {
            status,
            body: truncate_chars(body.as_ref(), MAX_ERROR_BODY_CHARS),
        }
    }

    /// Whether the model stage should retry after this error.
    ///
    /// Rate limits, gateway errors and transport failures are transient;
    /// everything else is fatal.
    pub fn is_transient(&self) -> bool {
        match self {
            ManifestError::ModelApi { status: Some(s), .. } => TRANSIENT_STATUSES.contains(s),
            ManifestError::ModelTransport { .. } => true,
            _ => false,
        }
    }

    /// Whether retries were exhausted on a transient model failure.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ManifestError::ModelRateLimited { .. })
    }

    /// HTTP status carried by a model error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ManifestError::ModelApi { status, .. } => *status,
            ManifestError::ModelRateLimited { last_status, .. } => *last_status,
            _ => None,
        }
    }
}

fn fmt_status(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" (HTTP {s})"),
        None => String::new(),
    }
}

/// Cut `s` to at most `max` characters, appending `…` when shortened.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display() {
        let e = ManifestError::ModelRateLimited {
            attempts: 4,
            last_status: Some(429),
        };
        assert!(e.to_string().contains("4 attempts"), "got: {e}");
        assert!(e.is_rate_limited());
        assert_eq!(e.status(), Some(429));
    }

    #[test]
    fn model_api_display_with_status() {
        let e = ManifestError::model_api(Some(400), "bad request");
        let msg = e.to_string();
        assert!(msg.contains("HTTP 400"), "got: {msg}");
        assert!(msg.contains("bad request"));
    }

    #[test]
    fn model_api_display_without_status() {
        let e = ManifestError::model_api(None, "connection reset");
        assert!(!e.to_string().contains("HTTP"));
    }

    #[test]
    fn model_api_body_is_truncated() {
        let long = "x".repeat(2_000);
        match ManifestError::model_api(Some(500), &long) {
            ManifestError::ModelApi { body, .. } => {
                assert_eq!(body.chars().count(), MAX_ERROR_BODY_CHARS + 1);
                assert!(body.ends_with('…'));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn transient_classification() {
        for s in [429, 502, 503, 504] {
            assert!(ManifestError::model_api(Some(s), "").is_transient(), "{s}");
        }
        for s in [400, 401, 403, 404, 500] {
            assert!(!ManifestError::model_api(Some(s), "").is_transient(), "{s}");
        }
        assert!(!ManifestError::model_api(None, "content filter").is_transient());
        assert!(ManifestError::ModelTransport { reason: "timeout".into() }.is_transient());
        assert!(!ManifestError::Enhancement { detail: "x".into() }.is_transient());
    }

    #[test]
    fn truncate_is_char_aware() {
        assert_eq!(truncate_chars("ñandú", 3), "ñan…");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }
}
