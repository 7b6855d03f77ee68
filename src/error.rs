//! Error types for the vocal orchestrator

use thiserror::Error;

/// Result type alias for vocal operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while synthesizing or playing speech
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Remote synthesis failure
    #[error("synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    /// No on-device speech capability present
    #[error("no on-device speech engine available")]
    FallbackEngineUnavailable,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure of a single remote synthesis call
///
/// The orchestrator collapses every variant into the same decision
/// (abandon the remote path for the whole utterance), but the variants are
/// kept apart for logging and for callers that want to surface quota state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    /// Backend refused the request because of rate or budget limits
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Connectivity problem, timeout, or 5xx from the backend
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// Payload could not be turned into playable audio
    #[error("decode failure: {0}")]
    DecodeFailure(String),

    /// Any other non-success response
    #[error("fatal backend error: {0}")]
    Fatal(String),
}

impl SynthesisError {
    /// Classify a failed backend call from its HTTP status (if any) and error text
    ///
    /// Quota markers win over everything else: some backends wrap a 429 inside
    /// a 200 or a 5xx body, so the text is inspected even when a status exists.
    #[must_use]
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        let message = message.to_string();
        let lower = message.to_lowercase();

        if status == Some(429)
            || lower.contains("429")
            || lower.contains("resource_exhausted")
            || lower.contains("resource exhausted")
            || lower.contains("quota")
        {
            return Self::QuotaExhausted(message);
        }

        if status.is_some_and(|s| (500..600).contains(&s))
            || lower.contains("connection reset")
            || lower.contains("connection refused")
            || lower.contains("timed out")
            || lower.contains("timeout")
            || lower.contains("dns error")
        {
            return Self::TransientNetwork(message);
        }

        Self::Fatal(message)
    }

    /// Whether this failure was a quota refusal
    #[must_use]
    pub const fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExhausted(_))
    }
}

impl From<reqwest::Error> for SynthesisError {
    fn from(e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        if e.is_timeout() || e.is_connect() {
            return Self::TransientNetwork(e.to_string());
        }
        Self::classify(status, &e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_on_status_429() {
        assert!(SynthesisError::classify(Some(429), "").is_quota());
    }

    #[test]
    fn quota_on_message_markers() {
        assert!(SynthesisError::classify(None, "HTTP 429 Too Many Requests").is_quota());
        assert!(SynthesisError::classify(None, "status: RESOURCE_EXHAUSTED").is_quota());
        assert!(SynthesisError::classify(None, "Resource exhausted for project").is_quota());
        assert!(SynthesisError::classify(Some(403), "Quota exceeded for metric").is_quota());
    }

    #[test]
    fn transient_on_server_errors() {
        assert_eq!(
            SynthesisError::classify(Some(503), "unavailable"),
            SynthesisError::TransientNetwork("unavailable".to_string())
        );
        assert!(matches!(
            SynthesisError::classify(None, "request Timed Out"),
            SynthesisError::TransientNetwork(_)
        ));
        assert!(matches!(
            SynthesisError::classify(None, "Connection reset by peer"),
            SynthesisError::TransientNetwork(_)
        ));
    }

    #[test]
    fn fatal_on_client_errors() {
        assert!(matches!(
            SynthesisError::classify(Some(400), "invalid voice"),
            SynthesisError::Fatal(_)
        ));
        assert!(matches!(
            SynthesisError::classify(None, "something odd"),
            SynthesisError::Fatal(_)
        ));
    }

    #[test]
    fn synthesis_error_converts_into_crate_error() {
        let err: Error = SynthesisError::DecodeFailure("bad header".to_string()).into();
        assert_eq!(err.to_string(), "synthesis error: decode failure: bad header");
    }
}
