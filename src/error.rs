//! Error taxonomy for pipeline runs.
//!
//! Every terminal failure maps to one [`ErrorKind`], which is what callers
//! see on the `error` event together with a human-readable cause.

use serde::Serialize;
use thiserror::Error;

use crate::synthesis::SynthesisError;

/// Classification carried on terminal error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input: unknown mode, unsupported or empty file.
    Validation,
    /// The document contained no extractable text.
    ContentUnavailable,
    /// The model service could not be reached.
    Connectivity,
    /// The model service did not answer in time.
    Timeout,
    /// The model service rejected or broke off the request.
    Request,
    Unclassified,
}

impl ErrorKind {
    /// Next step suggested to the user for this kind of failure.
    pub fn guidance(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Check the selected mode and upload a PDF, EPUB or text file.",
            ErrorKind::ContentUnavailable => {
                "The file may be scanned images or encrypted. Try a text-based copy."
            }
            ErrorKind::Connectivity => {
                "Check network access and the configured model endpoint, then retry."
            }
            ErrorKind::Timeout => "The model took too long. Retry, or try a shorter document.",
            ErrorKind::Request => "The model service rejected the request. Check the API key and quota.",
            ErrorKind::Unclassified => "An unexpected error occurred. Retry, and check the server log.",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("no readable text could be extracted from {0}")]
    ContentUnavailable(String),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    /// The event receiver went away. Never reported as an event.
    #[error("caller disconnected")]
    Disconnected,

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::ContentUnavailable(_) => ErrorKind::ContentUnavailable,
            PipelineError::Synthesis(e) => e.kind(),
            PipelineError::Disconnected | PipelineError::Internal(_) => ErrorKind::Unclassified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesis_errors_keep_their_kind() {
        let err = PipelineError::from(SynthesisError::Timeout("read timed out".into()));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.to_string(), "model service timed out: read timed out");
    }

    #[test]
    fn kinds_serialize_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ContentUnavailable).unwrap();
        assert_eq!(json, "\"content_unavailable\"");
    }
}
