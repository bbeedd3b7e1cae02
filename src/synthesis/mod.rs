//! Language-model client abstraction.
//!
//! Defines the [`SynthesisClient`] trait the pipeline talks to and the
//! [`SynthesisError`] taxonomy it surfaces. The concrete
//! [`ChatClient`] speaks the OpenAI-compatible chat completions protocol,
//! which DeepSeek, OpenAI and most local gateways implement.
//!
//! # Operations
//!
//! - [`submit_one`](SynthesisClient::submit_one): one request, full completion
//!   text. Used by the map phase.
//! - [`submit_stream`](SynthesisClient::submit_stream): one request, a finite
//!   ordered stream of text fragments as the model generates them. Used by the
//!   reduce phase.
//!
//! # Retry Strategy
//!
//! None. Both operations are direct passthroughs. The pipeline absorbs
//! map-phase failures with a raw-text fallback, and a reduce failure is
//! reported to the caller with its classification so they can decide.

mod openai;
mod stream;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::error::ErrorKind;

pub use openai::ChatClient;
pub use stream::ChatFragmentStream;

/// Incremental text fragments from one streaming request.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, SynthesisError>> + Send>>;

#[derive(Debug, Clone, Error)]
pub enum SynthesisError {
    #[error("could not reach the model service: {0}")]
    Connect(String),

    #[error("model service timed out: {0}")]
    Timeout(String),

    #[error("model request failed: {0}")]
    Request(String),

    #[error("unexpected model failure: {0}")]
    Other(String),
}

impl SynthesisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SynthesisError::Connect(_) => ErrorKind::Connectivity,
            SynthesisError::Timeout(_) => ErrorKind::Timeout,
            SynthesisError::Request(_) => ErrorKind::Request,
            SynthesisError::Other(_) => ErrorKind::Unclassified,
        }
    }

    /// Classifies a transport error. Timeout is checked first since reqwest
    /// flags connect timeouts as both.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SynthesisError::Timeout(e.to_string())
        } else if e.is_connect() {
            SynthesisError::Connect(e.to_string())
        } else if e.is_request() || e.is_body() || e.is_decode() || e.is_status() {
            SynthesisError::Request(e.to_string())
        } else {
            SynthesisError::Other(e.to_string())
        }
    }
}

/// A remote model that can complete a system + user message pair.
///
/// Implementations are shared across runs behind an `Arc`, so they must be
/// `Send + Sync` and cheap to call concurrently.
#[async_trait]
pub trait SynthesisClient: Send + Sync {
    /// Maximum number of requests the client allows in flight at once.
    fn max_in_flight(&self) -> usize;

    /// Sends one request and returns the full completion text.
    async fn submit_one(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, SynthesisError>;

    /// Sends one request and returns its completion as a fragment stream.
    ///
    /// The stream is not restartable. Errors that occur before the first
    /// byte are returned directly; errors mid-stream arrive as stream items.
    async fn submit_stream(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<FragmentStream, SynthesisError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        assert_eq!(SynthesisError::Connect("x".into()).kind(), ErrorKind::Connectivity);
        assert_eq!(SynthesisError::Timeout("x".into()).kind(), ErrorKind::Timeout);
        assert_eq!(SynthesisError::Request("x".into()).kind(), ErrorKind::Request);
        assert_eq!(SynthesisError::Other("x".into()).kind(), ErrorKind::Unclassified);
    }
}
