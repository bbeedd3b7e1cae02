//! Typed events streamed to the caller during a run.
//!
//! Every run produces `filename (progress)* (content)+ done` on success.
//! A failed run ends with exactly one `error` event instead of `done`; a
//! run rejected at validation consists of that single `error` event.
//! Events serialize as JSON objects tagged by `type`.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{ErrorKind, PipelineError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Name of the report artifact this run will produce.
    Filename { filename: String },

    Progress {
        percent: u8,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        completed: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<usize>,
    },

    /// One fragment of report text. Concatenated in order they form the report.
    Content { text: String },

    Done {
        filename: String,
        /// Set when the report was delivered but could not be saved.
        #[serde(skip_serializing_if = "Option::is_none")]
        storage_error: Option<String>,
    },

    Error {
        kind: ErrorKind,
        message: String,
        hint: String,
    },
}

impl PipelineEvent {
    pub fn progress(percent: u8, message: impl Into<String>) -> Self {
        PipelineEvent::Progress {
            percent,
            message: message.into(),
            completed: None,
            total: None,
        }
    }

    pub fn error(err: &PipelineError) -> Self {
        let kind = err.kind();
        PipelineEvent::Error {
            kind,
            message: err.to_string(),
            hint: kind.guidance().to_string(),
        }
    }

    /// `done` and `error` end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::Done { .. } | PipelineEvent::Error { .. })
    }

    /// The `type` tag as it appears on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            PipelineEvent::Filename { .. } => "filename",
            PipelineEvent::Progress { .. } => "progress",
            PipelineEvent::Content { .. } => "content",
            PipelineEvent::Done { .. } => "done",
            PipelineEvent::Error { .. } => "error",
        }
    }
}

/// Sending half of a run's event channel.
///
/// A closed channel means the caller went away; [`emit`](EventSink::emit)
/// then fails with [`PipelineError::Disconnected`] so the run stops early.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<PipelineEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self { tx }
    }

    /// Creates a sink and its receiver with the given buffer size.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub async fn emit(&self, event: PipelineEvent) -> Result<(), PipelineError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| PipelineError::Disconnected)
    }
}
