//! Map-reduce distillation pipeline.
//!
//! Coordinates one run: validation → cache lookup → extraction → chunking →
//! concurrent map (per-chunk dehydration) → single streaming reduce →
//! persistence, emitting [`PipelineEvent`]s throughout.
//!
//! # States
//!
//! ```text
//! Received → Extracting → Chunking → Mapping → Reducing → Persisting → Done
//!     └──────────┴───────────┴──────────┴──────────┴─────────→ Failed
//! ```
//!
//! Transitions only move forward. A cache hit jumps from `Received` straight
//! to `Persisting` and replays the stored report.
//!
//! # Failure policy
//!
//! Failures are absorbed at the smallest unit that has a safe fallback: an
//! unreadable page contributes no text (see [`crate::extract`]) and a failed
//! map call contributes the chunk's raw text. The reduce call has no
//! fallback, so its errors end the run with a classified `error` event.
//! A report that was delivered but could not be saved still ends in `done`,
//! with the storage failure attached.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::cache::{fingerprint, CacheStore, FsCacheStore};
use crate::chunk;
use crate::config::Config;
use crate::error::PipelineError;
use crate::events::{EventSink, PipelineEvent};
use crate::extract;
use crate::models::{Chunk, DehydratedChunk, Document, DocumentFormat, MapOutcome};
use crate::modes::{AnalysisMode, ModeCatalog, ModeProfile};
use crate::reports::{report_filename, ReportStore};
use crate::synthesis::SynthesisClient;

/// Placed between dehydrated chunks in the reduce input.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// Buffer between a run and its event consumer.
const EVENT_BUFFER: usize = 64;

const PERCENT_EXTRACTING: u8 = 5;
const PERCENT_CHUNKED: u8 = 10;
const PERCENT_MAPPED: u8 = 85;
const PERCENT_REDUCING: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Received,
    Extracting,
    Chunking,
    Mapping,
    Reducing,
    Persisting,
    Done,
    Failed,
}

/// One incoming analysis request.
#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Mode key as supplied by the caller; validated by the pipeline.
    pub mode: String,
}

/// Tunables that are not part of the collaborators.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_chunk_chars: usize,
    pub dehydrate_prompt: String,
    pub replay_fragment_chars: usize,
    pub replay_delay: Duration,
    /// Directory for staged uploads; system temp dir when `None`.
    pub staging_dir: Option<PathBuf>,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_chunk_chars: config.chunking.max_chars,
            dehydrate_prompt: config.prompts.dehydrate.clone(),
            replay_fragment_chars: config.replay.fragment_chars,
            replay_delay: Duration::from_millis(config.replay.delay_ms),
            staging_dir: config.storage.staging_dir.clone(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Transient state of one request.
struct PipelineRun {
    state: RunState,
    document: Document,
    mode: AnalysisMode,
    output_filename: String,
}

impl PipelineRun {
    fn advance(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, file = %self.document.filename, "run state");
        self.state = next;
    }
}

/// The shared, long-lived pipeline. Cheap to share behind an `Arc`.
pub struct Pipeline {
    client: Arc<dyn SynthesisClient>,
    cache: Arc<dyn CacheStore>,
    reports: ReportStore,
    modes: ModeCatalog,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        client: Arc<dyn SynthesisClient>,
        cache: Arc<dyn CacheStore>,
        reports: ReportStore,
        modes: ModeCatalog,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            client,
            cache,
            reports,
            modes,
            settings,
        }
    }

    /// Builds a pipeline with filesystem cache and report storage from config.
    pub fn from_config(config: &Config, client: Arc<dyn SynthesisClient>) -> Result<Self> {
        let cache = FsCacheStore::open(&config.storage.cache_dir)?;
        let reports = ReportStore::open(&config.storage.output_dir)?;
        Ok(Self::new(
            client,
            Arc::new(cache),
            reports,
            ModeCatalog::from_config(&config.modes),
            PipelineSettings::from_config(config),
        ))
    }

    pub fn reports(&self) -> &ReportStore {
        &self.reports
    }

    pub fn modes(&self) -> &ModeCatalog {
        &self.modes
    }

    /// Runs `request` on a background task and returns its event stream.
    ///
    /// Dropping the receiver stops the run at its next emission.
    pub fn spawn(
        self: &Arc<Self>,
        request: AnalyzeRequest,
    ) -> tokio::sync::mpsc::Receiver<PipelineEvent> {
        let (sink, rx) = EventSink::channel(EVENT_BUFFER);
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.run(request, sink).await;
        });
        rx
    }

    /// Runs one request to completion and returns its final state.
    ///
    /// Exactly one terminal event (`done` or `error`) is emitted unless the
    /// caller disconnected first.
    pub async fn run(&self, request: AnalyzeRequest, sink: EventSink) -> RunState {
        let filename = request.filename.clone();
        let mut state = RunState::Received;
        let result = match self.admit(request) {
            Ok((mut run, profile)) => {
                let outcome = self.execute(&mut run, profile, &sink).await;
                state = run.state;
                outcome
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => RunState::Done,
            Err(PipelineError::Disconnected) => {
                info!(file = %filename, ?state, "caller disconnected, run abandoned");
                RunState::Failed
            }
            Err(e) => {
                error!(file = %filename, ?state, kind = ?e.kind(), error = %e, "run failed");
                let _ = sink.emit(PipelineEvent::error(&e)).await;
                RunState::Failed
            }
        }
    }

    /// `Received`: validate mode, format and payload before any work.
    fn admit(
        &self,
        request: AnalyzeRequest,
    ) -> Result<(PipelineRun, &ModeProfile), PipelineError> {
        let (mode, profile) = self.modes.resolve(&request.mode)?;
        let format = DocumentFormat::from_filename(&request.filename).ok_or_else(|| {
            PipelineError::Validation(format!(
                "unsupported file type: {} (expected .pdf, .epub, .txt or .md)",
                request.filename
            ))
        })?;
        if request.bytes.is_empty() {
            return Err(PipelineError::Validation(format!(
                "uploaded file {} is empty",
                request.filename
            )));
        }

        let output_filename =
            report_filename(&profile.label, &request.filename, mode, chrono::Local::now());
        let run = PipelineRun {
            state: RunState::Received,
            document: Document {
                filename: request.filename,
                format,
                bytes: request.bytes,
            },
            mode,
            output_filename,
        };
        Ok((run, profile))
    }

    async fn execute(
        &self,
        run: &mut PipelineRun,
        profile: &ModeProfile,
        sink: &EventSink,
    ) -> Result<(), PipelineError> {
        sink.emit(PipelineEvent::Filename {
            filename: run.output_filename.clone(),
        })
        .await?;

        let key = fingerprint(&run.document.bytes, run.mode);
        if let Some(cached) = self.cached_report(&key).await {
            info!(file = %run.document.filename, mode = %run.mode, "cache hit, replaying report");
            return self.replay(run, &cached, sink).await;
        }

        // Extracting
        run.advance(RunState::Extracting);
        sink.emit(PipelineEvent::progress(
            PERCENT_EXTRACTING,
            format!("Extracting text from {}", run.document.filename),
        ))
        .await?;
        let text = self.extract(run).await?;
        if text.trim().is_empty() {
            return Err(PipelineError::ContentUnavailable(run.document.filename.clone()));
        }

        // Chunking
        run.advance(RunState::Chunking);
        let chunks = chunk::split(&text, self.settings.max_chunk_chars);
        drop(text);
        info!(
            file = %run.document.filename,
            mode = %run.mode,
            chunks = chunks.len(),
            "document split"
        );
        sink.emit(PipelineEvent::Progress {
            percent: PERCENT_CHUNKED,
            message: format!("Split into {} chunks", chunks.len()),
            completed: Some(0),
            total: Some(chunks.len()),
        })
        .await?;

        // Mapping
        run.advance(RunState::Mapping);
        let dehydrated = self.map_chunks(&chunks, sink).await?;
        let fallbacks = dehydrated.iter().filter(|d| d.is_fallback()).count();
        if fallbacks > 0 {
            warn!(fallbacks, total = chunks.len(), "some chunks kept their raw text");
        }
        drop(chunks);

        // Reducing
        run.advance(RunState::Reducing);
        let combined = join_dehydrated(&dehydrated);
        drop(dehydrated);
        sink.emit(PipelineEvent::progress(
            PERCENT_REDUCING,
            "Synthesizing the final report",
        ))
        .await?;
        let report = self.reduce(profile, &combined, sink).await?;

        // Persisting
        run.advance(RunState::Persisting);
        let mut problems = Vec::new();
        if let Err(e) = self.reports.write(&run.output_filename, &report).await {
            problems.push(format!("{:#}", e));
        }
        if let Err(e) = self.cache.put(&key, &report).await {
            problems.push(format!("{:#}", e));
        }
        self.finish(run, problems, sink).await
    }

    /// Cache lookup. A broken cache is treated as a miss.
    async fn cached_report(&self, key: &str) -> Option<String> {
        match self.cache.get(key).await {
            Ok(Some(text)) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Cache hit: copy the report to a fresh artifact and replay it as content.
    async fn replay(
        &self,
        run: &mut PipelineRun,
        cached: &str,
        sink: &EventSink,
    ) -> Result<(), PipelineError> {
        run.advance(RunState::Persisting);
        let mut problems = Vec::new();
        if let Err(e) = self.reports.write(&run.output_filename, cached).await {
            problems.push(format!("{:#}", e));
        }

        sink.emit(PipelineEvent::progress(100, "Loaded previously generated report"))
            .await?;
        for fragment in fragments(cached, self.settings.replay_fragment_chars) {
            sink.emit(PipelineEvent::Content { text: fragment }).await?;
            if !self.settings.replay_delay.is_zero() {
                tokio::time::sleep(self.settings.replay_delay).await;
            }
        }
        self.finish(run, problems, sink).await
    }

    async fn finish(
        &self,
        run: &mut PipelineRun,
        problems: Vec<String>,
        sink: &EventSink,
    ) -> Result<(), PipelineError> {
        let storage_error = if problems.is_empty() {
            None
        } else {
            warn!(file = %run.output_filename, errors = ?problems, "report delivered but not fully saved");
            Some(problems.join("; "))
        };
        run.advance(RunState::Done);
        info!(file = %run.output_filename, "run complete");
        sink.emit(PipelineEvent::Done {
            filename: run.output_filename.clone(),
            storage_error,
        })
        .await
    }

    /// Stages the document in a temp file and extracts it off the async threads.
    async fn extract(&self, run: &PipelineRun) -> Result<String, PipelineError> {
        let suffix = format!(".{}", run.document.format.extension());
        let mut builder = tempfile::Builder::new();
        builder.prefix("distill-").suffix(&suffix);
        let staged = match &self.settings.staging_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| PipelineError::Internal(format!("could not stage upload: {}", e)))?;
        tokio::fs::write(staged.path(), &run.document.bytes)
            .await
            .map_err(|e| PipelineError::Internal(format!("could not stage upload: {}", e)))?;

        let path = staged.path().to_path_buf();
        let format = run.document.format;

        let text = tokio::task::spawn_blocking(move || extract::extract_file(&path, format))
            .await
            .map_err(|e| PipelineError::Internal(format!("extraction task failed: {}", e)));

        // The staged copy is only needed by the extractor.
        drop(staged);
        text
    }

    /// Dehydrates every chunk with bounded concurrency.
    ///
    /// Calls are polled concurrently on this task and may finish in any
    /// order; each result lands in the slot of its chunk index, so the
    /// returned vector is always in chunk order and has one entry per chunk.
    async fn map_chunks(
        &self,
        chunks: &[Chunk],
        sink: &EventSink,
    ) -> Result<Vec<DehydratedChunk>, PipelineError> {
        let total = chunks.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let limit = self.client.max_in_flight().max(1);
        let mut slots: Vec<Option<DehydratedChunk>> = vec![None; total];

        // Collected up front: a lazy `map` adapter over `&Chunk` makes the run future non-`Send`.
        let calls: Vec<_> = chunks.iter().map(|c| self.dehydrate(c)).collect();
        let mut in_flight = futures::stream::iter(calls).buffer_unordered(limit);

        let mut completed = 0usize;
        while let Some(result) = in_flight.next().await {
            completed += 1;
            let index = result.index;
            let fell_back = result.is_fallback();
            slots[index] = Some(result);

            let span = u32::from(PERCENT_MAPPED - PERCENT_CHUNKED);
            let percent = PERCENT_CHUNKED as u32 + span * completed as u32 / total as u32;
            sink.emit(PipelineEvent::Progress {
                percent: percent as u8,
                message: if fell_back {
                    format!("Chunk {} kept as raw text ({}/{})", index + 1, completed, total)
                } else {
                    format!("Dehydrated chunk {} ({}/{})", index + 1, completed, total)
                },
                completed: Some(completed),
                total: Some(total),
            })
            .await?;
        }

        Ok(slots
            .into_iter()
            .zip(chunks)
            .map(|(slot, chunk)| slot.unwrap_or_else(|| fallback(chunk)))
            .collect())
    }

    async fn dehydrate(&self, chunk: &Chunk) -> DehydratedChunk {
        match self
            .client
            .submit_one(&self.settings.dehydrate_prompt, &chunk.text)
            .await
        {
            Ok(text) if !text.trim().is_empty() => {
                debug!(index = chunk.index, chars = text.chars().count(), "chunk dehydrated");
                DehydratedChunk {
                    index: chunk.index,
                    outcome: MapOutcome::Dehydrated(text),
                }
            }
            Ok(_) => {
                warn!(index = chunk.index, "empty dehydration, keeping raw text");
                fallback(chunk)
            }
            Err(e) => {
                warn!(index = chunk.index, kind = ?e.kind(), error = %e, "dehydration failed, keeping raw text");
                fallback(chunk)
            }
        }
    }

    /// Streams the final report, forwarding each fragment as it arrives.
    async fn reduce(
        &self,
        profile: &ModeProfile,
        combined: &str,
        sink: &EventSink,
    ) -> Result<String, PipelineError> {
        let mut stream = self
            .client
            .submit_stream(&profile.system_prompt, combined)
            .await?;

        let mut report = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            if fragment.is_empty() {
                continue;
            }
            report.push_str(&fragment);
            sink.emit(PipelineEvent::Content { text: fragment }).await?;
        }

        if report.is_empty() {
            return Err(PipelineError::Synthesis(
                crate::synthesis::SynthesisError::Request(
                    "model returned an empty report".to_string(),
                ),
            ));
        }
        Ok(report)
    }
}

fn fallback(chunk: &Chunk) -> DehydratedChunk {
    DehydratedChunk {
        index: chunk.index,
        outcome: MapOutcome::Fallback(chunk.text.clone()),
    }
}

/// Joins map results in index order with [`CHUNK_SEPARATOR`].
pub fn join_dehydrated(dehydrated: &[DehydratedChunk]) -> String {
    dehydrated
        .iter()
        .map(|d| d.text())
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR)
}

/// Splits `text` into pieces of at most `size` chars for replay.
fn fragments(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|piece| piece.iter().collect())
        .collect()
}
