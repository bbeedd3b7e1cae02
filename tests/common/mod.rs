//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use book_distill::cache::CacheStore;
use book_distill::events::{EventSink, PipelineEvent};
use book_distill::modes::ModeCatalog;
use book_distill::pipeline::{AnalyzeRequest, Pipeline, PipelineSettings};
use book_distill::reports::ReportStore;
use book_distill::synthesis::{FragmentStream, SynthesisClient, SynthesisError};

/// How the reduce call should behave.
#[derive(Clone)]
pub enum ReduceScript {
    Fragments(Vec<String>),
    Fail(SynthesisError),
}

/// In-memory synthesis client that records every call.
///
/// Map calls return `"dehydrated: <input>"`. Reduce calls follow the script.
pub struct ScriptedClient {
    pub map_calls: AtomicUsize,
    pub reduce_calls: AtomicUsize,
    pub map_inputs: Mutex<Vec<String>>,
    pub reduce_inputs: Mutex<Vec<String>>,
    reduce: ReduceScript,
}

impl ScriptedClient {
    pub fn new(reduce: ReduceScript) -> Self {
        Self {
            map_calls: AtomicUsize::new(0),
            reduce_calls: AtomicUsize::new(0),
            map_inputs: Mutex::new(Vec::new()),
            reduce_inputs: Mutex::new(Vec::new()),
            reduce,
        }
    }

    pub fn streaming(fragments: &[&str]) -> Self {
        Self::new(ReduceScript::Fragments(
            fragments.iter().map(|s| s.to_string()).collect(),
        ))
    }

    pub fn remote_calls(&self) -> usize {
        self.map_calls.load(Ordering::SeqCst) + self.reduce_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SynthesisClient for ScriptedClient {
    fn max_in_flight(&self) -> usize {
        3
    }

    async fn submit_one(&self, _system: &str, user: &str) -> Result<String, SynthesisError> {
        self.map_calls.fetch_add(1, Ordering::SeqCst);
        self.map_inputs.lock().unwrap().push(user.to_string());
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(format!("dehydrated: {}", user.chars().take(20).collect::<String>()))
    }

    async fn submit_stream(
        &self,
        _system: &str,
        user: &str,
    ) -> Result<FragmentStream, SynthesisError> {
        self.reduce_calls.fetch_add(1, Ordering::SeqCst);
        self.reduce_inputs.lock().unwrap().push(user.to_string());
        match &self.reduce {
            ReduceScript::Fragments(parts) => {
                let items: Vec<Result<String, SynthesisError>> =
                    parts.iter().cloned().map(Ok).collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            ReduceScript::Fail(e) => Err(e.clone()),
        }
    }
}

/// A pipeline over `client` and `cache` with storage under `root`.
pub fn pipeline(
    root: &Path,
    client: Arc<ScriptedClient>,
    cache: Arc<dyn CacheStore>,
    max_chunk_chars: usize,
) -> Arc<Pipeline> {
    let settings = PipelineSettings {
        max_chunk_chars,
        replay_fragment_chars: 16,
        replay_delay: Duration::ZERO,
        staging_dir: Some(root.join("staging")),
        ..PipelineSettings::default()
    };
    std::fs::create_dir_all(root.join("staging")).unwrap();
    Arc::new(Pipeline::new(
        client,
        cache,
        ReportStore::open(root.join("output")).unwrap(),
        ModeCatalog::default(),
        settings,
    ))
}

/// Runs one request and collects every event it emits.
pub async fn run_to_end(pipeline: &Pipeline, filename: &str, bytes: &[u8], mode: &str) -> Vec<PipelineEvent> {
    let (sink, mut rx) = EventSink::channel(1024);
    let request = AnalyzeRequest {
        filename: filename.to_string(),
        bytes: bytes.to_vec(),
        mode: mode.to_string(),
    };
    pipeline.run(request, sink).await;
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    events
}

/// Concatenated text of all `content` events.
pub fn content_of(events: &[PipelineEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Content { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// Checks `filename (progress)* (content)+ (done|error)`, allowing a
/// content-less run that ends in `error`.
pub fn assert_grammar(events: &[PipelineEvent]) {
    let names: Vec<&str> = events.iter().map(|e| e.type_name()).collect();
    assert!(!names.is_empty(), "no events");
    let last = *names.last().unwrap();
    assert!(last == "done" || last == "error", "bad terminal: {:?}", names);
    assert_eq!(
        names.iter().filter(|n| **n == "done" || **n == "error").count(),
        1,
        "exactly one terminal event: {:?}",
        names
    );
    if names.len() == 1 {
        assert_eq!(last, "error");
        return;
    }
    assert_eq!(names[0], "filename", "{:?}", names);

    let body = &names[1..names.len() - 1];
    let first_content = body.iter().position(|n| *n == "content").unwrap_or(body.len());
    assert!(body[..first_content].iter().all(|n| *n == "progress"), "{:?}", names);
    assert!(body[first_content..].iter().all(|n| *n == "content"), "{:?}", names);
    if last == "done" {
        assert!(first_content < body.len(), "done without content: {:?}", names);
    }

    let mut percent = 0u8;
    for e in events {
        if let PipelineEvent::Progress { percent: p, .. } = e {
            assert!(*p >= percent, "progress went backwards: {:?}", names);
            percent = *p;
        }
    }
}
