//! SSE parser for streaming chat completions.
//!
//! Converts a raw `reqwest` byte stream into text fragments. Bytes are
//! buffered until a full line is available, so multi-byte characters split
//! across network reads decode correctly. The stream ends at `data: [DONE]`
//! or when the connection closes.

use bytes::Bytes;
use futures::stream::Stream;
use serde::Deserialize;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::SynthesisError;

#[derive(Debug, Deserialize)]
struct StreamChunkRaw {
    #[serde(default)]
    choices: Vec<StreamChoiceRaw>,
    #[serde(default)]
    error: Option<StreamErrorRaw>,
}

#[derive(Debug, Deserialize)]
struct StreamChoiceRaw {
    #[serde(default)]
    delta: Option<DeltaRaw>,
}

#[derive(Debug, Deserialize)]
struct DeltaRaw {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorRaw {
    #[serde(default)]
    message: String,
}

/// What one SSE line means for the consumer.
#[derive(Debug, PartialEq)]
enum SseLine {
    Fragment(String),
    Done,
    Skip,
    Failed(String),
}

pub struct ChatFragmentStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: Vec<u8>,
    finished: bool,
}

impl ChatFragmentStream {
    pub fn new(
        byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: Vec::new(),
            finished: false,
        }
    }

    /// Pops complete lines off the buffer until one produces an item.
    fn next_buffered(&mut self) -> Option<Result<String, SynthesisError>> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            match parse_line(&String::from_utf8_lossy(&line)) {
                SseLine::Fragment(text) => return Some(Ok(text)),
                SseLine::Done => {
                    self.finished = true;
                    return None;
                }
                SseLine::Failed(msg) => {
                    self.finished = true;
                    return Some(Err(SynthesisError::Request(msg)));
                }
                SseLine::Skip => {}
            }
        }
        None
    }
}

impl Stream for ChatFragmentStream {
    type Item = Result<String, SynthesisError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(item) = this.next_buffered() {
                return Poll::Ready(Some(item));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(SynthesisError::from_reqwest(e))));
                }
                Poll::Ready(None) => {
                    // Connection closed: a final line may lack its newline.
                    this.finished = true;
                    if this.buffer.iter().any(|b| !b.is_ascii_whitespace()) {
                        this.buffer.push(b'\n');
                        if let Some(item) = this.next_buffered() {
                            return Poll::Ready(Some(item));
                        }
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn parse_line(line: &str) -> SseLine {
    let line = line.trim();
    // Blank lines separate events; "event:", "id:", ":" comments carry no text.
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamChunkRaw>(data) {
        Ok(raw) => {
            if let Some(err) = raw.error {
                return SseLine::Failed(format!("stream error: {}", err.message));
            }
            let delta = raw
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta)
                .and_then(|d| d.content)
                .unwrap_or_default();
            if delta.is_empty() {
                SseLine::Skip
            } else {
                SseLine::Fragment(delta)
            }
        }
        Err(e) => SseLine::Failed(format!(
            "failed to parse stream chunk: {} (data: {})",
            e,
            data.chars().take(200).collect::<String>()
        )),
    }
}
