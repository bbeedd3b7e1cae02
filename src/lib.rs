//! # Book Distill
//!
//! Turns a book-length document into a long-form structured report.
//!
//! A document (PDF, EPUB or plain text) is reduced to text, split into
//! bounded chunks, and each chunk is "dehydrated" by a language model into a
//! dense summary (the map phase, run with bounded concurrency). The
//! dehydrated chunks are then joined in order and synthesized into one
//! report under an analysis mode (the reduce phase), streamed back as it is
//! generated. Finished reports are cached by content fingerprint so an
//! identical resubmission replays instantly.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────────┐   ┌──────────────┐
//! │ Extract  │──▶│  Chunk   │──▶│ Map (N calls) │──▶│ Reduce (1    │
//! │ PDF/EPUB │   │          │   │  dehydrate    │   │  streaming)  │
//! └──────────┘   └──────────┘   └───────────────┘   └──────┬───────┘
//!                                                          │ events
//!                      ┌───────────────────────────────────┤
//!                      ▼                                   ▼
//!                 ┌──────────┐                       ┌──────────┐
//!                 │   CLI    │                       │   HTTP   │
//!                 │(distill) │                       │  (SSE)   │
//!                 └──────────┘                       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export DEEPSEEK_API_KEY=sk-...
//! distill analyze book.epub --mode architect > report.md
//! distill serve                 # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF, EPUB and plain-text extraction |
//! | [`chunk`] | Paragraph-aware text chunking |
//! | [`modes`] | Analysis modes and their prompts |
//! | [`synthesis`] | Language model client abstraction |
//! | [`cache`] | Fingerprint-keyed report cache |
//! | [`reports`] | Report artifacts on disk |
//! | [`events`] | Run events streamed to callers |
//! | [`pipeline`] | Map-reduce run orchestration |
//! | [`progress`] | CLI progress reporting |
//! | [`server`] | HTTP server |
//! | [`error`] | Error classification |

pub mod cache;
pub mod chunk;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod models;
pub mod modes;
pub mod pipeline;
pub mod progress;
pub mod reports;
pub mod server;
pub mod synthesis;
