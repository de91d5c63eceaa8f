//! Transport-only HTTP client for the generation service and the item source.
//!
//! This crate owns request building, status handling and body decoding. It has
//! no knowledge of sessions, retries or persistence: a generation response is
//! handed back as a lazy [`TextStream`] and a page response as raw JSON items.
//!
//! Generation bodies are decoded by content type: `text/event-stream` goes
//! through [`SseStreamParser`], anything else is treated as raw UTF-8 text.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod payload;
pub mod sse;
pub mod url;
pub mod utf8;

pub use client::{TextStream, UpstreamClient};
pub use config::UpstreamConfig;
pub use error::UpstreamApiError;
pub use events::{BodyFraming, TextStreamEvent};
pub use payload::{GenerateRequest, PageQuery, PageResponse};
pub use sse::SseStreamParser;
pub use url::{normalize_generation_url, normalize_items_url};
pub use utf8::{InvalidUtf8, Utf8ChunkDecoder};

pub use reqwest::StatusCode;
