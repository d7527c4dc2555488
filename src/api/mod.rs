//! Streaming client for OpenAI-compatible chat APIs.
//!
//! - `sse`: incremental SSE framing and chunk decoding
//! - `retry`: bounded retry policy before the stream opens
//! - `client`: the reqwest-backed [`ApiClient`]

use crate::error::ApiError;
use crate::types::{ChatRequest, StreamChunk};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

mod client;
mod retry;
pub mod sse;

pub use client::ApiClient;

/// Chunks of one model response, in arrival order.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ApiError>>;

/// Minimal model API interface used by the conversation engine.
///
/// This trait lets tests provide scripted streams without network calls while
/// the production path uses [`ApiClient`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChunkStream, ApiError>;
}
