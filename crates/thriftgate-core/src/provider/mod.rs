//! Provider integration - OpenRouter-compatible APIs
//!
//! This module provides:
//! - The dispatch seams the gateway calls through ([`ModelProvider`],
//!   [`EmbeddingProvider`])
//! - Request/response types matching the OpenAI-compatible API
//! - An HTTP adapter with rate-limit retry and exponential backoff
//!
//! The gateway never talks to an upstream directly; it holds trait
//! objects, so tests substitute deterministic fakes and production wires
//! in [`HttpProvider`].

mod http;
mod types;

pub use http::{HttpProvider, HttpProviderBuilder};
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, Choice, EmbeddingData, EmbeddingRequest,
    EmbeddingResponse, EmbeddingUsage, FinishReason, MessageRole, ProviderReply, Usage,
};

use async_trait::async_trait;

use crate::error::Result;
use crate::routing::ModelProfile;

/// Executes one chat request against one model.
///
/// Implementations report failures through the error taxonomy rather than
/// panicking: timeouts as [`crate::Error::ProviderTimeout`], upstream
/// refusals as [`crate::Error::ProviderError`], throttling as
/// [`crate::Error::RateLimited`]. The gateway treats all of those as a
/// reason to advance its fallback chain.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn invoke(&self, model: &ModelProfile, messages: &[ChatMessage])
    -> Result<ProviderReply>;
}

/// Produces embedding vectors for the semantic cache tier.
///
/// Failures surface as [`crate::Error::EmbeddingUnavailable`]; callers
/// degrade to exact-only matching rather than failing the request.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
