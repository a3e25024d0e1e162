//! Thriftgate Core Library
//!
//! This crate provides the core functionality for Thriftgate, including:
//! - Request fingerprinting (normalization + SHA-256, optional embeddings)
//! - Two-tier response cache (exact and semantic, TTL + capacity eviction)
//! - Cost ledger and budget tracking
//! - Deterministic cost-aware model routing with fallback chains
//! - Request gateway (cache check, single-flight coalescing, dispatch)
//! - Provider integration (OpenRouter-compatible chat and embedding APIs)
//! - SQLite persistence for cache entries and cost records

pub mod cache;
pub mod config;
pub mod cost;
pub mod error;
pub mod fingerprint;
pub mod gateway;
pub mod provider;
pub mod routing;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{CacheHit, CacheStats, CacheTier, TieredCache};
    pub use crate::config::GatewayConfig;
    pub use crate::cost::{CostReport, CostTracker, Period};
    pub use crate::error::{Error, Result};
    pub use crate::fingerprint::Fingerprinter;
    pub use crate::gateway::{Gateway, GatewayResponse};
    pub use crate::provider::{ChatMessage, EmbeddingProvider, ModelProvider};
    pub use crate::routing::{ModelRouter, RoutingDecision, TaskType};
}
