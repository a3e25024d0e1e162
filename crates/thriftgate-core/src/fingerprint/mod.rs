//! Request fingerprinting
//!
//! Every request is reduced to a stable identity before the cache or the
//! router sees it:
//!
//! - **Exact hash**: SHA-256 over the normalized conversation and the task
//!   type. Formatting noise (case, repeated whitespace) does not change it.
//! - **Embedding**: optional vector for near-duplicate detection, produced
//!   by an [`EmbeddingProvider`] when one is configured.
//!
//! Message roles and boundaries are part of the identity: a system prompt
//! and a user message with the same text hash differently, as do the same
//! characters split across different messages.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::provider::{ChatMessage, EmbeddingProvider};
use crate::routing::TaskType;

/// 32-byte exact-match cache key
pub type FingerprintHash = [u8; 32];

/// Separates role from content within one message
const FIELD_SEPARATOR: char = '\u{1f}';

/// Separates messages from each other
const MESSAGE_SEPARATOR: char = '\u{1e}';

/// Hashed in place of content for requests with no messages
const EMPTY_REQUEST_MARKER: &[u8] = b"thriftgate:empty-request";

/// Identity of one request: exact hash plus optional embedding
#[derive(Debug, Clone)]
pub struct RequestFingerprint {
    /// SHA-256 digest of the normalized request
    pub hash: FingerprintHash,
    /// Embedding of the normalized text, when available
    pub embedding: Option<Vec<f32>>,
}

impl RequestFingerprint {
    /// Digest as lowercase hex, the form used for storage and logging
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// Computes request fingerprints, optionally backed by an embedder
#[derive(Clone, Default)]
pub struct Fingerprinter {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl std::fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fingerprinter")
            .field("has_embedder", &self.embedder.is_some())
            .finish()
    }
}

impl Fingerprinter {
    /// Create a fingerprinter without semantic support
    pub fn new() -> Self {
        Self { embedder: None }
    }

    /// Create a fingerprinter that can also embed requests
    pub fn with_embedder(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder: Some(embedder),
        }
    }

    /// Whether semantic fingerprints can be produced
    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Compute the exact fingerprint for a request.
    ///
    /// Deterministic and cheap; never fails. The embedding is left unset
    /// so the hot path does not wait on the embedder.
    pub fn fingerprint(&self, messages: &[ChatMessage], task_type: TaskType) -> RequestFingerprint {
        let mut hasher = Sha256::new();
        if messages.is_empty() {
            // Sentinel digest shared by all empty requests
            hasher.update(EMPTY_REQUEST_MARKER);
        } else {
            hasher.update(normalized_text(messages).as_bytes());
            hasher.update(FIELD_SEPARATOR.to_string().as_bytes());
            hasher.update(task_type.to_string().as_bytes());
        }

        RequestFingerprint {
            hash: hasher.finalize().into(),
            embedding: None,
        }
    }

    /// Embed the normalized request text.
    ///
    /// Any upstream failure is reported as [`Error::EmbeddingUnavailable`]
    /// so callers can degrade to exact-only matching.
    pub async fn embed(&self, messages: &[ChatMessage]) -> Result<Vec<f32>> {
        let embedder = self.embedder.as_ref().ok_or_else(|| {
            Error::EmbeddingUnavailable("no embedding provider configured".to_string())
        })?;

        if messages.is_empty() {
            return Err(Error::EmbeddingUnavailable(
                "empty request has no embedding".to_string(),
            ));
        }

        let text = normalized_text(messages);
        embedder.embed(&text).await.map_err(|error| match error {
            Error::EmbeddingUnavailable(_) => error,
            other => Error::EmbeddingUnavailable(other.to_string()),
        })
    }
}

/// Canonical text form of a conversation.
///
/// Messages are joined in order with unit separators so that boundaries
/// survive normalization. Content is lowercased with whitespace runs
/// collapsed to single spaces.
pub fn normalized_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|message| {
            format!(
                "{}{}{}",
                message.role,
                FIELD_SEPARATOR,
                normalize_content(&message.content)
            )
        })
        .collect::<Vec<_>>()
        .join(&MESSAGE_SEPARATOR.to_string())
}

fn normalize_content(content: &str) -> String {
    content
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
