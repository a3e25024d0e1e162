//! Request gateway
//!
//! Every request walks the same pipeline:
//!
//! 1. **Fingerprint** the messages and check the cache (exact tier first,
//!    semantic tier once an embedding is available)
//! 2. **Coalesce** with any identical in-flight request; duplicates wait
//!    for the leader instead of dispatching again
//! 3. **Route** to a cost-ranked fallback chain and walk it under a
//!    per-model timeout
//! 4. **Settle**: cache the response and append to the cost ledger before
//!    waiters are released
//!
//! Leaders run on a detached task, so a caller that gives up and drops its
//! future cannot abort work other callers are waiting on.

mod single_flight;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEntry, CacheHit, CacheStats, CacheStore, CacheTier, CachedResponse, TieredCache};
use crate::config::GatewayConfig;
use crate::cost::{CostRecord, CostReport, CostStore, CostTracker, Period};
use crate::error::{Error, FailedAttempt, Result};
use crate::fingerprint::{Fingerprinter, RequestFingerprint, normalized_text};
use crate::provider::{ChatMessage, EmbeddingProvider, ModelProvider, ProviderReply};
use crate::routing::{
    CatalogHandle, ModelCatalog, ModelProfile, ModelRouter, RoutingDecision, TaskType,
};

use single_flight::{Flight, FlightFailure, FlightLeader, FlightWaiter, SingleFlight};

/// Final response returned to the caller
#[derive(Debug, Clone, Serialize)]
pub struct GatewayResponse {
    /// The response text
    pub response: String,
    /// Model that produced the text, now or when it was first cached
    pub model_used: String,
    /// Whether the response came from the cache
    pub cached: bool,
    /// Which cache tier answered, when cached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_tier: Option<CacheTier>,
    /// What this request cost; zero for cache hits
    pub cost_usd: f64,
    /// End-to-end latency in milliseconds
    pub latency_ms: u64,
}

/// The cost-optimization gateway
///
/// Cheap to clone; clones share the cache, ledger, catalog, and
/// single-flight registry.
#[derive(Clone)]
pub struct Gateway {
    fingerprinter: Fingerprinter,
    cache: Arc<TieredCache>,
    tracker: Arc<CostTracker>,
    router: ModelRouter,
    provider: Arc<dyn ModelProvider>,
    cache_store: Option<Arc<CacheStore>>,
    cost_store: Option<Arc<CostStore>>,
    flights: SingleFlight,
    dispatch_timeout: Duration,
    cache_ttl: Duration,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("cache_entries", &self.cache.len())
            .field("in_flight", &self.flights.in_flight())
            .field("dispatch_timeout", &self.dispatch_timeout)
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl Gateway {
    /// Create a builder for constructing a gateway
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Process a chat request end to end
    ///
    /// Returns a cached response when one matches, otherwise dispatches
    /// through the routed fallback chain. Identical concurrent requests
    /// share a single dispatch.
    pub async fn process_request(
        &self,
        messages: &[ChatMessage],
        task_type: TaskType,
    ) -> Result<GatewayResponse> {
        let started = Instant::now();
        let fingerprint = self.fingerprinter.fingerprint(messages, task_type);
        debug!(
            fingerprint = %fingerprint.hash_hex(),
            task_type = %task_type,
            "Processing request"
        );

        if let Some(hit) = self.cache.lookup(&fingerprint) {
            return Ok(self.respond_from_cache(&hit, started));
        }

        match self.flights.join(fingerprint.hash) {
            Flight::Waiter(waiter) => {
                debug!(fingerprint = %fingerprint.hash_hex(), "Joining in-flight request");
                Self::await_outcome(waiter).await
            }
            Flight::Leader(leader) => {
                let waiter = leader.subscribe();
                let gateway = self.clone();
                let messages = messages.to_vec();
                // Detached: dropping this caller's future must not abort
                // a dispatch other callers are waiting on
                tokio::spawn(async move {
                    gateway
                        .lead(leader, fingerprint, messages, task_type, started)
                        .await;
                });
                Self::await_outcome(waiter).await
            }
        }
    }

    /// Route a task without dispatching it
    pub fn select_model(
        &self,
        task_description: &str,
        task_type: TaskType,
    ) -> Result<RoutingDecision> {
        self.router.select(task_description, task_type)
    }

    /// Spend report for a period
    pub fn cost_report(&self, period: Period) -> CostReport {
        self.tracker.report(period)
    }

    /// Cache counters snapshot
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The response cache
    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// The in-memory cost ledger
    pub fn cost_tracker(&self) -> &CostTracker {
        &self.tracker
    }

    /// The model catalog handle; availability changes apply to new requests
    pub fn catalog(&self) -> &CatalogHandle {
        self.router.catalog()
    }

    /// Rehydrate the in-memory cache from the durable store
    pub async fn warm_cache(&self) -> Result<usize> {
        let store = match &self.cache_store {
            Some(store) => store,
            None => return Ok(0),
        };

        let entries = store.load_unexpired().await?;
        let count = entries.len();
        for entry in entries {
            self.cache.insert_entry(entry);
        }

        info!(count = count, "Cache warmed from durable store");
        Ok(count)
    }

    /// Retry cost records whose durable write previously failed
    pub async fn flush_costs(&self) -> Result<usize> {
        match &self.cost_store {
            Some(store) => store.flush_pending().await,
            None => Ok(0),
        }
    }

    /// Drive a dispatch as the flight leader
    ///
    /// Runs detached from the requesting caller. The outcome reaches
    /// waiters through the flight; nothing is returned here.
    async fn lead(
        self,
        leader: FlightLeader,
        mut fingerprint: RequestFingerprint,
        messages: Vec<ChatMessage>,
        task_type: TaskType,
        started: Instant,
    ) {
        // Another flight may have stored an entry while we raced for leadership
        if let Some(hit) = self.cache.lookup(&fingerprint) {
            let response = self.respond_from_cache(&hit, started);
            leader.complete(Ok(response));
            return;
        }

        if self.fingerprinter.has_embedder() {
            match self.fingerprinter.embed(&messages).await {
                Ok(embedding) => fingerprint.embedding = Some(embedding),
                Err(e) => {
                    warn!(error = %e, "Embedding unavailable, degrading to exact-match caching");
                }
            }
            if fingerprint.embedding.is_some() {
                if let Some(hit) = self.cache.lookup(&fingerprint) {
                    let response = self.respond_from_cache(&hit, started);
                    leader.complete(Ok(response));
                    return;
                }
            }
        }

        let decision = match self.router.select(&normalized_text(&messages), task_type) {
            Ok(decision) => decision,
            Err(Error::NoEligibleModel(task)) => {
                warn!(task_type = %task, "No eligible model for request");
                leader.complete(Err(FlightFailure::NoEligibleModel(task)));
                return;
            }
            Err(e) => {
                error!(error = %e, "Routing failed");
                leader.complete(Err(FlightFailure::ProviderUnavailable {
                    attempted: vec![FailedAttempt::new("router", e.to_string())],
                }));
                return;
            }
        };

        info!(
            chain = ?decision.model_names(),
            reason = %decision.reason,
            estimated_cost_usd = decision.estimated_cost_usd,
            "Dispatching request"
        );

        let mut attempted = Vec::new();
        for profile in &decision.chain {
            match tokio::time::timeout(
                self.dispatch_timeout,
                self.provider.invoke(profile, &messages),
            )
            .await
            {
                Ok(Ok(reply)) => {
                    let response = self.store_and_respond(&fingerprint, profile, reply, started);
                    leader.complete(Ok(response));
                    return;
                }
                Ok(Err(e)) => {
                    warn!(
                        model = %profile.name,
                        error = %e,
                        "Model dispatch failed, advancing to next model"
                    );
                    attempted.push(FailedAttempt::new(&profile.name, e.to_string()));
                }
                Err(_) => {
                    let timeout_ms = self.dispatch_timeout.as_millis();
                    warn!(
                        model = %profile.name,
                        timeout_ms = timeout_ms as u64,
                        "Model dispatch timed out, advancing to next model"
                    );
                    attempted.push(FailedAttempt::new(
                        &profile.name,
                        format!("timed out after {timeout_ms}ms"),
                    ));
                }
            }
        }

        error!(attempts = attempted.len(), "Fallback chain exhausted");
        leader.complete(Err(FlightFailure::ProviderUnavailable { attempted }));
    }

    async fn await_outcome(waiter: FlightWaiter) -> Result<GatewayResponse> {
        match waiter.outcome().await {
            Some(Ok(response)) => Ok(response),
            Some(Err(failure)) => Err(failure.into()),
            None => Err(Error::ProviderUnavailable {
                attempted: Vec::new(),
            }),
        }
    }

    fn respond_from_cache(&self, hit: &CacheHit, started: Instant) -> GatewayResponse {
        let latency_ms = started.elapsed().as_millis() as u64;
        info!(
            tier = %hit.tier,
            model = %hit.response.model_name,
            distance = hit.distance,
            "Cache hit"
        );

        self.record_cost(CostRecord::cached_hit(
            &hit.response.model_name,
            &hit.response.provider,
            latency_ms,
        ));

        GatewayResponse {
            response: hit.response.text.clone(),
            model_used: hit.response.model_name.clone(),
            cached: true,
            cache_tier: Some(hit.tier),
            cost_usd: 0.0,
            latency_ms,
        }
    }

    fn store_and_respond(
        &self,
        fingerprint: &RequestFingerprint,
        profile: &ModelProfile,
        reply: ProviderReply,
        started: Instant,
    ) -> GatewayResponse {
        let cost_usd = profile.cost_for(reply.tokens_in, reply.tokens_out);
        let cached_response = CachedResponse {
            text: reply.text.clone(),
            model_name: profile.name.clone(),
            provider: profile.provider.clone(),
            tokens_in: reply.tokens_in,
            tokens_out: reply.tokens_out,
        };

        // Cache before waiters are released, so a fresh leader for the same
        // fingerprint finds the entry instead of dispatching again
        self.cache
            .insert(fingerprint, cached_response.clone(), self.cache_ttl);

        if let Some(store) = &self.cache_store {
            let now = Utc::now();
            let ttl = chrono::Duration::from_std(self.cache_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(self.cache_ttl.as_secs() as i64));
            let entry = CacheEntry {
                fingerprint: fingerprint.hash,
                response: cached_response,
                embedding: fingerprint.embedding.clone(),
                created_at: now,
                expires_at: now + ttl,
                hit_count: 0,
            };
            let store = Arc::clone(store);
            tokio::spawn(async move {
                if let Err(e) = store.put(&entry).await {
                    warn!(error = %e, "Durable cache write failed");
                }
            });
        }

        self.record_cost(
            CostRecord::new(
                &profile.name,
                &profile.provider,
                reply.tokens_in,
                reply.tokens_out,
                cost_usd,
            )
            .with_latency(reply.latency_ms),
        );

        let latency_ms = started.elapsed().as_millis() as u64;
        info!(
            model = %profile.name,
            cost_usd = cost_usd,
            latency_ms = latency_ms,
            "Request dispatched"
        );

        GatewayResponse {
            response: reply.text,
            model_used: profile.name.clone(),
            cached: false,
            cache_tier: None,
            cost_usd,
            latency_ms,
        }
    }

    fn record_cost(&self, record: CostRecord) {
        self.tracker.record(record.clone());

        if let Some(store) = &self.cost_store {
            let store = Arc::clone(store);
            tokio::spawn(async move {
                if let Err(e) = store.append(&record).await {
                    warn!(error = %e, "Durable cost write failed");
                }
            });
        }
    }
}

/// Builder for [`Gateway`]
#[derive(Default)]
pub struct GatewayBuilder {
    config: Option<GatewayConfig>,
    provider: Option<Arc<dyn ModelProvider>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    cache_store: Option<Arc<CacheStore>>,
    cost_store: Option<Arc<CostStore>>,
    catalog: Option<CatalogHandle>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given configuration instead of defaults
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the model provider (required)
    pub fn provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Enable the semantic cache tier with this embedding provider
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Persist cache entries to this store
    pub fn cache_store(mut self, store: Arc<CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Persist cost records to this store
    pub fn cost_store(mut self, store: Arc<CostStore>) -> Self {
        self.cost_store = Some(store);
        self
    }

    /// Share an existing catalog handle instead of building one from config
    pub fn catalog(mut self, catalog: CatalogHandle) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn build(self) -> Result<Gateway> {
        let config = self.config.unwrap_or_default();
        let provider = self
            .provider
            .ok_or_else(|| Error::ConfigError("Gateway requires a model provider".to_string()))?;

        let catalog = self
            .catalog
            .unwrap_or_else(|| CatalogHandle::new(ModelCatalog::new(config.catalog.clone())));
        let tracker = Arc::new(CostTracker::from_settings(&config.cost));
        let router = ModelRouter::builder()
            .catalog(catalog)
            .cost_tracker(Arc::clone(&tracker))
            .build();

        let fingerprinter = match self.embedder {
            Some(embedder) => Fingerprinter::with_embedder(embedder),
            None => Fingerprinter::new(),
        };

        Ok(Gateway {
            fingerprinter,
            cache: Arc::new(TieredCache::new(config.cache.clone())),
            tracker,
            router,
            provider,
            cache_store: self.cache_store,
            cost_store: self.cost_store,
            flights: SingleFlight::new(),
            dispatch_timeout: config.dispatch.timeout(),
            cache_ttl: config.cache.ttl(),
        })
    }
}
