//! Deterministic cost-ranked model selection
//!
//! The router never learns and never samples. Given the same catalog,
//! task, and budget state it produces the same chain every time:
//!
//! 1. Filter the catalog snapshot to available models supporting the task
//! 2. Estimate request cost per model from the task description length
//! 3. Drop models estimated over the remaining daily budget, unless that
//!    would drop everything
//! 4. Rank by estimated cost, latency on ties, then name
//!
//! The whole ranked list is returned as the fallback chain so dispatch
//! can walk it without re-routing.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use super::catalog::{CatalogHandle, ModelProfile, TaskType};
use super::types::{RoutingDecision, SelectionReason};
use crate::cost::CostTracker;
use crate::error::{Error, Result};

/// Rough token estimate from text length, about four characters per token
fn estimate_tokens(text: &str) -> u32 {
    (text.len() / 4).max(1) as u32
}

/// Cost-ranked router over a reloadable catalog
#[derive(Debug, Clone)]
pub struct ModelRouter {
    catalog: CatalogHandle,
    cost_tracker: Option<Arc<CostTracker>>,
}

impl ModelRouter {
    /// Create a router over the default catalog, no budget awareness
    pub fn new() -> Self {
        Self {
            catalog: CatalogHandle::default(),
            cost_tracker: None,
        }
    }

    pub fn builder() -> ModelRouterBuilder {
        ModelRouterBuilder::new()
    }

    /// The catalog handle this router reads from
    pub fn catalog(&self) -> &CatalogHandle {
        &self.catalog
    }

    /// Select a fallback chain for a task.
    ///
    /// `task_description` only drives the token estimate; eligibility is
    /// decided by `task_type` alone.
    pub fn select(&self, task_description: &str, task_type: TaskType) -> Result<RoutingDecision> {
        let catalog = self.catalog.snapshot();
        let eligible: Vec<ModelProfile> = catalog
            .eligible(task_type)
            .into_iter()
            .cloned()
            .collect();

        if eligible.is_empty() {
            return Err(Error::NoEligibleModel(task_type.to_string()));
        }

        let tokens = estimate_tokens(task_description);
        // Output is assumed to be about as long as the input
        let mut ranked: Vec<(f64, ModelProfile)> = eligible
            .into_iter()
            .map(|profile| (profile.cost_for(tokens, tokens), profile))
            .collect();

        let mut budget_constrained = false;
        let mut remaining_usd = 0.0;
        if let Some(tracker) = &self.cost_tracker {
            remaining_usd = tracker.remaining_budget();
            let within_budget = ranked
                .iter()
                .filter(|(estimate, _)| *estimate <= remaining_usd)
                .count();
            // Dropping everything would leave no way to serve the request
            if within_budget > 0 && within_budget < ranked.len() {
                ranked.retain(|(estimate, _)| *estimate <= remaining_usd);
                budget_constrained = true;
            }
        }

        ranked.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.avg_latency_ms.cmp(&b.1.avg_latency_ms))
                .then_with(|| a.1.name.cmp(&b.1.name))
        });

        let estimated_cost_usd = ranked[0].0;
        let chain: Vec<ModelProfile> = ranked.into_iter().map(|(_, profile)| profile).collect();
        let reason = if budget_constrained {
            SelectionReason::BudgetConstrained { remaining_usd }
        } else if chain.len() == 1 {
            SelectionReason::SingleCandidate
        } else {
            SelectionReason::CheapestEligible
        };

        debug!(
            task_type = %task_type,
            primary = %chain[0].name,
            chain_len = chain.len(),
            estimated_cost_usd,
            reason = %reason,
            "Ranked fallback chain"
        );

        Ok(RoutingDecision {
            chain,
            reason,
            estimated_cost_usd,
        })
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for ModelRouter
pub struct ModelRouterBuilder {
    catalog: Option<CatalogHandle>,
    cost_tracker: Option<Arc<CostTracker>>,
}

impl Default for ModelRouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRouterBuilder {
    pub fn new() -> Self {
        Self {
            catalog: None,
            cost_tracker: None,
        }
    }

    /// Route against an existing catalog handle
    pub fn catalog(mut self, catalog: CatalogHandle) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Enable budget-aware candidate filtering
    pub fn cost_tracker(mut self, tracker: Arc<CostTracker>) -> Self {
        self.cost_tracker = Some(tracker);
        self
    }

    pub fn build(self) -> ModelRouter {
        ModelRouter {
            catalog: self.catalog.unwrap_or_default(),
            cost_tracker: self.cost_tracker,
        }
    }
}
