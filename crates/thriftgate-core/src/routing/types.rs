//! Routing decision types

use serde::Serialize;

use super::catalog::ModelProfile;

/// Why the router ranked the chain the way it did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SelectionReason {
    /// Cheapest of several eligible models won
    CheapestEligible,
    /// Only one model was eligible
    SingleCandidate,
    /// Models estimated over the remaining daily budget were dropped
    BudgetConstrained { remaining_usd: f64 },
}

impl std::fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionReason::CheapestEligible => write!(f, "cheapest eligible"),
            SelectionReason::SingleCandidate => write!(f, "single candidate"),
            SelectionReason::BudgetConstrained { remaining_usd } => {
                write!(f, "budget constrained (${:.4} remaining)", remaining_usd)
            }
        }
    }
}

/// Outcome of a routing pass: the full fallback chain, cheapest first
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    /// Eligible models ordered by estimated cost, then latency, then name
    pub chain: Vec<ModelProfile>,
    /// Why this ordering was chosen
    pub reason: SelectionReason,
    /// Estimated cost of the primary model in USD
    pub estimated_cost_usd: f64,
}

impl RoutingDecision {
    /// The model dispatch will try first
    pub fn primary(&self) -> Option<&ModelProfile> {
        self.chain.first()
    }

    /// Chain as names, for logs and diagnostics
    pub fn model_names(&self) -> Vec<&str> {
        self.chain.iter().map(|profile| profile.name.as_str()).collect()
    }
}
