//! Deterministic model routing
//!
//! Routing picks which models may serve a request and in what order. The
//! key components are:
//!
//! - **Model Catalog**: profiles of available models with pricing,
//!   capability, and latency metadata, behind a reloadable handle.
//!
//! - **Model Router**: ranks eligible models by estimated cost and
//!   returns the whole ranking as a fallback chain.
//!
//! Selection is pure ranking over the catalog snapshot. There is no
//! learning state, so identical inputs always produce identical chains,
//! and a routing decision can be explained entirely by its
//! [`SelectionReason`].

mod catalog;
mod router;
mod types;

pub use catalog::{CatalogHandle, ModelCatalog, ModelProfile, TaskType, default_profiles};
pub use router::{ModelRouter, ModelRouterBuilder};
pub use types::{RoutingDecision, SelectionReason};
