//! Model catalog: profiles, task types, and the reloadable handle

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Task categories a model can be eligible for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// General chat and open-ended requests
    General,
    /// Condensing documents or conversations
    Summarization,
    /// Writing or editing source code
    CodeGeneration,
    /// Labeling and categorization
    Classification,
    /// Natural-language translation
    Translation,
    /// Multi-step reasoning and analysis
    Reasoning,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskType::General => "general",
            TaskType::Summarization => "summarization",
            TaskType::CodeGeneration => "code_generation",
            TaskType::Classification => "classification",
            TaskType::Translation => "translation",
            TaskType::Reasoning => "reasoning",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" => Ok(TaskType::General),
            "summarization" => Ok(TaskType::Summarization),
            "code_generation" | "code" => Ok(TaskType::CodeGeneration),
            "classification" => Ok(TaskType::Classification),
            "translation" => Ok(TaskType::Translation),
            "reasoning" => Ok(TaskType::Reasoning),
            _ => Err(format!("Unknown task type: {}", s)),
        }
    }
}

fn default_available() -> bool {
    true
}

/// A model known to the gateway, with pricing and capability metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Catalog identifier (e.g., "openai/gpt-4o-mini")
    pub name: String,
    /// Upstream provider name (e.g., "openai")
    pub provider: String,
    /// Price per 1K input tokens in USD
    pub input_price_per_1k: f64,
    /// Price per 1K output tokens in USD
    pub output_price_per_1k: f64,
    /// Task types this model is eligible for
    pub supported_task_types: Vec<TaskType>,
    /// Maximum context window in tokens
    pub max_context_tokens: usize,
    /// Typical end-to-end latency in milliseconds
    pub avg_latency_ms: u64,
    /// Whether the model is currently dispatchable
    #[serde(default = "default_available")]
    pub available: bool,
}

impl ModelProfile {
    /// Create a new profile with conservative defaults
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            input_price_per_1k: 0.001,
            output_price_per_1k: 0.002,
            supported_task_types: vec![TaskType::General],
            max_context_tokens: 128_000,
            avg_latency_ms: 1_000,
            available: true,
        }
    }

    /// Set pricing (per 1K tokens, USD)
    pub fn with_pricing(mut self, input: f64, output: f64) -> Self {
        self.input_price_per_1k = input;
        self.output_price_per_1k = output;
        self
    }

    /// Set supported task types
    pub fn with_task_types(mut self, task_types: Vec<TaskType>) -> Self {
        self.supported_task_types = task_types;
        self
    }

    /// Set the context window size
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    /// Set the typical latency
    pub fn with_avg_latency(mut self, latency_ms: u64) -> Self {
        self.avg_latency_ms = latency_ms;
        self
    }

    /// Whether this model is eligible for a task type
    pub fn supports(&self, task_type: TaskType) -> bool {
        self.supported_task_types.contains(&task_type)
    }

    /// Cost in USD for a given token count
    pub fn cost_for(&self, tokens_in: u32, tokens_out: u32) -> f64 {
        let input_cost = (tokens_in as f64 / 1_000.0) * self.input_price_per_1k;
        let output_cost = (tokens_out as f64 / 1_000.0) * self.output_price_per_1k;
        input_cost + output_cost
    }
}

/// Default model catalog with published pricing as of mid-2025
pub fn default_profiles() -> Vec<ModelProfile> {
    let all_tasks = vec![
        TaskType::General,
        TaskType::Summarization,
        TaskType::CodeGeneration,
        TaskType::Classification,
        TaskType::Translation,
        TaskType::Reasoning,
    ];
    let light_tasks = vec![
        TaskType::General,
        TaskType::Summarization,
        TaskType::CodeGeneration,
        TaskType::Classification,
        TaskType::Translation,
    ];

    vec![
        ModelProfile::new("anthropic/claude-sonnet-4-20250514", "anthropic")
            .with_pricing(0.003, 0.015)
            .with_task_types(all_tasks.clone())
            .with_context_window(200_000)
            .with_avg_latency(1_800),
        ModelProfile::new("anthropic/claude-3-5-haiku-latest", "anthropic")
            .with_pricing(0.0008, 0.004)
            .with_task_types(light_tasks.clone())
            .with_context_window(200_000)
            .with_avg_latency(700),
        ModelProfile::new("anthropic/claude-opus-4-20250514", "anthropic")
            .with_pricing(0.015, 0.075)
            .with_task_types(all_tasks.clone())
            .with_context_window(200_000)
            .with_avg_latency(3_500),
        ModelProfile::new("openai/gpt-4o", "openai")
            .with_pricing(0.0025, 0.010)
            .with_task_types(all_tasks)
            .with_context_window(128_000)
            .with_avg_latency(1_400),
        ModelProfile::new("openai/gpt-4o-mini", "openai")
            .with_pricing(0.00015, 0.0006)
            .with_task_types(light_tasks)
            .with_context_window(128_000)
            .with_avg_latency(600),
    ]
}

/// Immutable catalog of model profiles
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: Vec<ModelProfile>,
}

impl ModelCatalog {
    /// Create a catalog from a list of profiles
    pub fn new(models: Vec<ModelProfile>) -> Self {
        Self { models }
    }

    /// Create a catalog with the built-in default models
    pub fn with_defaults() -> Self {
        Self::new(default_profiles())
    }

    /// Look up a profile by name
    pub fn get(&self, name: &str) -> Option<&ModelProfile> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Profiles eligible for a task type, in catalog order.
    ///
    /// Unavailable models are excluded.
    pub fn eligible(&self, task_type: TaskType) -> Vec<&ModelProfile> {
        self.models
            .iter()
            .filter(|m| m.available && m.supports(task_type))
            .collect()
    }

    /// All profiles, including unavailable ones
    pub fn all(&self) -> &[ModelProfile] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Shared handle to the active catalog.
///
/// Routing reads a snapshot; operators swap the whole catalog or flip
/// availability without interrupting in-flight requests. Decisions made
/// against an old snapshot stay internally consistent.
#[derive(Debug, Clone)]
pub struct CatalogHandle {
    inner: Arc<RwLock<Arc<ModelCatalog>>>,
}

impl CatalogHandle {
    /// Create a handle over an initial catalog
    pub fn new(catalog: ModelCatalog) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    /// Current catalog snapshot
    pub fn snapshot(&self) -> Arc<ModelCatalog> {
        self.inner
            .read()
            .ok()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_default()
    }

    /// Atomically replace the active catalog
    pub fn replace(&self, catalog: ModelCatalog) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Arc::new(catalog);
        }
    }

    /// Flip availability for one model.
    ///
    /// Returns false when the model is not in the catalog.
    pub fn set_availability(&self, name: &str, available: bool) -> bool {
        if let Ok(mut guard) = self.inner.write() {
            let mut models = guard.all().to_vec();
            let mut found = false;
            for model in &mut models {
                if model.name == name {
                    model.available = available;
                    found = true;
                }
            }
            if found {
                *guard = Arc::new(ModelCatalog::new(models));
            }
            found
        } else {
            false
        }
    }
}

impl Default for CatalogHandle {
    fn default() -> Self {
        Self::new(ModelCatalog::with_defaults())
    }
}
