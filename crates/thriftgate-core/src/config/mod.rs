//! Configuration management for Thriftgate
//!
//! Config lives in a TOML file under the platform config directory
//! (override with `THRIFTGATE_CONFIG_DIR`). API keys never live in the
//! file; they are resolved from `THRIFTGATE_API_KEY` or
//! `OPENROUTER_API_KEY` at runtime.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::routing::{ModelProfile, default_profiles};

/// Top-level gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Upstream provider connection settings
    #[serde(default)]
    pub provider: ProviderSettings,
    /// Response cache settings
    #[serde(default)]
    pub cache: CacheSettings,
    /// Dispatch pipeline settings
    #[serde(default)]
    pub dispatch: DispatchSettings,
    /// Budget settings
    #[serde(default)]
    pub cost: CostSettings,
    /// Model catalog the router selects from
    #[serde(default = "default_profiles")]
    pub catalog: Vec<ModelProfile>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            cache: CacheSettings::default(),
            dispatch: DispatchSettings::default(),
            cost: CostSettings::default(),
            catalog: default_profiles(),
        }
    }
}

/// Upstream provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// API key; never serialized, resolved from the environment
    #[serde(skip)]
    pub api_key: Option<String>,
    /// OpenAI-compatible API base URL
    pub base_url: String,
    /// Model used for semantic cache embeddings
    pub embedding_model: String,
    /// HTTP request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            embedding_model: "openai/text-embedding-3-small".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ProviderSettings {
    /// Resolve the API key: explicit value first, then environment
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| env::var("THRIFTGATE_API_KEY").ok())
            .or_else(|| env::var("OPENROUTER_API_KEY").ok())
    }

    /// Redacted form of the resolved key, safe for logs
    pub fn redacted_api_key(&self) -> Option<String> {
        self.resolved_api_key().map(|key| {
            // Suffix by characters, not bytes, so multibyte keys cannot
            // panic on a mid-character slice
            let chars = key.chars().count();
            if chars > 4 {
                let suffix: String = key.chars().skip(chars - 4).collect();
                format!("***{}", suffix)
            } else {
                "***".to_string()
            }
        })
    }
}

/// Response cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Maximum resident entries before eviction
    pub max_entries: usize,
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
    /// Maximum cosine distance for a semantic hit
    pub max_distance: f32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_secs: 3_600,
            max_distance: 0.05,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ttl_secs)
    }
}

/// Dispatch pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Per-model dispatch timeout in seconds
    pub timeout_secs: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl DispatchSettings {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

/// Budget settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSettings {
    /// Daily spend limit in USD
    pub daily_limit_usd: f64,
    /// Warn when daily spend reaches this fraction of the limit
    pub alert_threshold: f64,
}

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            daily_limit_usd: 25.0,
            alert_threshold: 0.8,
        }
    }
}

impl GatewayConfig {
    /// Directory holding the config file
    pub fn config_dir() -> PathBuf {
        if let Ok(dir) = env::var("THRIFTGATE_CONFIG_DIR") {
            return PathBuf::from(dir);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("thriftgate")
    }

    /// Full path to the config file
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration, falling back to defaults when no file exists
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: GatewayConfig =
                toml::from_str(&content).context("Failed to parse config file")?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Persist configuration to the config file
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        let path = Self::config_path();
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Check value ranges and the no-keys-in-files rule
    pub fn validate(&self) -> Result<()> {
        if self.provider.api_key.is_some() {
            return Err(anyhow!(
                "API keys must come from the environment (THRIFTGATE_API_KEY or OPENROUTER_API_KEY), not the config file"
            ));
        }
        if self.provider.timeout_secs == 0 {
            return Err(anyhow!("provider.timeout_secs must be at least 1"));
        }
        if self.cache.max_entries == 0 {
            return Err(anyhow!("cache.max_entries must be at least 1"));
        }
        if self.cache.ttl_secs == 0 {
            return Err(anyhow!("cache.ttl_secs must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.cache.max_distance) {
            return Err(anyhow!(
                "cache.max_distance must be within [0.0, 2.0], got {}",
                self.cache.max_distance
            ));
        }
        if self.dispatch.timeout_secs == 0 {
            return Err(anyhow!("dispatch.timeout_secs must be at least 1"));
        }
        if self.cost.daily_limit_usd < 0.0 {
            return Err(anyhow!("cost.daily_limit_usd must not be negative"));
        }
        if !(0.0..=1.0).contains(&self.cost.alert_threshold) {
            return Err(anyhow!(
                "cost.alert_threshold must be within [0.0, 1.0], got {}",
                self.cost.alert_threshold
            ));
        }
        for profile in &self.catalog {
            if profile.name.is_empty() {
                return Err(anyhow!("catalog entries must have a name"));
            }
            if profile.input_price_per_1k < 0.0 || profile.output_price_per_1k < 0.0 {
                return Err(anyhow!(
                    "catalog entry '{}' has negative pricing",
                    profile.name
                ));
            }
        }
        Ok(())
    }
}
