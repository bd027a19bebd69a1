//! Layered configuration: embedded defaults, optional local file, then environment.
//!
//! Every heuristic constant used by the router, the knowledge base and the
//! session heuristics lives here so deployments can override it without
//! touching code.

use anyhow::{anyhow, Result};
use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Scoring weights and circuit-breaker limits for the adaptive router
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Multiplier applied to the query-type success rate
    pub query_type_weight: f64,
    /// Added once per supplied keyword previously linked to the provider
    pub keyword_bonus: f64,
    pub slow_latency_penalty: f64,
    pub slow_latency_threshold_ms: f64,
    /// Consecutive failures tolerated before the breaker opens
    pub circuit_breaker_threshold: u32,
    /// Query-type success rate above which feedback recommends the provider outright
    pub excellent_success_rate: f64,
    /// Score of a provider with no recorded calls
    pub neutral_score: f64,
    pub result_ttl_secs: u64,
    /// Upper bound for one provider call; `None` waits indefinitely
    pub call_timeout_ms: Option<u64>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            query_type_weight: 0.2,
            keyword_bonus: 0.1,
            slow_latency_penalty: 0.2,
            slow_latency_threshold_ms: 5_000.0,
            circuit_breaker_threshold: 5,
            excellent_success_rate: 0.8,
            neutral_score: 0.5,
            result_ttl_secs: 60,
            call_timeout_ms: None,
        }
    }
}

impl RouterConfig {
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

/// Default time-to-live per cache tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub results_ttl_secs: u64,
    pub compositions_ttl_secs: u64,
    pub sessions_ttl_secs: u64,
    pub maintenance_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            results_ttl_secs: 60,
            compositions_ttl_secs: 600,
            sessions_ttl_secs: 86_400 * 7,
            maintenance_interval_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

/// Thresholds for cross-layer pattern discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    pub min_pattern_observations: u32,
    pub high_performing_rate: f64,
    pub high_performing_observations: u32,
    /// Patterns above this rate are reported as human-readable insights
    pub insight_rate: f64,
    pub max_insight_patterns: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            min_pattern_observations: 3,
            high_performing_rate: 0.8,
            high_performing_observations: 5,
            insight_rate: 0.85,
            max_insight_patterns: 5,
        }
    }
}

/// Session summary sizes and next-step heuristics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub recent_queries: usize,
    pub key_entities: usize,
    pub recent_insights: usize,
    pub max_suggestions: usize,
    /// The latest query must have discovered more entities than this to suggest a deep dive
    pub deep_dive_entity_threshold: usize,
    pub stale_after_days: i64,
    pub comparison_keywords: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recent_queries: 5,
            key_entities: 10,
            recent_insights: 5,
            max_suggestions: 3,
            deep_dive_entity_threshold: 3,
            stale_after_days: 7,
            comparison_keywords: vec![
                "compare".to_string(),
                "comparing".to_string(),
                "comparison".to_string(),
                "versus".to_string(),
                "vs".to_string(),
                "competitive".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
    pub enable_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            enable_target: false,
        }
    }
}

/// Main settings structure with all configuration sections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load settings from the embedded defaults, `dual_orchestrator.toml` and `DUO__*` variables
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like [`Settings::load`], reading an explicit file instead of the local default
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(config::File::from_str(
            include_str!("../config.toml"),
            config::FileFormat::Toml,
        ));

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("dual_orchestrator").required(false)),
        };

        let config = builder
            .add_source(
                Environment::with_prefix("DUO")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("session.comparison_keywords")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings for consistency
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, value: f64| -> Result<()> {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
            Ok(())
        };

        unit("router.excellent_success_rate", self.router.excellent_success_rate)?;
        unit("router.neutral_score", self.router.neutral_score)?;
        unit("knowledge.high_performing_rate", self.knowledge.high_performing_rate)?;
        unit("knowledge.insight_rate", self.knowledge.insight_rate)?;

        if self.router.slow_latency_threshold_ms <= 0.0 {
            return Err(anyhow!("router.slow_latency_threshold_ms must be positive"));
        }
        if self.router.call_timeout_ms == Some(0) {
            return Err(anyhow!("router.call_timeout_ms cannot be 0"));
        }
        if self.cache.results_ttl_secs == 0
            || self.cache.compositions_ttl_secs == 0
            || self.cache.sessions_ttl_secs == 0
        {
            return Err(anyhow!("Cache tier TTLs cannot be 0"));
        }
        if self.cache.maintenance_interval_secs == 0 {
            return Err(anyhow!("cache.maintenance_interval_secs cannot be 0"));
        }
        if self.knowledge.min_pattern_observations == 0 {
            return Err(anyhow!("knowledge.min_pattern_observations cannot be 0"));
        }
        if self.session.max_suggestions == 0 {
            return Err(anyhow!("session.max_suggestions cannot be 0"));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(anyhow!("logging.format must be 'text' or 'json', got '{}'", self.logging.format));
        }

        Ok(())
    }

    /// Render the effective settings as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
