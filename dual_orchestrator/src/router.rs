//! Adaptive router: picks a provider per call, tracks its performance and
//! trips a circuit breaker on repeated failure.
//!
//! Scoring for a healthy candidate with history:
//!
//! ```text
//! success_rate
//!   + query_type_weight * query_type_success_rate   (if the query type was seen)
//!   + keyword_bonus     * matching keywords
//!   - slow_latency_penalty                           (if avg latency > threshold)
//! ```
//!
//! Providers without history score `neutral_score`. The highest score wins;
//! ties go to the provider registered first.
//!
//! Locks guarding the performance table and the cache are only held inside
//! synchronous sections and never across the provider call.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStats, CacheTier, MultiTierCache};
use crate::error::{OrchestrationError, Result};
use crate::models::performance::{Feedback, FeedbackSource, ProviderPerformance, QueryType};
use crate::provider::Provider;
use crate::settings::RouterConfig;

/// Per-call context supplied by the agent layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteContext {
    pub agent_id: String,
    pub query_type: QueryType,
    pub keywords: Vec<String>,
    /// Pin the call to one provider instead of scoring candidates
    pub preferred_provider: Option<String>,
}

impl Default for RouteContext {
    fn default() -> Self {
        Self {
            agent_id: "unknown".to_string(),
            query_type: QueryType::General,
            keywords: Vec::new(),
            preferred_provider: None,
        }
    }
}

impl RouteContext {
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    pub fn with_query_type(mut self, query_type: impl Into<QueryType>) -> Self {
        self.query_type = query_type.into();
        self
    }

    /// Keywords are lower-cased, trimmed and de-duplicated.
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for keyword in keywords {
            let keyword = keyword.as_ref().trim().to_lowercase();
            if !keyword.is_empty() && !self.keywords.contains(&keyword) {
                self.keywords.push(keyword);
            }
        }
        self
    }

    pub fn with_preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderScore {
    pub provider: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRanking {
    pub provider: String,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub total_calls: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTypeRecommendation {
    pub provider: String,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
}

/// Read-only snapshot for dashboards and the agent layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterInsights {
    pub provider_rankings: Vec<ProviderRanking>,
    pub query_type_recommendations: HashMap<QueryType, QueryTypeRecommendation>,
    pub keyword_patterns: HashMap<String, Vec<String>>,
    pub health: HashMap<String, bool>,
}

#[derive(Debug, Default)]
struct RouterState {
    performance: HashMap<String, ProviderPerformance>,
    /// keyword -> providers that answered it successfully, in order of first success
    keyword_patterns: HashMap<String, Vec<String>>,
    health: HashMap<String, bool>,
    consecutive_failures: HashMap<String, u32>,
}

impl RouterState {
    fn is_healthy(&self, provider: &str) -> bool {
        self.health.get(provider).copied().unwrap_or(true)
    }

    fn score(&self, provider: &str, context: &RouteContext, config: &RouterConfig) -> f64 {
        let perf = match self.performance.get(provider) {
            Some(perf) if perf.total_calls > 0 => perf,
            _ => return config.neutral_score,
        };

        let mut score = perf.success_rate();

        if let Some(stats) = perf.query_type_stats(&context.query_type) {
            score += config.query_type_weight * stats.success_rate;
        }

        for keyword in &context.keywords {
            let linked = self
                .keyword_patterns
                .get(keyword)
                .is_some_and(|providers| providers.iter().any(|p| p == provider));
            if linked {
                score += config.keyword_bonus;
            }
        }

        if perf.avg_latency_ms > config.slow_latency_threshold_ms {
            score -= config.slow_latency_penalty;
        }

        score
    }
}

pub struct Router {
    providers: RwLock<Vec<Arc<dyn Provider>>>,
    state: Mutex<RouterState>,
    cache: Arc<Mutex<MultiTierCache>>,
    config: RouterConfig,
}

impl Router {
    pub fn new(config: RouterConfig, cache: Arc<Mutex<MultiTierCache>>) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            state: Mutex::new(RouterState::default()),
            cache,
            config,
        }
    }

    pub fn with_providers<I>(config: RouterConfig, cache: Arc<Mutex<MultiTierCache>>, providers: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<dyn Provider>>,
    {
        let router = Self::new(config, cache);
        for provider in providers {
            router.register_provider(provider)?;
        }
        Ok(router)
    }

    /// Register a provider. Re-registering a name swaps the implementation and keeps its history.
    ///
    /// `cache` and `error` are reserved for [`FeedbackSource`] and cannot name a provider.
    pub fn register_provider(&self, provider: Arc<dyn Provider>) -> Result<()> {
        let name = provider.name().to_string();
        if FeedbackSource::is_reserved(&name) {
            return Err(OrchestrationError::ReservedProviderName(name));
        }
        info!(provider = %name, "Registering provider");

        {
            let mut providers = self.providers.write();
            match providers.iter().position(|p| p.name() == name) {
                Some(index) => providers[index] = provider,
                None => providers.push(provider),
            }
        }

        let mut state = self.state.lock();
        state
            .performance
            .entry(name.clone())
            .or_insert_with(|| ProviderPerformance::new(name.clone()));
        state.health.entry(name.clone()).or_insert(true);
        state.consecutive_failures.entry(name).or_insert(0);
        Ok(())
    }

    /// Provider names in registration order
    pub fn list_providers(&self) -> Vec<String> {
        self.providers.read().iter().map(|p| p.name().to_string()).collect()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn cache(&self) -> Arc<Mutex<MultiTierCache>> {
        self.cache.clone()
    }

    /// Route one tool call. Provider failures come back as a failed [`Feedback`];
    /// only an unknown pinned provider is an error.
    #[instrument(skip(self, params, context), fields(agent = %context.agent_id, query_type = %context.query_type))]
    pub async fn route(
        &self,
        tool: &str,
        params: &Map<String, Value>,
        context: &RouteContext,
    ) -> Result<(Option<Value>, Feedback)> {
        // Pinned calls only share cached results with calls pinned to the same provider.
        let key = match &context.preferred_provider {
            Some(provider) => format!("{}@{}", cache_key(tool, params), provider),
            None => cache_key(tool, params),
        };

        let cached = self.cache.lock().get(&key, CacheTier::Results);
        if let Some(value) = cached {
            debug!(tool, "Serving routed call from cache");
            return Ok((Some(value), Feedback::cache_hit()));
        }

        let provider = match self.select_provider(context)? {
            Some(provider) => provider,
            None => {
                warn!(tool, "No healthy provider available");
                return Ok((None, Feedback::error("No healthy provider available for this call")));
            }
        };
        let name = provider.name().to_string();
        debug!(tool, provider = %name, "Dispatching to provider");

        let start = Instant::now();
        let outcome = self.invoke(provider.as_ref(), tool, params).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1_000.0;

        match outcome {
            Ok(value) => {
                let feedback = self.record_success(&name, context, latency_ms);
                self.cache
                    .lock()
                    .set(key, value.clone(), CacheTier::Results, Some(self.config.result_ttl()));
                Ok((Some(value), feedback))
            }
            Err(reason) => {
                warn!(tool, provider = %name, %reason, "Provider call failed");
                Ok((None, self.record_failure(&name, context, latency_ms, &reason)))
            }
        }
    }

    fn select_provider(&self, context: &RouteContext) -> Result<Option<Arc<dyn Provider>>> {
        let providers = self.providers.read();
        let state = self.state.lock();

        if let Some(preferred) = &context.preferred_provider {
            let provider = providers
                .iter()
                .find(|p| p.name() == preferred)
                .ok_or_else(|| OrchestrationError::UnknownProvider(preferred.clone()))?;
            return Ok(state.is_healthy(preferred).then(|| provider.clone()));
        }

        let mut best: Option<(f64, &Arc<dyn Provider>)> = None;
        for provider in providers.iter().filter(|p| state.is_healthy(p.name())) {
            let score = state.score(provider.name(), context, &self.config);
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, provider));
            }
        }

        Ok(best.map(|(_, provider)| provider.clone()))
    }

    async fn invoke(
        &self,
        provider: &dyn Provider,
        tool: &str,
        params: &Map<String, Value>,
    ) -> std::result::Result<Value, String> {
        let call = provider.call_tool(tool, params);
        let outcome = match self.config.call_timeout() {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(format!("timed out after {}ms", limit.as_millis())),
            },
            None => call.await,
        };

        match outcome {
            Ok(Some(Value::Null)) | Ok(None) => Err("provider returned no result".to_string()),
            Ok(Some(value)) => Ok(value),
            Err(e) => Err(e.to_string()),
        }
    }

    fn record_success(&self, provider: &str, context: &RouteContext, latency_ms: f64) -> Feedback {
        let mut state = self.state.lock();

        state.consecutive_failures.insert(provider.to_string(), 0);
        for keyword in &context.keywords {
            let linked = state.keyword_patterns.entry(keyword.clone()).or_default();
            if !linked.iter().any(|p| p == provider) {
                linked.push(provider.to_string());
            }
        }

        let perf = state
            .performance
            .entry(provider.to_string())
            .or_insert_with(|| ProviderPerformance::new(provider));
        perf.record(&context.query_type, latency_ms, true);

        let snapshot = perf.query_type_stats(&context.query_type).cloned();
        let rate = perf.query_type_success_rate(&context.query_type);
        let recommendation = if rate > self.config.excellent_success_rate {
            format!(
                "{} is excellent for {} queries (success rate: {:.0}%)",
                provider,
                context.query_type,
                rate * 100.0
            )
        } else {
            format!(
                "{} worked but success rate for {} is only {:.0}%",
                provider,
                context.query_type,
                rate * 100.0
            )
        };

        Feedback {
            source: FeedbackSource::Provider(provider.to_string()),
            latency_ms,
            success: true,
            recommendation,
            query_type_performance: snapshot,
        }
    }

    fn record_failure(&self, provider: &str, context: &RouteContext, latency_ms: f64, reason: &str) -> Feedback {
        let order = self.list_providers();
        let mut state = self.state.lock();

        let failures = {
            let counter = state.consecutive_failures.entry(provider.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        if failures > self.config.circuit_breaker_threshold && state.is_healthy(provider) {
            state.health.insert(provider.to_string(), false);
            warn!(provider, failures, "Circuit breaker opened");
        }

        let perf = state
            .performance
            .entry(provider.to_string())
            .or_insert_with(|| ProviderPerformance::new(provider));
        perf.record(&context.query_type, latency_ms, false);
        let snapshot = perf.query_type_stats(&context.query_type).cloned();

        let mut alternative: Option<(&str, f64)> = None;
        for other in order.iter().filter(|name| name.as_str() != provider) {
            if !state.is_healthy(other) {
                continue;
            }
            let rate = state
                .performance
                .get(other)
                .map(|perf| perf.query_type_success_rate(&context.query_type))
                .unwrap_or(0.0);
            if rate > alternative.map_or(0.0, |(_, best)| best) {
                alternative = Some((other, rate));
            }
        }

        let recommendation = match alternative {
            Some((other, rate)) => format!(
                "{} failed ({}). Try {} instead (success rate: {:.0}% for {})",
                provider,
                reason,
                other,
                rate * 100.0,
                context.query_type
            ),
            None => format!("{} failed ({}). No better alternative found.", provider, reason),
        };

        Feedback {
            source: FeedbackSource::Provider(provider.to_string()),
            latency_ms,
            success: false,
            recommendation,
            query_type_performance: snapshot,
        }
    }

    /// Score every healthy provider for `context`, in registration order
    pub fn scores(&self, context: &RouteContext) -> Vec<ProviderScore> {
        let providers = self.providers.read();
        let state = self.state.lock();
        providers
            .iter()
            .filter(|p| state.is_healthy(p.name()))
            .map(|p| ProviderScore {
                provider: p.name().to_string(),
                score: state.score(p.name(), context, &self.config),
            })
            .collect()
    }

    /// Close the circuit for `provider` and clear its consecutive-failure count.
    pub fn reset_circuit_breaker(&self, provider: &str) -> Result<()> {
        if !self.providers.read().iter().any(|p| p.name() == provider) {
            return Err(OrchestrationError::UnknownProvider(provider.to_string()));
        }

        let mut state = self.state.lock();
        state.consecutive_failures.insert(provider.to_string(), 0);
        state.health.insert(provider.to_string(), true);
        info!(provider, "Circuit breaker reset");
        Ok(())
    }

    pub fn is_healthy(&self, provider: &str) -> Result<bool> {
        if !self.providers.read().iter().any(|p| p.name() == provider) {
            return Err(OrchestrationError::UnknownProvider(provider.to_string()));
        }
        Ok(self.state.lock().is_healthy(provider))
    }

    pub fn health(&self) -> HashMap<String, bool> {
        self.state.lock().health.clone()
    }

    pub fn performance(&self, provider: &str) -> Option<ProviderPerformance> {
        self.state.lock().performance.get(provider).cloned()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    pub fn insights(&self) -> RouterInsights {
        let order = self.list_providers();
        let state = self.state.lock();

        let mut provider_rankings: Vec<ProviderRanking> = order
            .iter()
            .filter_map(|name| state.performance.get(name))
            .filter(|perf| perf.total_calls > 0)
            .map(|perf| ProviderRanking {
                provider: perf.provider.clone(),
                success_rate: perf.success_rate(),
                avg_latency_ms: perf.avg_latency_ms,
                total_calls: perf.total_calls,
            })
            .collect();
        provider_rankings.sort_by(|a, b| b.success_rate.total_cmp(&a.success_rate));

        let mut query_type_recommendations: HashMap<QueryType, QueryTypeRecommendation> = HashMap::new();
        for name in &order {
            let Some(perf) = state.performance.get(name) else {
                continue;
            };
            for (query_type, stats) in &perf.query_types {
                let current = query_type_recommendations
                    .get(query_type)
                    .map_or(0.0, |rec| rec.success_rate);
                if stats.success_rate > current {
                    query_type_recommendations.insert(
                        query_type.clone(),
                        QueryTypeRecommendation {
                            provider: name.clone(),
                            success_rate: stats.success_rate,
                            avg_latency_ms: stats.avg_latency_ms,
                        },
                    );
                }
            }
        }

        RouterInsights {
            provider_rankings,
            query_type_recommendations,
            keyword_patterns: state.keyword_patterns.clone(),
            health: state.health.clone(),
        }
    }
}

/// Deterministic key for `(tool, params)`: object keys are sorted at every depth.
pub fn cache_key(tool: &str, params: &Map<String, Value>) -> String {
    fn canonical(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut sorted = Map::new();
                for key in keys {
                    sorted.insert(key.clone(), canonical(&map[key]));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
            other => other.clone(),
        }
    }

    format!("{}:{}", tool, canonical(&Value::Object(params.clone())))
}
