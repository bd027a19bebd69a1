//! Call outcomes, rolling aggregates and feedback records.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Running arithmetic mean after the `n`-th observation `x` (with `n >= 1`).
///
/// `avg' = (avg * (n - 1) + x) / n`
pub fn incremental_mean(avg: f64, n: u64, x: f64) -> f64 {
    if n == 0 {
        return avg;
    }
    (avg * (n - 1) as f64 + x) / n as f64
}

/// Coarse category of a request, used to specialize performance scoring
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QueryType {
    ChemicalSearch,
    InhibitorSearch,
    ClinicalTrial,
    LiteratureSearch,
    GeneLookup,
    ProteinInfo,
    General,
    Other(String),
}

impl QueryType {
    pub fn as_str(&self) -> &str {
        match self {
            QueryType::ChemicalSearch => "chemical_search",
            QueryType::InhibitorSearch => "inhibitor_search",
            QueryType::ClinicalTrial => "clinical_trial",
            QueryType::LiteratureSearch => "literature_search",
            QueryType::GeneLookup => "gene_lookup",
            QueryType::ProteinInfo => "protein_info",
            QueryType::General => "general",
            QueryType::Other(label) => label,
        }
    }
}

impl Default for QueryType {
    fn default() -> Self {
        QueryType::General
    }
}

impl From<&str> for QueryType {
    fn from(label: &str) -> Self {
        let label = label.trim().to_lowercase();
        match label.as_str() {
            "chemical_search" => QueryType::ChemicalSearch,
            "inhibitor_search" => QueryType::InhibitorSearch,
            "clinical_trial" => QueryType::ClinicalTrial,
            "literature_search" => QueryType::LiteratureSearch,
            "gene_lookup" => QueryType::GeneLookup,
            "protein_info" => QueryType::ProteinInfo,
            "general" | "" => QueryType::General,
            _ => QueryType::Other(label),
        }
    }
}

impl From<String> for QueryType {
    fn from(label: String) -> Self {
        QueryType::from(label.as_str())
    }
}

impl From<QueryType> for String {
    fn from(query_type: QueryType) -> Self {
        query_type.as_str().to_string()
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-query-type aggregate for one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryTypeStats {
    pub count: u64,
    pub success_count: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
}

impl QueryTypeStats {
    fn record(&mut self, latency_ms: f64, success: bool) {
        self.count += 1;
        if success {
            self.success_count += 1;
        }
        self.success_rate = self.success_count as f64 / self.count as f64;
        self.avg_latency_ms = incremental_mean(self.avg_latency_ms, self.count, latency_ms);
    }
}

/// Rolling performance of one provider. Only the router mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPerformance {
    pub provider: String,
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_latency_ms: f64,
    pub query_types: HashMap<QueryType, QueryTypeStats>,
}

impl ProviderPerformance {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            avg_latency_ms: 0.0,
            query_types: HashMap::new(),
        }
    }

    pub fn record(&mut self, query_type: &QueryType, latency_ms: f64, success: bool) {
        self.total_calls += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.avg_latency_ms = incremental_mean(self.avg_latency_ms, self.total_calls, latency_ms);

        self.query_types
            .entry(query_type.clone())
            .or_default()
            .record(latency_ms, success);
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_calls as f64
    }

    pub fn query_type_stats(&self, query_type: &QueryType) -> Option<&QueryTypeStats> {
        self.query_types.get(query_type)
    }

    /// Success rate for `query_type`, zero when never observed
    pub fn query_type_success_rate(&self, query_type: &QueryType) -> f64 {
        self.query_types
            .get(query_type)
            .map(|stats| stats.success_rate)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub uses: u64,
    pub successes: u64,
}

/// Performance of one agent, maintained by the orchestrating caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub agent: String,
    pub total_queries: u64,
    pub successful_queries: u64,
    pub failed_queries: u64,
    pub total_execution_time_ms: f64,
    /// Learned once a cross-layer pattern becomes valid
    pub preferred_providers: HashMap<QueryType, String>,
    pub provider_usage: HashMap<String, ProviderUsage>,
}

impl AgentPerformance {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            total_queries: 0,
            successful_queries: 0,
            failed_queries: 0,
            total_execution_time_ms: 0.0,
            preferred_providers: HashMap::new(),
            provider_usage: HashMap::new(),
        }
    }

    pub fn record_query(&mut self, success: bool, execution_time_ms: f64) {
        self.total_queries += 1;
        if success {
            self.successful_queries += 1;
        } else {
            self.failed_queries += 1;
        }
        self.total_execution_time_ms += execution_time_ms;
    }

    pub fn record_provider_usage(&mut self, provider: &str, success: bool) {
        let usage = self.provider_usage.entry(provider.to_string()).or_default();
        usage.uses += 1;
        if success {
            usage.successes += 1;
        }
    }

    pub fn learn_preference(&mut self, query_type: QueryType, provider: impl Into<String>) {
        self.preferred_providers.insert(query_type, provider.into());
    }

    pub fn preferred_provider(&self, query_type: &QueryType) -> Option<&str> {
        self.preferred_providers.get(query_type).map(String::as_str)
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_queries == 0 {
            return 0.0;
        }
        self.successful_queries as f64 / self.total_queries as f64
    }

    pub fn avg_execution_time_ms(&self) -> f64 {
        if self.total_queries == 0 {
            return 0.0;
        }
        self.total_execution_time_ms / self.total_queries as f64
    }

    pub fn provider_success_rate(&self, provider: &str) -> f64 {
        match self.provider_usage.get(provider) {
            Some(usage) if usage.uses > 0 => usage.successes as f64 / usage.uses as f64,
            _ => 0.0,
        }
    }
}

/// Where a routed result came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FeedbackSource {
    Provider(String),
    Cache,
    Error,
}

impl FeedbackSource {
    pub fn as_str(&self) -> &str {
        match self {
            FeedbackSource::Provider(name) => name,
            FeedbackSource::Cache => "cache",
            FeedbackSource::Error => "error",
        }
    }

    /// Names that would read back as [`FeedbackSource::Cache`] or [`FeedbackSource::Error`]
    pub fn is_reserved(name: &str) -> bool {
        matches!(name, "cache" | "error")
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            FeedbackSource::Provider(name) => Some(name),
            _ => None,
        }
    }
}

impl From<String> for FeedbackSource {
    fn from(source: String) -> Self {
        match source.as_str() {
            "cache" => FeedbackSource::Cache,
            "error" => FeedbackSource::Error,
            _ => FeedbackSource::Provider(source),
        }
    }
}

impl From<FeedbackSource> for String {
    fn from(source: FeedbackSource) -> Self {
        source.as_str().to_string()
    }
}

impl fmt::Display for FeedbackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one routed call, handed back to the agent layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub source: FeedbackSource,
    pub latency_ms: f64,
    pub success: bool,
    pub recommendation: String,
    /// Query-type aggregate of the source provider when the feedback was emitted
    pub query_type_performance: Option<QueryTypeStats>,
}

impl Feedback {
    pub fn cache_hit() -> Self {
        Self {
            source: FeedbackSource::Cache,
            latency_ms: 0.0,
            success: true,
            recommendation: "Cache hit - no provider call needed".to_string(),
            query_type_performance: None,
        }
    }

    pub fn error(recommendation: impl Into<String>) -> Self {
        Self {
            source: FeedbackSource::Error,
            latency_ms: 0.0,
            success: false,
            recommendation: recommendation.into(),
            query_type_performance: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn query_type_round_trips_through_labels() {
        assert_eq!(QueryType::from("Gene_Lookup"), QueryType::GeneLookup);
        assert_eq!(QueryType::from(""), QueryType::General);
        assert_eq!(QueryType::from("toxicity"), QueryType::Other("toxicity".to_string()));
        assert_eq!(QueryType::InhibitorSearch.to_string(), "inhibitor_search");

        let json = serde_json::to_string(&QueryType::ClinicalTrial).unwrap();
        assert_eq!(json, "\"clinical_trial\"");
    }

    #[test]
    fn feedback_source_serializes_as_plain_string() {
        let json = serde_json::to_value(Feedback::cache_hit()).unwrap();
        assert_eq!(json["source"], "cache");
        assert_eq!(FeedbackSource::from("pubchem".to_string()).provider(), Some("pubchem"));
    }

    #[test]
    fn provider_performance_tracks_query_types() {
        let mut perf = ProviderPerformance::new("pubchem");
        perf.record(&QueryType::ChemicalSearch, 100.0, true);
        perf.record(&QueryType::ChemicalSearch, 300.0, false);
        perf.record(&QueryType::GeneLookup, 200.0, true);

        assert_eq!(perf.total_calls, 3);
        assert_eq!(perf.failure_count, 1);
        assert!((perf.success_rate() - 2.0 / 3.0).abs() < 1e-12);
        assert!((perf.avg_latency_ms - 200.0).abs() < 1e-9);

        let chem = perf.query_type_stats(&QueryType::ChemicalSearch).unwrap();
        assert_eq!(chem.count, 2);
        assert_eq!(chem.success_rate, 0.5);
        assert!((chem.avg_latency_ms - 200.0).abs() < 1e-9);
        assert_eq!(perf.query_type_success_rate(&QueryType::ProteinInfo), 0.0);
    }

    #[test]
    fn agent_performance_usage() {
        let mut agent = AgentPerformance::new("chemical");
        agent.record_query(true, 120.0);
        agent.record_query(false, 80.0);
        agent.record_provider_usage("pubchem", true);
        agent.record_provider_usage("pubchem", false);
        agent.learn_preference(QueryType::ChemicalSearch, "pubchem");

        assert_eq!(agent.success_rate(), 0.5);
        assert_eq!(agent.avg_execution_time_ms(), 100.0);
        assert_eq!(agent.provider_success_rate("pubchem"), 0.5);
        assert_eq!(agent.provider_success_rate("biomcp"), 0.0);
        assert_eq!(agent.preferred_provider(&QueryType::ChemicalSearch), Some("pubchem"));
    }

    proptest! {
        #[test]
        fn incremental_mean_matches_batch_mean(samples in proptest::collection::vec(0.0f64..10_000.0, 1..200)) {
            let mut perf = ProviderPerformance::new("p");
            for (i, latency) in samples.iter().enumerate() {
                perf.record(&QueryType::General, *latency, i % 3 != 0);
            }

            let batch = samples.iter().sum::<f64>() / samples.len() as f64;
            prop_assert!((perf.avg_latency_ms - batch).abs() < 1e-6 * batch.max(1.0));

            let successes = (0..samples.len()).filter(|i| i % 3 != 0).count();
            prop_assert_eq!(perf.success_count as usize, successes);
            prop_assert!((perf.success_rate() - successes as f64 / samples.len() as f64).abs() < 1e-12);
        }
    }
}
