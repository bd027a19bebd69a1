//! Knowledge base shared by the agent and provider layers.
//!
//! Holds two append-only learning logs (what agents learned, what is known
//! about providers) and mines cross-layer patterns: how well a given agent
//! does with a given provider for a given query type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::models::performance::{incremental_mean, AgentPerformance, Feedback, QueryType};
use crate::router::RouterInsights;
use crate::settings::KnowledgeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningCategory {
    General,
    ProviderPreference,
    Preprocessing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLearning {
    pub agent: String,
    pub learnings: Vec<String>,
    /// Non-general learnings, indexed by category
    pub preferences: BTreeMap<LearningCategory, Vec<String>>,
    pub updated_at: DateTime<Utc>,
}

impl AgentLearning {
    fn new(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            learnings: Vec::new(),
            preferences: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn by_category(&self, category: LearningCategory) -> &[String] {
        self.preferences.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderLearningKind {
    Strength,
    Weakness,
    PreprocessingTip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderLearning {
    pub provider: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub preprocessing_tips: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderLearning {
    fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            preprocessing_tips: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Observed outcome of an (agent, provider, query type) combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossLayerPattern {
    pub pattern_id: String,
    pub description: String,
    pub agent: String,
    pub provider: String,
    pub query_type: QueryType,
    pub success_rate: f64,
    pub observations: u64,
    pub discovered_at: DateTime<Utc>,
}

impl CrossLayerPattern {
    fn new(agent: &str, provider: &str, query_type: &QueryType) -> Self {
        Self {
            pattern_id: format!("{}+{}+{}", agent, provider, query_type),
            description: format!("{} using {} for {}", agent, provider, query_type),
            agent: agent.to_string(),
            provider: provider.to_string(),
            query_type: query_type.clone(),
            success_rate: 0.0,
            observations: 0,
            discovered_at: Utc::now(),
        }
    }

    fn matches(&self, agent: &str, provider: &str, query_type: &QueryType) -> bool {
        self.agent == agent && self.provider == provider && &self.query_type == query_type
    }

    fn observe(&mut self, success: bool) {
        self.observations += 1;
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate = incremental_mean(self.success_rate, self.observations, outcome);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLearningSummary {
    pub total_learnings: usize,
    pub recent_learnings: Vec<String>,
    pub last_updated: DateTime<Utc>,
    pub patterns: usize,
    pub observations: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderLearningSummary {
    pub strengths: usize,
    pub weaknesses: usize,
    pub preprocessing_tips: usize,
    pub patterns: usize,
    pub observations: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub total_patterns: usize,
    pub valid_patterns: usize,
    pub high_performing: Vec<CrossLayerPattern>,
}

/// Derived, read-only view for dashboards
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSummary {
    pub agents: BTreeMap<String, AgentLearningSummary>,
    pub providers: BTreeMap<String, ProviderLearningSummary>,
    pub patterns: PatternSummary,
}

/// What an agent can tell the provider layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentFeedbackDigest {
    pub preprocessing_suggestions: Vec<String>,
    pub usage_patterns: Vec<String>,
}

#[derive(Debug, Default)]
pub struct KnowledgeBase {
    config: KnowledgeConfig,
    agent_learnings: HashMap<String, AgentLearning>,
    provider_learnings: HashMap<String, ProviderLearning>,
    patterns: Vec<CrossLayerPattern>,
    agent_performances: HashMap<String, AgentPerformance>,
}

impl KnowledgeBase {
    pub fn new(config: KnowledgeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    // --- Agent learnings ---

    pub fn record_agent_learning(&mut self, agent: &str, learning: impl Into<String>, category: LearningCategory) {
        let learning = learning.into();
        debug!(agent, ?category, "Recording agent learning");

        let entry = self
            .agent_learnings
            .entry(agent.to_string())
            .or_insert_with(|| AgentLearning::new(agent));
        if category != LearningCategory::General {
            entry.preferences.entry(category).or_default().push(learning.clone());
        }
        entry.learnings.push(learning);
        entry.updated_at = Utc::now();
    }

    pub fn agent_learnings(&self, agent: &str) -> Option<&AgentLearning> {
        self.agent_learnings.get(agent)
    }

    // --- Provider learnings ---

    pub fn record_provider_learning(&mut self, provider: &str, kind: ProviderLearningKind, learning: impl Into<String>) {
        debug!(provider, ?kind, "Recording provider learning");

        let entry = self
            .provider_learnings
            .entry(provider.to_string())
            .or_insert_with(|| ProviderLearning::new(provider));
        let log = match kind {
            ProviderLearningKind::Strength => &mut entry.strengths,
            ProviderLearningKind::Weakness => &mut entry.weaknesses,
            ProviderLearningKind::PreprocessingTip => &mut entry.preprocessing_tips,
        };
        log.push(learning.into());
        entry.updated_at = Utc::now();
    }

    pub fn provider_learnings(&self, provider: &str) -> Option<&ProviderLearning> {
        self.provider_learnings.get(provider)
    }

    // --- Cross-layer patterns ---

    /// Record one observation of `agent` using `provider` for `query_type`.
    pub fn record_pattern(&mut self, agent: &str, provider: &str, query_type: &QueryType, success: bool) -> &CrossLayerPattern {
        let index = match self
            .patterns
            .iter()
            .position(|p| p.matches(agent, provider, query_type))
        {
            Some(index) => index,
            None => {
                self.patterns.push(CrossLayerPattern::new(agent, provider, query_type));
                self.patterns.len() - 1
            }
        };

        let pattern = &mut self.patterns[index];
        pattern.observe(success);
        pattern
    }

    /// Highest success rate among patterns with enough observations. Ties keep the
    /// pattern discovered first.
    pub fn best_pattern_for(&self, agent: &str, query_type: &QueryType) -> Option<&CrossLayerPattern> {
        let mut best: Option<&CrossLayerPattern> = None;
        for pattern in self.patterns.iter().filter(|p| {
            p.agent == agent
                && &p.query_type == query_type
                && p.observations >= u64::from(self.config.min_pattern_observations)
        }) {
            if best.map_or(true, |b| pattern.success_rate > b.success_rate) {
                best = Some(pattern);
            }
        }
        best
    }

    pub fn patterns(&self) -> &[CrossLayerPattern] {
        &self.patterns
    }

    fn is_high_performing(&self, pattern: &CrossLayerPattern) -> bool {
        pattern.success_rate > self.config.high_performing_rate
            && pattern.observations >= u64::from(self.config.high_performing_observations)
    }

    // --- Agent performance ---

    pub fn register_agent(&mut self, agent: &str) -> &mut AgentPerformance {
        self.agent_performances
            .entry(agent.to_string())
            .or_insert_with(|| AgentPerformance::new(agent))
    }

    pub fn agent_performance(&self, agent: &str) -> Option<&AgentPerformance> {
        self.agent_performances.get(agent)
    }

    pub fn agent_performances(&self) -> &HashMap<String, AgentPerformance> {
        &self.agent_performances
    }

    /// Fold a routed call's feedback into the agent's record and the pattern table.
    ///
    /// Cache hits and "no provider" outcomes only count as queries; provider
    /// outcomes also feed the pattern table, and once a valid best pattern
    /// exists the agent adopts its provider as preferred for `query_type`.
    pub fn ingest_feedback(&mut self, agent: &str, query_type: &QueryType, feedback: &Feedback) {
        self.register_agent(agent)
            .record_query(feedback.success, feedback.latency_ms);

        let Some(provider) = feedback.source.provider() else {
            return;
        };

        self.register_agent(agent)
            .record_provider_usage(provider, feedback.success);
        self.record_pattern(agent, provider, query_type, feedback.success);

        let preferred = self.best_pattern_for(agent, query_type).map(|p| p.provider.clone());
        if let Some(preferred) = preferred {
            let performance = self.register_agent(agent);
            if performance.preferred_provider(query_type) != Some(preferred.as_str()) {
                info!(agent, provider = %preferred, %query_type, "Agent learned preferred provider");
                performance.learn_preference(query_type.clone(), preferred);
            }
        }
    }

    // --- Digests ---

    /// Provider layer to agents: best provider per query type
    pub fn provider_to_agent_feedback(&self, insights: &RouterInsights) -> Vec<String> {
        let mut recommendations: Vec<_> = insights.query_type_recommendations.iter().collect();
        recommendations.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));

        recommendations
            .into_iter()
            .map(|(query_type, rec)| {
                format!(
                    "For {} queries, {} has {:.1}% success rate (avg {:.0}ms)",
                    query_type,
                    rec.provider,
                    rec.success_rate * 100.0,
                    rec.avg_latency_ms
                )
            })
            .collect()
    }

    /// Agent to provider layer: preprocessing advice and observed usage
    pub fn agent_to_provider_feedback(&self, agent: &str) -> AgentFeedbackDigest {
        let preprocessing_suggestions = self
            .agent_learnings
            .get(agent)
            .map(|learning| learning.by_category(LearningCategory::Preprocessing).to_vec())
            .unwrap_or_default();

        let usage_patterns = self
            .patterns
            .iter()
            .filter(|p| p.agent == agent)
            .map(|p| {
                format!(
                    "{}: {:.0}% success over {} observations",
                    p.description,
                    p.success_rate * 100.0,
                    p.observations
                )
            })
            .collect();

        AgentFeedbackDigest {
            preprocessing_suggestions,
            usage_patterns,
        }
    }

    pub fn summary(&self) -> KnowledgeSummary {
        let mut agents = BTreeMap::new();
        for (name, learning) in &self.agent_learnings {
            let start = learning.learnings.len().saturating_sub(5);
            agents.insert(
                name.clone(),
                AgentLearningSummary {
                    total_learnings: learning.learnings.len(),
                    recent_learnings: learning.learnings[start..].to_vec(),
                    last_updated: learning.updated_at,
                    patterns: 0,
                    observations: 0,
                },
            );
        }

        let mut providers = BTreeMap::new();
        for (name, learning) in &self.provider_learnings {
            providers.insert(
                name.clone(),
                ProviderLearningSummary {
                    strengths: learning.strengths.len(),
                    weaknesses: learning.weaknesses.len(),
                    preprocessing_tips: learning.preprocessing_tips.len(),
                    patterns: 0,
                    observations: 0,
                },
            );
        }

        for pattern in &self.patterns {
            let agent = agents
                .entry(pattern.agent.clone())
                .or_insert_with(|| AgentLearningSummary {
                    total_learnings: 0,
                    recent_learnings: Vec::new(),
                    last_updated: pattern.discovered_at,
                    patterns: 0,
                    observations: 0,
                });
            agent.patterns += 1;
            agent.observations += pattern.observations;

            let provider = providers
                .entry(pattern.provider.clone())
                .or_insert_with(|| ProviderLearningSummary {
                    strengths: 0,
                    weaknesses: 0,
                    preprocessing_tips: 0,
                    patterns: 0,
                    observations: 0,
                });
            provider.patterns += 1;
            provider.observations += pattern.observations;
        }

        let min = u64::from(self.config.min_pattern_observations);
        KnowledgeSummary {
            agents,
            providers,
            patterns: PatternSummary {
                total_patterns: self.patterns.len(),
                valid_patterns: self.patterns.iter().filter(|p| p.observations >= min).count(),
                high_performing: self
                    .patterns
                    .iter()
                    .filter(|p| self.is_high_performing(p))
                    .cloned()
                    .collect(),
            },
        }
    }

    /// Human-readable statements for display
    pub fn insights(&self) -> Vec<String> {
        let mut insights: Vec<String> = self
            .patterns
            .iter()
            .filter(|p| {
                p.success_rate > self.config.insight_rate
                    && p.observations >= u64::from(self.config.high_performing_observations)
            })
            .take(self.config.max_insight_patterns)
            .map(|p| {
                format!(
                    "{} + {} achieves {:.0}% success for {} queries",
                    p.agent,
                    p.provider,
                    p.success_rate * 100.0,
                    p.query_type
                )
            })
            .collect();

        let mut providers: Vec<&ProviderLearning> = self.provider_learnings.values().collect();
        providers.sort_by(|a, b| a.provider.cmp(&b.provider));
        for learning in providers {
            if let Some(strength) = learning.strengths.first() {
                insights.push(format!("{}: {}", learning.provider, strength));
            }
        }

        insights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::performance::FeedbackSource;
    use crate::router::QueryTypeRecommendation;

    fn kb() -> KnowledgeBase {
        KnowledgeBase::new(KnowledgeConfig::default())
    }

    fn provider_feedback(provider: &str, success: bool) -> Feedback {
        Feedback {
            source: FeedbackSource::Provider(provider.to_string()),
            latency_ms: 100.0,
            success,
            recommendation: String::new(),
            query_type_performance: None,
        }
    }

    #[test]
    fn best_pattern_requires_three_observations() {
        let mut kb = kb();
        let qt = QueryType::InhibitorSearch;

        kb.record_pattern("chemical", "biomcp", &qt, true);
        kb.record_pattern("chemical", "biomcp", &qt, true);
        assert!(kb.best_pattern_for("chemical", &qt).is_none());

        kb.record_pattern("chemical", "biomcp", &qt, true);
        let best = kb.best_pattern_for("chemical", &qt).unwrap();
        assert_eq!(best.provider, "biomcp");
        assert_eq!(best.observations, 3);
        assert_eq!(best.success_rate, 1.0);
    }

    #[test]
    fn failures_pull_the_success_rate_down() {
        let mut kb = kb();
        let qt = QueryType::ChemicalSearch;

        kb.record_pattern("chemical", "pubchem", &qt, true);
        kb.record_pattern("chemical", "pubchem", &qt, false);
        kb.record_pattern("chemical", "pubchem", &qt, false);
        let pattern = kb.record_pattern("chemical", "pubchem", &qt, true);

        assert_eq!(pattern.observations, 4);
        assert!((pattern.success_rate - 0.5).abs() < 1e-12);
        assert_eq!(kb.patterns().len(), 1);
    }

    #[test]
    fn best_pattern_picks_highest_rate() {
        let mut kb = kb();
        let qt = QueryType::InhibitorSearch;
        for success in [true, false, false] {
            kb.record_pattern("chemical", "pubchem", &qt, success);
        }
        for success in [true, true, false] {
            kb.record_pattern("chemical", "biomcp", &qt, success);
        }
        kb.record_pattern("chemical", "biomcp", &QueryType::General, true);

        assert_eq!(kb.best_pattern_for("chemical", &qt).unwrap().provider, "biomcp");
        assert!(kb.best_pattern_for("clinical", &qt).is_none());
    }

    #[test]
    fn learnings_are_categorized() {
        let mut kb = kb();
        kb.record_agent_learning("chemical", "Use canonical SMILES", LearningCategory::Preprocessing);
        kb.record_agent_learning("chemical", "BioMCP beats PubChem for inhibitors", LearningCategory::ProviderPreference);
        kb.record_agent_learning("chemical", "Ask for units", LearningCategory::General);
        kb.record_provider_learning("pubchem", ProviderLearningKind::Weakness, "Slow on bulk queries");
        kb.record_provider_learning("biomcp", ProviderLearningKind::Strength, "Accurate inhibitor data");

        let learning = kb.agent_learnings("chemical").unwrap();
        assert_eq!(learning.learnings.len(), 3);
        assert_eq!(learning.by_category(LearningCategory::Preprocessing), ["Use canonical SMILES".to_string()]);
        assert!(learning.by_category(LearningCategory::General).is_empty());

        let digest = kb.agent_to_provider_feedback("chemical");
        assert_eq!(digest.preprocessing_suggestions, vec!["Use canonical SMILES".to_string()]);

        let summary = kb.summary();
        assert_eq!(summary.agents["chemical"].total_learnings, 3);
        assert_eq!(summary.providers["pubchem"].weaknesses, 1);
        assert_eq!(kb.insights(), vec!["biomcp: Accurate inhibitor data".to_string()]);
    }

    #[test]
    fn summary_flags_high_performing_patterns() {
        let mut kb = kb();
        let qt = QueryType::ClinicalTrial;
        for _ in 0..5 {
            kb.record_pattern("clinical", "biomcp", &qt, true);
        }
        for success in [true, true, true, true, false] {
            kb.record_pattern("clinical", "pubchem", &qt, success);
        }
        kb.record_pattern("literature", "pubmed", &QueryType::LiteratureSearch, true);

        let summary = kb.summary();
        assert_eq!(summary.patterns.total_patterns, 3);
        assert_eq!(summary.patterns.valid_patterns, 2);
        assert_eq!(summary.patterns.high_performing.len(), 1);
        assert_eq!(summary.patterns.high_performing[0].provider, "biomcp");
        assert_eq!(summary.agents["clinical"].observations, 10);
        assert_eq!(summary.providers["pubmed"].patterns, 1);

        let insights = kb.insights();
        assert_eq!(insights, vec!["clinical + biomcp achieves 100% success for clinical_trial queries".to_string()]);
    }

    #[test]
    fn ingest_feedback_learns_preferred_provider() {
        let mut kb = kb();
        let qt = QueryType::InhibitorSearch;

        kb.ingest_feedback("chemical", &qt, &provider_feedback("biomcp", true));
        kb.ingest_feedback("chemical", &qt, &provider_feedback("biomcp", true));
        assert!(kb.agent_performance("chemical").unwrap().preferred_provider(&qt).is_none());

        kb.ingest_feedback("chemical", &qt, &provider_feedback("biomcp", false));
        kb.ingest_feedback("chemical", &qt, &Feedback::cache_hit());

        let perf = kb.agent_performance("chemical").unwrap();
        assert_eq!(perf.preferred_provider(&qt), Some("biomcp"));
        assert_eq!(perf.total_queries, 4);
        assert_eq!(perf.failed_queries, 1);
        assert_eq!(perf.provider_usage["biomcp"].uses, 3);
        assert_eq!(kb.patterns().len(), 1);
    }

    #[test]
    fn provider_feedback_digest_is_sorted_by_query_type() {
        let kb = kb();
        let mut insights = RouterInsights::default();
        insights.query_type_recommendations.insert(
            QueryType::InhibitorSearch,
            QueryTypeRecommendation {
                provider: "biomcp".to_string(),
                success_rate: 0.9,
                avg_latency_ms: 1200.0,
            },
        );
        insights.query_type_recommendations.insert(
            QueryType::ChemicalSearch,
            QueryTypeRecommendation {
                provider: "pubchem".to_string(),
                success_rate: 0.75,
                avg_latency_ms: 300.0,
            },
        );

        assert_eq!(
            kb.provider_to_agent_feedback(&insights),
            vec![
                "For chemical_search queries, pubchem has 75.0% success rate (avg 300ms)".to_string(),
                "For inhibitor_search queries, biomcp has 90.0% success rate (avg 1200ms)".to_string(),
            ]
        );
    }
}
