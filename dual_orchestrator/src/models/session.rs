//! Research session records: query lineage, hypotheses, insights and suggestions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::entities::Entity;
use crate::error::{OrchestrationError, Result};

fn check_confidence(confidence: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(confidence)
    } else {
        Err(OrchestrationError::InvalidConfidence(confidence))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisStatus {
    Proposed,
    Testing,
    Supported,
    Rejected,
    Inconclusive,
}

impl HypothesisStatus {
    /// Supported, rejected and inconclusive hypotheses are settled.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HypothesisStatus::Supported | HypothesisStatus::Rejected | HypothesisStatus::Inconclusive
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    PatternDetected,
    TrendIdentified,
    ContradictionFound,
    GapDiscovered,
    Opportunity,
}

/// One turn of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    pub query_id: String,
    pub query_text: String,
    pub timestamp: DateTime<Utc>,
    /// The query this one builds upon
    pub parent_query_id: Option<String>,
    pub agents_used: Vec<String>,
    pub providers_used: Vec<String>,
    pub execution_time_ms: Option<f64>,
    pub entities_discovered: Vec<String>,
    pub insights_generated: Vec<String>,
}

impl QueryContext {
    pub fn new(query_id: String, query_text: impl Into<String>, parent_query_id: Option<String>) -> Self {
        Self {
            query_id,
            query_text: query_text.into(),
            timestamp: Utc::now(),
            parent_query_id,
            agents_used: Vec::new(),
            providers_used: Vec::new(),
            execution_time_ms: None,
            entities_discovered: Vec::new(),
            insights_generated: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub hypothesis_id: String,
    pub statement: String,
    /// Agent name, `"user"` or `"system"`
    pub proposed_by: String,
    pub proposed_at: DateTime<Utc>,
    pub status: HypothesisStatus,
    pub confidence: f64,
    pub supporting_evidence: Vec<String>,
    pub contradicting_evidence: Vec<String>,
    pub related_entities: Vec<String>,
}

impl Hypothesis {
    pub fn new(
        hypothesis_id: String,
        statement: impl Into<String>,
        proposed_by: impl Into<String>,
        confidence: f64,
        related_entities: Vec<String>,
    ) -> Result<Self> {
        Ok(Self {
            hypothesis_id,
            statement: statement.into(),
            proposed_by: proposed_by.into(),
            proposed_at: Utc::now(),
            status: HypothesisStatus::Proposed,
            confidence: check_confidence(confidence)?,
            supporting_evidence: Vec::new(),
            contradicting_evidence: Vec::new(),
            related_entities,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub insight_id: String,
    pub insight_type: InsightType,
    pub description: String,
    pub discovered_by: String,
    pub discovered_at: DateTime<Utc>,
    pub confidence: f64,
    pub related_entities: Vec<String>,
    pub supporting_data: HashMap<String, Value>,
}

impl Insight {
    pub fn new(
        insight_id: String,
        insight_type: InsightType,
        description: impl Into<String>,
        discovered_by: impl Into<String>,
        confidence: f64,
    ) -> Result<Self> {
        Ok(Self {
            insight_id,
            insight_type,
            description: description.into(),
            discovered_by: discovered_by.into(),
            discovered_at: Utc::now(),
            confidence: check_confidence(confidence)?,
            related_entities: Vec::new(),
            supporting_data: HashMap::new(),
        })
    }

    pub fn with_related_entities(mut self, related_entities: Vec<String>) -> Self {
        self.related_entities = related_entities;
        self
    }

    pub fn with_supporting_data(mut self, supporting_data: HashMap<String, Value>) -> Self {
        self.supporting_data = supporting_data;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProactiveSuggestion {
    pub suggestion_id: String,
    pub suggestion_text: String,
    pub suggested_at: DateTime<Utc>,
    /// 1-5, higher is more important
    pub priority: u8,
    pub rationale: String,
    pub related_entities: Vec<String>,
}

/// Entry of the session's activity timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub detail: String,
}

/// A research session. It exclusively owns everything recorded in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSession {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub research_goal: String,
    pub entities: HashMap<String, Entity>,
    pub hypotheses: Vec<Hypothesis>,
    pub insights: Vec<Insight>,
    pub queries: Vec<QueryContext>,
    pub suggestions: Vec<ProactiveSuggestion>,
    pub timeline: Vec<TimelineEvent>,
}

impl ResearchSession {
    pub fn new(session_id: String, user_id: impl Into<String>, research_goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id: user_id.into(),
            created_at: now,
            last_active: now,
            research_goal: research_goal.into(),
            entities: HashMap::new(),
            hypotheses: Vec::new(),
            insights: Vec::new(),
            queries: Vec::new(),
            suggestions: Vec::new(),
            timeline: Vec::new(),
        }
    }

    fn touch(&mut self, actor: &str, action: &str, detail: String) {
        let now = Utc::now();
        self.last_active = now;
        self.timeline.push(TimelineEvent {
            timestamp: now,
            actor: actor.to_string(),
            action: action.to_string(),
            detail,
        });
    }

    pub fn add_query(&mut self, query: QueryContext) {
        let detail = query.query_text.clone();
        self.queries.push(query);
        self.touch("user", "query", detail);
    }

    /// Insert or replace by entity id
    pub fn add_entity(&mut self, entity: Entity) {
        let actor = entity.source_provider.clone().unwrap_or_else(|| "system".to_string());
        let detail = entity.name.clone();
        self.entities.insert(entity.entity_id.clone(), entity);
        self.touch(&actor, "entity", detail);
    }

    pub fn add_hypothesis(&mut self, hypothesis: Hypothesis) {
        let actor = hypothesis.proposed_by.clone();
        let detail = hypothesis.statement.clone();
        self.hypotheses.push(hypothesis);
        self.touch(&actor, "hypothesis", detail);
    }

    pub fn add_insight(&mut self, insight: Insight) {
        let actor = insight.discovered_by.clone();
        let detail = insight.description.clone();
        self.insights.push(insight);
        self.touch(&actor, "insight", detail);
    }

    pub fn add_suggestion(&mut self, suggestion: ProactiveSuggestion) {
        let detail = suggestion.suggestion_text.clone();
        self.suggestions.push(suggestion);
        self.touch("system", "suggestion", detail);
    }

    pub fn record_activity(&mut self, actor: &str, action: &str, detail: impl Into<String>) {
        self.touch(actor, action, detail.into());
    }

    pub fn query(&self, query_id: &str) -> Option<&QueryContext> {
        self.queries.iter().find(|q| q.query_id == query_id)
    }

    pub fn query_mut(&mut self, query_id: &str) -> Option<&mut QueryContext> {
        self.queries.iter_mut().find(|q| q.query_id == query_id)
    }

    /// The last `limit` queries, oldest first
    pub fn recent_queries(&self, limit: usize) -> &[QueryContext] {
        let start = self.queries.len().saturating_sub(limit);
        &self.queries[start..]
    }

    /// Hypotheses that are proposed or under test
    pub fn active_hypotheses(&self) -> impl Iterator<Item = &Hypothesis> {
        self.hypotheses.iter().filter(|h| !h.status.is_terminal())
    }
}
