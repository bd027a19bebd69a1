//! Session memory: research sessions, their query lineage and derived suggestions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{OrchestrationError, Result};
use crate::models::entities::Entity;
use crate::models::session::{
    Hypothesis, HypothesisStatus, Insight, InsightType, ProactiveSuggestion, QueryContext, ResearchSession,
    TimelineEvent,
};
use crate::settings::SessionConfig;

/// What a finished query produced, attached after the fact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub agents_used: Vec<String>,
    pub providers_used: Vec<String>,
    pub execution_time_ms: Option<f64>,
    pub entities_discovered: Vec<String>,
    pub insights_generated: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub research_goal: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub duration_secs: i64,
    pub total_queries: usize,
    pub total_entities: usize,
    pub total_hypotheses: usize,
    pub total_insights: usize,
    /// Oldest first
    pub recent_queries: Vec<QueryContext>,
    pub key_entities: Vec<Entity>,
    pub active_hypotheses: Vec<Hypothesis>,
    pub recent_insights: Vec<Insight>,
    /// Highest priority first
    pub suggestions: Vec<ProactiveSuggestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionChanges {
    pub since_days: i64,
    pub new_entities: Vec<Entity>,
    pub updated_hypotheses: Vec<Hypothesis>,
    pub new_insights: Vec<Insight>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub total_queries: usize,
    pub total_entities: usize,
    pub total_hypotheses: usize,
    pub total_insights: usize,
}

#[derive(Debug, Default)]
pub struct SessionManager {
    config: SessionConfig,
    sessions: HashMap<String, ResearchSession>,
    /// user id -> session id
    active_by_user: HashMap<String, String>,
}

fn not_found(session_id: &str) -> OrchestrationError {
    OrchestrationError::SessionNotFound(session_id.to_string())
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    fn session_mut(&mut self, session_id: &str) -> Result<&mut ResearchSession> {
        self.sessions.get_mut(session_id).ok_or_else(|| not_found(session_id))
    }

    fn session(&self, session_id: &str) -> Result<&ResearchSession> {
        self.sessions.get(session_id).ok_or_else(|| not_found(session_id))
    }

    /// Create a session and make it the user's active one
    pub fn create_session(&mut self, user_id: &str, research_goal: &str) -> &ResearchSession {
        let session_id = Uuid::new_v4().to_string();
        info!(user_id, %session_id, "Creating research session");

        self.active_by_user.insert(user_id.to_string(), session_id.clone());
        self.sessions
            .entry(session_id.clone())
            .or_insert_with(|| ResearchSession::new(session_id, user_id, research_goal))
    }

    pub fn get_session(&self, session_id: &str) -> Option<&ResearchSession> {
        self.sessions.get(session_id)
    }

    pub fn active_session(&self, user_id: &str) -> Option<&ResearchSession> {
        self.active_by_user
            .get(user_id)
            .and_then(|session_id| self.sessions.get(session_id))
    }

    pub fn get_or_create_session(&mut self, user_id: &str) -> &ResearchSession {
        let existing = self
            .active_by_user
            .get(user_id)
            .filter(|session_id| self.sessions.contains_key(*session_id))
            .cloned();

        match existing {
            Some(session_id) => &self.sessions[&session_id],
            None => self.create_session(user_id, ""),
        }
    }

    /// Record a query. A parent id, when given, must name a query already in the session.
    pub fn add_query(&mut self, session_id: &str, query_text: &str, parent_query_id: Option<&str>) -> Result<QueryContext> {
        let session = self.session_mut(session_id)?;

        if let Some(parent) = parent_query_id {
            if session.query(parent).is_none() {
                return Err(OrchestrationError::QueryNotFound {
                    session_id: session_id.to_string(),
                    query_id: parent.to_string(),
                });
            }
        }

        let query = QueryContext::new(
            Uuid::new_v4().to_string(),
            query_text,
            parent_query_id.map(str::to_string),
        );
        debug!(session_id, query_id = %query.query_id, "Adding query to session");
        session.add_query(query.clone());
        Ok(query)
    }

    pub fn record_query_outcome(&mut self, session_id: &str, query_id: &str, outcome: QueryOutcome) -> Result<()> {
        let session = self.session_mut(session_id)?;
        let query = session
            .query_mut(query_id)
            .ok_or_else(|| OrchestrationError::QueryNotFound {
                session_id: session_id.to_string(),
                query_id: query_id.to_string(),
            })?;

        query.agents_used.extend(outcome.agents_used);
        query.providers_used.extend(outcome.providers_used);
        query.entities_discovered.extend(outcome.entities_discovered);
        query.insights_generated.extend(outcome.insights_generated);
        if outcome.execution_time_ms.is_some() {
            query.execution_time_ms = outcome.execution_time_ms;
        }

        let detail = format!(
            "{} entities, {} insights",
            query.entities_discovered.len(),
            query.insights_generated.len()
        );
        session.record_activity("system", "query_outcome", detail);
        Ok(())
    }

    /// The chain of queries ending at `query_id`, root first
    pub fn query_lineage(&self, session_id: &str, query_id: &str) -> Result<Vec<QueryContext>> {
        let session = self.session(session_id)?;
        let missing = |id: &str| OrchestrationError::QueryNotFound {
            session_id: session_id.to_string(),
            query_id: id.to_string(),
        };

        let mut lineage = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(query_id.to_string());

        while let Some(id) = current {
            if !seen.insert(id.clone()) {
                break;
            }
            let query = session.query(&id).ok_or_else(|| missing(&id))?;
            current = query.parent_query_id.clone();
            lineage.push(query.clone());
        }

        lineage.reverse();
        Ok(lineage)
    }

    /// Insert or replace an entity by id
    pub fn add_entity(&mut self, session_id: &str, entity: Entity) -> Result<()> {
        self.session_mut(session_id)?.add_entity(entity);
        Ok(())
    }

    pub fn add_hypothesis(
        &mut self,
        session_id: &str,
        statement: &str,
        proposed_by: &str,
        confidence: f64,
        related_entities: Vec<String>,
    ) -> Result<Hypothesis> {
        let session = self.session_mut(session_id)?;
        let hypothesis = Hypothesis::new(
            Uuid::new_v4().to_string(),
            statement,
            proposed_by,
            confidence,
            related_entities,
        )?;
        session.add_hypothesis(hypothesis.clone());
        Ok(hypothesis)
    }

    /// Move a hypothesis to `status`. Evidence goes to the supporting list for
    /// supported/testing and to the contradicting list for rejected.
    pub fn update_hypothesis_status(
        &mut self,
        session_id: &str,
        hypothesis_id: &str,
        status: HypothesisStatus,
        evidence: Option<&str>,
    ) -> Result<()> {
        let session = self.session_mut(session_id)?;
        let hypothesis = session
            .hypotheses
            .iter_mut()
            .find(|h| h.hypothesis_id == hypothesis_id)
            .ok_or_else(|| OrchestrationError::HypothesisNotFound {
                session_id: session_id.to_string(),
                hypothesis_id: hypothesis_id.to_string(),
            })?;

        hypothesis.status = status;
        if let Some(evidence) = evidence {
            match status {
                HypothesisStatus::Supported | HypothesisStatus::Testing => {
                    hypothesis.supporting_evidence.push(evidence.to_string())
                }
                HypothesisStatus::Rejected => hypothesis.contradicting_evidence.push(evidence.to_string()),
                HypothesisStatus::Proposed | HypothesisStatus::Inconclusive => {}
            }
        }

        let detail = format!("{} -> {:?}", hypothesis.statement, status);
        session.record_activity("system", "hypothesis_status", detail);
        Ok(())
    }

    pub fn add_insight(
        &mut self,
        session_id: &str,
        insight_type: InsightType,
        description: &str,
        discovered_by: &str,
        confidence: f64,
        related_entities: Vec<String>,
    ) -> Result<Insight> {
        self.add_insight_with_data(
            session_id,
            Insight::new(Uuid::new_v4().to_string(), insight_type, description, discovered_by, confidence)?
                .with_related_entities(related_entities),
        )
    }

    /// Store an insight built by the caller, e.g. one carrying supporting data
    pub fn add_insight_with_data(&mut self, session_id: &str, insight: Insight) -> Result<Insight> {
        self.session_mut(session_id)?.add_insight(insight.clone());
        Ok(insight)
    }

    /// Priority is clamped to 1-5.
    pub fn add_suggestion(
        &mut self,
        session_id: &str,
        suggestion_text: &str,
        priority: u8,
        rationale: &str,
        related_entities: Vec<String>,
    ) -> Result<ProactiveSuggestion> {
        let session = self.session_mut(session_id)?;
        let suggestion = ProactiveSuggestion {
            suggestion_id: Uuid::new_v4().to_string(),
            suggestion_text: suggestion_text.to_string(),
            suggested_at: Utc::now(),
            priority: priority.clamp(1, 5),
            rationale: rationale.to_string(),
            related_entities,
        };
        session.add_suggestion(suggestion.clone());
        Ok(suggestion)
    }

    pub fn timeline(&self, session_id: &str) -> Result<&[TimelineEvent]> {
        Ok(&self.session(session_id)?.timeline)
    }

    pub fn summary(&self, session_id: &str) -> Result<SessionSummary> {
        let session = self.session(session_id)?;
        let config = &self.config;

        let mut key_entities: Vec<Entity> = session.entities.values().cloned().collect();
        key_entities.sort_by(|a, b| {
            a.discovered_at
                .cmp(&b.discovered_at)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        key_entities.truncate(config.key_entities);

        let insights_start = session.insights.len().saturating_sub(config.recent_insights);

        let mut suggestions = session.suggestions.clone();
        suggestions.sort_by(|a, b| b.priority.cmp(&a.priority));
        suggestions.truncate(5);

        Ok(SessionSummary {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            research_goal: session.research_goal.clone(),
            created_at: session.created_at,
            last_active: session.last_active,
            duration_secs: (Utc::now() - session.created_at).num_seconds(),
            total_queries: session.queries.len(),
            total_entities: session.entities.len(),
            total_hypotheses: session.hypotheses.len(),
            total_insights: session.insights.len(),
            recent_queries: session.recent_queries(config.recent_queries).to_vec(),
            key_entities,
            active_hypotheses: session.active_hypotheses().cloned().collect(),
            recent_insights: session.insights[insights_start..].to_vec(),
            suggestions,
        })
    }

    /// Heuristic next steps, in fixed order:
    /// test an open hypothesis, dig into a productive last query, compare
    /// entities when the goal asks for it, check for updates on old sessions.
    pub fn suggest_next_steps(&self, session_id: &str) -> Result<Vec<String>> {
        Ok(self.next_steps_at(self.session(session_id)?, Utc::now()))
    }

    fn next_steps_at(&self, session: &ResearchSession, now: DateTime<Utc>) -> Vec<String> {
        let config = &self.config;
        let mut steps = Vec::new();

        if let Some(hypothesis) = session.active_hypotheses().next() {
            steps.push(format!(
                "Test hypothesis: '{}' (current confidence: {:.0}%)",
                hypothesis.statement,
                hypothesis.confidence * 100.0
            ));
        }

        if let Some(last) = session.queries.last() {
            let found = last.entities_discovered.len();
            if found > config.deep_dive_entity_threshold {
                steps.push(format!(
                    "Deep dive into entities discovered in last query (found {})",
                    found
                ));
            }
        }

        // Keywords match the start of a goal word: "compared" hits "compare", "canvas" misses "vs".
        let goal = session.research_goal.to_lowercase();
        let goal_words: Vec<&str> = goal
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let wants_comparison = config.comparison_keywords.iter().any(|keyword| {
            let keyword = keyword.to_lowercase();
            goal_words.iter().any(|word| word.starts_with(keyword.as_str()))
        });
        if wants_comparison && session.entities.len() >= 2 {
            steps.push("Create comparative analysis of discovered entities".to_string());
        }

        if now - session.created_at >= Duration::days(config.stale_after_days) {
            steps.push("Check for updates since last session (new trials, papers, etc.)".to_string());
        }

        steps.truncate(config.max_suggestions);
        steps
    }

    /// Entities, hypotheses and insights recorded within the last `since_days`
    pub fn detect_changes(&self, session_id: &str, since_days: i64) -> Result<SessionChanges> {
        let session = self.session(session_id)?;
        let threshold = Utc::now() - Duration::days(since_days);

        let mut new_entities: Vec<Entity> = session
            .entities
            .values()
            .filter(|e| e.discovered_at >= threshold)
            .cloned()
            .collect();
        new_entities.sort_by(|a, b| a.discovered_at.cmp(&b.discovered_at));

        Ok(SessionChanges {
            since_days,
            new_entities,
            updated_hypotheses: session
                .hypotheses
                .iter()
                .filter(|h| h.proposed_at >= threshold)
                .cloned()
                .collect(),
            new_insights: session
                .insights
                .iter()
                .filter(|i| i.discovered_at >= threshold)
                .cloned()
                .collect(),
        })
    }

    pub fn statistics(&self) -> SessionStatistics {
        let sessions = self.sessions.values();
        SessionStatistics {
            total_sessions: self.sessions.len(),
            active_sessions: self.active_by_user.len(),
            total_queries: sessions.clone().map(|s| s.queries.len()).sum(),
            total_entities: sessions.clone().map(|s| s.entities.len()).sum(),
            total_hypotheses: sessions.clone().map(|s| s.hypotheses.len()).sum(),
            total_insights: sessions.map(|s| s.insights.len()).sum(),
        }
    }

    /// Attach arbitrary data to an existing insight
    pub fn annotate_insight(&mut self, session_id: &str, insight_id: &str, key: &str, value: Value) -> Result<bool> {
        let session = self.session_mut(session_id)?;
        match session.insights.iter_mut().find(|i| i.insight_id == insight_id) {
            Some(insight) => {
                insight.supporting_data.insert(key.to_string(), value);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::entities::EntityType;
    use serde_json::json;

    fn manager() -> SessionManager {
        SessionManager::new(SessionConfig::default())
    }

    fn new_session(manager: &mut SessionManager, goal: &str) -> String {
        manager.create_session("user-1", goal).session_id.clone()
    }

    #[test]
    fn unknown_session_is_not_found() {
        let mut manager = manager();
        let err = manager.add_query("nope", "q", None).unwrap_err();
        assert_eq!(err, OrchestrationError::SessionNotFound("nope".to_string()));
        assert!(manager.add_entity("nope", Entity::new("e", EntityType::Drug, "x")).is_err());
        assert!(manager.add_hypothesis("nope", "s", "agent", 0.5, vec![]).is_err());
        assert!(manager.add_insight("nope", InsightType::Opportunity, "d", "a", 0.5, vec![]).is_err());
        assert!(manager.add_suggestion("nope", "s", 3, "r", vec![]).is_err());
        assert!(manager.summary("nope").is_err());
        assert!(manager.suggest_next_steps("nope").is_err());
    }

    #[test]
    fn active_session_per_user() {
        let mut manager = manager();
        let first = manager.get_or_create_session("alice").session_id.clone();
        assert_eq!(manager.get_or_create_session("alice").session_id, first);

        let second = manager.create_session("alice", "EGFR inhibitors").session_id.clone();
        assert_ne!(first, second);
        assert_eq!(manager.active_session("alice").unwrap().session_id, second);
        assert!(manager.active_session("bob").is_none());

        let stats = manager.statistics();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.active_sessions, 1);
    }

    #[test]
    fn query_lineage_walks_parents() {
        let mut manager = manager();
        let id = new_session(&mut manager, "goal");

        let root = manager.add_query(&id, "aspirin targets", None).unwrap();
        let child = manager.add_query(&id, "PTGS1 inhibitors", Some(&root.query_id)).unwrap();
        let grandchild = manager.add_query(&id, "trials for PTGS1", Some(&child.query_id)).unwrap();

        let lineage: Vec<_> = manager
            .query_lineage(&id, &grandchild.query_id)
            .unwrap()
            .into_iter()
            .map(|q| q.query_text)
            .collect();
        assert_eq!(lineage, vec!["aspirin targets", "PTGS1 inhibitors", "trials for PTGS1"]);

        assert!(matches!(
            manager.add_query(&id, "orphan", Some("missing")),
            Err(OrchestrationError::QueryNotFound { .. })
        ));
    }

    #[test]
    fn entities_are_upserted() {
        let mut manager = manager();
        let id = new_session(&mut manager, "goal");

        manager.add_entity(&id, Entity::new("CHEMBL25", EntityType::Drug, "aspirin")).unwrap();
        manager
            .add_entity(
                &id,
                Entity::new("CHEMBL25", EntityType::Drug, "acetylsalicylic acid").with_metadata("cid", json!(2244)),
            )
            .unwrap();

        let session = manager.get_session(&id).unwrap();
        assert_eq!(session.entities.len(), 1);
        assert_eq!(session.entities["CHEMBL25"].name, "acetylsalicylic acid");
        assert_eq!(manager.timeline(&id).unwrap().len(), 2);
    }

    #[test]
    fn hypothesis_status_routes_evidence() {
        let mut manager = manager();
        let id = new_session(&mut manager, "goal");
        let h = manager.add_hypothesis(&id, "COX-1 drives effect", "chemical", 0.6, vec![]).unwrap();

        manager
            .update_hypothesis_status(&id, &h.hypothesis_id, HypothesisStatus::Testing, Some("assay A"))
            .unwrap();
        manager
            .update_hypothesis_status(&id, &h.hypothesis_id, HypothesisStatus::Rejected, Some("assay B"))
            .unwrap();

        let stored = &manager.get_session(&id).unwrap().hypotheses[0];
        assert_eq!(stored.status, HypothesisStatus::Rejected);
        assert_eq!(stored.supporting_evidence, vec!["assay A".to_string()]);
        assert_eq!(stored.contradicting_evidence, vec!["assay B".to_string()]);

        assert!(matches!(
            manager.update_hypothesis_status(&id, "missing", HypothesisStatus::Supported, None),
            Err(OrchestrationError::HypothesisNotFound { .. })
        ));
        assert!(manager.add_hypothesis(&id, "s", "a", 1.5, vec![]).is_err());
    }

    #[test]
    fn summary_reports_recent_state() {
        let mut manager = manager();
        let id = new_session(&mut manager, "goal");

        for i in 0..7 {
            manager.add_query(&id, &format!("query {i}"), None).unwrap();
        }
        for i in 0..12 {
            manager
                .add_entity(&id, Entity::new(format!("e{i:02}"), EntityType::Gene, format!("gene {i}")))
                .unwrap();
        }
        for i in 0..6 {
            manager
                .add_insight(&id, InsightType::PatternDetected, &format!("insight {i}"), "system", 0.7, vec![])
                .unwrap();
        }
        let open = manager.add_hypothesis(&id, "open", "user", 0.5, vec![]).unwrap();
        let closed = manager.add_hypothesis(&id, "closed", "user", 0.5, vec![]).unwrap();
        manager
            .update_hypothesis_status(&id, &closed.hypothesis_id, HypothesisStatus::Supported, None)
            .unwrap();
        manager.add_suggestion(&id, "low", 1, "", vec![]).unwrap();
        manager.add_suggestion(&id, "high", 9, "", vec![]).unwrap();

        let summary = manager.summary(&id).unwrap();
        assert_eq!(summary.total_queries, 7);
        assert_eq!(summary.total_entities, 12);
        assert_eq!(summary.total_hypotheses, 2);
        assert_eq!(summary.recent_queries.len(), 5);
        assert_eq!(summary.recent_queries[0].query_text, "query 2");
        assert_eq!(summary.key_entities.len(), 10);
        assert_eq!(summary.active_hypotheses.len(), 1);
        assert_eq!(summary.active_hypotheses[0].hypothesis_id, open.hypothesis_id);
        assert_eq!(summary.recent_insights.len(), 5);
        assert_eq!(summary.recent_insights[4].description, "insight 5");
        assert_eq!(summary.suggestions[0].suggestion_text, "high");
        assert_eq!(summary.suggestions[0].priority, 5);
    }

    #[test]
    fn suggestions_follow_the_cascade() {
        let mut manager = manager();
        let id = new_session(&mut manager, "Compare aspirin vs ibuprofen");

        assert!(manager.suggest_next_steps(&id).unwrap().is_empty());

        manager.add_hypothesis(&id, "aspirin is safer", "user", 0.4, vec![]).unwrap();
        let query = manager.add_query(&id, "NSAIDs", None).unwrap();
        manager
            .record_query_outcome(
                &id,
                &query.query_id,
                QueryOutcome {
                    entities_discovered: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                    ..QueryOutcome::default()
                },
            )
            .unwrap();
        manager.add_entity(&id, Entity::new("a", EntityType::Drug, "aspirin")).unwrap();
        manager.add_entity(&id, Entity::new("b", EntityType::Drug, "ibuprofen")).unwrap();

        let steps = manager.suggest_next_steps(&id).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0], "Test hypothesis: 'aspirin is safer' (current confidence: 40%)");
        assert!(steps[1].contains("found 4"));
        assert_eq!(steps[2], "Create comparative analysis of discovered entities");

        // Staleness is the fourth rule and falls off the capped list.
        let session = manager.sessions.get_mut(&id).unwrap();
        session.created_at = Utc::now() - Duration::days(8);
        let session = manager.get_session(&id).unwrap();
        let steps = manager.next_steps_at(session, Utc::now());
        assert_eq!(steps.len(), 3);
        assert!(!steps.iter().any(|s| s.starts_with("Check for updates")));
    }

    #[test]
    fn stale_sessions_suggest_checking_updates() {
        let mut manager = manager();
        let id = new_session(&mut manager, "canvas of kinase space");
        manager.add_entity(&id, Entity::new("a", EntityType::Protein, "EGFR")).unwrap();
        manager.add_entity(&id, Entity::new("b", EntityType::Protein, "HER2")).unwrap();

        // "vs" inside "canvas" is not a comparison keyword.
        assert!(manager.suggest_next_steps(&id).unwrap().is_empty());

        let session = manager.get_session(&id).unwrap().clone();
        let steps = manager.next_steps_at(&session, session.created_at + Duration::days(7));
        assert_eq!(steps, vec!["Check for updates since last session (new trials, papers, etc.)".to_string()]);
    }

    #[test]
    fn comparison_keywords_match_word_starts() {
        for goal in ["Comparing EGFR inhibitors", "Aspirin compared with placebo", "EGFR vs. HER2", "A comparison of statins"] {
            let mut manager = manager();
            let id = new_session(&mut manager, goal);
            manager.add_entity(&id, Entity::new("a", EntityType::Drug, "aspirin")).unwrap();
            manager.add_entity(&id, Entity::new("b", EntityType::Drug, "placebo")).unwrap();
            assert_eq!(
                manager.suggest_next_steps(&id).unwrap(),
                vec!["Create comparative analysis of discovered entities".to_string()],
                "goal: {}",
                goal
            );
        }

        let mut manager = manager();
        let id = new_session(&mut manager, "A canvas of solvents");
        manager.add_entity(&id, Entity::new("a", EntityType::Drug, "aspirin")).unwrap();
        manager.add_entity(&id, Entity::new("b", EntityType::Drug, "placebo")).unwrap();
        assert!(manager.suggest_next_steps(&id).unwrap().is_empty());
    }

    #[test]
    fn detects_recent_changes() {
        let mut manager = manager();
        let id = new_session(&mut manager, "goal");
        manager.add_entity(&id, Entity::new("new", EntityType::Pathway, "MAPK")).unwrap();
        let mut old = Entity::new("old", EntityType::Pathway, "JAK-STAT");
        old.discovered_at = Utc::now() - Duration::days(30);
        manager.add_entity(&id, old).unwrap();
        let insight = manager
            .add_insight(&id, InsightType::GapDiscovered, "no trials", "clinical", 0.9, vec!["new".into()])
            .unwrap();
        assert!(manager.annotate_insight(&id, &insight.insight_id, "source", json!("ct.gov")).unwrap());

        let changes = manager.detect_changes(&id, 7).unwrap();
        assert_eq!(changes.new_entities.len(), 1);
        assert_eq!(changes.new_entities[0].entity_id, "new");
        assert_eq!(changes.new_insights.len(), 1);
        assert_eq!(changes.new_insights[0].supporting_data["source"], json!("ct.gov"));
        assert!(changes.updated_hypotheses.is_empty());
    }
}
