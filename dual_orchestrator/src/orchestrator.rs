//! Facade that owns the router, cache, composer, knowledge base and session
//! memory of one orchestrator instance.

use anyhow::Result;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::cache::{self, CacheStats, MultiTierCache};
use crate::composer::{RegistryStats, WorkflowComposer};
use crate::error::Result as OrchestrationResult;
use crate::knowledge::{KnowledgeBase, KnowledgeSummary};
use crate::models::composed_tool::{ComposedTool, ToolExecutionResult};
use crate::models::performance::{AgentPerformance, Feedback};
use crate::provider::Provider;
use crate::router::{RouteContext, Router, RouterInsights};
use crate::session::{SessionManager, SessionStatistics};
use crate::settings::Settings;

/// Everything a dashboard needs, in one serializable value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub providers: Vec<String>,
    pub router: RouterInsights,
    pub cache: CacheStats,
    pub knowledge: KnowledgeSummary,
    pub knowledge_insights: Vec<String>,
    pub provider_feedback: Vec<String>,
    pub agents: BTreeMap<String, AgentPerformance>,
    pub tools: RegistryStats,
    pub top_tools: Vec<ComposedTool>,
    pub sessions: SessionStatistics,
}

pub struct Orchestrator {
    settings: Settings,
    router: Arc<Router>,
    composer: WorkflowComposer,
    knowledge: Mutex<KnowledgeBase>,
    sessions: RwLock<SessionManager>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;

        let cache = Arc::new(Mutex::new(MultiTierCache::new(&settings.cache)));
        let router = Arc::new(Router::new(settings.router.clone(), cache));
        let composer = WorkflowComposer::new(router.clone());

        info!("Orchestrator initialized");
        Ok(Self {
            knowledge: Mutex::new(KnowledgeBase::new(settings.knowledge.clone())),
            sessions: RwLock::new(SessionManager::new(settings.session.clone())),
            maintenance: Mutex::new(None),
            settings,
            router,
            composer,
        })
    }

    pub fn with_providers<I>(settings: Settings, providers: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<dyn Provider>>,
    {
        let orchestrator = Self::new(settings)?;
        for provider in providers {
            orchestrator.register_provider(provider)?;
        }
        Ok(orchestrator)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn register_provider(&self, provider: Arc<dyn Provider>) -> OrchestrationResult<()> {
        self.router.register_provider(provider)
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn composer(&self) -> &WorkflowComposer {
        &self.composer
    }

    pub fn knowledge(&self) -> MutexGuard<'_, KnowledgeBase> {
        self.knowledge.lock()
    }

    pub fn sessions(&self) -> RwLockReadGuard<'_, SessionManager> {
        self.sessions.read()
    }

    pub fn sessions_mut(&self) -> RwLockWriteGuard<'_, SessionManager> {
        self.sessions.write()
    }

    /// Route a call on behalf of `agent` and fold the feedback into the knowledge base.
    #[instrument(skip(self, params, context))]
    pub async fn route_for_agent(
        &self,
        agent: &str,
        tool: &str,
        params: &Map<String, Value>,
        context: RouteContext,
    ) -> OrchestrationResult<(Option<Value>, Feedback)> {
        let context = RouteContext {
            agent_id: agent.to_string(),
            ..context
        };

        let (result, feedback) = self.router.route(tool, params, &context).await?;
        self.knowledge
            .lock()
            .ingest_feedback(agent, &context.query_type, &feedback);
        Ok((result, feedback))
    }

    pub async fn execute_workflow(&self, name: &str, inputs: &Map<String, Value>) -> OrchestrationResult<ToolExecutionResult> {
        self.composer.execute(name, inputs).await
    }

    /// Start periodic cache sweeps. Calling it again replaces the running task.
    pub fn start_maintenance(&self) {
        let interval = self.settings.cache.maintenance_interval();
        let handle = cache::spawn_maintenance(self.router.cache(), interval);
        if let Some(previous) = self.maintenance.lock().replace(handle) {
            previous.abort();
        }
        info!(?interval, "Cache maintenance started");
    }

    pub fn dashboard(&self) -> DashboardSnapshot {
        let router = self.router.insights();
        let knowledge = self.knowledge.lock();

        DashboardSnapshot {
            providers: self.router.list_providers(),
            cache: self.router.cache_stats(),
            knowledge: knowledge.summary(),
            knowledge_insights: knowledge.insights(),
            provider_feedback: knowledge.provider_to_agent_feedback(&router),
            agents: knowledge
                .agent_performances()
                .iter()
                .map(|(name, perf)| (name.clone(), perf.clone()))
                .collect(),
            tools: self.composer.stats(),
            top_tools: self.composer.top_performing(5),
            sessions: self.sessions.read().statistics(),
            router,
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::composed_tool::StepDefinition;
    use crate::models::performance::QueryType;
    use crate::provider::{EchoProvider, StaticProvider};
    use serde_json::json;

    fn orchestrator() -> Orchestrator {
        Orchestrator::with_providers(
            Settings::default(),
            vec![
                Arc::new(StaticProvider::new("biomcp").with_response("search", json!({"hits": 3}))) as Arc<dyn Provider>,
                Arc::new(EchoProvider::default()),
            ],
        )
        .unwrap()
    }

    fn params(n: usize) -> Map<String, Value> {
        json!({ "page": n }).as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn agent_feedback_reaches_the_knowledge_base() {
        let orchestrator = orchestrator();
        let context = RouteContext::default()
            .with_query_type(QueryType::InhibitorSearch)
            .with_preferred_provider("biomcp");

        for n in 0..3 {
            let (result, feedback) = orchestrator
                .route_for_agent("chemical", "search", &params(n), context.clone())
                .await
                .unwrap();
            assert_eq!(result, Some(json!({"hits": 3})));
            assert!(feedback.success);
        }

        let kb = orchestrator.knowledge();
        let perf = kb.agent_performance("chemical").unwrap();
        assert_eq!(perf.total_queries, 3);
        assert_eq!(perf.preferred_provider(&QueryType::InhibitorSearch), Some("biomcp"));
        assert_eq!(
            kb.best_pattern_for("chemical", &QueryType::InhibitorSearch).unwrap().observations,
            3
        );
    }

    #[tokio::test]
    async fn dashboard_covers_every_subsystem() {
        let orchestrator = orchestrator();
        orchestrator
            .route_for_agent("literature", "papers", &params(1), RouteContext::default())
            .await
            .unwrap();
        orchestrator
            .composer()
            .create_tool(
                "search",
                "search biomcp",
                "chemical",
                vec![StepDefinition::new("biomcp", "search", Map::new())],
                vec![],
            );
        orchestrator.execute_workflow("search", &Map::new()).await.unwrap();
        orchestrator.sessions_mut().create_session("alice", "kinases");

        let dashboard = orchestrator.dashboard();
        assert_eq!(dashboard.providers, vec!["biomcp".to_string(), "echo".to_string()]);
        assert_eq!(dashboard.agents["literature"].total_queries, 1);
        assert_eq!(dashboard.tools.total_uses, 1);
        assert_eq!(dashboard.sessions.total_sessions, 1);
        assert_eq!(dashboard.cache["level_1"].size, 2);

        let json = serde_json::to_value(&dashboard).unwrap();
        assert!(json["router"]["health"].is_object());
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut settings = Settings::default();
        settings.router.neutral_score = 3.0;
        assert!(Orchestrator::new(settings).is_err());
    }

    #[tokio::test]
    async fn maintenance_can_be_restarted() {
        let orchestrator = orchestrator();
        orchestrator.start_maintenance();
        orchestrator.start_maintenance();
        assert!(orchestrator.maintenance.lock().is_some());
    }
}
