//! Workflow composer: builds named multi-step tools and runs them through the router.

pub mod registry;
pub mod template;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::{OrchestrationError, Result};
use crate::models::composed_tool::{
    ComposedTool, CompositionPattern, StepDefinition, StepResult, StepStatus, ToolExecutionResult, ToolStep,
};
use crate::router::{RouteContext, Router};

pub use registry::{RegistryStats, ToolRegistry};
pub use template::{Reference, Scope, Segment, Template};

pub struct WorkflowComposer {
    router: Arc<Router>,
    registry: RwLock<ToolRegistry>,
}

impl WorkflowComposer {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            registry: RwLock::new(ToolRegistry::new()),
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Build a tool from step definitions (ids 1..n in the given order) and register it.
    /// Providers and tools are not checked here; a bad step fails when the tool runs.
    pub fn create_tool(
        &self,
        name: &str,
        description: &str,
        created_by: &str,
        steps: Vec<StepDefinition>,
        tags: Vec<String>,
    ) -> ComposedTool {
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(index, definition)| ToolStep::from_definition(index + 1, definition))
            .collect();
        let tool = ComposedTool::new(name, description, created_by, steps, tags);

        info!(tool = name, created_by, "Created composed tool");
        self.registry.write().register(tool.clone());
        tool
    }

    pub fn get_tool(&self, name: &str) -> Option<ComposedTool> {
        self.registry.read().get(name).cloned()
    }

    pub fn find_matching_tools(&self, query: &str, tags: &[String]) -> Vec<ComposedTool> {
        self.registry.read().find_matching_tools(query, tags)
    }

    /// Best existing tool for `query`, if any matches
    pub fn best_match(&self, query: &str) -> Option<ComposedTool> {
        self.find_matching_tools(query, &[]).into_iter().next()
    }

    pub fn top_performing(&self, limit: usize) -> Vec<ComposedTool> {
        self.registry.read().top_performing(limit)
    }

    pub fn record_pattern(&self, pattern: CompositionPattern) {
        self.registry.write().record_pattern(pattern);
    }

    pub fn suggest_pattern(&self, query: &str) -> Option<CompositionPattern> {
        self.registry.write().suggest_pattern(query)
    }

    pub fn accept_pattern(&self, pattern_name: &str) -> bool {
        self.registry.write().accept_pattern(pattern_name)
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.read().stats()
    }

    /// Run a registered tool and fold the outcome into its usage counters.
    #[instrument(skip(self, inputs))]
    pub async fn execute(&self, name: &str, inputs: &Map<String, Value>) -> Result<ToolExecutionResult> {
        let mut tool = self
            .get_tool(name)
            .ok_or_else(|| OrchestrationError::ToolNotFound(name.to_string()))?;

        let result = self.run_steps(&mut tool, inputs).await;

        if let Some(stored) = self.registry.write().get_mut(name) {
            stored.record_execution(result.success, result.execution_time_ms);
            stored.steps = tool.steps;
        }
        Ok(result)
    }

    /// Run a tool the caller owns; its step states and counters are updated in place.
    pub async fn execute_tool(&self, tool: &mut ComposedTool, inputs: &Map<String, Value>) -> ToolExecutionResult {
        let result = self.run_steps(tool, inputs).await;
        tool.record_execution(result.success, result.execution_time_ms);
        result
    }

    async fn run_steps(&self, tool: &mut ComposedTool, inputs: &Map<String, Value>) -> ToolExecutionResult {
        let start = Instant::now();
        let mut outputs: HashMap<usize, Value> = HashMap::new();
        let mut step_results = Vec::with_capacity(tool.steps.len());
        let agent = tool.created_by.clone();
        let total_steps = tool.steps.len();
        let last_step_id = tool.steps.last().map(|s| s.step_id);

        for step in tool.steps.iter_mut() {
            step.reset();
        }

        for step in tool.steps.iter_mut() {
            if let Some(condition) = &step.run_if {
                if !template::condition_holds(condition, &outputs) {
                    debug!(tool = %tool.name, step = step.step_id, %condition, "Skipping step");
                    step.status = StepStatus::Skipped;
                    step_results.push(StepResult {
                        step_id: step.step_id,
                        provider: step.provider.clone(),
                        tool: step.tool_name.clone(),
                        status: StepStatus::Skipped,
                        result: None,
                        error: None,
                        latency_ms: 0.0,
                    });
                    continue;
                }
            }

            step.status = StepStatus::Running;
            let args = template::resolve_input(
                &step.input_template,
                &Scope {
                    user: inputs,
                    steps: &outputs,
                },
            );
            let context = RouteContext::for_agent(agent.clone()).with_preferred_provider(step.provider.clone());

            let step_start = Instant::now();
            let outcome = match self.router.route(&step.tool_name, &args, &context).await {
                Ok((Some(value), feedback)) if feedback.success => Ok(value),
                Ok((_, feedback)) => Err(feedback.recommendation),
                Err(e) => Err(e.to_string()),
            };
            let latency_ms = step_start.elapsed().as_secs_f64() * 1_000.0;
            step.execution_time_ms = Some(latency_ms);

            match outcome {
                Ok(value) => {
                    step.status = StepStatus::Completed;
                    step.result = Some(value.clone());
                    outputs.insert(step.step_id, value.clone());
                    step_results.push(StepResult {
                        step_id: step.step_id,
                        provider: step.provider.clone(),
                        tool: step.tool_name.clone(),
                        status: StepStatus::Completed,
                        result: Some(value),
                        error: None,
                        latency_ms,
                    });
                }
                Err(reason) => {
                    warn!(tool = %tool.name, step = step.step_id, %reason, "Workflow step failed");
                    step.status = StepStatus::Failed;
                    step.error = Some(reason.clone());
                    step_results.push(StepResult {
                        step_id: step.step_id,
                        provider: step.provider.clone(),
                        tool: step.tool_name.clone(),
                        status: StepStatus::Failed,
                        result: None,
                        error: Some(reason.clone()),
                        latency_ms,
                    });

                    return ToolExecutionResult {
                        tool_name: tool.name.clone(),
                        success: false,
                        execution_time_ms: start.elapsed().as_secs_f64() * 1_000.0,
                        step_results,
                        final_result: None,
                        error: Some(format!("Step {} failed: {}", step.step_id, reason)),
                        failed_step: Some(step.step_id),
                        steps_executed: step.step_id,
                        steps_failed: 1,
                    };
                }
            }
        }

        let execution_time_ms = start.elapsed().as_secs_f64() * 1_000.0;
        info!(tool = %tool.name, execution_time_ms, "Workflow completed");

        ToolExecutionResult {
            tool_name: tool.name.clone(),
            success: true,
            execution_time_ms,
            step_results,
            final_result: last_step_id.and_then(|id| outputs.remove(&id)),
            error: None,
            failed_step: None,
            steps_executed: total_steps,
            steps_failed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MultiTierCache;
    use crate::provider::{EchoProvider, Provider, StaticProvider};
    use crate::settings::RouterConfig;
    use parking_lot::Mutex;
    use serde_json::json;

    fn composer() -> WorkflowComposer {
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(StaticProvider::new("pubchem").with_response("search", json!({"cid": 2244, "name": "aspirin"}))),
            Arc::new(EchoProvider::default()),
        ];
        let router = Router::with_providers(
            RouterConfig::default(),
            Arc::new(Mutex::new(MultiTierCache::default())),
            providers,
        )
        .unwrap();
        WorkflowComposer::new(Arc::new(router))
    }

    fn input(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn chains_outputs_between_steps() {
        let composer = composer();
        composer
            .create_tool(
                "aspirin-targets",
                "Resolve a drug and look up targets",
                "chemical",
                vec![
                    StepDefinition::new("pubchem", "search", input(json!({"query": "${user.drug}"}))),
                    StepDefinition::new(
                        "echo",
                        "targets",
                        input(json!({"cid": "${step1.cid}", "label": "${step1.name} (${user.drug})"})),
                    ),
                ],
                vec!["chemistry".to_string()],
            );

        let result = composer
            .execute("aspirin-targets", &input(json!({"drug": "aspirin"})))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.steps_executed, 2);
        assert_eq!(result.steps_failed, 0);
        let final_result = result.final_result.unwrap();
        assert_eq!(final_result["args"]["cid"], json!(2244));
        assert_eq!(final_result["args"]["label"], json!("aspirin (aspirin)"));

        let stored = composer.get_tool("aspirin-targets").unwrap();
        assert_eq!(stored.times_used, 1);
        assert_eq!(stored.times_succeeded, 1);
        assert!(stored.steps.iter().all(|s| s.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let composer = composer();
        composer
            .create_tool(
                "broken",
                "First step cannot succeed",
                "chemical",
                vec![
                    StepDefinition::new("pubchem", "missing_tool", Map::new()),
                    StepDefinition::new("echo", "never", Map::new()),
                ],
                vec![],
            );

        let result = composer.execute("broken", &Map::new()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.failed_step, Some(1));
        assert_eq!(result.steps_executed, 1);
        assert_eq!(result.steps_failed, 1);
        assert!(result.final_result.is_none());
        assert!(result.error.unwrap().starts_with("Step 1 failed"));

        let stored = composer.get_tool("broken").unwrap();
        assert_eq!(stored.steps[0].status, StepStatus::Failed);
        assert_eq!(stored.steps[1].status, StepStatus::Pending);
        assert_eq!(stored.times_used, 1);
        assert_eq!(stored.times_failed, 1);
        assert_eq!(stored.success_rate(), 0.0);
    }

    #[tokio::test]
    async fn run_conditions_skip_steps() {
        let composer = composer();
        let mut tool = composer
            .create_tool(
                "conditional",
                "Conditional workflow",
                "clinical",
                vec![
                    StepDefinition::new("pubchem", "search", Map::new()),
                    StepDefinition::new("echo", "optional", Map::new()).run_if("step7.success"),
                    StepDefinition::new("echo", "after", input(json!({"skipped": "${step2}"}))).run_if("step1.success"),
                ],
                vec![],
            );

        let result = composer.execute_tool(&mut tool, &Map::new()).await;
        assert!(result.success);
        assert_eq!(tool.steps[1].status, StepStatus::Skipped);
        assert_eq!(result.step_results[1].status, StepStatus::Skipped);
        assert_eq!(result.final_result.unwrap()["args"]["skipped"], json!("${step2}"));
        assert_eq!(tool.times_used, 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let composer = composer();
        assert_eq!(
            composer.execute("ghost", &Map::new()).await.unwrap_err(),
            OrchestrationError::ToolNotFound("ghost".to_string())
        );
    }

    #[tokio::test]
    async fn unregistered_provider_fails_at_execution() {
        let composer = composer();
        let tool = composer.create_tool(
            "late-binding",
            "Second step uses a provider registered later",
            "clinical",
            vec![
                StepDefinition::new("pubchem", "search", Map::new()),
                StepDefinition::new("not_yet_registered", "x", Map::new()),
                StepDefinition::new("echo", "after", Map::new()),
            ],
            vec![],
        );
        assert_eq!(tool.steps.len(), 3);
        assert_eq!(tool.steps[1].provider, "not_yet_registered");
        assert!(composer.get_tool("late-binding").is_some());

        let result = composer.execute("late-binding", &Map::new()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.failed_step, Some(2));
        assert_eq!(result.steps_executed, 2);
        assert!(result.error.unwrap().contains("Unknown provider 'not_yet_registered'"));

        let stored = composer.get_tool("late-binding").unwrap();
        assert_eq!(stored.steps[0].status, StepStatus::Completed);
        assert_eq!(stored.steps[1].status, StepStatus::Failed);
        assert_eq!(stored.steps[2].status, StepStatus::Pending);

        // Once the provider exists the same tool runs through.
        composer
            .router()
            .register_provider(Arc::new(EchoProvider::new("not_yet_registered")))
            .unwrap();
        let result = composer.execute("late-binding", &Map::new()).await.unwrap();
        assert!(result.success);
        assert_eq!(composer.get_tool("late-binding").unwrap().times_used, 2);
    }

    #[tokio::test]
    async fn empty_tool_succeeds_without_result() {
        let composer = composer();
        composer.create_tool("noop", "Does nothing", "a", vec![], vec![]);

        let result = composer.execute("noop", &Map::new()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.steps_executed, 0);
        assert!(result.final_result.is_none());
    }

    #[tokio::test]
    async fn registry_views_follow_executions() {
        let composer = composer();
        composer
            .create_tool(
                "lookup",
                "compound lookup by name",
                "chemical",
                vec![StepDefinition::new("pubchem", "search", Map::new())],
                vec![],
            );

        for _ in 0..3 {
            composer.execute("lookup", &Map::new()).await.unwrap();
        }

        assert_eq!(composer.best_match("Compound LOOKUP please").unwrap().name, "lookup");
        assert_eq!(composer.top_performing(5).len(), 1);
        let stats = composer.stats();
        assert_eq!(stats.total_uses, 3);
        assert_eq!(stats.avg_success_rate, 1.0);
    }
}
