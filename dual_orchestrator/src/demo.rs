//! In-process demo scenario: routes calls for a few agents, runs a composed
//! workflow for several drugs concurrently and builds a research session.

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::models::composed_tool::{CompositionPattern, StepDefinition, ToolExecutionResult};
use crate::models::entities::{Entity, EntityType};
use crate::models::performance::QueryType;
use crate::models::session::InsightType;
use crate::orchestrator::{DashboardSnapshot, Orchestrator};
use crate::provider::{EchoProvider, Provider, StaticProvider};
use crate::router::RouteContext;
use crate::session::{QueryOutcome, SessionSummary};
use crate::settings::Settings;

const WORKFLOW: &str = "drug-to-trials";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoReport {
    pub elapsed_ms: f64,
    pub workflow_runs: Vec<ToolExecutionResult>,
    pub session: SessionSummary,
    pub next_steps: Vec<String>,
    pub dashboard: DashboardSnapshot,
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn demo_providers() -> Vec<Arc<dyn Provider>> {
    vec![
        Arc::new(
            StaticProvider::new("pubchem")
                .with_response("search_compounds", json!({"cid": 2244, "name": "aspirin", "targets": ["PTGS1", "PTGS2"]}))
                .with_latency(Duration::from_millis(5)),
        ),
        Arc::new(
            StaticProvider::new("biomcp")
                .with_response("search_compounds", json!({"cid": 2244, "inhibits": ["PTGS1"]}))
                .with_response("search_trials", json!({"trials": ["NCT00000001", "NCT00000002"]}))
                .with_latency(Duration::from_millis(15)),
        ),
        Arc::new(EchoProvider::new("literature")),
    ]
}

pub async fn run(settings: Settings, rounds: usize) -> Result<DemoReport> {
    let start = Instant::now();
    let orchestrator =
        Orchestrator::with_providers(settings, demo_providers()).context("Failed to initialize orchestrator")?;
    orchestrator.start_maintenance();

    route_rounds(&orchestrator, rounds).await?;
    let workflow_runs = run_workflows(&orchestrator).await?;
    let (session, next_steps) = build_session(&orchestrator, &workflow_runs)?;

    let elapsed_ms = start.elapsed().as_secs_f64() * 1_000.0;
    info!(elapsed_ms, "Demo scenario completed");

    Ok(DemoReport {
        elapsed_ms,
        workflow_runs,
        session,
        next_steps,
        dashboard: orchestrator.dashboard(),
    })
}

async fn route_rounds(orchestrator: &Orchestrator, rounds: usize) -> Result<()> {
    let calls = [
        ("chemical", "search_compounds", QueryType::ChemicalSearch, "aspirin"),
        ("chemical", "search_compounds", QueryType::InhibitorSearch, "ptgs1"),
        ("clinical", "search_trials", QueryType::ClinicalTrial, "aspirin"),
    ];

    for round in 0..rounds {
        for (agent, tool, query_type, keyword) in &calls {
            let context = RouteContext::default()
                .with_query_type(query_type.clone())
                .with_keywords([*keyword]);
            let params = object(json!({ "query": keyword, "round": round }));

            let (_, feedback) = orchestrator
                .route_for_agent(agent, tool, &params, context)
                .await
                .with_context(|| format!("Routing '{}' for agent '{}' failed", tool, agent))?;

            if feedback.success {
                info!(agent, tool, source = %feedback.source, "{}", feedback.recommendation);
            } else {
                warn!(agent, tool, source = %feedback.source, "{}", feedback.recommendation);
            }
        }
    }
    Ok(())
}

async fn run_workflows(orchestrator: &Orchestrator) -> Result<Vec<ToolExecutionResult>> {
    let composer = orchestrator.composer();
    composer.record_pattern(CompositionPattern {
        pattern_name: "compound-then-trials".to_string(),
        query_pattern: r"(drug|compound).*(trial|study)".to_string(),
        recommended_steps: vec![
            StepDefinition::new("pubchem", "search_compounds", object(json!({"query": "${user.drug}"}))),
            StepDefinition::new("biomcp", "search_trials", object(json!({"cid": "${step1.cid}"}))),
        ],
        confidence: 0.7,
        times_suggested: 0,
        times_accepted: 0,
    });

    let steps = match composer.suggest_pattern("Which drug has an open trial?") {
        Some(pattern) => {
            composer.accept_pattern(&pattern.pattern_name);
            pattern.recommended_steps
        }
        None => Vec::new(),
    };
    let mut steps = steps;
    steps.push(
        StepDefinition::new(
            "literature",
            "summarize",
            object(json!({"drug": "${user.drug}", "trials": "${step2.trials}"})),
        )
        .run_if("step2.success"),
    );

    composer
        .create_tool(
            WORKFLOW,
            "Resolve a drug compound and find its clinical trials",
            "clinical",
            steps,
            vec!["clinical".to_string(), "chemistry".to_string()],
        );

    let drugs = ["aspirin", "ibuprofen", "naproxen"];
    let runs = join_all(drugs.iter().map(|drug| {
        let inputs = object(json!({ "drug": drug }));
        async move { orchestrator.execute_workflow(WORKFLOW, &inputs).await }
    }))
    .await;

    runs.into_iter()
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Demo workflow execution failed")
}

fn build_session(
    orchestrator: &Orchestrator,
    workflow_runs: &[ToolExecutionResult],
) -> Result<(SessionSummary, Vec<String>)> {
    let mut sessions = orchestrator.sessions_mut();
    let session_id = sessions
        .create_session("demo-user", "Compare aspirin vs ibuprofen for cardiovascular prevention")
        .session_id
        .clone();

    let root = sessions.add_query(&session_id, "aspirin and ibuprofen targets", None)?;
    let follow_up = sessions.add_query(&session_id, "trials for PTGS1 inhibitors", Some(&root.query_id))?;

    for (id, name) in [("CID2244", "aspirin"), ("CID3672", "ibuprofen")] {
        sessions.add_entity(
            &session_id,
            Entity::new(id, EntityType::Drug, name).with_source("pubchem"),
        )?;
    }
    sessions.add_entity(
        &session_id,
        Entity::new("PTGS1", EntityType::Protein, "Prostaglandin G/H synthase 1").with_source("biomcp"),
    )?;

    let succeeded = workflow_runs.iter().filter(|r| r.success).count();
    sessions.record_query_outcome(
        &session_id,
        &follow_up.query_id,
        QueryOutcome {
            agents_used: vec!["chemical".to_string(), "clinical".to_string()],
            providers_used: vec!["pubchem".to_string(), "biomcp".to_string()],
            execution_time_ms: workflow_runs.iter().map(|r| r.execution_time_ms).reduce(f64::max),
            entities_discovered: vec!["CID2244".to_string(), "CID3672".to_string(), "PTGS1".to_string()],
            insights_generated: Vec::new(),
        },
    )?;

    sessions.add_hypothesis(
        &session_id,
        "Low-dose aspirin reduces cardiovascular events more than ibuprofen",
        "clinical",
        0.6,
        vec!["CID2244".to_string(), "CID3672".to_string()],
    )?;
    sessions.add_insight(
        &session_id,
        InsightType::PatternDetected,
        &format!("{} of {} workflow runs found trial data", succeeded, workflow_runs.len()),
        "system",
        0.8,
        vec!["PTGS1".to_string()],
    )?;

    let summary = sessions.summary(&session_id)?;
    let next_steps = sessions.suggest_next_steps(&session_id)?;
    Ok((summary, next_steps))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_produces_a_full_report() {
        let report = run(Settings::default(), 2).await.unwrap();

        assert_eq!(report.workflow_runs.len(), 3);
        assert!(report.workflow_runs.iter().all(|r| r.success));
        assert_eq!(report.session.total_entities, 3);
        assert_eq!(report.session.active_hypotheses.len(), 1);
        assert_eq!(report.next_steps.len(), 2);
        assert_eq!(report.dashboard.providers.len(), 3);
        assert_eq!(report.dashboard.tools.total_uses, 3);
        assert!(report.dashboard.agents.contains_key("chemical"));
        assert!(serde_json::to_string(&report).is_ok());
    }
}
