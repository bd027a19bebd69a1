//! Composed tools: named, ordered chains of provider calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::performance::incremental_mean;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Caller-supplied description of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub provider: String,
    pub tool: String,
    /// Parameter name to literal value or `${source.field}` template string
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_if: Option<String>,
}

impl StepDefinition {
    pub fn new(provider: impl Into<String>, tool: impl Into<String>, input: Map<String, Value>) -> Self {
        Self {
            provider: provider.into(),
            tool: tool.into(),
            input,
            run_if: None,
        }
    }

    pub fn run_if(mut self, condition: impl Into<String>) -> Self {
        self.run_if = Some(condition.into());
        self
    }
}

/// A step of a registered tool together with the state of its latest execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStep {
    /// 1-based position; `${stepN}` refers to this id
    pub step_id: usize,
    pub provider: String,
    pub tool_name: String,
    pub input_template: Map<String, Value>,
    pub run_if: Option<String>,
    pub status: StepStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub execution_time_ms: Option<f64>,
}

impl ToolStep {
    pub fn from_definition(step_id: usize, definition: StepDefinition) -> Self {
        Self {
            step_id,
            provider: definition.provider,
            tool_name: definition.tool,
            input_template: definition.input,
            run_if: definition.run_if,
            status: StepStatus::Pending,
            result: None,
            error: None,
            execution_time_ms: None,
        }
    }

    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.result = None;
        self.error = None;
        self.execution_time_ms = None;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposedTool {
    pub name: String,
    pub description: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<ToolStep>,
    pub tags: Vec<String>,
    pub times_used: u64,
    pub times_succeeded: u64,
    pub times_failed: u64,
    pub total_execution_time_ms: f64,
    pub avg_execution_time_ms: f64,
}

impl ComposedTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        created_by: impl Into<String>,
        steps: Vec<ToolStep>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            created_by: created_by.into(),
            created_at: Utc::now(),
            steps,
            tags,
            times_used: 0,
            times_succeeded: 0,
            times_failed: 0,
            total_execution_time_ms: 0.0,
            avg_execution_time_ms: 0.0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.times_used == 0 {
            return 0.0;
        }
        self.times_succeeded as f64 / self.times_used as f64
    }

    pub fn record_execution(&mut self, success: bool, execution_time_ms: f64) {
        self.times_used += 1;
        if success {
            self.times_succeeded += 1;
        } else {
            self.times_failed += 1;
        }
        self.total_execution_time_ms += execution_time_ms;
        self.avg_execution_time_ms =
            incremental_mean(self.avg_execution_time_ms, self.times_used, execution_time_ms);
    }
}

/// Per-step entry of a [`ToolExecutionResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: usize,
    pub provider: String,
    pub tool: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub tool_name: String,
    pub success: bool,
    pub execution_time_ms: f64,
    pub step_results: Vec<StepResult>,
    pub final_result: Option<Value>,
    pub error: Option<String>,
    /// Id of the step that stopped execution
    pub failed_step: Option<usize>,
    pub steps_executed: usize,
    pub steps_failed: usize,
}

/// A learned recipe suggesting which steps suit queries matching `query_pattern`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionPattern {
    pub pattern_name: String,
    /// Case-insensitive regular expression
    pub query_pattern: String,
    pub recommended_steps: Vec<StepDefinition>,
    pub confidence: f64,
    pub times_suggested: u64,
    pub times_accepted: u64,
}
