//! Plain records shared by the router, knowledge base, composer and session memory.

pub mod composed_tool;
pub mod entities;
pub mod performance;
pub mod session;

pub use composed_tool::{
    ComposedTool, CompositionPattern, StepDefinition, StepResult, StepStatus, ToolExecutionResult,
    ToolStep,
};
pub use entities::{Entity, EntityType};
pub use performance::{
    incremental_mean, AgentPerformance, Feedback, FeedbackSource, ProviderPerformance, QueryType,
    QueryTypeStats,
};
pub use session::{
    Hypothesis, HypothesisStatus, Insight, InsightType, ProactiveSuggestion, QueryContext,
    ResearchSession, TimelineEvent,
};
