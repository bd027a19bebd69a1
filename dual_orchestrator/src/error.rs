//! Error types shared by the routing, learning, composition and session layers.
//!
//! Provider-side failures are never surfaced through this type: the router
//! converts them into a failed [`Feedback`](crate::models::performance::Feedback).
//! What remains here are caller mistakes and precondition violations.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrchestrationError {
    /// A route or circuit-breaker operation named a provider that was never registered.
    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    /// `cache` and `error` already label cached and failed routes.
    #[error("Provider name '{0}' is reserved")]
    ReservedProviderName(String),

    /// Cache tiers are numbered 1 through 3.
    #[error("Invalid cache tier {0} (expected 1, 2 or 3)")]
    InvalidCacheTier(u8),

    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    #[error("Query '{query_id}' not found in session '{session_id}'")]
    QueryNotFound { session_id: String, query_id: String },

    #[error("Hypothesis '{hypothesis_id}' not found in session '{session_id}'")]
    HypothesisNotFound {
        session_id: String,
        hypothesis_id: String,
    },

    #[error("Composed tool '{0}' not found")]
    ToolNotFound(String),

    /// Confidence scores live in `[0, 1]`.
    #[error("Confidence {0} is outside [0, 1]")]
    InvalidConfidence(f64),
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;
