use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// A backend that answers tool calls by name.
///
/// Any value other than `None`/`null` is a success. Errors and null results
/// are recorded as failures by the router and never reach the caller.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Tools this provider advertises; informational only
    fn tools(&self) -> Vec<String> {
        Vec::new()
    }

    async fn call_tool(&self, tool: &str, args: &Map<String, Value>) -> Result<Option<Value>>;
}

// --- Built-in providers ---

/// Returns the call it received; useful for wiring checks and demos
pub struct EchoProvider {
    name: String,
    request_count: AtomicU64,
}

impl EchoProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request_count: AtomicU64::new(0),
        }
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self::new("echo")
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> Vec<String> {
        vec!["*".to_string()]
    }

    async fn call_tool(&self, tool: &str, args: &Map<String, Value>) -> Result<Option<Value>> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        Ok(Some(json!({ "tool": tool, "args": args })))
    }
}

/// Serves canned responses per tool name, optionally after a fixed delay
pub struct StaticProvider {
    name: String,
    responses: HashMap<String, Value>,
    latency: Option<Duration>,
    request_count: AtomicU64,
    error_count: AtomicU64,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: HashMap::new(),
            latency: None,
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    pub fn with_response(mut self, tool: impl Into<String>, response: Value) -> Self {
        self.responses.insert(tool.into(), response);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = self.responses.keys().cloned().collect();
        tools.sort();
        tools
    }

    async fn call_tool(&self, tool: &str, _args: &Map<String, Value>) -> Result<Option<Value>> {
        self.request_count.fetch_add(1, Ordering::Relaxed);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.responses.get(tool) {
            Some(response) => {
                debug!(provider = %self.name, tool, "Serving canned response");
                Ok(Some(response.clone()))
            }
            None => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                Err(anyhow!("Provider '{}' has no tool '{}'", self.name, tool))
            }
        }
    }
}
