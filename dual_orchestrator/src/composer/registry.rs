use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::models::composed_tool::{ComposedTool, CompositionPattern};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_tools: usize,
    pub total_uses: u64,
    pub avg_success_rate: f64,
    pub patterns_learned: usize,
}

/// Named composed tools plus learned composition patterns
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ComposedTool>,
    /// Registration order, for deterministic ranking ties
    order: Vec<String>,
    patterns: Vec<CompositionPattern>,
}

fn words(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

fn by_success_rate(tools: &mut [ComposedTool]) {
    tools.sort_by(|a, b| b.success_rate().total_cmp(&a.success_rate()));
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tool by name
    pub fn register(&mut self, tool: ComposedTool) {
        if !self.tools.contains_key(&tool.name) {
            self.order.push(tool.name.clone());
        }
        debug!(tool = %tool.name, steps = tool.steps.len(), "Registering composed tool");
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&ComposedTool> {
        self.tools.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ComposedTool> {
        self.tools.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn in_order(&self) -> impl Iterator<Item = &ComposedTool> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }

    /// Tools sharing at least two words with `query`, or any of `tags`,
    /// best success rate first.
    pub fn find_matching_tools(&self, query: &str, tags: &[String]) -> Vec<ComposedTool> {
        let query_words = words(query);

        let mut matches: Vec<ComposedTool> = self
            .in_order()
            .filter(|tool| {
                if tags.iter().any(|tag| tool.tags.contains(tag)) {
                    return true;
                }
                words(&tool.description).intersection(&query_words).count() >= 2
            })
            .cloned()
            .collect();

        by_success_rate(&mut matches);
        matches
    }

    /// Tools used at least three times, best success rate first
    pub fn top_performing(&self, limit: usize) -> Vec<ComposedTool> {
        let mut tools: Vec<ComposedTool> = self.in_order().filter(|t| t.times_used >= 3).cloned().collect();
        by_success_rate(&mut tools);
        tools.truncate(limit);
        tools
    }

    pub fn record_pattern(&mut self, pattern: CompositionPattern) {
        self.patterns.push(pattern);
    }

    pub fn patterns(&self) -> &[CompositionPattern] {
        &self.patterns
    }

    /// First pattern whose expression matches `query`, case-insensitively.
    /// Patterns with an invalid expression never match.
    pub fn suggest_pattern(&mut self, query: &str) -> Option<CompositionPattern> {
        for pattern in &mut self.patterns {
            let regex = match RegexBuilder::new(&pattern.query_pattern).case_insensitive(true).build() {
                Ok(regex) => regex,
                Err(e) => {
                    warn!(pattern = %pattern.pattern_name, error = %e, "Skipping invalid composition pattern");
                    continue;
                }
            };
            if regex.is_match(query) {
                pattern.times_suggested += 1;
                return Some(pattern.clone());
            }
        }
        None
    }

    /// Mark a suggested pattern as adopted
    pub fn accept_pattern(&mut self, pattern_name: &str) -> bool {
        match self.patterns.iter_mut().find(|p| p.pattern_name == pattern_name) {
            Some(pattern) => {
                pattern.times_accepted += 1;
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let total_tools = self.tools.len();
        let avg_success_rate = if total_tools == 0 {
            0.0
        } else {
            self.tools.values().map(ComposedTool::success_rate).sum::<f64>() / total_tools as f64
        };

        RegistryStats {
            total_tools,
            total_uses: self.tools.values().map(|t| t.times_used).sum(),
            avg_success_rate,
            patterns_learned: self.patterns.len(),
        }
    }
}
