// plugins/text_provider/src/lib.rs
//! A small Provider answering text-processing tools.
//!
//! ### Supported tools
//! ```jsonc
//! "uppercase"      { "text": "hello" }
//! "uppercase_many" { "texts": ["foo", "bar"] }
//! "keywords"       { "text": "EGFR inhibitors in lung cancer", "min_len": 4 }
//! "word_count"     { "text": "three little words" }
//! ```
//!
//! Blank input yields no result, which the router records as a failure.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dual_orchestrator::provider::Provider;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

const TOOLS: [&str; 4] = ["uppercase", "uppercase_many", "keywords", "word_count"];

const STOPWORDS: [&str; 12] = [
    "the", "and", "for", "with", "from", "that", "this", "into", "which", "what", "about", "their",
];

#[derive(Deserialize)]
struct TextArgs {
    text: String,
}

#[derive(Deserialize)]
struct ManyArgs {
    texts: Vec<String>,
}

#[derive(Deserialize)]
struct KeywordArgs {
    text: String,
    #[serde(default = "default_min_len")]
    min_len: usize,
}

fn default_min_len() -> usize {
    4
}

fn parse<T: DeserializeOwned>(tool: &str, args: &Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(args.clone()))
        .map_err(|e| anyhow!("Invalid arguments for '{}': {}", tool, e))
}

/// Lower-cased, de-duplicated words of at least `min_len` characters, in order of appearance
pub fn extract_keywords(text: &str, min_len: usize) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|w| w.trim_matches('-').to_lowercase())
    {
        if word.chars().count() >= min_len && !STOPWORDS.contains(&word.as_str()) && !keywords.contains(&word) {
            keywords.push(word);
        }
    }
    keywords
}

pub struct TextProvider {
    name: String,
}

impl TextProvider {
    pub fn new() -> Self {
        Self::with_name("text")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for TextProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for TextProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> Vec<String> {
        TOOLS.iter().map(|t| t.to_string()).collect()
    }

    async fn call_tool(&self, tool: &str, args: &Map<String, Value>) -> Result<Option<Value>> {
        let output = match tool {
            "uppercase" => {
                let TextArgs { text } = parse(tool, args)?;
                (!text.trim().is_empty()).then(|| json!({ "text": text.to_uppercase() }))
            }
            "uppercase_many" => {
                let ManyArgs { texts } = parse(tool, args)?;
                (!texts.is_empty()).then(|| {
                    let upper: Vec<String> = texts.iter().map(|t| t.to_uppercase()).collect();
                    json!({ "texts": upper })
                })
            }
            "keywords" => {
                let KeywordArgs { text, min_len } = parse(tool, args)?;
                let keywords = extract_keywords(&text, min_len);
                (!keywords.is_empty()).then(|| json!({ "keywords": keywords }))
            }
            "word_count" => {
                let TextArgs { text } = parse(tool, args)?;
                Some(json!({ "count": text.split_whitespace().count() }))
            }
            other => return Err(anyhow!("Provider '{}' has no tool '{}'", self.name, other)),
        };

        debug!(provider = %self.name, tool, produced = output.is_some(), "Processed text request");
        Ok(output)
    }
}

/// Register a [`TextProvider`] with a router
pub fn register(router: &dual_orchestrator::router::Router) -> dual_orchestrator::Result<()> {
    router.register_provider(std::sync::Arc::new(TextProvider::new()))?;
    info!("Text provider registered");
    Ok(())
}
