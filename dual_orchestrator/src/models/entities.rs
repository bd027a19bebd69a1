//! Entities discovered while researching a session's goal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Drug,
    Gene,
    Protein,
    ClinicalTrial,
    Disease,
    Pathway,
    Publication,
}

/// A discovered entity. Type-specific attributes (SMILES, NCT id, UniProt id...) live in `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub name: String,
    pub discovered_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_provider: Option<String>,
}

impl Entity {
    pub fn new(entity_id: impl Into<String>, entity_type: EntityType, name: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type,
            name: name.into(),
            discovered_at: Utc::now(),
            metadata: HashMap::new(),
            source_provider: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_source(mut self, provider: impl Into<String>) -> Self {
        self.source_provider = Some(provider.into());
        self
    }
}
