//! Per-phase adapter/model/reasoning selection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::phase::{PhaseKey, is_recognized_key};

/// Adapter/model/reasoning triple. Empty fields mean "inherit".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub adapter: String,
    pub model: String,
    pub reasoning: String,
}

impl ModelConfig {
    pub fn is_empty(&self) -> bool {
        self.adapter.is_empty() && self.model.is_empty() && self.reasoning.is_empty()
    }
}

/// Default config plus exact-key overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseRouting {
    #[serde(rename = "default")]
    pub default_config: ModelConfig,
    pub overrides: BTreeMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct PhaseRouter {
    routing: Option<PhaseRouting>,
}

impl PhaseRouter {
    pub fn new(routing: PhaseRouting) -> Self {
        Self {
            routing: Some(routing),
        }
    }

    /// Router that resolves every key to an all-empty config.
    pub fn none() -> Self {
        Self { routing: None }
    }

    pub fn model_for_phase(&self, key: &str) -> ModelConfig {
        let Some(routing) = &self.routing else {
            return ModelConfig::default();
        };
        routing
            .overrides
            .get(key)
            .cloned()
            .unwrap_or_else(|| routing.default_config.clone())
    }

    pub fn model_for(&self, key: PhaseKey) -> ModelConfig {
        self.model_for_phase(&key.key())
    }

    /// Sorted, de-duplicated, non-empty adapter names across default and overrides.
    pub fn adapters(&self) -> Vec<String> {
        let Some(routing) = &self.routing else {
            return Vec::new();
        };
        let mut names: Vec<String> = std::iter::once(&routing.default_config)
            .chain(routing.overrides.values())
            .filter(|config| !config.adapter.is_empty())
            .map(|config| config.adapter.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Sorted override keys outside the recognized phase keys.
    pub fn unknown_phases(&self) -> Vec<String> {
        let Some(routing) = &self.routing else {
            return Vec::new();
        };
        // BTreeMap keys are already sorted.
        routing
            .overrides
            .keys()
            .filter(|key| !is_recognized_key(key))
            .cloned()
            .collect()
    }
}
