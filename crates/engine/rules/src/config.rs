use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Configuration for the rule engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Whether this process owns rule evaluation. Events on clients are ignored.
    pub is_server: bool,
    /// Added to a record's revision after data is injected in place.
    pub revision_increment: u32,
    /// Height of the water surface, the zero point of altitude conditions.
    pub water_level: f32,
    /// Maximum distance of object filters that do not give one.
    pub default_filter_distance: f32,
    /// Seed for alternative selection. Random when unset.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            is_server: true,
            revision_increment: 100,
            water_level: 30.0,
            default_filter_distance: 100.0,
            seed: None,
        }
    }
}

impl EngineConfig {
    /// Builds a configuration from environment variables, falling back to
    /// the defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = EngineConfig::default();

        let is_server = match env::var("PREFAB_RULES_SERVER") {
            Ok(v) => parse_bool(&v).ok_or_else(|| Error::Config(format!("PREFAB_RULES_SERVER: {v}")))?,
            Err(_) => defaults.is_server,
        };
        let revision_increment = env::var("PREFAB_RULES_REVISION_STEP")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.revision_increment);
        let water_level = env::var("PREFAB_RULES_WATER_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.water_level);
        let default_filter_distance = env::var("PREFAB_RULES_FILTER_DISTANCE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.default_filter_distance);
        let seed = env::var("PREFAB_RULES_SEED").ok().and_then(|v| v.parse().ok());

        let config = EngineConfig {
            is_server,
            revision_increment,
            water_level,
            default_filter_distance,
            seed,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_filter_distance.is_nan() || self.default_filter_distance <= 0.0 {
            return Err(Error::Config(format!(
                "filter distance must be positive, got {}",
                self.default_filter_distance
            )));
        }
        Ok(())
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
