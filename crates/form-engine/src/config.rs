use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use form_spec::{AssemblySpec, FormSpec};
use form_suggest::{CategorySpec, DEFAULT_DEBOUNCE_MS, SyncConfig};
use serde::{Deserialize, Serialize};

/// Engine settings, usually read from `form-engine.toml`.
///
/// ```toml
/// [suggestions]
/// debounce_ms = 400
///
/// [[suggestions.categories]]
/// name = "industry_defaults"
/// drivers = ["industry"]
/// targets = [{ field = "department" }]
///
/// [logging]
/// level = "debug"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub suggestions: SuggestionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionsConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Categories shared by every form; form bundles may add their own.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<CategorySpec>,
}

impl SuggestionsConfig {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            debounce_ms: self.debounce_ms,
            ..SyncConfig::default()
        }
    }
}

impl Default for SuggestionsConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            categories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_level() -> String {
    "info".to_string()
}

/// A form together with its suggestion categories and submission mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormBundle {
    pub form: FormSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<CategorySpec>,
    #[serde(default)]
    pub assembly: AssemblySpec,
}

pub fn parse_engine_config(raw: &str) -> Result<EngineConfig> {
    toml::from_str(raw).context("engine config is not valid TOML")
}

pub fn load_engine_config(path: &Path) -> Result<EngineConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read engine config {}", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("engine config {} is not valid TOML", path.display()))
}

/// Loads a bundle from JSON, or from TOML when the file has a `.toml` extension.
pub fn load_form_bundle(path: &Path) -> Result<FormBundle> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read form bundle {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str(&raw)
            .with_context(|| format!("form bundle {} is not valid TOML", path.display()))
    } else {
        serde_json::from_str(&raw)
            .with_context(|| format!("form bundle {} must be valid JSON", path.display()))
    }
}
