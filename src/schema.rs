//! Schema Store
//!
//! The fixed catalogue of metrics the assistant can answer questions about.
//! Loaded and validated once at startup, read-only afterwards.

use crate::compiler::{window_token_count, TIME_WINDOW_TOKEN};
use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

/// Display unit of a metric.
///
/// Percent values are tagged with their scale so the formatter never has to
/// guess whether the backend reports 0.42 or 42.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// Backend reports a fraction in [0, 1]
    PercentFraction,
    /// Backend reports a percentage in [0, 100]
    PercentWhole,
    Bytes,
    Seconds,
    Count,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::PercentFraction => "percent_fraction",
            Unit::PercentWhole => "percent_whole",
            Unit::Bytes => "bytes",
            Unit::Seconds => "seconds",
            Unit::Count => "count",
        }
    }

    /// Short human label used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Unit::PercentFraction | Unit::PercentWhole => "%",
            Unit::Bytes => "bytes",
            Unit::Seconds => "seconds",
            Unit::Count => "count",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSpec {
    pub id: String,
    pub query_template: String,
    pub unit: Unit,
    pub display_name: String,
    pub description: String,
}

/// One entry of the schema file, keyed by metric id.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetricEntry {
    #[serde(alias = "promql")]
    query_template: String,
    unit: Unit,
    display_name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(deserialize_with = "unique_entries")]
    metrics: Vec<(String, MetricEntry)>,
}

/// Read the `metrics` object in file order, failing on a repeated id.
fn unique_entries<'de, D>(deserializer: D) -> std::result::Result<Vec<(String, MetricEntry)>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct EntriesVisitor;

    impl<'de> serde::de::Visitor<'de> for EntriesVisitor {
        type Value = Vec<(String, MetricEntry)>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a map of metric id to metric definition")
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de>,
        {
            let mut seen = HashSet::new();
            let mut entries = Vec::new();
            while let Some((id, entry)) = map.next_entry::<String, MetricEntry>()? {
                if !seen.insert(id.clone()) {
                    return Err(serde::de::Error::custom(format!("duplicate metric id '{}'", id)));
                }
                entries.push((id, entry));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(EntriesVisitor)
}

#[derive(Debug, Clone)]
pub struct SchemaStore {
    metrics: Vec<MetricSpec>,
    by_id: HashMap<String, usize>,
}

impl SchemaStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AssistantError::Config(format!("Failed to read schema {}: {}", path.display(), e))
        })?;
        let store = Self::from_json_str(&content).map_err(|e| match e {
            AssistantError::Config(msg) => {
                AssistantError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        info!("Loaded {} metrics from {}", store.len(), path.display());
        Ok(store)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let file: SchemaFile = serde_json::from_str(content)
            .map_err(|e| AssistantError::Config(format!("Invalid schema format: {}", e)))?;

        let specs = file
            .metrics
            .into_iter()
            .map(|(id, entry)| MetricSpec {
                description: entry
                    .description
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| entry.display_name.clone()),
                id,
                query_template: entry.query_template,
                unit: entry.unit,
                display_name: entry.display_name,
            })
            .collect();

        Self::from_specs(specs)
    }

    /// Build a store from already-constructed specs, applying the same
    /// validation as the file loader.
    pub fn from_specs(mut specs: Vec<MetricSpec>) -> Result<Self> {
        if specs.is_empty() {
            return Err(AssistantError::Config("Schema defines no metrics".to_string()));
        }
        specs.sort_by(|a, b| a.id.cmp(&b.id));

        let mut folded: HashMap<String, &str> = HashMap::new();
        for spec in &specs {
            validate_spec(spec)?;
            if let Some(existing) = folded.insert(spec.id.to_ascii_lowercase(), &spec.id) {
                return Err(AssistantError::Config(format!(
                    "Metric ids '{}' and '{}' differ only by case",
                    existing, spec.id
                )));
            }
        }

        let by_id = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();

        Ok(Self { metrics: specs, by_id })
    }

    /// Resolve a metric id: exact match first, then ignoring ASCII case.
    pub fn get(&self, id: &str) -> Option<&MetricSpec> {
        if let Some(&i) = self.by_id.get(id) {
            return Some(&self.metrics[i]);
        }
        self.metrics.iter().find(|m| m.id.eq_ignore_ascii_case(id))
    }

    /// All metrics, sorted by id.
    pub fn metrics(&self) -> &[MetricSpec] {
        &self.metrics
    }

    pub fn ids(&self) -> Vec<&str> {
        self.metrics.iter().map(|m| m.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Bulleted listing for the CLI.
    pub fn describe(&self) -> String {
        let lines: Vec<String> = self
            .metrics
            .iter()
            .map(|m| format!("  • {} ({}): {}", m.display_name, m.id, m.description))
            .collect();
        format!("Available metrics:\n{}", lines.join("\n"))
    }
}

fn validate_spec(spec: &MetricSpec) -> Result<()> {
    if spec.id.trim().is_empty() || spec.id.chars().any(char::is_whitespace) {
        return Err(AssistantError::Config(format!(
            "Metric id '{}' must be non-empty and contain no whitespace",
            spec.id
        )));
    }
    if spec.display_name.trim().is_empty() {
        return Err(AssistantError::Config(format!(
            "Metric '{}' has an empty display_name",
            spec.id
        )));
    }
    let tokens = window_token_count(&spec.query_template);
    if tokens != 1 {
        return Err(AssistantError::Config(format!(
            "Metric '{}' query_template must contain exactly one {} window, found {}",
            spec.id, TIME_WINDOW_TOKEN, tokens
        )));
    }
    Ok(())
}
