//! Response Formatter
//!
//! Reduces the returned samples to one display value, renders it in the
//! metric's unit and, when a phraser is available, has it rewritten as prose.

use crate::compiler::CompiledQuery;
use crate::gateway::Sample;
use crate::intent::Aggregation;
use crate::llm::Phraser;
use crate::schema::{MetricSpec, Unit};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

pub const NO_DATA_MESSAGE: &str = "No data found for this metric and time range.";

const BYTE_UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// Everything the phrasing step needs to word an answer.
#[derive(Debug, Clone)]
pub struct PhrasingRequest {
    pub question: String,
    pub metric_description: String,
    pub aggregation: String,
    pub value: String,
    pub time_range: String,
}

/// Render a raw value in `unit`.
pub fn render_value(value: f64, unit: Unit) -> String {
    match unit {
        Unit::PercentFraction => format!("{:.1}%", value * 100.0),
        Unit::PercentWhole => format!("{:.1}%", value),
        Unit::Bytes => {
            let mut scaled = value;
            let mut idx = 0;
            while scaled.abs() >= 1024.0 && idx < BYTE_UNITS.len() - 1 {
                scaled /= 1024.0;
                idx += 1;
            }
            format!("{:.1} {}", scaled, BYTE_UNITS[idx])
        }
        Unit::Seconds => format!("{:.1}s", value),
        Unit::Count => format!("{:.0}", value),
    }
}

/// Pick the value to report: the latest finite sample of each series,
/// combined across series according to the unit.
pub fn representative_value(samples: &[Sample], unit: Unit) -> Option<f64> {
    let mut latest: BTreeMap<&BTreeMap<String, String>, &Sample> = BTreeMap::new();
    for sample in samples.iter().filter(|s| s.value.is_finite()) {
        latest
            .entry(&sample.labels)
            .and_modify(|current| {
                if sample.timestamp_seconds >= current.timestamp_seconds {
                    *current = sample;
                }
            })
            .or_insert(sample);
    }

    if latest.is_empty() {
        return None;
    }

    let values: Vec<f64> = latest.values().map(|s| s.value).collect();
    let combined = match unit {
        Unit::PercentFraction | Unit::PercentWhole => {
            values.iter().sum::<f64>() / values.len() as f64
        }
        Unit::Seconds => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Unit::Bytes | Unit::Count => values.iter().sum(),
    };
    Some(combined)
}

/// Plain sentence used whenever no phraser is available.
pub fn fallback_sentence(spec: &MetricSpec, aggregation: Aggregation, time_range: &str, value: &str) -> String {
    let subject = match aggregation.adjective() {
        Some(adjective) => format!("{} {}", adjective, spec.display_name),
        None => spec.display_name.clone(),
    };
    let mut chars = subject.chars();
    let subject = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => subject,
    };
    format!("{} over the last {} is {}.", subject, time_range, value)
}

#[derive(Clone, Default)]
pub struct ResponseFormatter {
    phraser: Option<Arc<dyn Phraser>>,
}

impl ResponseFormatter {
    pub fn new(phraser: Option<Arc<dyn Phraser>>) -> Self {
        Self { phraser }
    }

    /// Format without the phrasing step.
    pub fn format_plain(&self, samples: &[Sample], spec: &MetricSpec, query: &CompiledQuery) -> String {
        match representative_value(samples, spec.unit) {
            None => NO_DATA_MESSAGE.to_string(),
            Some(value) => fallback_sentence(
                spec,
                query.aggregation,
                query.time_range.as_str(),
                &render_value(value, spec.unit),
            ),
        }
    }

    pub async fn format(
        &self,
        samples: &[Sample],
        spec: &MetricSpec,
        query: &CompiledQuery,
        question: &str,
    ) -> String {
        let value = match representative_value(samples, spec.unit) {
            None => return NO_DATA_MESSAGE.to_string(),
            Some(v) => render_value(v, spec.unit),
        };
        let fallback = fallback_sentence(spec, query.aggregation, query.time_range.as_str(), &value);

        let phraser = match &self.phraser {
            Some(p) => p,
            None => return fallback,
        };

        let request = PhrasingRequest {
            question: query
                .source_intent
                .summary
                .clone()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| question.to_string()),
            metric_description: spec.description.clone(),
            aggregation: query.aggregation.to_string(),
            value,
            time_range: query.time_range.to_string(),
        };

        match phraser.phrase(&request).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("Phrasing step returned an empty answer, using plain sentence");
                fallback
            }
            Err(e) => {
                warn!("Phrasing step unavailable ({}), using plain sentence", e);
                fallback
            }
        }
    }
}
