//! Query Compiler
//!
//! Turns a resolved metric plus the aggregation and time-range tokens of an
//! intent into executable query text. Substitution is purely textual: the
//! template's single `[5m]` window is replaced and the result optionally
//! wrapped in the aggregation function.

use crate::error::{AssistantError, Result};
use crate::intent::{Aggregation, Intent, TimeRange};
use crate::schema::MetricSpec;
use serde::Serialize;

/// Default time window every query template carries exactly once.
pub const TIME_WINDOW_TOKEN: &str = "[5m]";

pub fn window_token_count(template: &str) -> usize {
    template.matches(TIME_WINDOW_TOKEN).count()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub text: String,
    pub metric_id: String,
    pub aggregation: Aggregation,
    #[serde(serialize_with = "serialize_time_range")]
    pub time_range: TimeRange,
    pub source_intent: Intent,
}

fn serialize_time_range<S: serde::Serializer>(
    range: &TimeRange,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(range.as_str())
}

pub struct QueryCompiler;

impl QueryCompiler {
    /// Compile `intent` against an already-resolved `spec`.
    ///
    /// Parses the intent's raw aggregation and time-range tokens, then
    /// defers to [`QueryCompiler::build`]. Tokens are checked in order:
    /// aggregation, time range, then template.
    pub fn compile(spec: &MetricSpec, intent: &Intent) -> Result<CompiledQuery> {
        let aggregation: Aggregation = intent.aggregation.parse()?;
        let time_range: TimeRange = intent.time_range.parse()?;
        let text = Self::build(spec, aggregation, &time_range)?;

        Ok(CompiledQuery {
            text,
            metric_id: spec.id.clone(),
            aggregation,
            time_range,
            source_intent: intent.clone(),
        })
    }

    /// Query text for `(spec, aggregation, time_range)` with already-typed
    /// arguments. Template errors name the metric.
    pub fn build(spec: &MetricSpec, aggregation: Aggregation, time_range: &TimeRange) -> Result<String> {
        Self::render(&spec.query_template, aggregation, time_range).map_err(|e| match e {
            AssistantError::Template(msg) => {
                AssistantError::Template(format!("metric '{}': {}", spec.id, msg))
            }
            other => other,
        })
    }

    /// Substitute the window and apply the aggregation wrapper.
    pub fn render(template: &str, aggregation: Aggregation, time_range: &TimeRange) -> Result<String> {
        let found = window_token_count(template);
        if found != 1 {
            return Err(AssistantError::Template(format!(
                "expected exactly one {} window in template, found {}",
                TIME_WINDOW_TOKEN, found
            )));
        }

        let windowed = template.replacen(TIME_WINDOW_TOKEN, &format!("[{}]", time_range), 1);

        Ok(match aggregation.function_name() {
            Some(func) => format!("{}({})", func, windowed),
            None => windowed,
        })
    }
}
