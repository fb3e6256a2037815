//! Turn Orchestrator
//!
//! Runs one question through extraction, resolution, compilation, execution
//! and formatting. Any failure ends the turn with a single apology; the
//! structured error only goes to the log.

use crate::compiler::QueryCompiler;
use crate::config::AssistantConfig;
use crate::error::{AssistantError, Result};
use crate::formatter::ResponseFormatter;
use crate::gateway::{HttpMetricsGateway, MetricsGateway};
use crate::intent::Intent;
use crate::llm::{IntentExtractor, LlmClient, Phraser};
use crate::schema::SchemaStore;
use serde::Serialize;
use std::sync::Arc;
use strsim::jaro_winkler;
use tracing::{error, info, info_span, Instrument};

const SUGGESTION_THRESHOLD: f64 = 0.8;

/// What a successful turn produced.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub question: String,
    pub intent: Intent,
    pub query: String,
    pub sample_count: usize,
    pub answer: String,
}

pub struct MetricsAssistant {
    schema: Arc<SchemaStore>,
    extractor: Arc<dyn IntentExtractor>,
    gateway: Arc<dyn MetricsGateway>,
    formatter: ResponseFormatter,
    confidence_threshold: f64,
}

impl MetricsAssistant {
    pub fn new(
        schema: Arc<SchemaStore>,
        extractor: Arc<dyn IntentExtractor>,
        gateway: Arc<dyn MetricsGateway>,
        formatter: ResponseFormatter,
        confidence_threshold: f64,
    ) -> Self {
        Self {
            schema,
            extractor,
            gateway,
            formatter,
            confidence_threshold,
        }
    }

    /// Wire the production collaborators: one language-model client serves as
    /// both extractor and phraser.
    pub fn from_config(config: &AssistantConfig, schema: SchemaStore) -> Result<Self> {
        let llm = Arc::new(LlmClient::from_config(config)?);
        let gateway = Arc::new(HttpMetricsGateway::from_config(config)?);
        info!("Using language model {}", llm.model());

        let phraser: Arc<dyn Phraser> = llm.clone();
        Ok(Self::new(
            Arc::new(schema),
            llm,
            gateway,
            ResponseFormatter::new(Some(phraser)),
            config.confidence_threshold,
        ))
    }

    pub fn schema(&self) -> &SchemaStore {
        &self.schema
    }

    /// Run one turn, surfacing the structured error on failure.
    pub async fn run_turn(&self, user_text: &str) -> Result<TurnRecord> {
        info!("Processing query: {}", user_text);

        let intent = self.extractor.extract(user_text, self.schema.metrics()).await?;
        intent.validate(self.confidence_threshold)?;
        info!(
            "Parsed intent: metric={:?} aggregation={} time_range={} confidence={:.2}",
            intent.metric, intent.aggregation, intent.time_range, intent.confidence
        );

        let metric_id = intent.metric_id().unwrap_or_default();
        let spec = self
            .schema
            .get(metric_id)
            .ok_or_else(|| AssistantError::UnknownMetric(metric_id.to_string()))?;

        let compiled = QueryCompiler::compile(spec, &intent)?;
        info!("Generated query: {}", compiled.text);

        let samples = self.gateway.query(&compiled).await?;
        info!("Query returned {} samples", samples.len());

        let answer = self
            .formatter
            .format(&samples, spec, &compiled, user_text)
            .await;

        Ok(TurnRecord {
            question: user_text.to_string(),
            intent,
            query: compiled.text,
            sample_count: samples.len(),
            answer,
        })
    }

    /// Run one turn and always return something to show the user.
    pub async fn handle_turn(&self, user_text: &str) -> String {
        let turn_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("turn", turn_id = %turn_id);

        async {
            match self.run_turn(user_text).await {
                Ok(record) => record.answer,
                Err(e) => {
                    match &e {
                        AssistantError::Gateway { body: Some(body), .. } => {
                            error!(kind = e.kind(), upstream_body = %body, "Turn failed: {}", e)
                        }
                        _ => error!(kind = e.kind(), "Turn failed: {}", e),
                    }
                    apology(&e, &self.schema)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// The user-facing text for a failed turn.
pub fn apology(err: &AssistantError, schema: &SchemaStore) -> String {
    let known = schema.ids().join(", ");
    match err {
        AssistantError::IntentParse(_) => format!(
            "I couldn't understand which metric you're asking about. Please try asking about one of: {}.",
            known
        ),
        AssistantError::UnknownMetric(requested) => match closest_metric(requested, schema) {
            Some(candidate) => format!(
                "Sorry, I don't know a metric called '{}'. Did you mean '{}'? Known metrics: {}.",
                requested, candidate, known
            ),
            None => format!(
                "Sorry, I don't know a metric called '{}'. Known metrics: {}.",
                requested, known
            ),
        },
        AssistantError::UnsupportedAggregation(_) => {
            "Sorry, I can only report the average, maximum, minimum or total of a metric.".to_string()
        }
        AssistantError::InvalidTimeRange(_) => {
            "Sorry, I didn't understand the time range. Try something like 30s, 5m, 1h or 7d.".to_string()
        }
        AssistantError::Template(_) => {
            "Sorry, the query for that metric is misconfigured, so I can't answer right now.".to_string()
        }
        AssistantError::Gateway { .. } => {
            "Sorry, I couldn't get data from the metrics backend just now. Please try again in a moment."
                .to_string()
        }
        AssistantError::Llm(_) => {
            "Sorry, the language model is unavailable right now. Please try again shortly.".to_string()
        }
        AssistantError::Config(_) | AssistantError::Io(_) | AssistantError::Json(_) => {
            "Sorry, something went wrong while answering that question.".to_string()
        }
    }
}

fn closest_metric<'a>(requested: &str, schema: &'a SchemaStore) -> Option<&'a str> {
    let needle = requested.to_ascii_lowercase();
    schema
        .ids()
        .into_iter()
        .map(|id| (id, jaro_winkler(&needle, &id.to_ascii_lowercase())))
        .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(id, _)| id)
}
