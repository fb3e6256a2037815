//! Metrics Gateway
//!
//! Executes compiled queries against a Prometheus-compatible HTTP API (by
//! default through the Grafana datasource proxy) and decodes the result into
//! flat samples.

use crate::compiler::CompiledQuery;
use crate::config::{AssistantConfig, QueryMode};
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Points requested across the time range in range mode.
const RANGE_POINTS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub labels: BTreeMap<String, String>,
    pub timestamp_seconds: f64,
    pub value: f64,
}

#[async_trait]
pub trait MetricsGateway: Send + Sync {
    async fn query(&self, query: &CompiledQuery) -> Result<Vec<Sample>>;
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Vector(Vec<InstantSeries>),
    Matrix(Vec<RangeSeries>),
    Scalar(RawPoint),
    #[serde(rename = "string")]
    Text(serde::de::IgnoredAny),
}

/// `[<unix seconds>, "<value>"]`
type RawPoint = (f64, String);

#[derive(Debug, Deserialize)]
struct InstantSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: RawPoint,
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    values: Vec<RawPoint>,
}

fn parse_value(raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| AssistantError::gateway(format!("Non-numeric sample value '{}'", raw)))
}

/// Decode a query API body into samples.
pub fn parse_query_response(body: &str) -> Result<Vec<Sample>> {
    let response: QueryResponse = serde_json::from_str(body).map_err(|e| AssistantError::Gateway {
        status: None,
        message: format!("Undecodable response: {}", e),
        body: Some(body.to_string()),
    })?;

    if response.status != "success" {
        return Err(AssistantError::Gateway {
            status: None,
            message: format!(
                "Query failed ({}): {}",
                response.error_type.as_deref().unwrap_or("unknown"),
                response.error.as_deref().unwrap_or("no error message")
            ),
            body: Some(body.to_string()),
        });
    }

    let data = response
        .data
        .ok_or_else(|| AssistantError::gateway("Successful response carried no data"))?;

    let mut samples = Vec::new();
    match data {
        QueryData::Vector(series) => {
            for s in series {
                samples.push(Sample {
                    value: parse_value(&s.value.1)?,
                    timestamp_seconds: s.value.0,
                    labels: s.metric,
                });
            }
        }
        QueryData::Matrix(series) => {
            for s in series {
                let mut points = s
                    .values
                    .iter()
                    .map(|(ts, v)| -> Result<(f64, f64)> { Ok((*ts, parse_value(v)?)) })
                    .collect::<Result<Vec<(f64, f64)>>>()?;
                points.sort_by(|a, b| a.0.total_cmp(&b.0));
                samples.extend(points.into_iter().map(|(ts, value)| Sample {
                    labels: s.metric.clone(),
                    timestamp_seconds: ts,
                    value,
                }));
            }
        }
        QueryData::Scalar((ts, v)) => samples.push(Sample {
            labels: BTreeMap::new(),
            timestamp_seconds: ts,
            value: parse_value(&v)?,
        }),
        QueryData::Text(_) => {
            return Err(AssistantError::gateway(
                "Query returned a string result, expected numbers",
            ))
        }
    }

    Ok(samples)
}

pub struct HttpMetricsGateway {
    base_url: String,
    datasource_id: u32,
    api_key: String,
    mode: QueryMode,
    http: reqwest::Client,
}

impl HttpMetricsGateway {
    pub fn new(
        base_url: String,
        datasource_id: u32,
        api_key: String,
        mode: QueryMode,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AssistantError::Config(format!("Failed to build metrics HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            datasource_id,
            api_key,
            mode,
            http,
        })
    }

    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        Self::new(
            config.metrics_url.clone(),
            config.datasource_id,
            config.metrics_api_key.clone(),
            config.query_mode,
            config.http_timeout,
        )
    }

    fn endpoint(&self) -> String {
        let api = match self.mode {
            QueryMode::Instant => "query",
            QueryMode::Range => "query_range",
        };
        format!(
            "{}/api/datasources/proxy/{}/api/v1/{}",
            self.base_url, self.datasource_id, api
        )
    }

    fn params(&self, query: &CompiledQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![("query", query.text.clone())];
        if self.mode == QueryMode::Range {
            let window = query.time_range.duration().as_secs();
            let end = chrono::Utc::now().timestamp();
            let start = end - window as i64;
            let step = (window / RANGE_POINTS).max(1);
            params.push(("start", start.to_string()));
            params.push(("end", end.to_string()));
            params.push(("step", step.to_string()));
        }
        params
    }
}

#[async_trait]
impl MetricsGateway for HttpMetricsGateway {
    async fn query(&self, query: &CompiledQuery) -> Result<Vec<Sample>> {
        let url = self.endpoint();
        debug!("Querying {} with {}", url, query.text);

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .query(&self.params(query))
            .send()
            .await
            .map_err(|e| AssistantError::gateway(format!("Request to metrics backend failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AssistantError::gateway(format!("Failed to read metrics response: {}", e)))?;

        if !status.is_success() {
            warn!("Metrics backend returned HTTP {}", status);
            return Err(AssistantError::Gateway {
                status: Some(status.as_u16()),
                message: format!("Metrics backend returned HTTP {}", status.as_u16()),
                body: Some(body),
            });
        }

        parse_query_response(&body)
    }
}
