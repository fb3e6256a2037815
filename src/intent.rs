//! Intent Model
//!
//! The structured reading of one user question: which metric, how to reduce
//! it, and over what window.

use crate::error::{AssistantError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

lazy_static! {
    static ref DURATION_TOKEN: Regex = Regex::new(r"^([0-9]+)([smhd])$").unwrap();
}

/// Reduction applied over the compiled series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Avg,
    Max,
    Min,
    Sum,
    None,
}

impl Aggregation {
    pub const ALL: [Aggregation; 5] = [
        Aggregation::Avg,
        Aggregation::Max,
        Aggregation::Min,
        Aggregation::Sum,
        Aggregation::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Avg => "avg",
            Aggregation::Max => "max",
            Aggregation::Min => "min",
            Aggregation::Sum => "sum",
            Aggregation::None => "none",
        }
    }

    /// Name of the wrapping query function, `None` when no wrapping applies.
    pub fn function_name(&self) -> Option<&'static str> {
        match self {
            Aggregation::None => None,
            other => Some(other.as_str()),
        }
    }

    /// Word used in prose ("Average CPU usage ...").
    pub fn adjective(&self) -> Option<&'static str> {
        match self {
            Aggregation::Avg => Some("average"),
            Aggregation::Max => Some("maximum"),
            Aggregation::Min => Some("minimum"),
            Aggregation::Sum => Some("total"),
            Aggregation::None => None,
        }
    }
}

impl FromStr for Aggregation {
    type Err = AssistantError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "avg" => Ok(Aggregation::Avg),
            "max" => Ok(Aggregation::Max),
            "min" => Ok(Aggregation::Min),
            "sum" => Ok(Aggregation::Sum),
            "none" => Ok(Aggregation::None),
            other => Err(AssistantError::UnsupportedAggregation(format!(
                "'{}' is not one of avg, max, min, sum, none",
                other
            ))),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated duration token such as `5m` or `24h`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimeRange {
    token: String,
    duration: Duration,
}

impl TimeRange {
    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl FromStr for TimeRange {
    type Err = AssistantError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            AssistantError::InvalidTimeRange(format!(
                "'{}' is not a duration like 30s, 5m, 1h or 7d",
                s
            ))
        };

        let caps = DURATION_TOKEN.captures(s).ok_or_else(invalid)?;
        let amount: u64 = caps[1].parse().map_err(|_| invalid())?;
        if amount == 0 {
            return Err(invalid());
        }
        let unit_secs = match &caps[2] {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            _ => 86_400,
        };
        let secs = amount.checked_mul(unit_secs).ok_or_else(invalid)?;

        Ok(Self {
            token: s.to_string(),
            duration: Duration::from_secs(secs),
        })
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

/// Structured intent as produced by the extractor.
///
/// `aggregation` and `time_range` keep the raw tokens the extractor emitted;
/// the query compiler is what validates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Intent {
    pub metric: Option<String>,
    pub aggregation: String,
    pub time_range: String,
    pub confidence: f64,
    /// Short restatement of the question, used when phrasing the answer.
    #[serde(default, rename = "intent")]
    pub summary: Option<String>,
}

impl Intent {
    pub fn new(
        metric: impl Into<String>,
        aggregation: impl Into<String>,
        time_range: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            metric: Some(metric.into()),
            aggregation: aggregation.into(),
            time_range: time_range.into(),
            confidence,
            summary: None,
        }
    }

    /// The metric id, if the extractor named a non-blank one.
    pub fn metric_id(&self) -> Option<&str> {
        self.metric
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }

    /// Enforce the extractor contract: a named metric and a confidence in
    /// [0, 1] that clears `threshold`.
    pub fn validate(&self, threshold: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(AssistantError::IntentParse(format!(
                "confidence {} is outside [0, 1]",
                self.confidence
            )));
        }
        if self.metric_id().is_none() {
            return Err(AssistantError::IntentParse(
                "no metric could be identified".to_string(),
            ));
        }
        if self.confidence < threshold {
            return Err(AssistantError::IntentParse(format!(
                "metric '{}' identified with confidence {:.2}, below threshold {:.2}",
                self.metric_id().unwrap_or_default(),
                self.confidence,
                threshold
            )));
        }
        Ok(())
    }
}
