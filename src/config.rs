//! Process Configuration
//!
//! Everything the assistant needs from the environment, read once at startup.

use crate::error::{AssistantError, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MODEL: &str = "gpt-4";
const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_SCHEMA_PATH: &str = "schema.json";
const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:5000";

/// How the gateway asks the backend for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// One evaluation at "now" (`/api/v1/query`)
    Instant,
    /// A series covering the requested time range (`/api/v1/query_range`)
    Range,
}

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub metrics_url: String,
    pub metrics_api_key: String,
    pub datasource_id: u32,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_base_url: String,
    pub schema_path: PathBuf,
    pub confidence_threshold: f64,
    pub http_timeout: Duration,
    pub query_mode: QueryMode,
    pub server_addr: String,
}

impl AssistantConfig {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &str| {
            get(key).ok_or_else(|| {
                AssistantError::Config(format!("{} is required but not set", key))
            })
        };

        let metrics_url = required("GRAFANA_URL")?.trim_end_matches('/').to_string();
        let metrics_api_key = required("GRAFANA_API_KEY")?;
        let llm_api_key = required("OPENAI_API_KEY")?;

        let datasource_id = match get("GRAFANA_DATASOURCE_ID") {
            Some(raw) => raw.parse::<u32>().map_err(|_| {
                AssistantError::Config(format!("GRAFANA_DATASOURCE_ID must be an integer, got '{}'", raw))
            })?,
            None => 1,
        };

        let confidence_threshold = match get("INTENT_CONFIDENCE_THRESHOLD") {
            Some(raw) => {
                let value = raw.parse::<f64>().map_err(|_| {
                    AssistantError::Config(format!(
                        "INTENT_CONFIDENCE_THRESHOLD must be a number, got '{}'",
                        raw
                    ))
                })?;
                if !(0.0..=1.0).contains(&value) {
                    return Err(AssistantError::Config(format!(
                        "INTENT_CONFIDENCE_THRESHOLD must be between 0 and 1, got {}",
                        value
                    )));
                }
                value
            }
            None => 0.5,
        };

        let http_timeout = match get("HTTP_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(AssistantError::Config(format!(
                        "HTTP_TIMEOUT_SECS must be a positive integer, got '{}'",
                        raw
                    )))
                }
            },
            None => Duration::from_secs(10),
        };

        let query_mode = match get("METRICS_QUERY_MODE").as_deref() {
            None | Some("instant") => QueryMode::Instant,
            Some("range") => QueryMode::Range,
            Some(other) => {
                return Err(AssistantError::Config(format!(
                    "METRICS_QUERY_MODE must be 'instant' or 'range', got '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            metrics_url,
            metrics_api_key,
            datasource_id,
            llm_api_key,
            llm_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            llm_base_url: get("OPENAI_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            schema_path: get("SCHEMA_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCHEMA_PATH)),
            confidence_threshold,
            http_timeout,
            query_mode,
            server_addr: get("SERVER_ADDR").unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("GRAFANA_URL", "http://grafana:3000/"),
        ("GRAFANA_API_KEY", "glsa_token"),
        ("OPENAI_API_KEY", "sk-test"),
    ];

    #[test]
    fn test_defaults() {
        let config = AssistantConfig::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.metrics_url, "http://grafana:3000");
        assert_eq!(config.datasource_id, 1);
        assert_eq!(config.llm_model, "gpt-4");
        assert_eq!(config.llm_base_url, "https://api.openai.com/v1");
        assert_eq!(config.schema_path, PathBuf::from("schema.json"));
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.query_mode, QueryMode::Instant);
    }

    #[test]
    fn test_missing_required_value() {
        for missing in ["GRAFANA_URL", "GRAFANA_API_KEY", "OPENAI_API_KEY"] {
            let pairs: Vec<(&str, &str)> = REQUIRED
                .iter()
                .copied()
                .filter(|(k, _)| *k != missing)
                .collect();
            let err = AssistantConfig::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(err.is_fatal());
            assert!(err.to_string().contains(missing));
        }
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs[1] = ("GRAFANA_API_KEY", "   ");
        assert!(matches!(
            AssistantConfig::from_lookup(lookup(&pairs)),
            Err(AssistantError::Config(_))
        ));
    }

    #[test]
    fn test_malformed_optional_values() {
        for (key, value) in [
            ("INTENT_CONFIDENCE_THRESHOLD", "high"),
            ("INTENT_CONFIDENCE_THRESHOLD", "1.5"),
            ("GRAFANA_DATASOURCE_ID", "abc"),
            ("HTTP_TIMEOUT_SECS", "0"),
            ("METRICS_QUERY_MODE", "stream"),
        ] {
            let mut pairs = REQUIRED.to_vec();
            pairs.push((key, value));
            assert!(
                AssistantConfig::from_lookup(lookup(&pairs)).is_err(),
                "{}={} should be rejected",
                key,
                value
            );
        }
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("GRAFANA_DATASOURCE_ID", "7"),
            ("INTENT_CONFIDENCE_THRESHOLD", "0.8"),
            ("METRICS_QUERY_MODE", "range"),
            ("OPENAI_BASE_URL", "http://localhost:11434/v1/"),
        ]);
        let config = AssistantConfig::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.datasource_id, 7);
        assert_eq!(config.confidence_threshold, 0.8);
        assert_eq!(config.query_mode, QueryMode::Range);
        assert_eq!(config.llm_base_url, "http://localhost:11434/v1");
    }
}
